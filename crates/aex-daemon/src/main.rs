use aex_adapter::Adapter;
use aex_artifacts::{ArtifactStore, FsArtifactStore};
use aex_core::PermissionMode;
use aex_engine::{Engine, EngineConfig, EchoToolExecutor};
use aex_events::{EventStore, SqliteEventStore};
use aex_mock_adapter::MockAdapter;
use aex_runtime_env::RuntimeEnvBuilder;
use aex_server::{build_app, AppState, ServerConfig};
use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
enum CliPermissionMode {
    Auto,
    Ask,
    Yolo,
}

impl From<CliPermissionMode> for PermissionMode {
    fn from(mode: CliPermissionMode) -> Self {
        match mode {
            CliPermissionMode::Auto => Self::Auto,
            CliPermissionMode::Ask => Self::Ask,
            CliPermissionMode::Yolo => Self::Yolo,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "aex-daemon", version, about = "agent-exec daemon")]
struct Args {
    /// Bind host.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Bind port. 0 picks an ephemeral port.
    #[arg(long, default_value_t = 8089)]
    port: u16,

    /// Directory holding the event store, artifact store, and runtime-env trees.
    #[arg(long)]
    data_dir: PathBuf,

    /// Comma-separated list of runtime names to register against the mock adapter.
    #[arg(long, default_value = "mock", value_delimiter = ',')]
    runtimes: Vec<String>,

    #[arg(long, default_value = "mock")]
    default_runtime: String,

    #[arg(long, value_enum, default_value = "auto")]
    default_permission_mode: CliPermissionMode,

    /// Root directory namespaced/ephemeral runtime environments are built under.
    #[arg(long)]
    workspace_root: Option<PathBuf>,

    /// Widen the tracing filter to debug level.
    #[arg(long)]
    debug: bool,

    #[arg(long, default_value_t = 32)]
    max_inflight_tasks: usize,

    #[arg(long, default_value_t = 64)]
    max_sse_clients: usize,

    #[arg(long, default_value_t = 60)]
    rate_limit_window_secs: u64,
}

#[tokio::main]
async fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(args).await {
        tracing::error!(error = ?err, "aex-daemon exited with an error");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let filter = if args.debug {
        EnvFilter::new("aex=debug,aex_server=debug,aex_engine=debug")
    } else {
        EnvFilter::new("aex=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tokio::fs::create_dir_all(&args.data_dir)
        .await
        .with_context(|| format!("create data dir {}", args.data_dir.display()))?;

    let workspace_root = args.workspace_root.clone().unwrap_or_else(|| args.data_dir.join("workspace"));
    tokio::fs::create_dir_all(&workspace_root)
        .await
        .with_context(|| format!("create workspace root {}", workspace_root.display()))?;

    let event_store: Arc<dyn EventStore> =
        Arc::new(SqliteEventStore::open(args.data_dir.join("events.sqlite3")).context("open event store")?);
    let artifact_store: Arc<dyn ArtifactStore> =
        Arc::new(FsArtifactStore::new(args.data_dir.join("artifacts")).await.context("open artifact store")?);

    let engine = Arc::new(Engine::new(
        Arc::clone(&event_store),
        Arc::clone(&artifact_store),
        Arc::new(EchoToolExecutor),
        EngineConfig::default(),
    ));

    let adapters = build_adapters(&args.runtimes);
    if !adapters.contains_key(&args.default_runtime) {
        anyhow::bail!("default runtime {} is not among --runtimes {:?}", args.default_runtime, args.runtimes);
    }

    let mut config = ServerConfig {
        default_runtime: args.default_runtime.clone(),
        default_permission_mode: args.default_permission_mode.into(),
        max_inflight_tasks: args.max_inflight_tasks,
        max_sse_clients: args.max_sse_clients,
        rate_limit_window: Duration::from_secs(args.rate_limit_window_secs),
        ..ServerConfig::default()
    };
    config.name = "aex-daemon".to_string();

    let runtime_env_builder = RuntimeEnvBuilder::new(workspace_root.clone());
    let state = Arc::new(AppState::new(config, event_store, artifact_store, engine, adapters, runtime_env_builder));
    let app = build_app(Arc::clone(&state));

    let bind = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&bind).await.with_context(|| format!("bind {bind}"))?;
    let local_addr = listener.local_addr().context("read bound local address")?;
    info!(bind = %local_addr, runtimes = ?args.runtimes, data_dir = %args.data_dir.display(), "aex-daemon listening");

    tokio::select! {
        result = axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>()) => {
            result.context("serve")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
            std::process::exit(130);
        }
    }

    Ok(())
}

fn build_adapters(names: &[String]) -> HashMap<String, Arc<dyn Adapter>> {
    names
        .iter()
        .map(|name| {
            let adapter: Arc<dyn Adapter> = Arc::new(MockAdapter::new(name.clone(), |_task_id, _input| Vec::new()));
            (name.clone(), adapter)
        })
        .collect()
}
