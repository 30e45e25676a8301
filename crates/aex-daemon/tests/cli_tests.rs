//! Integration tests for the `aex-daemon` binary's CLI surface.

use assert_cmd::Command;
use predicates::str::contains;

fn aex_daemon() -> Command {
    Command::cargo_bin("aex-daemon").expect("binary `aex-daemon` should be built")
}

#[test]
fn help_flag_prints_usage() {
    aex_daemon()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("agent-exec daemon"))
        .stdout(contains("--data-dir"))
        .stdout(contains("--runtimes"));
}

#[test]
fn version_flag_prints_version() {
    aex_daemon()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn missing_required_data_dir_exits_with_argument_error() {
    aex_daemon().assert().failure().code(1).stderr(contains("data-dir"));
}

#[test]
fn rejects_default_runtime_absent_from_runtimes_list() {
    let dir = tempfile::tempdir().expect("tempdir");
    aex_daemon()
        .arg("--data-dir")
        .arg(dir.path())
        .arg("--port")
        .arg("0")
        .arg("--runtimes")
        .arg("alpha,beta")
        .arg("--default-runtime")
        .arg("gamma")
        .assert()
        .failure()
        .code(1);
}
