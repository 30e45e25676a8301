//! Content-addressed artifact store.
//!
//! Artifacts are immutable once written and never partially readable:
//! `get` returns either every byte or nothing. [`MemoryArtifactStore`]
//! backs tests; [`FsArtifactStore`] persists to `data/<id>.bin` and
//! `meta/<id>.json` under a data directory, surviving restart.

mod fs;
mod memory;

pub use fs::FsArtifactStore;
pub use memory::MemoryArtifactStore;

use aex_core::{ArtifactId, ArtifactRecord, ArtifactRef};
use async_trait::async_trait;

/// The inline limit below which the engine keeps a tool result in the
/// event payload instead of offloading it to the artifact store.
pub const INLINE_LIMIT_BYTES: usize = 8_000;

/// The length of the preview string attached when a result is offloaded.
pub const PREVIEW_LIMIT_CHARS: usize = 512;

#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub name: Option<String>,
    /// Rejects the write with [`ArtifactStoreError::TooLarge`] if set and
    /// `bytes.len()` exceeds it.
    pub max_bytes: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactStoreError {
    #[error("artifact of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },
    #[error("artifact store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("artifact metadata corrupt: {0}")]
    Serde(#[from] serde_json::Error),
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, bytes: Vec<u8>, opts: PutOptions) -> Result<ArtifactRef, ArtifactStoreError>;

    async fn get(&self, artifact_id: &ArtifactId) -> Result<Option<ArtifactRecord>, ArtifactStoreError>;
}

/// The outcome of [`store_tool_result`]: either the bytes are small enough
/// to stay inline, or they were offloaded and a preview is returned
/// alongside the reference.
#[derive(Debug, Clone)]
pub enum StoredResult {
    Inline { text: String },
    Offloaded { result_ref: ArtifactRef, preview: String },
}

/// `maybeStoreToolResult`: returns tool output inline when it fits under
/// [`INLINE_LIMIT_BYTES`], otherwise stores it and returns a reference
/// plus a [`PREVIEW_LIMIT_CHARS`]-character preview.
pub async fn store_tool_result(
    store: &dyn ArtifactStore,
    bytes: &[u8],
    content_type: &str,
) -> Result<StoredResult, ArtifactStoreError> {
    let text = String::from_utf8_lossy(bytes).into_owned();
    if bytes.len() <= INLINE_LIMIT_BYTES {
        return Ok(StoredResult::Inline { text });
    }

    let preview: String = text.chars().take(PREVIEW_LIMIT_CHARS).collect();
    let result_ref = store
        .put(
            bytes.to_vec(),
            PutOptions {
                content_type: Some(content_type.to_string()),
                name: None,
                max_bytes: None,
            },
        )
        .await?;
    Ok(StoredResult::Offloaded { result_ref, preview })
}

#[cfg(test)]
mod contract_tests {
    use super::*;

    async fn assert_round_trips(store: &dyn ArtifactStore) {
        let bytes = b"hello world".to_vec();
        let r = store
            .put(
                bytes.clone(),
                PutOptions {
                    content_type: Some("text/plain".to_string()),
                    name: Some("greeting".to_string()),
                    max_bytes: None,
                },
            )
            .await
            .unwrap();
        let record = store.get(&r.artifact_id).await.unwrap().unwrap();
        assert_eq!(record.bytes, bytes);
        assert_eq!(record.content_hash, r.content_hash);
    }

    async fn assert_missing_is_none(store: &dyn ArtifactStore) {
        let missing = store.get(&ArtifactId::from("does-not-exist")).await.unwrap();
        assert!(missing.is_none());
    }

    async fn assert_oversize_refused(store: &dyn ArtifactStore) {
        let err = store
            .put(
                vec![0u8; 100],
                PutOptions {
                    content_type: None,
                    name: None,
                    max_bytes: Some(10),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactStoreError::TooLarge { size: 100, max: 10 }));
    }

    #[tokio::test]
    async fn memory_store_satisfies_the_contract() {
        assert_round_trips(&MemoryArtifactStore::new()).await;
        assert_missing_is_none(&MemoryArtifactStore::new()).await;
        assert_oversize_refused(&MemoryArtifactStore::new()).await;
    }

    #[tokio::test]
    async fn fs_store_satisfies_the_contract() {
        let dir = tempfile::tempdir().unwrap();
        assert_round_trips(&FsArtifactStore::new(dir.path()).await.unwrap()).await;
        assert_missing_is_none(&FsArtifactStore::new(dir.path()).await.unwrap()).await;
        assert_oversize_refused(&FsArtifactStore::new(dir.path()).await.unwrap()).await;
    }

    #[tokio::test]
    async fn small_results_stay_inline() {
        let store = MemoryArtifactStore::new();
        let result = store_tool_result(&store, b"short output", "text/plain").await.unwrap();
        assert!(matches!(result, StoredResult::Inline { .. }));
    }

    #[tokio::test]
    async fn oversized_results_are_offloaded_with_a_preview() {
        let store = MemoryArtifactStore::new();
        let big = "x".repeat(INLINE_LIMIT_BYTES + 1);
        let result = store_tool_result(&store, big.as_bytes(), "text/plain").await.unwrap();
        match result {
            StoredResult::Offloaded { preview, result_ref } => {
                assert_eq!(preview.len(), PREVIEW_LIMIT_CHARS);
                assert_eq!(result_ref.size_bytes, (INLINE_LIMIT_BYTES + 1) as u64);
            }
            StoredResult::Inline { .. } => panic!("expected offload"),
        }
    }
}
