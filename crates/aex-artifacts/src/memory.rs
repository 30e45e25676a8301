use crate::{ArtifactStore, ArtifactStoreError, PutOptions};
use aex_core::{ArtifactId, ArtifactRecord, ArtifactRef};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// In-memory [`ArtifactStore`] used in tests and for sessions that do not
/// need artifacts to survive a restart.
pub struct MemoryArtifactStore {
    records: Mutex<HashMap<ArtifactId, ArtifactRecord>>,
}

impl MemoryArtifactStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, bytes: Vec<u8>, opts: PutOptions) -> Result<ArtifactRef, ArtifactStoreError> {
        if let Some(max) = opts.max_bytes {
            if bytes.len() > max {
                return Err(ArtifactStoreError::TooLarge { size: bytes.len(), max });
            }
        }
        let record = ArtifactRecord::new(
            ArtifactId::new_random(),
            opts.content_type.unwrap_or_else(|| "application/octet-stream".to_string()),
            bytes,
            opts.name,
        );
        let artifact_ref = record.as_ref();
        self.records.lock().await.insert(record.artifact_id.clone(), record);
        Ok(artifact_ref)
    }

    async fn get(&self, artifact_id: &ArtifactId) -> Result<Option<ArtifactRecord>, ArtifactStoreError> {
        Ok(self.records.lock().await.get(artifact_id).cloned())
    }
}
