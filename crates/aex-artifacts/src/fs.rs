use crate::{ArtifactStore, ArtifactStoreError, PutOptions};
use aex_core::{ArtifactId, ArtifactRecord, ArtifactRef};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    artifact_id: String,
    content_type: String,
    content_hash: String,
    size_bytes: u64,
    name: Option<String>,
}

/// Filesystem-backed [`ArtifactStore`]: `data/<id>.bin` holds the bytes,
/// `meta/<id>.json` holds everything else. Artifact ids are always
/// server-generated, so no filename sanitization is needed.
pub struct FsArtifactStore {
    data_dir: PathBuf,
    meta_dir: PathBuf,
}

impl FsArtifactStore {
    pub async fn new(base_dir: impl Into<PathBuf>) -> Result<Self, ArtifactStoreError> {
        let base_dir = base_dir.into();
        let data_dir = base_dir.join("data");
        let meta_dir = base_dir.join("meta");
        tokio::fs::create_dir_all(&data_dir).await?;
        tokio::fs::create_dir_all(&meta_dir).await?;
        Ok(Self { data_dir, meta_dir })
    }

    fn data_path(&self, id: &ArtifactId) -> PathBuf {
        self.data_dir.join(format!("{}.bin", id.as_str()))
    }

    fn meta_path(&self, id: &ArtifactId) -> PathBuf {
        self.meta_dir.join(format!("{}.json", id.as_str()))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
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

        let meta = Meta {
            artifact_id: record.artifact_id.as_str().to_string(),
            content_type: record.content_type.clone(),
            content_hash: record.content_hash.clone(),
            size_bytes: record.bytes.len() as u64,
            name: record.name.clone(),
        };
        let meta_json = serde_json::to_vec_pretty(&meta)?;

        tokio::fs::write(self.data_path(&record.artifact_id), &record.bytes).await?;
        tokio::fs::write(self.meta_path(&record.artifact_id), meta_json).await?;

        Ok(artifact_ref)
    }

    async fn get(&self, artifact_id: &ArtifactId) -> Result<Option<ArtifactRecord>, ArtifactStoreError> {
        let meta_bytes = match tokio::fs::read(self.meta_path(artifact_id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta: Meta = serde_json::from_slice(&meta_bytes)?;
        let bytes = tokio::fs::read(self.data_path(artifact_id)).await?;

        Ok(Some(ArtifactRecord {
            artifact_id: ArtifactId::from(meta.artifact_id),
            content_type: meta.content_type,
            bytes,
            content_hash: meta.content_hash,
            name: meta.name,
        }))
    }
}
