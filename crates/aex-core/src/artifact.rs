//! Content-addressed artifacts: large payloads offloaded from events.

use crate::canonical::sha256_prefixed;
use crate::ids::ArtifactId;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The bytes-free projection of an [`Artifact`], referenced from event
/// payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactRef {
    pub artifact_id: ArtifactId,
    pub content_type: String,
    pub size_bytes: u64,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A complete artifact record, including its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub artifact_id: ArtifactId,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub content_hash: String,
    pub name: Option<String>,
}

impl ArtifactRecord {
    #[must_use]
    pub fn new(artifact_id: ArtifactId, content_type: String, bytes: Vec<u8>, name: Option<String>) -> Self {
        let content_hash = sha256_prefixed(&bytes);
        Self {
            artifact_id,
            content_type,
            bytes,
            content_hash,
            name,
        }
    }

    #[must_use]
    pub fn as_ref(&self) -> ArtifactRef {
        ArtifactRef {
            artifact_id: self.artifact_id.clone(),
            content_type: self.content_type.clone(),
            size_bytes: self.bytes.len() as u64,
            content_hash: self.content_hash.clone(),
            name: self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_computed_from_bytes() {
        let rec = ArtifactRecord::new(ArtifactId::new_random(), "text/plain".into(), b"hello".to_vec(), None);
        assert_eq!(rec.content_hash, sha256_prefixed(b"hello"));
    }

    #[test]
    fn as_ref_drops_bytes_but_keeps_size() {
        let rec = ArtifactRecord::new(ArtifactId::new_random(), "text/plain".into(), b"hello".to_vec(), None);
        let r = rec.as_ref();
        assert_eq!(r.size_bytes, 5);
    }
}
