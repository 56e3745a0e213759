use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::MANIFEST_FILENAME;

pub const MANIFEST_VERSION: u32 = 1;

/// Describes one generation of index artifacts.
///
/// Written last by a build, so a manifest that disagrees with `docs.json`
/// or `vectors.bin` means the artifacts on disk are not from the same build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub version: u32,
    pub record_count: u64,
    pub dimension: u32,
    /// Name of the embedding provider that produced the vectors.
    pub embedder: String,
    /// CRC32 of `docs.json`.
    pub docs_checksum: u32,
    /// CRC32 of `vectors.bin`; 0 when no vectors were written.
    pub vectors_checksum: u32,
    #[serde(default)]
    pub native_index: bool,
    pub created_at: i64,
}

impl IndexManifest {
    pub fn new(record_count: usize, dimension: usize, embedder: &str) -> Self {
        Self {
            version: MANIFEST_VERSION,
            record_count: record_count as u64,
            dimension: dimension as u32,
            embedder: embedder.to_string(),
            docs_checksum: 0,
            vectors_checksum: 0,
            native_index: false,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn path(indices_dir: &Path) -> PathBuf {
        indices_dir.join(MANIFEST_FILENAME)
    }

    pub fn load(indices_dir: &Path) -> Result<Self, crate::Error> {
        let path = Self::path(indices_dir);
        if !path.exists() {
            return Err(crate::Error::ManifestNotFound);
        }

        let content = std::fs::read_to_string(&path)?;

        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, indices_dir: &Path) -> Result<(), crate::Error> {
        let content = serde_json::to_string_pretty(self)?;
        super::write_atomically(indices_dir, MANIFEST_FILENAME, content.as_bytes())
    }
}
