use rkyv::rancor::Error as RkyvError;
use rkyv::util::AlignedVec;
use std::path::{Path, PathBuf};

use super::manifest::{IndexManifest, MANIFEST_VERSION};
use super::{read_optional, remove_if_exists, write_atomically};
use crate::constants::{DOCS_FILENAME, NATIVE_INDEX_FILENAME, VECTORS_FILENAME};
use crate::search::{FlatL2Index, VectorMatrix};
use crate::types::Record;

/// Index artifacts loaded from disk. Empty when nothing consistent was found.
#[derive(Debug, Clone)]
pub struct PersistedIndex {
    pub records: Vec<Record>,
    pub vectors: VectorMatrix,
    /// Backend-native index, when one was written and matches `vectors`.
    pub native: Option<FlatL2Index>,
    pub manifest: Option<IndexManifest>,
}

impl PersistedIndex {
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            vectors: VectorMatrix::new(0),
            native: None,
            manifest: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The index artifact set in one directory.
#[derive(Debug, Clone)]
pub struct IndexFiles {
    dir: PathBuf,
}

/// Copy into an aligned buffer; rkyv rejects misaligned input.
fn aligned(bytes: &[u8]) -> AlignedVec {
    let mut aligned = AlignedVec::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    aligned
}

fn decode_vectors(bytes: &[u8]) -> Result<VectorMatrix, crate::Error> {
    rkyv::from_bytes::<VectorMatrix, RkyvError>(&aligned(bytes))
        .map_err(|e| crate::Error::Serialization(e.to_string()))
}

fn decode_native(bytes: &[u8]) -> Result<FlatL2Index, crate::Error> {
    rkyv::from_bytes::<FlatL2Index, RkyvError>(&aligned(bytes))
        .map_err(|e| crate::Error::Serialization(e.to_string()))
}

impl IndexFiles {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn docs_path(&self) -> PathBuf {
        self.dir.join(DOCS_FILENAME)
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.dir.join(VECTORS_FILENAME)
    }

    pub fn native_index_path(&self) -> PathBuf {
        self.dir.join(NATIVE_INDEX_FILENAME)
    }

    /// Replace the artifact set. `vectors` must have one row per record.
    ///
    /// Data files are written first and the manifest last. With no records
    /// only an empty `docs.json` is kept; stale vector files are removed.
    pub fn save(
        &self,
        records: &[Record],
        vectors: &VectorMatrix,
        native: Option<&FlatL2Index>,
        embedder: &str,
    ) -> Result<IndexManifest, crate::Error> {
        if records.len() != vectors.len() {
            return Err(crate::Error::Serialization(format!(
                "{} records but {} vectors",
                records.len(),
                vectors.len()
            )));
        }

        std::fs::create_dir_all(&self.dir)?;

        let docs = serde_json::to_vec_pretty(records)?;
        let mut manifest = IndexManifest::new(records.len(), vectors.dimension(), embedder);
        manifest.docs_checksum = crc32fast::hash(&docs);

        if records.is_empty() {
            remove_if_exists(&self.vectors_path())?;
            remove_if_exists(&self.native_index_path())?;
            write_atomically(&self.dir, DOCS_FILENAME, &docs)?;
            manifest.save(&self.dir)?;
            return Ok(manifest);
        }

        let encoded = rkyv::to_bytes::<RkyvError>(vectors)
            .map_err(|e| crate::Error::Serialization(e.to_string()))?;
        manifest.vectors_checksum = crc32fast::hash(encoded.as_slice());

        write_atomically(&self.dir, VECTORS_FILENAME, encoded.as_slice())?;
        write_atomically(&self.dir, DOCS_FILENAME, &docs)?;

        match native {
            Some(index) => {
                let encoded = rkyv::to_bytes::<RkyvError>(index)
                    .map_err(|e| crate::Error::Serialization(e.to_string()))?;
                write_atomically(&self.dir, NATIVE_INDEX_FILENAME, encoded.as_slice())?;
                manifest.native_index = true;
            }
            None => remove_if_exists(&self.native_index_path())?,
        }

        manifest.save(&self.dir)?;
        Ok(manifest)
    }

    /// Load the artifact set.
    ///
    /// Records without matching vectors (or the reverse), artifacts that
    /// disagree with the manifest, and undecodable files all load as an
    /// empty index; a missing or unusable `memory.index` only drops the
    /// native index.
    pub fn load(&self) -> Result<PersistedIndex, crate::Error> {
        let Some(docs_bytes) = read_optional(&self.docs_path())? else {
            tracing::debug!("No index found in {}", self.dir.display());
            return Ok(PersistedIndex::empty());
        };

        let records: Vec<Record> = match serde_json::from_slice(&docs_bytes) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Ignoring unreadable {}: {}", DOCS_FILENAME, e);
                return Ok(PersistedIndex::empty());
            }
        };

        let manifest = match IndexManifest::load(&self.dir) {
            Ok(manifest) => Some(manifest),
            Err(crate::Error::ManifestNotFound) => None,
            Err(crate::Error::Json(e)) => {
                tracing::warn!("Ignoring unreadable index manifest: {}", e);
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(ref m) = manifest
            && m.version != MANIFEST_VERSION
        {
            tracing::warn!(
                "Index manifest version {} is not {}; rebuild the index",
                m.version,
                MANIFEST_VERSION
            );
            return Ok(PersistedIndex::empty());
        }

        if let Some(ref m) = manifest
            && (m.record_count != records.len() as u64
                || m.docs_checksum != crc32fast::hash(&docs_bytes))
        {
            tracing::warn!("{} does not match the index manifest; rebuild the index", DOCS_FILENAME);
            return Ok(PersistedIndex::empty());
        }

        let vectors_bytes = read_optional(&self.vectors_path())?;

        let vectors = match vectors_bytes {
            None if records.is_empty() => VectorMatrix::new(0),
            None => {
                tracing::warn!(
                    "{} records but no {}; rebuild the index",
                    records.len(),
                    VECTORS_FILENAME
                );
                return Ok(PersistedIndex::empty());
            }
            Some(bytes) => {
                if let Some(ref m) = manifest
                    && m.vectors_checksum != crc32fast::hash(&bytes)
                {
                    tracing::warn!(
                        "{} does not match the index manifest; rebuild the index",
                        VECTORS_FILENAME
                    );
                    return Ok(PersistedIndex::empty());
                }
                match decode_vectors(&bytes) {
                    Ok(vectors) => vectors,
                    Err(e) => {
                        tracing::warn!("Ignoring unreadable {}: {}", VECTORS_FILENAME, e);
                        return Ok(PersistedIndex::empty());
                    }
                }
            }
        };

        if vectors.len() != records.len() {
            tracing::warn!(
                "Index holds {} records but {} vectors; rebuild the index",
                records.len(),
                vectors.len()
            );
            return Ok(PersistedIndex::empty());
        }

        if records.is_empty() {
            return Ok(PersistedIndex {
                manifest,
                ..PersistedIndex::empty()
            });
        }

        let native = self.load_native(&vectors);

        Ok(PersistedIndex {
            records,
            vectors,
            native,
            manifest,
        })
    }

    fn load_native(&self, vectors: &VectorMatrix) -> Option<FlatL2Index> {
        let bytes = match read_optional(&self.native_index_path()) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!("Cannot read {}: {}", NATIVE_INDEX_FILENAME, e);
                return None;
            }
        };

        match decode_native(&bytes) {
            Ok(index) if index.vectors() == vectors => Some(index),
            Ok(_) => {
                tracing::debug!("Ignoring stale {}", NATIVE_INDEX_FILENAME);
                None
            }
            Err(e) => {
                tracing::debug!("Ignoring unreadable {}: {}", NATIVE_INDEX_FILENAME, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| serde_json::from_value(json!({"id": format!("r{i}")})).unwrap())
            .collect()
    }

    fn vectors(n: usize) -> VectorMatrix {
        let rows: Vec<Vec<f32>> = (0..n).map(|i| vec![i as f32, 1.0, 0.5]).collect();
        VectorMatrix::from_rows(3, &rows).unwrap()
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let files = IndexFiles::new(temp_dir.path());
        let native = FlatL2Index::build(vectors(3));

        let manifest = files
            .save(&records(3), &vectors(3), Some(&native), "hash")
            .unwrap();
        assert!(manifest.native_index);

        let loaded = files.load().unwrap();
        assert_eq!(loaded.records, records(3));
        assert_eq!(loaded.vectors, vectors(3));
        assert_eq!(loaded.native, Some(native));
        assert_eq!(loaded.manifest, Some(manifest));
    }

    #[test]
    fn test_missing_native_index_is_not_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let files = IndexFiles::new(temp_dir.path());
        files.save(&records(2), &vectors(2), None, "hash").unwrap();

        assert!(!files.native_index_path().exists());
        let loaded = files.load().unwrap();
        assert_eq!(loaded.records.len(), 2);
        assert!(loaded.native.is_none());
    }

    #[test]
    fn test_no_artifacts_loads_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let loaded = IndexFiles::new(&temp_dir.path().join("indices")).load().unwrap();
        assert!(loaded.is_empty());
        assert!(loaded.vectors.is_empty());
    }

    #[test]
    fn test_records_without_vectors_load_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let files = IndexFiles::new(temp_dir.path());
        files.save(&records(2), &vectors(2), None, "hash").unwrap();
        std::fs::remove_file(files.vectors_path()).unwrap();

        assert!(files.load().unwrap().is_empty());
    }

    #[test]
    fn test_torn_artifacts_load_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let files = IndexFiles::new(temp_dir.path());
        files.save(&records(2), &vectors(2), None, "hash").unwrap();

        // docs.json from a different build than vectors.bin and the manifest.
        std::fs::write(
            files.docs_path(),
            serde_json::to_vec_pretty(&records(3)).unwrap(),
        )
        .unwrap();
        assert!(files.load().unwrap().is_empty());
    }

    #[test]
    fn test_other_manifest_version_loads_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let files = IndexFiles::new(temp_dir.path());
        let mut manifest = files.save(&records(2), &vectors(2), None, "hash").unwrap();
        assert_eq!(files.load().unwrap().records.len(), 2);

        manifest.version = MANIFEST_VERSION + 1;
        manifest.save(temp_dir.path()).unwrap();
        assert!(files.load().unwrap().is_empty());
    }

    #[test]
    fn test_count_mismatch_without_manifest_loads_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let files = IndexFiles::new(temp_dir.path());
        files.save(&records(2), &vectors(2), None, "hash").unwrap();
        std::fs::remove_file(IndexManifest::path(temp_dir.path())).unwrap();

        assert_eq!(files.load().unwrap().records.len(), 2);

        std::fs::write(
            files.docs_path(),
            serde_json::to_vec_pretty(&records(1)).unwrap(),
        )
        .unwrap();
        assert!(files.load().unwrap().is_empty());
    }

    #[test]
    fn test_empty_save_removes_stale_vectors() {
        let temp_dir = tempfile::tempdir().unwrap();
        let files = IndexFiles::new(temp_dir.path());
        let native = FlatL2Index::build(vectors(2));
        files
            .save(&records(2), &vectors(2), Some(&native), "hash")
            .unwrap();

        files.save(&[], &VectorMatrix::new(3), None, "hash").unwrap();
        assert!(files.docs_path().exists());
        assert!(!files.vectors_path().exists());
        assert!(!files.native_index_path().exists());
        assert!(files.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_rejects_misaligned_input() {
        let temp_dir = tempfile::tempdir().unwrap();
        let files = IndexFiles::new(temp_dir.path());
        assert!(files.save(&records(2), &vectors(1), None, "hash").is_err());
    }
}
