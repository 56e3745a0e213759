use std::path::{Path, PathBuf};

use crate::constants::RECORD_EXTENSION;
use crate::types::{Record, StoredRecord};

/// Source of memory records.
///
/// [`DirectoryStore`] keeps one JSON file per record; another backend only
/// has to provide the same four operations.
pub trait RecordStore {
    /// Every parseable record, aggregates included, in a stable order.
    fn entries(&self) -> Result<Vec<StoredRecord>, crate::Error>;

    /// Give the record at `original_filename` its canonical name. Returns the
    /// name the record is stored under afterwards: the canonical name, or
    /// `original_filename` when the canonical name is already taken.
    fn normalize(&self, record: &Record, original_filename: &str) -> Result<String, crate::Error>;

    /// Write each record under its canonical name, replacing any file of
    /// that name. Returns the names written.
    fn persist(&self, records: &[Record]) -> Result<Vec<String>, crate::Error>;

    /// Ordinary (non-aggregate) records.
    fn load_all(&self) -> Result<Vec<Record>, crate::Error> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|entry| !entry.record.is_aggregate())
            .map(|entry| entry.record)
            .collect())
    }

    /// Aggregate records, with their file names.
    fn load_aggregates(&self) -> Result<Vec<StoredRecord>, crate::Error> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|entry| entry.record.is_aggregate())
            .collect())
    }
}

/// Records stored as `<dir>/<name>.json`, one JSON object per file.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    dir: PathBuf,
}

impl DirectoryStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn read_record(path: &Path) -> Option<Record> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!("Skipping unreadable record {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<Record>(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::debug!("Skipping malformed record {}: {}", path.display(), e);
                None
            }
        }
    }
}

impl RecordStore for DirectoryStore {
    fn entries(&self) -> Result<Vec<StoredRecord>, crate::Error> {
        let dir_entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let suffix = format!(".{RECORD_EXTENSION}");
        let mut records = Vec::new();

        for entry in dir_entries.flatten() {
            let Ok(file_name) = entry.file_name().into_string() else {
                continue;
            };
            if !file_name.ends_with(&suffix) {
                continue;
            }

            if let Some(record) = Self::read_record(&entry.path()) {
                records.push(StoredRecord { file_name, record });
            }
        }

        // Directory iteration order is platform-defined.
        records.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(records)
    }

    fn normalize(&self, record: &Record, original_filename: &str) -> Result<String, crate::Error> {
        let stem = original_filename
            .strip_suffix(".json")
            .unwrap_or(original_filename);
        // An id-less record already carrying its date prefix keeps its name.
        let prefix = format!("{}_", record.date_prefix());
        let canonical = record.canonical_filename(stem.strip_prefix(&prefix).unwrap_or(stem));

        if canonical == original_filename {
            return Ok(canonical);
        }

        if !super::is_plain_file_name(&canonical) {
            tracing::warn!(
                "Not renaming {} -> {}: not a plain file name",
                original_filename,
                canonical
            );
            return Ok(original_filename.to_string());
        }

        let target = self.dir.join(&canonical);
        if target.exists() {
            tracing::debug!(
                "Not renaming {} -> {}: target already exists",
                original_filename,
                canonical
            );
            return Ok(original_filename.to_string());
        }

        match std::fs::rename(self.dir.join(original_filename), &target) {
            Ok(()) => Ok(canonical),
            Err(e) => {
                tracing::warn!(
                    "Failed to rename {} -> {}: {}",
                    original_filename,
                    canonical,
                    e
                );
                Ok(original_filename.to_string())
            }
        }
    }

    fn persist(&self, records: &[Record]) -> Result<Vec<String>, crate::Error> {
        std::fs::create_dir_all(&self.dir)?;

        let mut written = Vec::with_capacity(records.len());
        for record in records {
            let Some(id) = record.id.as_deref() else {
                return Err(crate::Error::Serialization(
                    "cannot persist a record without an id".to_string(),
                ));
            };
            let file_name = record.canonical_filename(id);
            if !super::is_plain_file_name(&file_name) {
                return Err(crate::Error::Serialization(format!(
                    "record file name '{file_name}' is not a plain file name"
                )));
            }
            let content = serde_json::to_string_pretty(record)?;
            super::write_atomically(&self.dir, &file_name, content.as_bytes())?;
            written.push(file_name);
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(dir: &Path, name: &str, value: serde_json::Value) {
        std::fs::write(dir.join(name), serde_json::to_string(&value).unwrap()).unwrap();
    }

    #[test]
    fn test_entries_skip_malformed_and_non_json() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();
        write(dir, "2024-01-01_a.json", json!({"id": "a", "date": "2024-01-01"}));
        std::fs::write(dir.join("broken.json"), "{not json").unwrap();
        std::fs::write(dir.join("string.json"), "\"just text\"").unwrap();
        std::fs::write(dir.join("notes.txt"), "{}").unwrap();

        let store = DirectoryStore::new(dir);
        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file_name, "2024-01-01_a.json");
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(&temp_dir.path().join("nope"));
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_load_all_excludes_aggregates() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();
        write(dir, "2024-01-01_a.json", json!({"id": "a", "date": "2024-01-01"}));
        write(
            dir,
            "2024-02-01_legacy-summary.json",
            json!({"id": "2024-02-01_legacy-summary", "type": "mega-summary", "content": ["x"]}),
        );

        let store = DirectoryStore::new(dir);
        let records = store.load_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id.as_deref(), Some("a"));

        let aggregates = store.load_aggregates().unwrap();
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].file_name, "2024-02-01_legacy-summary.json");
    }

    #[test]
    fn test_normalize_renames_and_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();
        write(dir, "tabs.json", json!({"id": "tabs", "date": "2024-05-06T07:00:00Z"}));

        let store = DirectoryStore::new(dir);
        let entry = store.entries().unwrap().remove(0);
        let first = store.normalize(&entry.record, &entry.file_name).unwrap();
        assert_eq!(first, "2024-05-06_tabs.json");
        assert!(dir.join("2024-05-06_tabs.json").exists());
        assert!(!dir.join("tabs.json").exists());

        let second = store.normalize(&entry.record, &first).unwrap();
        assert_eq!(second, first);
        assert_eq!(store.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_normalize_never_overwrites_existing_canonical_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();
        write(dir, "2024-01-01_a.json", json!({"id": "a", "date": "2024-01-01", "name": "first"}));
        write(dir, "copy.json", json!({"id": "a", "date": "2024-01-01", "name": "second"}));

        let store = DirectoryStore::new(dir);
        let record: Record =
            serde_json::from_value(json!({"id": "a", "date": "2024-01-01", "name": "second"}))
                .unwrap();
        let kept = store.normalize(&record, "copy.json").unwrap();
        assert_eq!(kept, "copy.json");

        let original: Record = serde_json::from_str(
            &std::fs::read_to_string(dir.join("2024-01-01_a.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(original.name.as_deref(), Some("first"));
        assert!(dir.join("copy.json").exists());
    }

    #[test]
    fn test_normalize_uses_file_stem_when_id_missing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();
        write(dir, "indent.json", json!({"name": "indent with tabs"}));

        let store = DirectoryStore::new(dir);
        let entry = store.entries().unwrap().remove(0);
        let name = store.normalize(&entry.record, &entry.file_name).unwrap();
        assert_eq!(name, "unknown_indent.json");
        assert_eq!(store.normalize(&entry.record, &name).unwrap(), name);
    }

    #[test]
    fn test_ids_with_path_separators_stay_inside_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("memory");
        std::fs::create_dir_all(&dir).unwrap();
        write(&dir, "escape.json", json!({"id": "../escape", "date": "2024-01-01"}));
        write(&dir, "nested.json", json!({"id": "sub/dir", "date": "2024-01-01"}));

        let store = DirectoryStore::new(&dir);
        for entry in store.entries().unwrap() {
            let name = store.normalize(&entry.record, &entry.file_name).unwrap();
            assert_eq!(name, entry.file_name);
        }
        assert!(dir.join("escape.json").exists());
        assert!(dir.join("nested.json").exists());
        assert!(!temp_dir.path().join("escape.json").exists());

        let record: Record = serde_json::from_value(json!({"id": "../escape"})).unwrap();
        assert!(store.persist(&[record]).is_err());
        let top_level: Vec<_> = std::fs::read_dir(temp_dir.path()).unwrap().collect();
        assert_eq!(top_level.len(), 1);
    }

    #[test]
    fn test_persist_writes_canonical_names() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("memory");
        let store = DirectoryStore::new(&dir);

        let record: Record =
            serde_json::from_value(json!({"id": "b", "date": "2024-06-01", "tags": ["y"]}))
                .unwrap();
        let written = store.persist(std::slice::from_ref(&record)).unwrap();
        assert_eq!(written, vec!["2024-06-01_b.json".to_string()]);
        assert_eq!(store.load_all().unwrap(), vec![record]);

        assert!(store.persist(&[Record::default()]).is_err());
    }
}
