//! Persistence: the record directory and the index artifacts.
//!
//! Record files are managed through the [`RecordStore`] trait so the index
//! and retrieval layers do not depend on the directory layout. Index
//! artifacts (`docs.json`, `vectors.bin`, `memory.index`, `manifest.json`)
//! are written and validated as a set by [`IndexFiles`].

pub mod index_files;
pub mod manifest;
pub mod record_store;

pub use index_files::{IndexFiles, PersistedIndex};
pub use manifest::IndexManifest;
pub use record_store::{DirectoryStore, RecordStore};

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Write `content` to `dir/file_name` via a temp file and rename, so readers
/// never observe a half-written file.
pub(crate) fn write_atomically(
    dir: &Path,
    file_name: &str,
    content: &[u8],
) -> Result<(), crate::Error> {
    let path = dir.join(file_name);
    let temp_path = dir.join(format!("{file_name}.tmp"));

    let write_result = (|| -> Result<(), crate::Error> {
        let mut temp_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;

        temp_file.write_all(content)?;
        temp_file.flush()?;
        temp_file.sync_all()?;
        Ok(())
    })();

    if let Err(e) = write_result {
        // Best-effort cleanup of the temp file on write failure.
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }

    std::fs::rename(&temp_path, &path)?;

    #[cfg(unix)]
    {
        let dir_file = OpenOptions::new().read(true).open(dir)?;
        dir_file.sync_all()?;
    }
    Ok(())
}

/// True when `file_name` names an entry directly inside its directory: one
/// normal path component, no separators or `..`.
pub(crate) fn is_plain_file_name(file_name: &str) -> bool {
    let mut components = Path::new(file_name).components();
    matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    ) && !file_name.contains(['/', '\\'])
}

/// Remove a file, treating "already gone" as success.
pub(crate) fn remove_if_exists(path: &Path) -> Result<(), crate::Error> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Read a file, mapping "not found" to `None`.
pub(crate) fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, crate::Error> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
