//! Atomic JSON persistence for the file store.
//!
//! Writes go to a temp file carrying a PID+TID suffix, are synced to disk, and
//! are then renamed over the target so readers never observe a torn file.

use crate::error::{RegistryError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, OpenOptions};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// Read and parse a JSON file. `None` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(RegistryError::io_with_path(e, path)),
    };

    let data = serde_json::from_str(&contents).map_err(|e| RegistryError::Json {
        message: format!("failed to parse {}: {}", path.display(), e),
        source: Some(e),
    })?;

    Ok(Some(data))
}

/// Serialize `data` and atomically replace `path`, optionally keeping the
/// previous contents as `<file>.bak`.
pub fn write_json<T: Serialize>(path: &Path, data: &T, keep_backup: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| RegistryError::io_with_path(e, parent))?;
    }

    let temp_path = path.with_extension(format!("json.{}.{}.tmp", std::process::id(), thread_tag()));
    let serialized = serde_json::to_string_pretty(data)?;

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| RegistryError::io_with_path(e, &temp_path))?;
        file.write_all(serialized.as_bytes())
            .map_err(|e| RegistryError::io_with_path(e, &temp_path))?;
        file.sync_all()
            .map_err(|e| RegistryError::io_with_path(e, &temp_path))?;
    }

    if keep_backup && path.exists() {
        let backup_path = path.with_extension("json.bak");
        if let Err(e) = fs::copy(path, &backup_path) {
            warn!("Failed to create backup {}: {}", backup_path.display(), e);
        }
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(RegistryError::io_with_path(e, path));
    }

    debug!("Atomically wrote {}", path.display());
    Ok(())
}

/// Remove a file, treating "already gone" as success.
pub fn remove_file(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(RegistryError::io_with_path(e, path)),
    }
}

fn thread_tag() -> u64 {
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}
