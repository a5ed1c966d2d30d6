//! File helpers. Every write goes through a temporary file in the target
//! directory followed by a rename, so a failed run never leaves a
//! half-written artifact behind.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{ModelkitError, Result};

pub fn read_to_string(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    fs::read_to_string(path).map_err(|e| ModelkitError::io(path, e))
}

pub fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let data = read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

pub fn write_json_atomic<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let mut data = serde_json::to_string_pretty(value)?;
    data.push('\n');
    write_atomic(path, data.as_bytes())
}

/// Replace `path` with `contents` atomically.
pub fn write_atomic(path: impl AsRef<Path>, contents: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| ModelkitError::io(dir, e))?;
    tmp.write_all(contents)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| ModelkitError::io(tmp.path(), e))?;

    if let Ok(meta) = fs::metadata(path) {
        // Keep the original file mode; the temp file is created 0600.
        fs::set_permissions(tmp.path(), meta.permissions())
            .map_err(|e| ModelkitError::io(tmp.path(), e))?;
    }

    tmp.persist(path)
        .map_err(|e| ModelkitError::io(path, e.error))?;
    debug!(path = %path.display(), bytes = contents.len(), "wrote file");
    Ok(())
}
