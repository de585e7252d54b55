//! Write-then-rename file replacement.
//!
//! Every durable file (knowledge, identifier map, payloads, index) goes
//! through here so that a crash or I/O error leaves either the old or the
//! new content on disk, never a partial write.

use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically replaces `path` with `bytes`.
///
/// The temporary file lives in the destination directory so the final
/// rename never crosses filesystems.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Pretty-prints `value` as JSON and writes it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), JsonWriteError> {
    let json = serde_json::to_vec_pretty(value).map_err(JsonWriteError::Serialize)?;
    write_atomic(path, &json).map_err(JsonWriteError::Io)
}

/// Failure of [`write_json_atomic`], split so callers can map each side
/// onto their own error taxonomy.
#[derive(Debug)]
pub enum JsonWriteError {
    Serialize(serde_json::Error),
    Io(io::Error),
}
