//! Shared persistence utilities: atomic file writes and content digests.
//!
//! Every durable artifact (status record, lineage files, predictions) goes
//! through these helpers so that a crash never leaves a half-written file at
//! its final path.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

/// Atomically write raw bytes to a file.
///
/// The temporary sibling is flushed to disk before the rename so the final
/// path only ever holds complete contents.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    write_synced(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Write bytes to `path` and fsync the file before returning.
pub fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

/// Best-effort fsync of a directory so renames inside it are durable.
#[cfg(unix)]
pub fn sync_dir(path: &Path) {
    if let Ok(dir) = File::open(path) {
        let _ = dir.sync_all();
    }
}

#[cfg(not(unix))]
pub fn sync_dir(_path: &Path) {}

/// Hex-encoded SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
