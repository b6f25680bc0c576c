//! Content digests and modification-time helpers.
//!
//! SHA-256 digests detect actual content changes for the binary cache;
//! modification times drive the cheaper staleness checks of build steps.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::time::SystemTime;

/// SHA-256 of a file's contents as lowercase hex.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 of a byte string as lowercase hex.
pub fn hash_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Modification time of `path`, or `None` if it can't be read.
pub fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Whether `path` was modified after `when`.
///
/// A file that can't be stat'ed counts as unchanged: a vanished input is
/// reported by the step that reads it, not by the staleness check.
pub fn modified_since(path: &Path, when: SystemTime) -> bool {
    match mtime(path) {
        Some(modified) => modified > when,
        None => false,
    }
}
