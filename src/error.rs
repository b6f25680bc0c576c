//! Error kinds surfaced by the archive, resolver and build layers.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reading or writing one of the two archive formats.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is not a {format}: bad magic", path.display())]
    BadMagic { path: PathBuf, format: &'static str },

    #[error("{} was built for another host runtime (expected magic {expected}, found {found})", path.display())]
    HostMagicMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("{}: unsupported format version {found} (expected {expected})", path.display())]
    UnsupportedVersion {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    #[error("{}: corrupt archive: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("{}: archive exceeds format limits ({what})", path.display())]
    TooLarge { path: PathBuf, what: String },

    #[error("entry '{name}' could not be decrypted: {reason}")]
    Decrypt { name: String, reason: String },

    #[error("entry '{name}' could not be decompressed: {source}")]
    Decompress {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("no entry named '{name}' in {}", path.display())]
    MissingEntry { name: String, path: PathBuf },

    #[error("failed to serialize the index of {}: {reason}", path.display())]
    Index { path: PathBuf, reason: String },
}

/// Adapter for `map_err` that attaches the path an I/O error happened on.
pub(crate) fn io_at(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Errors from the binary dependency resolver.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unresolved shared libraries: {}", names.join(", "))]
    Unresolved { names: Vec<String> },

    #[error("invalid library pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Fatal build-graph errors that must stop before anything is deleted.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("output {} conflicts with {}; refusing to remove it", output.display(), conflict.display())]
    OutputConflict { output: PathBuf, conflict: PathBuf },

    #[error("entry name '{0}' escapes the output directory")]
    UnsafeName(String),

    #[error("{step}: required input {} does not exist", path.display())]
    MissingInput { step: String, path: PathBuf },
}
