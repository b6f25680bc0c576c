//! freezer library exports.
//!
//! The binary is a thin CLI over these modules; integration tests use them
//! directly.

pub mod archive;
pub mod bincache;
pub mod build;
pub mod cache;
pub mod config;
pub mod depend;
pub mod error;
pub mod paths;
pub mod platform;
pub mod process;
pub mod timing;
pub mod toc;

pub use error::{ArchiveError, BuildError, ResolveError};
pub use platform::{HostRuntime, OsFamily, TargetPlatform};
pub use toc::{Entry, EntryKind, Toc};
