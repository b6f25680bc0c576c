//! Incremental build graph.
//!
//! Every step is a [`Target`]: it knows its descriptor path, its output,
//! the configuration it was built with (its "guts"), and how to decide
//! whether a previous build is still valid. [`run`] loads the previous
//! fingerprint, rebuilds when anything is stale, and persists the new
//! fingerprint afterwards.
//!
//! # Steps
//!
//! - `analysis` - resolves the binary closure of the inputs
//! - `code_archive` - compiled modules into a code archive
//! - `container` - mixed entries into a container archive
//! - `exe` - bootstrap stub with the container appended
//! - `collect` - one-folder distribution directory
//! - `bundle` - macOS `.app` layout
//!
//! `pipeline::build` runs them in dependency order.

pub mod analysis;
pub mod bundle;
pub mod code_archive;
pub mod collect;
pub mod container;
pub mod context;
pub mod exe;
pub mod fingerprint;
pub mod manifest;
pub mod pipeline;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::cache::modified_since;
use crate::toc::{EntryKind, Toc};
use fingerprint::Previous;

pub use analysis::Analysis;
pub use bundle::BundleStep;
pub use code_archive::CodeArchiveStep;
pub use collect::CollectStep;
pub use container::ContainerStep;
pub use context::BuildContext;
pub use exe::ExecutableStep;
pub use manifest::{BuildManifest, BuildMode};
pub use pipeline::{build, BuildReport};

/// A unit of the build graph.
pub trait Target {
    /// Configuration attributes persisted between builds.
    type Guts: Serialize + DeserializeOwned;

    /// Step name used in descriptor file names and logs.
    const KIND: &'static str;

    fn descriptor(&self) -> &Path;

    fn output(&self) -> &Path;

    fn guts(&self) -> Self::Guts;

    /// Staleness checks against the previous fingerprint.
    fn checks(&self, previous: &Self::Guts) -> Vec<Check>;

    fn assemble(&mut self) -> Result<()>;

    /// Restore state from a still-valid previous build.
    fn reuse(&mut self, _previous: Self::Guts) -> Result<()> {
        Ok(())
    }
}

/// One staleness test.
#[derive(Debug, Clone)]
pub enum Check {
    /// A configuration field differs from the previous build.
    Equal { field: &'static str, changed: bool },
    /// Any referenced file is newer than the last build. With `with_source`
    /// set, the sibling source (that extension) of each compiled module is
    /// checked as well.
    Toc {
        field: &'static str,
        toc: Toc,
        with_source: Option<String>,
    },
    /// A single input file is newer than the last build.
    File { field: &'static str, path: PathBuf },
    /// Any file below a directory is newer than the last build.
    Tree { field: &'static str, root: PathBuf },
}

impl Check {
    pub fn equal<T: PartialEq>(field: &'static str, previous: &T, current: &T) -> Self {
        Check::Equal {
            field,
            changed: previous != current,
        }
    }

    pub fn toc(field: &'static str, toc: &Toc) -> Self {
        Check::Toc {
            field,
            toc: toc.clone(),
            with_source: None,
        }
    }

    /// Why this check finds the previous build stale, if it does.
    pub fn stale_reason(&self, built_at: SystemTime) -> Option<String> {
        match self {
            Check::Equal { field, changed } => changed.then(|| format!("{} changed", field)),
            Check::Toc {
                field,
                toc,
                with_source,
            } => toc.iter().find_map(|entry| {
                if entry.path.as_os_str().is_empty() || entry.kind == EntryKind::Dependency {
                    return None;
                }
                if modified_since(&entry.path, built_at) {
                    return Some(format!("{} changed ({})", field, entry.path.display()));
                }
                match with_source {
                    Some(ext) if entry.kind == EntryKind::CompiledModule => {
                        let source = entry.path.with_extension(ext);
                        modified_since(&source, built_at)
                            .then(|| format!("{} changed (source {})", field, source.display()))
                    }
                    _ => None,
                }
            }),
            Check::File { field, path } => {
                if !path.exists() {
                    Some(format!("{} missing ({})", field, path.display()))
                } else if modified_since(path, built_at) {
                    Some(format!("{} changed ({})", field, path.display()))
                } else {
                    None
                }
            }
            Check::Tree { field, root } => WalkDir::new(root)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .find(|e| modified_since(e.path(), built_at))
                .map(|e| format!("{} changed ({})", field, e.path().display())),
        }
    }
}

/// Result of running one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Assembled; the string says why the previous build couldn't be used.
    Built(String),
    Reused,
}

impl Outcome {
    pub fn was_built(&self) -> bool {
        matches!(self, Outcome::Built(_))
    }
}

/// Build `target` unless its previous build is still valid.
pub fn run<T: Target>(target: &mut T) -> Result<Outcome> {
    let reason = match fingerprint::load::<T::Guts>(target.descriptor(), T::KIND) {
        Previous::Missing => "no previous build".to_string(),
        Previous::Corrupt(why) => format!("previous fingerprint unusable: {}", why),
        Previous::Found { guts, built_at } => {
            let stale = if !target.output().exists() {
                Some(format!("output {} missing", target.output().display()))
            } else {
                target
                    .checks(&guts)
                    .iter()
                    .find_map(|check| check.stale_reason(built_at))
            };
            match stale {
                Some(reason) => reason,
                None => {
                    debug!(step = T::KIND, "previous build still valid");
                    target
                        .reuse(guts)
                        .with_context(|| format!("{}: failed to reuse previous build", T::KIND))?;
                    return Ok(Outcome::Reused);
                }
            }
        }
    };

    info!(step = T::KIND, reason = %reason, "building");
    target
        .assemble()
        .with_context(|| format!("{} step failed", T::KIND))?;
    fingerprint::save(target.descriptor(), T::KIND, &target.guts())?;
    Ok(Outcome::Built(reason))
}
