//! Collect step: the one-folder distribution.
//!
//! Copies the executable and every entry into `distpath/<name>/`. The
//! destination is wiped first, so before touching it the step refuses any
//! layout where that would destroy its own inputs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};

use super::{BuildContext, Check, Target};
use crate::bincache::BinaryCache;
use crate::error::BuildError;
use crate::paths;
use crate::platform::TargetPlatform;
use crate::toc::{EntryKind, Toc};

#[derive(Debug, Serialize, Deserialize)]
pub struct CollectGuts {
    pub dest: PathBuf,
    pub executable: PathBuf,
    pub entries: Toc,
    pub strip: bool,
    pub upx: bool,
}

pub struct CollectStep {
    descriptor: PathBuf,
    dest: PathBuf,
    workpath: PathBuf,
    executable: PathBuf,
    entries: Toc,
    platform: TargetPlatform,
    cache_root: PathBuf,
    runtime_version: String,
    strip: bool,
    upx: bool,
}

impl CollectStep {
    pub fn new(ctx: &mut BuildContext, name: &str, executable: &Path, entries: Toc, strip: bool, upx: bool) -> Self {
        Self {
            descriptor: ctx.descriptor(Self::KIND),
            dest: ctx.distpath.join(name),
            workpath: ctx.workpath.clone(),
            executable: executable.to_path_buf(),
            entries,
            platform: ctx.platform,
            cache_root: ctx.config.cache_dir.clone(),
            runtime_version: ctx.config.host.version.clone(),
            strip,
            upx,
        }
    }

    /// Destination of `name` inside the collected directory.
    fn target_path(&self, name: &str) -> Result<PathBuf, BuildError> {
        let relative = Path::new(name);
        let safe = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe {
            return Err(BuildError::UnsafeName(name.to_string()));
        }
        Ok(self.dest.join(relative))
    }

    fn check_layout(&self) -> Result<(), BuildError> {
        let fold = self.platform.case_insensitive();
        let parents = self.entries.paths().filter_map(Path::parent);
        let mut protected: Vec<&Path> = vec![self.workpath.as_path()];
        protected.extend(self.executable.parent());
        protected.extend(parents);
        paths::check_removable(&self.dest, &protected, fold)
    }
}

impl Target for CollectStep {
    type Guts = CollectGuts;
    const KIND: &'static str = "Collect";

    fn descriptor(&self) -> &Path {
        &self.descriptor
    }

    fn output(&self) -> &Path {
        &self.dest
    }

    fn guts(&self) -> CollectGuts {
        CollectGuts {
            dest: self.dest.clone(),
            executable: self.executable.clone(),
            entries: self.entries.clone(),
            strip: self.strip,
            upx: self.upx,
        }
    }

    fn checks(&self, previous: &CollectGuts) -> Vec<Check> {
        vec![
            Check::equal("dest", &previous.dest, &self.dest),
            Check::equal("executable", &previous.executable, &self.executable),
            Check::equal("strip", &previous.strip, &self.strip),
            Check::equal("upx", &previous.upx, &self.upx),
            Check::equal("entries", &previous.entries, &self.entries),
            Check::File {
                field: "executable",
                path: self.executable.clone(),
            },
            Check::toc("entries", &self.entries),
        ]
    }

    fn assemble(&mut self) -> Result<()> {
        self.check_layout()?;
        // Validate every name before anything is deleted.
        let mut targets = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            if matches!(entry.kind, EntryKind::RuntimeOption | EntryKind::Dependency) {
                continue;
            }
            targets.push((entry, self.target_path(&entry.name)?));
        }

        if self.dest.exists() {
            fs::remove_dir_all(&self.dest)
                .with_context(|| format!("Failed to remove {}", self.dest.display()))?;
        }
        fs::create_dir_all(&self.dest)
            .with_context(|| format!("Failed to create {}", self.dest.display()))?;

        let mut cache = if self.strip || self.upx {
            Some(BinaryCache::open(
                &self.cache_root,
                &self.runtime_version,
                self.platform,
                self.strip,
                self.upx,
            )?)
        } else {
            None
        };

        let exe_name = self
            .executable
            .file_name()
            .context("executable path has no file name")?;
        fs::copy(&self.executable, self.dest.join(exe_name))
            .with_context(|| format!("Failed to copy {}", self.executable.display()))?;

        for (entry, target) in targets {
            let source = match cache.as_mut() {
                Some(cache) if entry.kind.is_native() => cache.resolve(&entry.path)?,
                _ => entry.path.clone(),
            };
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&source, &target)
                .with_context(|| format!("Failed to copy {} to {}", source.display(), target.display()))?;
            debug!(entry = %entry.name, "collected");
        }

        info!(dest = %self.dest.display(), entries = self.entries.len(), "collected distribution");
        Ok(())
    }
}
