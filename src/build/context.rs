//! Build context shared across all build steps.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::platform::TargetPlatform;

/// Paths and settings for one build.
pub struct BuildContext {
    /// Descriptors, warning files and intermediate archives
    pub workpath: PathBuf,
    /// Finished artifacts
    pub distpath: PathBuf,
    pub platform: TargetPlatform,
    pub config: Config,
    counters: HashMap<&'static str, usize>,
}

impl BuildContext {
    /// Create the context, making sure the work and dist directories exist.
    ///
    /// The work directory is namespaced by the program name so two
    /// programs can share one configured workpath.
    pub fn new(config: Config, name: &str, platform: TargetPlatform) -> Result<Self> {
        let workpath = config.workpath.join(name);
        let distpath = config.distpath.clone();
        for dir in [&workpath, &distpath] {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(Self {
            workpath,
            distpath,
            platform,
            config,
            counters: HashMap::new(),
        })
    }

    /// Next descriptor path for a step kind: `out00-Analysis.toc`,
    /// `out01-Analysis.toc`, ...
    ///
    /// Numbering is per kind and follows program order, so the same build
    /// script maps each step to the same descriptor on every run.
    pub fn descriptor(&mut self, kind: &'static str) -> PathBuf {
        let counter = self.counters.entry(kind).or_insert(0);
        let path = self.workpath.join(format!("out{:02}-{}.toc", counter, kind));
        *counter += 1;
        path
    }

    /// Warning report path for a descriptor: `warn-<descriptor stem>.txt`.
    pub fn warnfile(descriptor: &Path) -> PathBuf {
        let stem = descriptor
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        descriptor.with_file_name(format!("warn-{}.txt", stem))
    }

    pub fn work_file(&self, name: &str) -> PathBuf {
        self.workpath.join(name)
    }
}
