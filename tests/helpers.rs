//! Shared test utilities for freezer tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

use freezer::config::Config;
use freezer::depend::{DependencyWalker, Reference};

/// Test environment with temporary source, work, dist and cache directories.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Project root simulation
    pub base_dir: PathBuf,
    /// Input files
    pub src: PathBuf,
    pub work: PathBuf,
    pub dist: PathBuf,
    pub cache: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base_dir = temp_dir.path().to_path_buf();
        let src = base_dir.join("src");
        fs::create_dir_all(&src).expect("Failed to create src dir");

        Self {
            src,
            work: base_dir.join("build"),
            dist: base_dir.join("dist"),
            cache: base_dir.join("cache"),
            base_dir,
            _temp_dir: temp_dir,
        }
    }

    /// Config pointing every directory into the temp dir.
    pub fn config(&self) -> Config {
        self.config_with(&[])
    }

    pub fn config_with(&self, extra: &[(&str, &str)]) -> Config {
        let mut vars: HashMap<String, String> = HashMap::new();
        vars.insert("FREEZER_WORKPATH".into(), self.work.display().to_string());
        vars.insert("FREEZER_DISTPATH".into(), self.dist.display().to_string());
        vars.insert("FREEZER_CACHE_DIR".into(), self.cache.display().to_string());
        for (k, v) in extra {
            vars.insert(k.to_string(), v.to_string());
        }
        Config::from_vars(&self.base_dir, &vars)
    }

    /// Write `contents` to `src/<relative>`, creating parents.
    pub fn write(&self, relative: &str, contents: &[u8]) -> PathBuf {
        let path = self.src.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        fs::write(&path, contents).expect("Failed to write test file");
        path
    }

    /// Write a JSON manifest to the base directory.
    pub fn manifest(&self, json: &str) -> PathBuf {
        let path = self.base_dir.join("app.json");
        fs::write(&path, json).expect("Failed to write manifest");
        path
    }
}

/// Push a file's modification time an hour into the future, so it is
/// unambiguously newer than any fingerprint written during the test.
pub fn touch_future(path: &Path) {
    let later = SystemTime::now() + Duration::from_secs(3600);
    fs::File::options()
        .write(true)
        .open(path)
        .expect("Failed to open file for touch")
        .set_modified(later)
        .expect("Failed to set mtime");
}

/// Dependency walker backed by a fixed table, keyed by binary path.
#[derive(Default, Clone)]
pub struct TableWalker {
    table: HashMap<PathBuf, Vec<Reference>>,
}

impl TableWalker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(mut self, binary: &Path, names: &[&str]) -> Self {
        self.table
            .entry(binary.to_path_buf())
            .or_default()
            .extend(names.iter().map(|n| Reference::new(*n)));
        self
    }

    pub fn boxed(self) -> Box<dyn DependencyWalker> {
        Box::new(self)
    }
}

impl DependencyWalker for TableWalker {
    fn references(&self, binary: &Path) -> Vec<Reference> {
        self.table.get(binary).cloned().unwrap_or_default()
    }
}
