//! JSON build manifest: what to freeze and how.
//!
//! ```json
//! {
//!   "name": "hello",
//!   "scripts": [{"name": "hello", "path": "hello.py"}],
//!   "modules": [{"name": "util", "path": "__cache__/util.pyc"}],
//!   "binaries": [{"name": "_ssl.so", "path": "/usr/lib/_ssl.so", "extension": true}],
//!   "datas": [{"name": "assets/logo.png", "path": "logo.png"}],
//!   "stub": "stubs/run",
//!   "mode": "onefile"
//! }
//! ```
//!
//! Relative paths are resolved against the manifest's directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::platform::TargetPlatform;
use crate::toc::{Entry, EntryKind, Toc};

/// One-file executable, or a directory holding the executable and its files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    #[default]
    Onefile,
    Onedir,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub path: PathBuf,
    /// Native interpreter extension rather than a plain shared library.
    #[serde(default)]
    pub extension: bool,
}

fn default_level() -> u32 {
    9
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildManifest {
    pub name: String,
    #[serde(default)]
    pub scripts: Vec<ManifestEntry>,
    #[serde(default)]
    pub modules: Vec<ManifestEntry>,
    #[serde(default)]
    pub binaries: Vec<ManifestEntry>,
    #[serde(default)]
    pub datas: Vec<ManifestEntry>,
    /// Prebuilt bootstrap stub for the target.
    pub stub: PathBuf,
    /// Runtime options frozen into the container.
    #[serde(default)]
    pub options: Vec<String>,
    /// zlib level for the code archive.
    #[serde(default = "default_level")]
    pub code_level: u32,
    /// Overrides `FREEZER_KEY`.
    #[serde(default)]
    pub key: Option<String>,
    /// Overrides `FREEZER_STRIP`.
    #[serde(default)]
    pub strip: Option<bool>,
    /// Overrides `FREEZER_UPX`.
    #[serde(default)]
    pub compress: Option<bool>,
    #[serde(default = "default_true")]
    pub console: bool,
    #[serde(default)]
    pub mode: BuildMode,
    /// Also produce a macOS `.app` bundle.
    #[serde(default)]
    pub bundle: bool,
    /// Bundle identifier; defaults to the program name.
    #[serde(default)]
    pub identifier: Option<String>,
    /// Target platform; defaults to the host.
    #[serde(default)]
    pub platform: Option<TargetPlatform>,
}

impl BuildManifest {
    /// Read a manifest and make its paths absolute.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let mut manifest: BuildManifest = serde_json::from_str(&text)
            .with_context(|| format!("Invalid manifest {}", path.display()))?;
        let base = path.parent().unwrap_or(Path::new("."));
        manifest.rebase(base);
        manifest.validate()?;
        Ok(manifest)
    }

    fn rebase(&mut self, base: &Path) {
        let absolute = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        for entry in self
            .scripts
            .iter_mut()
            .chain(self.modules.iter_mut())
            .chain(self.binaries.iter_mut())
            .chain(self.datas.iter_mut())
        {
            absolute(&mut entry.path);
        }
        absolute(&mut self.stub);
    }

    fn validate(&self) -> Result<()> {
        let name_ok = !self.name.is_empty()
            && !self.name.contains(['/', '\\'])
            && self.name != "."
            && self.name != "..";
        if !name_ok {
            anyhow::bail!("Program name '{}' is not a valid file name", self.name);
        }
        if self.scripts.is_empty() {
            anyhow::bail!("Manifest for '{}' lists no scripts", self.name);
        }
        Ok(())
    }

    pub fn target_platform(&self) -> TargetPlatform {
        self.platform.unwrap_or_else(TargetPlatform::host)
    }

    pub fn scripts_toc(&self, platform: TargetPlatform) -> Toc {
        to_toc(&self.scripts, platform, |_| EntryKind::Source)
    }

    pub fn modules_toc(&self, platform: TargetPlatform) -> Toc {
        to_toc(&self.modules, platform, |_| EntryKind::CompiledModule)
    }

    pub fn binaries_toc(&self, platform: TargetPlatform) -> Toc {
        to_toc(&self.binaries, platform, |e| {
            if e.extension {
                EntryKind::Extension
            } else {
                EntryKind::Binary
            }
        })
    }

    pub fn datas_toc(&self, platform: TargetPlatform) -> Toc {
        to_toc(&self.datas, platform, |_| EntryKind::Data)
    }
}

fn to_toc(entries: &[ManifestEntry], platform: TargetPlatform, kind: impl Fn(&ManifestEntry) -> EntryKind) -> Toc {
    let mut toc = Toc::for_platform(platform);
    toc.extend(entries.iter().map(|e| Entry::new(e.name.clone(), e.path.clone(), kind(e))));
    toc
}
