//! Content-addressed cache of stripped / compressed native binaries.
//!
//! Stripping and UPX-compressing a library is slow, so the processed copy
//! is kept under
//! `<cache_root>/<runtime_version>/<platform>/bincache{strip}{compress}/`
//! together with an `index.json` mapping each cached file name to the
//! SHA-256 of the source it was made from. A copy is reused only when the
//! source digest still matches.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::cache;
use crate::platform::TargetPlatform;
use crate::process::{self, Cmd};

const INDEX_FILE: &str = "index.json";

pub struct BinaryCache {
    dir: PathBuf,
    platform: TargetPlatform,
    strip: bool,
    compress: bool,
    index: BTreeMap<String, String>,
}

impl BinaryCache {
    /// Open (creating if needed) the cache directory for this configuration.
    ///
    /// An unreadable index is treated as empty.
    pub fn open(
        cache_root: &Path,
        runtime_version: &str,
        platform: TargetPlatform,
        strip: bool,
        compress: bool,
    ) -> Result<Self> {
        let dir = cache_root
            .join(runtime_version)
            .join(platform.tag())
            .join(format!("bincache{}{}", strip as u8, compress as u8));
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create binary cache {}", dir.display()))?;

        let index = match fs::read_to_string(dir.join(INDEX_FILE)) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(cache = %dir.display(), error = %e, "binary cache index is corrupt, starting fresh");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };

        Ok(Self {
            dir,
            platform,
            strip,
            compress,
            index,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether this cache does anything at all.
    pub fn is_active(&self) -> bool {
        self.strip || self.compress
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Path of the processed copy of `source`, producing it if needed.
    ///
    /// Returns `source` unchanged when neither stripping nor compression is
    /// enabled.
    pub fn resolve(&mut self, source: &Path) -> Result<PathBuf> {
        if !self.is_active() {
            return Ok(source.to_path_buf());
        }

        let file_name = source
            .file_name()
            .with_context(|| format!("{} has no file name", source.display()))?
            .to_string_lossy()
            .into_owned();
        let key = self.platform.normalize_path(Path::new(&file_name));
        let cached = self.dir.join(&file_name);
        let digest = cache::hash_file(source)
            .with_context(|| format!("Failed to hash {}", source.display()))?;

        if cached.is_file() && self.index.get(&key) == Some(&digest) {
            debug!(binary = %source.display(), "binary cache hit");
            return Ok(cached);
        }

        debug!(binary = %source.display(), "binary cache miss");
        fs::copy(source, &cached).with_context(|| {
            format!("Failed to copy {} into {}", source.display(), self.dir.display())
        })?;
        make_writable(&cached)?;

        if self.strip {
            self.run_tool("strip", &cached);
        }
        if self.compress {
            self.run_tool("upx", &cached);
        }
        make_executable(&cached)?;

        self.index.insert(key, digest);
        self.save()?;
        Ok(cached)
    }

    /// Missing tools or tool failures keep the unmodified copy.
    fn run_tool(&self, tool: &str, target: &Path) {
        if !process::exists(tool) {
            warn!(tool, binary = %target.display(), "tool not found, keeping binary unmodified");
            return;
        }
        let cmd = match tool {
            "upx" => Cmd::new(tool).arg("-9").arg("-q").arg_path(target),
            _ => Cmd::new(tool).arg_path(target),
        };
        match cmd.allow_fail().run() {
            Ok(result) if result.success() => {}
            Ok(result) => warn!(tool, binary = %target.display(), stderr = result.stderr_trimmed(), "tool failed"),
            Err(e) => warn!(tool, binary = %target.display(), error = %e, "tool failed"),
        }
    }

    fn save(&self) -> Result<()> {
        let path = self.dir.join(INDEX_FILE);
        let text = serde_json::to_string_pretty(&self.index)?;
        fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))
    }
}

#[cfg(unix)]
fn make_writable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o200);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_writable(path: &Path) -> Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    perms.set_readonly(false);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(unix)]
pub(crate) fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
pub(crate) fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::OsFamily;

    const LINUX: TargetPlatform = TargetPlatform::new(OsFamily::Linux, 64);

    #[test]
    fn test_inactive_cache_returns_source() {
        let root = tempfile::tempdir().unwrap();
        let lib = root.path().join("libfoo.so");
        fs::write(&lib, b"\x7fELF").unwrap();

        let mut cache = BinaryCache::open(&root.path().join("cache"), "3.12", LINUX, false, false).unwrap();
        assert_eq!(cache.resolve(&lib).unwrap(), lib);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_directory_layout() {
        let root = tempfile::tempdir().unwrap();
        let cache = BinaryCache::open(root.path(), "3.12", LINUX, true, false).unwrap();
        assert_eq!(cache.dir(), root.path().join("3.12/linux-64bit/bincache10"));
        assert!(cache.dir().is_dir());
    }

    #[test]
    fn test_copy_reused_until_source_changes() {
        let root = tempfile::tempdir().unwrap();
        let lib = root.path().join("libfoo.so");
        fs::write(&lib, b"not really a library").unwrap();
        let cache_root = root.path().join("cache");

        let mut cache = BinaryCache::open(&cache_root, "3.12", LINUX, true, false).unwrap();
        let cached = cache.resolve(&lib).unwrap();
        assert_ne!(cached, lib);
        assert!(cached.starts_with(cache.dir()));
        assert_eq!(cache.len(), 1);

        // Reopened cache reads the persisted index.
        let mut reopened = BinaryCache::open(&cache_root, "3.12", LINUX, true, false).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.resolve(&lib).unwrap(), cached);

        let digest_before = reopened.index.values().next().cloned();
        fs::write(&lib, b"a different library").unwrap();
        reopened.resolve(&lib).unwrap();
        assert_ne!(reopened.index.values().next().cloned(), digest_before);
    }

    #[test]
    fn test_corrupt_index_starts_fresh() {
        let root = tempfile::tempdir().unwrap();
        let cache = BinaryCache::open(root.path(), "3.12", LINUX, false, true).unwrap();
        fs::write(cache.dir().join(INDEX_FILE), b"{ not json").unwrap();
        let reopened = BinaryCache::open(root.path(), "3.12", LINUX, false, true).unwrap();
        assert!(reopened.is_empty());
    }
}
