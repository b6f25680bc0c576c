//! Configuration management for freezer.
//!
//! Reads configuration from a `.env` file and environment variables.
//! Environment variables take precedence over the `.env` file.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::platform::HostRuntime;

/// Freezer configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Scratch directory for descriptors and intermediate archives (default: build)
    pub workpath: PathBuf,
    /// Where finished executables land (default: dist)
    pub distpath: PathBuf,
    /// Root of the binary cache (default: ~/.cache/freezer)
    pub cache_dir: PathBuf,
    /// Passphrase for code archive encryption
    pub key: Option<String>,
    /// Strip native binaries before packaging
    pub strip: bool,
    /// UPX-compress native binaries before packaging
    pub upx: bool,
    /// Extra library exclude patterns
    pub excludes: Vec<String>,
    /// Extra library include patterns, overriding excludes
    pub includes: Vec<String>,
    /// Extra directories searched for shared libraries
    pub search_path: Vec<PathBuf>,
    /// Fail the build on unresolved libraries
    pub strict: bool,
    /// Interpreter the frozen modules were compiled for
    pub host: HostRuntime,
}

impl Config {
    /// Load configuration from `base_dir/.env` and the environment.
    pub fn load(base_dir: &Path) -> Self {
        let mut vars = HashMap::new();

        let env_path = base_dir.join(".env");
        if env_path.exists() {
            match dotenvy::from_path_iter(&env_path) {
                Ok(items) => {
                    for item in items {
                        match item {
                            Ok((key, value)) => {
                                vars.insert(key, value);
                            }
                            Err(e) => warn!(file = %env_path.display(), error = %e, "skipping bad .env line"),
                        }
                    }
                }
                Err(e) => warn!(file = %env_path.display(), error = %e, "cannot read .env"),
            }
        }

        // Environment variables override .env file
        vars.extend(env::vars());

        Self::from_vars(base_dir, &vars)
    }

    /// Build a config from an explicit variable map.
    pub fn from_vars(base_dir: &Path, vars: &HashMap<String, String>) -> Self {
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());
        let dir = |key: &str, default: PathBuf| {
            get(key)
                .map(|s| {
                    let path = PathBuf::from(s);
                    if path.is_absolute() {
                        path
                    } else {
                        base_dir.join(path)
                    }
                })
                .unwrap_or(default)
        };
        let flag = |key: &str| get(key).map(parse_flag).unwrap_or(false);
        let list = |key: &str| -> Vec<String> {
            get(key)
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default()
        };

        let default_cache = dirs::cache_dir()
            .map(|d| d.join("freezer"))
            .unwrap_or_else(|| base_dir.join(".cache/freezer"));

        let mut host = HostRuntime::default();
        if let Some(hex) = get("FREEZER_HOST_MAGIC") {
            match HostRuntime::parse_magic(hex) {
                Some(magic) => host.magic = magic,
                None => warn!(value = hex, "FREEZER_HOST_MAGIC is not 8 hex digits, using default"),
            }
        }
        if let Some(version) = get("FREEZER_HOST_VERSION") {
            host.version = version.to_string();
        }
        if let Some(lib) = get("FREEZER_HOST_LIB") {
            host.lib_name = lib.to_string();
        }

        Self {
            workpath: dir("FREEZER_WORKPATH", base_dir.join("build")),
            distpath: dir("FREEZER_DISTPATH", base_dir.join("dist")),
            cache_dir: dir("FREEZER_CACHE_DIR", default_cache),
            key: get("FREEZER_KEY").map(String::from),
            strip: flag("FREEZER_STRIP"),
            upx: flag("FREEZER_UPX"),
            excludes: list("FREEZER_EXCLUDE"),
            includes: list("FREEZER_INCLUDE"),
            search_path: get("FREEZER_PATH")
                .map(|s| env::split_paths(s).collect())
                .unwrap_or_default(),
            strict: flag("FREEZER_STRICT"),
            host,
        }
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  FREEZER_WORKPATH: {}", self.workpath.display());
        println!("  FREEZER_DISTPATH: {}", self.distpath.display());
        println!("  FREEZER_CACHE_DIR: {}", self.cache_dir.display());
        println!("  FREEZER_KEY: {}", if self.key.is_some() { "(set)" } else { "(none)" });
        println!("  FREEZER_STRIP: {}", self.strip);
        println!("  FREEZER_UPX: {}", self.upx);
        println!("  FREEZER_EXCLUDE: {}", self.excludes.join(","));
        println!("  FREEZER_INCLUDE: {}", self.includes.join(","));
        let search: Vec<String> = self.search_path.iter().map(|p| p.display().to_string()).collect();
        println!("  FREEZER_PATH: {}", search.join(":"));
        println!("  FREEZER_STRICT: {}", self.strict);
        println!("  Host runtime: {} (magic {}, {})", self.host.version, self.host.magic_hex(), self.host.lib_name);
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults() {
        let base = Path::new("/project");
        let config = Config::from_vars(base, &HashMap::new());
        assert_eq!(config.workpath, base.join("build"));
        assert_eq!(config.distpath, base.join("dist"));
        assert!(config.key.is_none());
        assert!(!config.strip && !config.upx && !config.strict);
        assert!(config.excludes.is_empty());
        assert_eq!(config.host, HostRuntime::default());
    }

    #[test]
    fn test_overrides() {
        let base = Path::new("/project");
        let config = Config::from_vars(
            base,
            &vars(&[
                ("FREEZER_WORKPATH", "scratch"),
                ("FREEZER_DISTPATH", "/out"),
                ("FREEZER_KEY", "secret"),
                ("FREEZER_STRIP", "yes"),
                ("FREEZER_UPX", "0"),
                ("FREEZER_EXCLUDE", "libfoo, ^libbar\\.so,"),
                ("FREEZER_HOST_MAGIC", "0d0d0a0b"),
                ("FREEZER_HOST_VERSION", "3.13"),
            ]),
        );
        assert_eq!(config.workpath, base.join("scratch"));
        assert_eq!(config.distpath, PathBuf::from("/out"));
        assert_eq!(config.key.as_deref(), Some("secret"));
        assert!(config.strip);
        assert!(!config.upx);
        assert_eq!(config.excludes, vec!["libfoo", "^libbar\\.so"]);
        assert_eq!(config.host.magic, [0x0d, 0x0d, 0x0a, 0x0b]);
        assert_eq!(config.host.version, "3.13");
    }

    #[test]
    fn test_bad_magic_keeps_default() {
        let config = Config::from_vars(Path::new("/p"), &vars(&[("FREEZER_HOST_MAGIC", "zz")]));
        assert_eq!(config.host.magic, HostRuntime::default().magic);
    }

    #[test]
    fn test_dotenv_file_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "FREEZER_TEST_ONLY_SENTINEL=1\nFREEZER_WORKPATH=\"from-dotenv\"\n").unwrap();
        let config = Config::load(dir.path());
        if env::var_os("FREEZER_WORKPATH").is_none() {
            assert_eq!(config.workpath, dir.path().join("from-dotenv"));
        }
    }
}
