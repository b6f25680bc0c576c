//! Target platform and host runtime descriptors.
//!
//! The target platform decides which header walker the dependency resolver
//! uses, whether library identities are case-folded, and which binary cache
//! directory a build reads from. The host runtime describes the interpreter
//! whose modules are being frozen.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Operating system family of the build target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Linux,
    Darwin,
    Windows,
    /// AIX: ELF-like tooling, but shared objects live inside `.a` archives.
    Aix,
}

impl OsFamily {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Linux => "linux",
            OsFamily::Darwin => "darwin",
            OsFamily::Windows => "windows",
            OsFamily::Aix => "aix",
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// OS family plus pointer width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetPlatform {
    pub os: OsFamily,
    pub pointer_width: u8,
}

impl TargetPlatform {
    pub const fn new(os: OsFamily, pointer_width: u8) -> Self {
        Self { os, pointer_width }
    }

    /// The platform this binary was compiled for.
    pub fn host() -> Self {
        let os = if cfg!(target_os = "windows") {
            OsFamily::Windows
        } else if cfg!(target_os = "macos") {
            OsFamily::Darwin
        } else if cfg!(target_os = "aix") {
            OsFamily::Aix
        } else {
            OsFamily::Linux
        };
        let pointer_width = if cfg!(target_pointer_width = "64") { 64 } else { 32 };
        Self { os, pointer_width }
    }

    /// Whether the target's default filesystem ignores case.
    pub fn case_insensitive(&self) -> bool {
        matches!(self.os, OsFamily::Windows | OsFamily::Darwin)
    }

    /// Identity string for a path on this platform.
    ///
    /// Only paths are ever folded; module names stay case-sensitive.
    pub fn normalize_path(&self, path: &Path) -> String {
        normalize(&path.to_string_lossy(), self.case_insensitive())
    }

    /// Short tag used in cache directory names, e.g. `linux-64bit`.
    pub fn tag(&self) -> String {
        format!("{}-{}bit", self.os, self.pointer_width)
    }

    /// File name of an executable called `name` on this platform.
    pub fn executable_name(&self, name: &str) -> String {
        match self.os {
            OsFamily::Windows if !name.to_ascii_lowercase().ends_with(".exe") => {
                format!("{}.exe", name)
            }
            _ => name.to_string(),
        }
    }
}

impl Default for TargetPlatform {
    fn default() -> Self {
        Self::host()
    }
}

impl fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

pub(crate) fn normalize(path: &str, fold_case: bool) -> String {
    if fold_case {
        path.replace('\\', "/").to_lowercase()
    } else {
        path.to_string()
    }
}

/// The interpreter whose compiled modules are being packaged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRuntime {
    /// Magic number stamped into every code archive and checked on load.
    pub magic: [u8; 4],
    /// Version string; selects the binary cache directory.
    pub version: String,
    /// Base name of the runtime shared library the bootstrap stub loads.
    pub lib_name: String,
    /// File stem that marks a compiled module as a package initializer.
    pub package_stem: String,
    /// Extension of module source files sitting next to compiled ones.
    pub source_ext: String,
}

impl Default for HostRuntime {
    fn default() -> Self {
        Self {
            magic: [0xcb, 0x0d, 0x0d, 0x0a],
            version: "3.12".to_string(),
            lib_name: "libpython3.12.so.1.0".to_string(),
            package_stem: "__init__".to_string(),
            source_ext: "py".to_string(),
        }
    }
}

impl HostRuntime {
    /// Parse an 8-digit hex magic such as `cb0d0d0a`.
    pub fn parse_magic(text: &str) -> Option<[u8; 4]> {
        let digits = text.trim().trim_start_matches("0x");
        let bytes = hex::decode(digits).ok()?;
        bytes.try_into().ok()
    }

    pub fn magic_hex(&self) -> String {
        hex::encode(self.magic)
    }

    /// Whether a compiled module at `path` is a package initializer.
    pub fn is_package_path(&self, path: &Path) -> bool {
        path.file_stem()
            .map(|stem| stem.to_string_lossy() == self.package_stem)
            .unwrap_or(false)
    }
}
