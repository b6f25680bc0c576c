//! Which discovered libraries get bundled.
//!
//! OS runtime libraries must never be copied into the artifact; they are
//! provided by the target system and copying them breaks the loader. A few
//! third-party runtimes are always bundled even when an exclude pattern
//! would catch them. Include patterns win over exclude patterns.
//!
//! Patterns are matched against both the library's file name and its full
//! resolved path, so path-based rules (`^/usr/lib/`) and name-based rules
//! (`^libc\.so`) can live in one list.

use regex::{Regex, RegexBuilder};
use std::path::Path;

use crate::error::ResolveError;
use crate::platform::{OsFamily, TargetPlatform};

const LINUX_EXCLUDES: &[&str] = &[
    r"^ld-linux.*\.so(\..*)?$",
    r"^ld64\.so(\..*)?$",
    r"^libc\.so(\..*)?$",
    r"^libdl\.so(\..*)?$",
    r"^libm\.so(\..*)?$",
    r"^libpthread\.so(\..*)?$",
    r"^librt\.so(\..*)?$",
    r"^libutil\.so(\..*)?$",
    r"^libresolv\.so(\..*)?$",
    r"^libnsl\.so(\..*)?$",
    r"^libnss_.*\.so(\..*)?$",
    r"^libBrokenLocale\.so(\..*)?$",
    r"^libanl\.so(\..*)?$",
    r"^libGL\.so(\..*)?$",
    r"^libEGL\.so(\..*)?$",
    r"^libdrm\.so(\..*)?$",
    r"^libX11\.so(\..*)?$",
    r"^libxcb\.so(\..*)?$",
];

const WINDOWS_EXCLUDES: &[&str] = &[
    r"^api-ms-win-.*\.dll$",
    r"^ext-ms-.*\.dll$",
    r"^(kernel32|kernelbase|ntdll|user32|gdi32|advapi32|shell32|ole32|oleaut32)\.dll$",
    r"^(ws2_32|comctl32|comdlg32|winmm|version|shlwapi|rpcrt4|crypt32|bcrypt|secur32)\.dll$",
    r"^msvcrt\.dll$",
    r"/windows/(system32|syswow64|winsxs)/",
];

const DARWIN_EXCLUDES: &[&str] = &[r"^/usr/lib/", r"^/System/Library/", r"^libSystem\..*\.dylib$"];

const AIX_EXCLUDES: &[&str] = &[r"^libc\.a", r"^libpthreads?\.a", r"^libcrypt\.a", r"^/usr/lib/"];

const LINUX_INCLUDES: &[&str] = &[r"^libpython.*\.so(\..*)?$"];

const WINDOWS_INCLUDES: &[&str] = &[
    r"^python\d+\.dll$",
    r"^vcruntime\d+(_\d+)?\.dll$",
    r"^msvcp\d+(_\d+)?\.dll$",
    r"^ucrtbase\.dll$",
];

const DARWIN_INCLUDES: &[&str] = &[r"^libpython.*\.dylib$", r"/Python\.framework/"];

/// Exclude/include rules for discovered libraries.
#[derive(Debug, Clone)]
pub struct DependencyPolicy {
    excludes: Vec<Regex>,
    includes: Vec<Regex>,
    case_insensitive: bool,
}

impl DependencyPolicy {
    /// A policy that accepts everything.
    pub fn empty() -> Self {
        Self {
            excludes: Vec::new(),
            includes: Vec::new(),
            case_insensitive: false,
        }
    }

    /// Built-in rules for a platform.
    pub fn for_platform(platform: TargetPlatform) -> Self {
        let (excludes, includes): (&[&str], &[&str]) = match platform.os {
            OsFamily::Linux => (LINUX_EXCLUDES, LINUX_INCLUDES),
            OsFamily::Windows => (WINDOWS_EXCLUDES, WINDOWS_INCLUDES),
            OsFamily::Darwin => (DARWIN_EXCLUDES, DARWIN_INCLUDES),
            OsFamily::Aix => (AIX_EXCLUDES, &[]),
        };
        let mut policy = Self {
            case_insensitive: platform.case_insensitive(),
            ..Self::empty()
        };
        // The built-in tables are constant and known to compile.
        for pattern in excludes {
            if let Ok(re) = policy.compile(pattern) {
                policy.excludes.push(re);
            }
        }
        for pattern in includes {
            if let Ok(re) = policy.compile(pattern) {
                policy.includes.push(re);
            }
        }
        policy
    }

    /// Add user-supplied patterns on top of the current rules.
    pub fn with_patterns<S: AsRef<str>>(
        mut self,
        excludes: &[S],
        includes: &[S],
    ) -> Result<Self, ResolveError> {
        for pattern in excludes {
            let re = self.compile(pattern.as_ref())?;
            self.excludes.push(re);
        }
        for pattern in includes {
            let re = self.compile(pattern.as_ref())?;
            self.includes.push(re);
        }
        Ok(self)
    }

    /// Always bundle a library with exactly this file name.
    pub fn always_include(mut self, file_name: &str) -> Self {
        let pattern = format!("^{}$", regex::escape(file_name));
        if let Ok(re) = self.compile(&pattern) {
            self.includes.push(re);
        }
        self
    }

    fn compile(&self, pattern: &str) -> Result<Regex, regex::Error> {
        RegexBuilder::new(pattern)
            .case_insensitive(self.case_insensitive)
            .build()
    }

    /// Whether library `name`, found at `path`, should be bundled.
    pub fn accepts(&self, name: &str, path: &Path) -> bool {
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());
        let full = path.to_string_lossy().replace('\\', "/");
        let hit = |re: &Regex| re.is_match(&file_name) || re.is_match(&full) || re.is_match(name);

        if self.includes.iter().any(hit) {
            return true;
        }
        !self.excludes.iter().any(hit)
    }
}
