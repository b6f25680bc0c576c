//! Binary dependency resolution.
//!
//! Given the binaries a program uses directly, [`Resolver::resolve`] returns
//! the same list extended with the recursive closure of shared libraries
//! they link against. Each platform family reads library references in its
//! own way, so the header parsing lives behind [`DependencyWalker`]:
//!
//! - `pe` - Windows import tables
//! - `elf` - `ldd` output (Linux, AIX)
//! - `macho` - Mach-O load commands (macOS, fat binaries included)
//!
//! A library that can't be found is a warning, not an error: some references
//! are satisfied by the target system or loaded conditionally at run time.

pub mod elf;
pub mod macho;
pub mod pe;
pub mod policy;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::ResolveError;
use crate::platform::{OsFamily, TargetPlatform};
use crate::toc::{Entry, EntryKind, Toc};

pub use elf::ElfWalker;
pub use macho::MachOWalker;
pub use pe::PeWalker;
pub use policy::DependencyPolicy;

/// A library name referenced by a binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Name as written in the binary (`libz.so.1`, `@rpath/libfoo.dylib`).
    pub name: String,
    /// Location the walker already determined, if any.
    pub hint: Option<PathBuf>,
}

impl Reference {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hint: None,
        }
    }

    pub fn with_hint(name: impl Into<String>, hint: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            hint: Some(hint.into()),
        }
    }

    /// Logical name for the bundled copy.
    pub fn file_name(&self) -> String {
        let trimmed = self.name.trim_end_matches(['/', '\\']);
        trimmed
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(trimmed)
            .to_string()
    }
}

/// Reads the libraries a binary references directly.
pub trait DependencyWalker {
    /// Direct references of `binary`. Files that aren't valid images for
    /// this platform yield an empty list.
    fn references(&self, binary: &Path) -> Vec<Reference>;

    /// Locations searched after the referrer's directory and extra paths.
    fn default_search_dirs(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Pick the walker for a target platform.
pub fn walker_for(platform: TargetPlatform) -> Box<dyn DependencyWalker> {
    match platform.os {
        OsFamily::Windows => Box::new(PeWalker),
        OsFamily::Darwin => Box::new(MachOWalker),
        OsFamily::Linux => Box::new(ElfWalker::new(false)),
        OsFamily::Aix => Box::new(ElfWalker::new(true)),
    }
}

/// Library identities already walked during one resolution.
///
/// Prevents re-walking a library and stops circular link graphs.
#[derive(Debug, Default)]
pub struct ClosureSet {
    seen: HashSet<String>,
    fold_case: bool,
}

impl ClosureSet {
    pub fn new(platform: TargetPlatform) -> Self {
        Self {
            seen: HashSet::new(),
            fold_case: platform.case_insensitive(),
        }
    }

    fn key(&self, path: &Path) -> String {
        crate::platform::normalize(&path.to_string_lossy(), self.fold_case)
    }

    /// Mark `path` resolved. Returns `false` if it already was.
    pub fn insert(&mut self, path: &Path) -> bool {
        let key = self.key(path);
        self.seen.insert(key)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.seen.contains(&self.key(path))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Outcome of one resolution run.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Input binaries followed by every discovered library.
    pub binaries: Toc,
    /// One line per reference that couldn't be located.
    pub warnings: Vec<String>,
}

/// Expands a list of binaries into its shared-library closure.
pub struct Resolver {
    platform: TargetPlatform,
    walker: Box<dyn DependencyWalker>,
    policy: DependencyPolicy,
    search_path: Vec<PathBuf>,
    strict: bool,
}

impl Resolver {
    /// Resolver with the platform's walker and default policy.
    pub fn new(platform: TargetPlatform, policy: DependencyPolicy) -> Self {
        Self::with_walker(platform, policy, walker_for(platform))
    }

    pub fn with_walker(
        platform: TargetPlatform,
        policy: DependencyPolicy,
        walker: Box<dyn DependencyWalker>,
    ) -> Self {
        Self {
            platform,
            walker,
            policy,
            search_path: Vec::new(),
            strict: false,
        }
    }

    /// Extra directories searched after the referrer's own directory.
    pub fn with_search_path(mut self, dirs: Vec<PathBuf>) -> Self {
        self.search_path = dirs;
        self
    }

    /// Fail instead of warning when a library can't be found.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Resolve the closure of `binaries`.
    ///
    /// Every call starts from an empty closure set, so repeated runs never
    /// see each other's state.
    pub fn resolve(&self, binaries: &Toc) -> Result<Resolution, ResolveError> {
        let mut closure = ClosureSet::new(self.platform);
        let mut output = Toc::from_entries(binaries.fold_case(), binaries.iter().cloned());
        let mut warnings: Vec<String> = Vec::new();
        let mut unresolved: Vec<String> = Vec::new();

        // The output list is also the work list: discovered libraries are
        // appended behind the cursor and walked when it reaches them.
        let mut cursor = 0;
        while let Some(entry) = output.get_index(cursor).cloned() {
            cursor += 1;
            if entry.path.as_os_str().is_empty() || !closure.insert(&entry.path) {
                continue;
            }

            for reference in self.walker.references(&entry.path) {
                // OS libraries often have no file on disk (API sets, the dyld
                // shared cache), so name-based excludes apply before searching.
                if !self.policy.accepts(&reference.name, Path::new(&reference.name)) {
                    debug!(library = %reference.name, "excluded by policy");
                    continue;
                }
                let Some(found) = self.locate(&reference, &entry.path) else {
                    let message = format!(
                        "library {} needed by {} not found",
                        reference.name,
                        entry.path.display()
                    );
                    warn!(library = %reference.name, needed_by = %entry.path.display(), "library not found");
                    if !warnings.contains(&message) {
                        warnings.push(message);
                    }
                    if !unresolved.contains(&reference.name) {
                        unresolved.push(reference.name.clone());
                    }
                    continue;
                };

                if !self.policy.accepts(&reference.name, &found) {
                    debug!(library = %reference.name, "excluded by policy");
                    continue;
                }
                if closure.contains(&found) {
                    continue;
                }

                let added = output.append(Entry::new(reference.file_name(), &found, EntryKind::Binary));
                if added {
                    debug!(library = %reference.name, path = %found.display(), "discovered dependency");
                }
            }
        }

        if self.strict && !unresolved.is_empty() {
            return Err(ResolveError::Unresolved { names: unresolved });
        }

        info!(
            inputs = binaries.len(),
            total = output.len(),
            warnings = warnings.len(),
            "resolved binary dependencies"
        );
        Ok(Resolution {
            binaries: output,
            warnings,
        })
    }

    /// Ordered search: referrer's directory, extra paths, walker hint,
    /// platform default locations.
    fn locate(&self, reference: &Reference, referrer: &Path) -> Option<PathBuf> {
        let as_path = Path::new(&reference.name);
        if as_path.is_absolute() && as_path.is_file() {
            return Some(as_path.to_path_buf());
        }

        let file_name = reference.file_name();
        let mut candidates = Vec::new();
        if let Some(dir) = referrer.parent() {
            candidates.push(dir.join(&file_name));
        }
        candidates.extend(self.search_path.iter().map(|d| d.join(&file_name)));
        candidates.extend(reference.hint.iter().cloned());
        candidates.extend(
            self.walker
                .default_search_dirs()
                .into_iter()
                .map(|d| d.join(&file_name)),
        );

        candidates.into_iter().find(|p| p.is_file())
    }
}
