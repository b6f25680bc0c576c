//! Typed entry lists (TOCs).
//!
//! A [`Toc`] is the currency passed between every build step: an ordered
//! list of `(name, path, kind)` entries with no two entries sharing an
//! identity. Identity is the logical name, except for [`EntryKind::Binary`]
//! entries, which are identified by their (case-normalized) source path so
//! the same library reached through two discovery routes is kept once.
//!
//! The set operations keep first-seen order. Archive assembly relies on
//! that for reproducible output.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::{Add, Sub};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::platform::{normalize, TargetPlatform};

/// What an entry is and how the container stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Entry-point script, run by the bootstrap stub.
    Source,
    /// Compiled interpreter module.
    CompiledModule,
    /// Native extension module loaded by the interpreter.
    Extension,
    /// Shared library pulled in by the dependency resolver.
    Binary,
    /// Reference to a file living in another package.
    Dependency,
    /// Plain data file.
    Data,
    /// The code archive itself.
    ArchiveRef,
    /// A nested container archive.
    ContainerRef,
    /// Zero-length flag frozen into the executable.
    RuntimeOption,
}

impl EntryKind {
    pub const ALL: [EntryKind; 9] = [
        EntryKind::Source,
        EntryKind::CompiledModule,
        EntryKind::Extension,
        EntryKind::Binary,
        EntryKind::Dependency,
        EntryKind::Data,
        EntryKind::ArchiveRef,
        EntryKind::ContainerRef,
        EntryKind::RuntimeOption,
    ];

    /// One-byte tag written into the container index.
    pub const fn type_tag(&self) -> u8 {
        match self {
            EntryKind::Source => b's',
            EntryKind::CompiledModule => b'm',
            EntryKind::Extension => b'e',
            EntryKind::Binary => b'b',
            EntryKind::Dependency => b'd',
            EntryKind::Data => b'x',
            EntryKind::ArchiveRef => b'z',
            EntryKind::ContainerRef => b'a',
            EntryKind::RuntimeOption => b'o',
        }
    }

    pub fn from_type_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.type_tag() == tag)
    }

    /// Native code that goes through the binary cache.
    pub const fn is_native(&self) -> bool {
        matches!(self, EntryKind::Extension | EntryKind::Binary)
    }
}

/// A single `(name, path, kind)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    pub path: PathBuf,
    pub kind: EntryKind,
}

impl Entry {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind,
        }
    }

    /// A runtime option carries only its name.
    pub fn option(name: impl Into<String>) -> Self {
        Self::new(name, PathBuf::new(), EntryKind::RuntimeOption)
    }
}

#[derive(Serialize, Deserialize)]
struct TocRepr {
    fold_case: bool,
    entries: Vec<Entry>,
}

/// Ordered, identity-deduplicated list of entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "TocRepr", into = "TocRepr")]
pub struct Toc {
    entries: Vec<Entry>,
    keys: HashSet<String>,
    fold_case: bool,
}

impl Toc {
    /// Empty list that folds binary paths the way the host platform does.
    pub fn new() -> Self {
        Self::for_platform(TargetPlatform::host())
    }

    pub fn for_platform(platform: TargetPlatform) -> Self {
        Self::with_case_folding(platform.case_insensitive())
    }

    pub fn with_case_folding(fold_case: bool) -> Self {
        Self {
            entries: Vec::new(),
            keys: HashSet::new(),
            fold_case,
        }
    }

    /// Build a list from entries, dropping later duplicates.
    pub fn from_entries<I: IntoIterator<Item = Entry>>(fold_case: bool, entries: I) -> Self {
        let mut toc = Self::with_case_folding(fold_case);
        toc.extend(entries);
        toc
    }

    /// Identity key of `entry` under this list's folding rule.
    ///
    /// Binary paths and logical names live in separate namespaces, so a
    /// data entry named like a library path never shadows that library.
    pub fn identity(&self, entry: &Entry) -> String {
        match entry.kind {
            EntryKind::Binary => format!("b:{}", normalize(&entry.path.to_string_lossy(), self.fold_case)),
            _ => format!("n:{}", entry.name),
        }
    }

    /// Append `entry` unless its identity is already present.
    ///
    /// Returns `true` if the entry was added. The first writer wins.
    pub fn append(&mut self, entry: Entry) -> bool {
        let key = self.identity(&entry);
        if self.keys.insert(key) {
            self.entries.push(entry);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, entry: &Entry) -> bool {
        self.keys.contains(&self.identity(entry))
    }

    /// Entries of `other` whose identity is present here, in `other`'s order.
    pub fn intersect(&self, other: &Toc) -> Toc {
        let mut result = Toc::with_case_folding(self.fold_case);
        for entry in &other.entries {
            if self.contains(entry) {
                result.append(entry.clone());
            }
        }
        result
    }

    /// Entries of the given kind, order preserved.
    pub fn of_kind(&self, kind: EntryKind) -> Toc {
        self.filter(|e| e.kind == kind)
    }

    pub fn filter<F: Fn(&Entry) -> bool>(&self, keep: F) -> Toc {
        let mut result = Toc::with_case_folding(self.fold_case);
        result.extend(self.entries.iter().filter(|e| keep(e)).cloned());
        result
    }

    /// First entry carrying logical name `name`.
    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn get_index(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn fold_case(&self) -> bool {
        self.fold_case
    }

    /// Most recent modification time over every referenced file that exists.
    pub fn newest_mtime(&self) -> Option<SystemTime> {
        self.entries
            .iter()
            .filter(|e| !e.path.as_os_str().is_empty())
            .filter_map(|e| crate::cache::mtime(&e.path))
            .max()
    }

    /// Paths of every entry that references a file.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries
            .iter()
            .map(|e| e.path.as_path())
            .filter(|p| !p.as_os_str().is_empty())
    }
}

impl Default for Toc {
    fn default() -> Self {
        Self::new()
    }
}

/// Two lists are equal when they hold the same entries in the same order.
impl PartialEq for Toc {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for Toc {}

impl From<TocRepr> for Toc {
    fn from(repr: TocRepr) -> Self {
        Toc::from_entries(repr.fold_case, repr.entries)
    }
}

impl From<Toc> for TocRepr {
    fn from(toc: Toc) -> Self {
        TocRepr {
            fold_case: toc.fold_case,
            entries: toc.entries,
        }
    }
}

impl Extend<Entry> for Toc {
    fn extend<I: IntoIterator<Item = Entry>>(&mut self, iter: I) {
        for entry in iter {
            self.append(entry);
        }
    }
}

impl FromIterator<Entry> for Toc {
    fn from_iter<I: IntoIterator<Item = Entry>>(iter: I) -> Self {
        let mut toc = Toc::new();
        toc.extend(iter);
        toc
    }
}

impl IntoIterator for Toc {
    type Item = Entry;
    type IntoIter = std::vec::IntoIter<Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a Toc {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl Add<&Toc> for &Toc {
    type Output = Toc;

    fn add(self, rhs: &Toc) -> Toc {
        let mut result = self.clone();
        result.extend(rhs.entries.iter().cloned());
        result
    }
}

impl Add for Toc {
    type Output = Toc;

    fn add(mut self, rhs: Toc) -> Toc {
        self.extend(rhs);
        self
    }
}

impl Sub<&Toc> for &Toc {
    type Output = Toc;

    fn sub(self, rhs: &Toc) -> Toc {
        self.filter(|e| !rhs.keys.contains(&rhs.identity(e)))
    }
}

impl Sub for Toc {
    type Output = Toc;

    fn sub(self, rhs: Toc) -> Toc {
        &self - &rhs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(name: &str) -> Entry {
        Entry::new(name, format!("/src/{}.pyc", name), EntryKind::CompiledModule)
    }

    #[test]
    fn test_append_first_writer_wins() {
        let mut toc = Toc::with_case_folding(false);
        assert!(toc.append(Entry::new("a", "/first/a", EntryKind::Data)));
        assert!(!toc.append(Entry::new("a", "/second/a", EntryKind::Data)));
        assert_eq!(toc.len(), 1);
        assert_eq!(toc.get("a").unwrap().path, PathBuf::from("/first/a"));
    }

    #[test]
    fn test_binary_identity_is_folded_path() {
        let mut toc = Toc::with_case_folding(true);
        assert!(toc.append(Entry::new("KERNEL.DLL", "C:/Lib/Kernel.dll", EntryKind::Binary)));
        assert!(!toc.append(Entry::new("kernel.dll", "c:/lib/KERNEL.DLL", EntryKind::Binary)));
        assert_eq!(toc.len(), 1);
    }

    #[test]
    fn test_module_names_never_folded() {
        let mut toc = Toc::with_case_folding(true);
        assert!(toc.append(Entry::new("Foo", "/a", EntryKind::CompiledModule)));
        assert!(toc.append(Entry::new("foo", "/b", EntryKind::CompiledModule)));
        assert_eq!(toc.len(), 2);
    }

    #[test]
    fn test_intersect_uses_right_order() {
        let left: Toc = ["a", "b", "c"].iter().map(|n| module(n)).collect();
        let right: Toc = ["c", "x", "a"].iter().map(|n| module(n)).collect();
        let names: Vec<_> = left.intersect(&right).iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, vec!["c", "a"]);
    }

    #[test]
    fn test_serde_rebuilds_identity_set() {
        let toc: Toc = ["a", "b"].iter().map(|n| module(n)).collect();
        let json = serde_json::to_string(&toc).unwrap();
        let mut back: Toc = serde_json::from_str(&json).unwrap();
        assert_eq!(back, toc);
        assert!(!back.append(module("a")));
    }

    #[test]
    fn test_type_tags_are_unique() {
        for kind in EntryKind::ALL {
            assert_eq!(EntryKind::from_type_tag(kind.type_tag()), Some(kind));
        }
    }
}
