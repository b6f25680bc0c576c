//! Path normalization for containment checks before destructive removal.
//!
//! `std::path::absolute` keeps `..` and symlinks, so two spellings of one
//! directory can compare as unrelated. Paths here are made absolute, then
//! `.`/`..` are folded lexically, then the longest existing prefix is
//! canonicalized.

use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::BuildError;

/// Drop `.` components and pop on `..` without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let leading = matches!(out.components().next_back(), None | Some(Component::ParentDir));
                if leading && !out.has_root() {
                    out.push("..");
                } else {
                    // Popping past the root is a no-op.
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the longest prefix of `path` that exists, keeping the rest.
fn canonical_prefix(path: &Path) -> PathBuf {
    let mut suffix: Vec<OsString> = Vec::new();
    let mut current = path;
    loop {
        if let Ok(real) = fs::canonicalize(current) {
            let mut out = real;
            for part in suffix.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match (current.parent(), current.file_name()) {
            (Some(parent), Some(name)) => {
                suffix.push(name.to_os_string());
                current = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

/// Absolute, normalized, optionally case-folded form of `path`.
pub fn comparable(path: &Path, fold_case: bool) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let resolved = canonical_prefix(&normalize_lexically(&absolute));
    if fold_case {
        PathBuf::from(resolved.to_string_lossy().to_lowercase())
    } else {
        resolved
    }
}

/// Whether `inner` is `outer` or lies somewhere below it.
pub fn is_within(inner: &Path, outer: &Path, fold_case: bool) -> bool {
    comparable(inner, fold_case).starts_with(comparable(outer, fold_case))
}

/// Refuse to remove `dir` when any of `protected` lies inside it.
pub fn check_removable(dir: &Path, protected: &[&Path], fold_case: bool) -> Result<(), BuildError> {
    for keep in protected {
        if is_within(keep, dir, fold_case) {
            return Err(BuildError::OutputConflict {
                output: dir.to_path_buf(),
                conflict: keep.to_path_buf(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(normalize_lexically(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize_lexically(Path::new("/../x")), PathBuf::from("/x"));
        assert_eq!(normalize_lexically(Path::new("a/../../b")), PathBuf::from("../b"));
    }

    #[test]
    fn test_parent_components_do_not_hide_containment() {
        let dir = tempfile::tempdir().unwrap();
        let dist = dir.path().join("dist");
        let sneaky = dir.path().join("dist/../dist/app/precious.dat");
        assert!(is_within(&sneaky, &dist.join("app"), false));
        assert!(!is_within(&dir.path().join("dist/../src"), &dist, false));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_prefix_is_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        fs::create_dir_all(real.join("app")).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();
        assert!(is_within(&link.join("app/data.txt"), &real, false));
    }

    #[test]
    fn test_check_removable() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        let dist = project.join("dist");
        assert!(check_removable(&dist, &[&project], false).is_ok());
        assert!(matches!(
            check_removable(&project.join("."), &[&project], false),
            Err(BuildError::OutputConflict { .. })
        ));
        assert!(check_removable(&dir.path().join("project/.."), &[&project], false).is_err());
    }
}
