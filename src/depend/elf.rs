//! ELF dependency walker.
//!
//! Asks the dynamic linker via `ldd` which libraries a binary loads. Unlike
//! reading `DT_NEEDED` directly this yields resolved paths, which the
//! resolver uses as a hint after its own search locations.

use std::env;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::{DependencyWalker, Reference};
use crate::process::Cmd;

/// Pseudo-libraries the kernel maps into every process; no file backs them.
const PSEUDO_LIBRARIES: &[&str] = &["linux-vdso", "linux-gate", "linux-vdso64"];

/// Walker for ELF platforms. `aix` switches on archive-member notation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElfWalker {
    aix: bool,
}

impl ElfWalker {
    pub fn new(aix: bool) -> Self {
        Self { aix }
    }
}

impl DependencyWalker for ElfWalker {
    fn references(&self, binary: &Path) -> Vec<Reference> {
        match Cmd::new("ldd").arg_path(binary).allow_fail().run() {
            Ok(result) if result.success() => parse_ldd_output(&result.stdout, self.aix),
            // Not a dynamic executable, or not an ELF file at all.
            Ok(_) => Vec::new(),
            Err(e) => {
                warn!(binary = %binary.display(), error = %e, "ldd unavailable, assuming no dependencies");
                Vec::new()
            }
        }
    }

    fn default_search_dirs(&self) -> Vec<PathBuf> {
        let var = if self.aix { "LIBPATH" } else { "LD_LIBRARY_PATH" };
        let mut dirs: Vec<PathBuf> = env::var_os(var)
            .map(|v| env::split_paths(&v).collect())
            .unwrap_or_default();
        let defaults: &[&str] = if self.aix {
            &["/usr/lib", "/lib", "/usr/local/lib"]
        } else {
            &["/lib64", "/usr/lib64", "/lib", "/usr/lib", "/usr/local/lib"]
        };
        dirs.extend(defaults.iter().map(PathBuf::from));
        dirs
    }
}

/// Parse `ldd` output into references.
///
/// Example output:
/// ```text
///     linux-vdso.so.1 (0x00007ffee9bfe000)
///     libz.so.1 => /lib64/libz.so.1 (0x00007f1234000000)
///     libfoo.so => not found
///     /lib64/ld-linux-x86-64.so.2 (0x00007f1234500000)
/// ```
///
/// On AIX libraries are archive members, e.g. `/usr/lib/libc.a(shr_64.o)`;
/// the reference keeps the member notation as its name and points its hint
/// at the archive file.
pub fn parse_ldd_output(output: &str, aix: bool) -> Vec<Reference> {
    let mut refs = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty()
            || line.ends_with("needs:")
            || line.contains("not a dynamic executable")
            || line.contains("statically linked")
        {
            continue;
        }

        if aix {
            if let Some(reference) = parse_archive_member(line) {
                refs.push(reference);
                continue;
            }
        }

        if let Some((name, rest)) = line.split_once("=>") {
            let name = name.trim();
            let rest = rest.trim();
            if is_pseudo(name) {
                continue;
            }
            if rest.starts_with("not found") {
                refs.push(Reference::new(name));
                continue;
            }
            let path = strip_address(rest);
            if path.is_empty() {
                // `name =>  (0x...)`: mapped without a file.
                continue;
            }
            refs.push(Reference::with_hint(name, path));
        } else {
            let path = strip_address(line);
            // The interpreter line has no `=>`; keep it only when it is a real file path.
            if path.starts_with('/') && !is_pseudo(path) {
                refs.push(Reference::with_hint(path, path));
            }
        }
    }

    refs
}

fn strip_address(text: &str) -> &str {
    match text.find(" (") {
        Some(idx) => text[..idx].trim(),
        None if text.starts_with('(') => "",
        None => text.trim(),
    }
}

fn is_pseudo(name: &str) -> bool {
    let base = name.rsplit('/').next().unwrap_or(name);
    PSEUDO_LIBRARIES.iter().any(|p| base.starts_with(p))
}

/// `/usr/lib/libc.a(shr_64.o)` -> name `libc.a(shr_64.o)`, hint `/usr/lib/libc.a`.
fn parse_archive_member(line: &str) -> Option<Reference> {
    if !line.ends_with(')') {
        return None;
    }
    let open = line.rfind('(')?;
    let archive = &line[..open];
    if archive.is_empty() || !archive.ends_with(".a") {
        return None;
    }
    let archive_name = archive.rsplit('/').next().unwrap_or(archive);
    let member = &line[open..];
    Some(Reference::with_hint(format!("{}{}", archive_name, member), archive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ldd_standard_format() {
        let output = r#"
        linux-vdso.so.1 (0x00007ffee9bfe000)
        libz.so.1 => /lib64/libz.so.1 (0x00007f1234000000)
        libc.so.6 => /lib64/libc.so.6 (0x00007f1234000000)
        /lib64/ld-linux-x86-64.so.2 (0x00007f1234500000)
    "#;
        let refs = parse_ldd_output(output, false);
        let names: Vec<_> = refs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["libz.so.1", "libc.so.6", "/lib64/ld-linux-x86-64.so.2"]);
        assert_eq!(refs[0].hint.as_deref(), Some(Path::new("/lib64/libz.so.1")));
    }

    #[test]
    fn test_parse_ldd_not_found_kept_without_hint() {
        let output = "\tlibfoo.so.1 => not found\n";
        let refs = parse_ldd_output(output, false);
        assert_eq!(refs, vec![Reference::new("libfoo.so.1")]);
    }

    #[test]
    fn test_parse_ldd_skips_fileless_mappings() {
        let output = "\tlinux-gate.so.1 =>  (0xb7f02000)\n\tlibx.so =>  (0x00001000)\n";
        assert!(parse_ldd_output(output, false).is_empty());
    }

    #[test]
    fn test_parse_ldd_statically_linked() {
        assert!(parse_ldd_output("\tnot a dynamic executable", false).is_empty());
        assert!(parse_ldd_output("\tstatically linked", false).is_empty());
        assert!(parse_ldd_output("", false).is_empty());
    }

    #[test]
    fn test_parse_ldd_aix_archive_members() {
        let output = "/opt/app/bin/app needs:\n\t /usr/lib/libc.a(shr_64.o)\n\t /unix\n";
        let refs = parse_ldd_output(output, true);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].name, "libc.a(shr_64.o)");
        assert_eq!(refs[0].hint.as_deref(), Some(Path::new("/usr/lib/libc.a")));
        assert_eq!(refs[1].name, "/unix");
    }
}
