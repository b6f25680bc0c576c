//! Mach-O dependency walker.
//!
//! Walks the load commands of every architecture slice in a (possibly fat)
//! Mach-O file, collecting linked dylibs and `LC_RPATH` entries, then
//! expands `@loader_path`, `@executable_path` and `@rpath` against the
//! binary's directory and the collected rpaths.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{DependencyWalker, Reference};

const MH_MAGIC: u32 = 0xfeed_face;
const MH_CIGAM: u32 = 0xcefa_edfe;
const MH_MAGIC_64: u32 = 0xfeed_facf;
const MH_CIGAM_64: u32 = 0xcffa_edfe;
const FAT_MAGIC: u32 = 0xcafe_babe;
const FAT_MAGIC_64: u32 = 0xcafe_babf;

const LC_LOAD_DYLIB: u32 = 0xc;
const LC_LOAD_WEAK_DYLIB: u32 = 0x8000_0018;
const LC_RPATH: u32 = 0x8000_001c;
const LC_REEXPORT_DYLIB: u32 = 0x8000_001f;
const LC_LOAD_UPWARD_DYLIB: u32 = 0x8000_0023;

/// Java class files share the fat magic; real fat binaries have few slices.
const MAX_FAT_SLICES: u32 = 30;

#[derive(Debug, Clone, Copy, Default)]
pub struct MachOWalker;

/// Install names and rpaths gathered from all slices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachOLinks {
    pub dylibs: Vec<String>,
    pub rpaths: Vec<String>,
}

impl MachOLinks {
    fn merge(&mut self, other: MachOLinks) {
        for d in other.dylibs {
            if !self.dylibs.contains(&d) {
                self.dylibs.push(d);
            }
        }
        for r in other.rpaths {
            if !self.rpaths.contains(&r) {
                self.rpaths.push(r);
            }
        }
    }
}

impl DependencyWalker for MachOWalker {
    fn references(&self, binary: &Path) -> Vec<Reference> {
        let data = match fs::read(binary) {
            Ok(d) => d,
            Err(e) => {
                warn!(binary = %binary.display(), error = %e, "cannot read Mach-O image");
                return Vec::new();
            }
        };
        let Some(links) = parse_macho(&data) else {
            debug!(binary = %binary.display(), "not a Mach-O image, no dependencies");
            return Vec::new();
        };

        let loader_dir = binary.parent().unwrap_or(Path::new("."));
        links
            .dylibs
            .iter()
            .map(|name| {
                let found = candidate_paths(name, loader_dir, &links.rpaths)
                    .into_iter()
                    .find(|p| p.is_file());
                match found {
                    Some(path) => Reference::with_hint(name, path),
                    None => Reference::new(name),
                }
            })
            .collect()
    }

    fn default_search_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = ["DYLD_LIBRARY_PATH", "DYLD_FALLBACK_LIBRARY_PATH"]
            .iter()
            .filter_map(|var| env::var_os(var))
            .flat_map(|v| env::split_paths(&v).collect::<Vec<_>>())
            .collect();
        dirs.push(PathBuf::from("/usr/local/lib"));
        dirs.push(PathBuf::from("/opt/homebrew/lib"));
        dirs
    }
}

/// Candidate locations for an install name, in the order they are tried.
///
/// The resolver has no notion of the final executable, so
/// `@executable_path` is taken relative to the referencing binary too.
pub fn candidate_paths(name: &str, loader_dir: &Path, rpaths: &[String]) -> Vec<PathBuf> {
    let expand = |text: &str| -> Option<PathBuf> {
        if let Some(rest) = text.strip_prefix("@loader_path") {
            Some(loader_dir.join(rest.trim_start_matches('/')))
        } else if let Some(rest) = text.strip_prefix("@executable_path") {
            Some(loader_dir.join(rest.trim_start_matches('/')))
        } else if text.starts_with('@') {
            None
        } else {
            let path = PathBuf::from(text);
            Some(if path.is_absolute() { path } else { loader_dir.join(path) })
        }
    };

    if let Some(rest) = name.strip_prefix("@rpath/") {
        rpaths
            .iter()
            .filter_map(|rpath| expand(rpath.as_str()))
            .map(|dir| dir.join(rest))
            .collect()
    } else {
        expand(name).into_iter().collect()
    }
}

#[derive(Clone, Copy)]
enum Endian {
    Big,
    Little,
}

fn read_u32(data: &[u8], offset: usize, endian: Endian) -> Option<u32> {
    let bytes: [u8; 4] = data.get(offset..offset.checked_add(4)?)?.try_into().ok()?;
    Some(match endian {
        Endian::Big => u32::from_be_bytes(bytes),
        Endian::Little => u32::from_le_bytes(bytes),
    })
}

fn read_u64(data: &[u8], offset: usize, endian: Endian) -> Option<u64> {
    let bytes: [u8; 8] = data.get(offset..offset.checked_add(8)?)?.try_into().ok()?;
    Some(match endian {
        Endian::Big => u64::from_be_bytes(bytes),
        Endian::Little => u64::from_le_bytes(bytes),
    })
}

/// Parse a thin or fat Mach-O image. `None` if `data` isn't one.
pub fn parse_macho(data: &[u8]) -> Option<MachOLinks> {
    let magic = read_u32(data, 0, Endian::Big)?;
    match magic {
        FAT_MAGIC | FAT_MAGIC_64 => {
            let count = read_u32(data, 4, Endian::Big)?;
            if count == 0 || count > MAX_FAT_SLICES {
                return None;
            }
            let wide = magic == FAT_MAGIC_64;
            let arch_len = if wide { 32 } else { 20 };
            let mut links = MachOLinks::default();
            for i in 0..count as usize {
                let at = 8 + i * arch_len;
                let (offset, size) = if wide {
                    (
                        read_u64(data, at + 8, Endian::Big)? as usize,
                        read_u64(data, at + 16, Endian::Big)? as usize,
                    )
                } else {
                    (
                        read_u32(data, at + 8, Endian::Big)? as usize,
                        read_u32(data, at + 12, Endian::Big)? as usize,
                    )
                };
                let slice = data.get(offset..offset.checked_add(size)?)?;
                links.merge(parse_thin(slice)?);
            }
            Some(links)
        }
        _ => parse_thin(data),
    }
}

fn parse_thin(data: &[u8]) -> Option<MachOLinks> {
    let (endian, header_len) = match read_u32(data, 0, Endian::Big)? {
        MH_MAGIC => (Endian::Big, 28),
        MH_MAGIC_64 => (Endian::Big, 32),
        MH_CIGAM => (Endian::Little, 28),
        MH_CIGAM_64 => (Endian::Little, 32),
        _ => return None,
    };
    let ncmds = read_u32(data, 16, endian)?;

    let mut links = MachOLinks::default();
    let mut at = header_len;
    for _ in 0..ncmds {
        let cmd = read_u32(data, at, endian)?;
        let cmdsize = read_u32(data, at + 4, endian)? as usize;
        if cmdsize < 8 {
            return None;
        }
        let command = data.get(at..at.checked_add(cmdsize)?)?;
        match cmd {
            LC_LOAD_DYLIB | LC_LOAD_WEAK_DYLIB | LC_REEXPORT_DYLIB | LC_LOAD_UPWARD_DYLIB => {
                if let Some(name) = lc_str(command, endian) {
                    if !links.dylibs.contains(&name) {
                        links.dylibs.push(name);
                    }
                }
            }
            LC_RPATH => {
                if let Some(path) = lc_str(command, endian) {
                    if !links.rpaths.contains(&path) {
                        links.rpaths.push(path);
                    }
                }
            }
            _ => {}
        }
        at += cmdsize;
    }
    Some(links)
}

/// String referenced by the `lc_str` offset at +8 of a load command.
fn lc_str(command: &[u8], endian: Endian) -> Option<String> {
    let offset = read_u32(command, 8, endian)? as usize;
    let tail = command.get(offset..)?;
    let len = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    let text = std::str::from_utf8(&tail[..len]).ok()?;
    (!text.is_empty()).then(|| text.to_string())
}
