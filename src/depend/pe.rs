//! PE (Windows) dependency walker.
//!
//! Reads the import directory of a PE32 / PE32+ image and returns the DLL
//! names it imports. Files that aren't PE images (side files dragged in by
//! an assembly manifest, data with a `.dll` suffix) produce no references.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{DependencyWalker, Reference};

const IMPORT_DIRECTORY: usize = 1;
const DELAY_IMPORT_DIRECTORY: usize = 13;
const SECTION_HEADER_LEN: usize = 40;
const IMPORT_DESCRIPTOR_LEN: usize = 20;
const DELAY_DESCRIPTOR_LEN: usize = 32;
const MAX_DESCRIPTORS: usize = 4096;
const MAX_NAME_LEN: usize = 512;

#[derive(Debug, Clone, Copy, Default)]
pub struct PeWalker;

impl DependencyWalker for PeWalker {
    fn references(&self, binary: &Path) -> Vec<Reference> {
        let data = match fs::read(binary) {
            Ok(d) => d,
            Err(e) => {
                warn!(binary = %binary.display(), error = %e, "cannot read PE image");
                return Vec::new();
            }
        };
        match parse_pe_imports(&data) {
            Some(names) => names.into_iter().map(Reference::new).collect(),
            None => {
                debug!(binary = %binary.display(), "not a PE image, no dependencies");
                Vec::new()
            }
        }
    }

    fn default_search_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(root) = env::var_os("SystemRoot") {
            let root = PathBuf::from(root);
            dirs.push(root.join("System32"));
            dirs.push(root.clone());
        }
        if let Some(path) = env::var_os("PATH") {
            dirs.extend(env::split_paths(&path));
        }
        dirs
    }
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes(bytes.try_into().ok()?))
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

struct Section {
    virtual_address: u32,
    virtual_size: u32,
    raw_size: u32,
    raw_offset: u32,
}

struct Image<'a> {
    data: &'a [u8],
    sections: Vec<Section>,
}

impl Image<'_> {
    fn rva_to_offset(&self, rva: u32) -> Option<usize> {
        self.sections.iter().find_map(|s| {
            let span = s.virtual_size.max(s.raw_size);
            if rva >= s.virtual_address && rva - s.virtual_address < span {
                Some((rva - s.virtual_address) as usize + s.raw_offset as usize)
            } else {
                None
            }
        })
    }

    fn c_string_at_rva(&self, rva: u32) -> Option<String> {
        let start = self.rva_to_offset(rva)?;
        let tail = self.data.get(start..)?;
        let len = tail.iter().take(MAX_NAME_LEN).position(|&b| b == 0)?;
        let name = std::str::from_utf8(&tail[..len]).ok()?;
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }
}

/// DLL names imported by a PE image, in import-table order.
///
/// Returns `None` when `data` isn't a PE image.
pub fn parse_pe_imports(data: &[u8]) -> Option<Vec<String>> {
    if data.get(0..2)? != b"MZ" {
        return None;
    }
    let pe = read_u32(data, 0x3c)? as usize;
    if data.get(pe..pe.checked_add(4)?)? != b"PE\0\0" {
        return None;
    }

    let coff = pe + 4;
    let section_count = read_u16(data, coff + 2)? as usize;
    let optional_len = read_u16(data, coff + 16)? as usize;
    let optional = coff + 20;

    let (dir_count_at, dirs_at) = match read_u16(data, optional)? {
        0x10b => (optional + 92, optional + 96),
        0x20b => (optional + 108, optional + 112),
        _ => return None,
    };
    let dir_count = read_u32(data, dir_count_at)? as usize;

    let section_table = optional + optional_len;
    let mut sections = Vec::with_capacity(section_count);
    for i in 0..section_count {
        let at = section_table + i * SECTION_HEADER_LEN;
        sections.push(Section {
            virtual_size: read_u32(data, at + 8)?,
            virtual_address: read_u32(data, at + 12)?,
            raw_size: read_u32(data, at + 16)?,
            raw_offset: read_u32(data, at + 20)?,
        });
    }
    let image = Image { data, sections };

    let directory_rva = |index: usize| -> Option<u32> {
        if index >= dir_count {
            return None;
        }
        read_u32(data, dirs_at + index * 8).filter(|&rva| rva != 0)
    };

    let mut names: Vec<String> = Vec::new();
    let mut push = |name: String| {
        if !names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
            names.push(name);
        }
    };

    // The name RVA is at +12 of a regular descriptor and +4 of a delay-load one.
    let tables = [
        (IMPORT_DIRECTORY, IMPORT_DESCRIPTOR_LEN, 12),
        (DELAY_IMPORT_DIRECTORY, DELAY_DESCRIPTOR_LEN, 4),
    ];
    for (directory, descriptor_len, name_field) in tables {
        let Some(rva) = directory_rva(directory) else {
            continue;
        };
        let Some(mut at) = image.rva_to_offset(rva) else {
            continue;
        };
        for _ in 0..MAX_DESCRIPTORS {
            let Some(descriptor) = data.get(at..at + descriptor_len) else {
                break;
            };
            if descriptor.iter().all(|&b| b == 0) {
                break;
            }
            let Some(name_rva) = read_u32(data, at + name_field) else {
                break;
            };
            if name_rva == 0 {
                break;
            }
            if let Some(name) = image.c_string_at_rva(name_rva) {
                push(name);
            }
            at += descriptor_len;
        }
    }

    Some(names)
}
