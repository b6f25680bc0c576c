//! Code archive: the compiled-module store.
//!
//! # Layout
//!
//! ```text
//! MAGIC "FRZ\0"        4 bytes
//! host runtime magic   4 bytes
//! index offset         4 bytes, big-endian signed
//! compression level    4 bytes, big-endian
//! encryption flag      1 byte
//! entry bodies         ...
//! index                bincode map: name -> (is_package, offset, length)
//! ```
//!
//! The header is written as a placeholder first and rewritten once the
//! index offset is known. After [`CodeArchiveWriter::finish`] the archive
//! is read-only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::crypto::Cipher;
use super::{compress, decompress};
use crate::error::{io_at, ArchiveError};
use crate::platform::HostRuntime;
use crate::toc::{EntryKind, Toc};

pub const CODE_ARCHIVE_MAGIC: [u8; 4] = *b"FRZ\0";
pub const HEADER_LEN: usize = 17;
const FORMAT: &str = "code archive";

/// Location of one module inside the archive body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub is_package: bool,
    pub offset: u64,
    pub length: u32,
}

/// Settings fixed for the whole archive.
#[derive(Debug, Clone)]
pub struct CodeArchiveOptions {
    pub host_magic: [u8; 4],
    /// zlib level, 0 stores bodies uncompressed.
    pub level: u32,
    pub key: Option<String>,
}

impl CodeArchiveOptions {
    pub fn new(host: &HostRuntime, level: u32) -> Self {
        Self {
            host_magic: host.magic,
            level: level.min(9),
            key: None,
        }
    }

    pub fn with_key(mut self, key: Option<String>) -> Self {
        self.key = key.filter(|k| !k.is_empty());
        self
    }
}

fn header(host_magic: [u8; 4], index_offset: i32, level: u32, encrypted: bool) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&CODE_ARCHIVE_MAGIC);
    header[4..8].copy_from_slice(&host_magic);
    header[8..12].copy_from_slice(&index_offset.to_be_bytes());
    header[12..16].copy_from_slice(&level.to_be_bytes());
    header[16] = encrypted as u8;
    header
}

/// Streams module bodies into a new code archive.
pub struct CodeArchiveWriter {
    path: PathBuf,
    out: BufWriter<File>,
    options: CodeArchiveOptions,
    cipher: Option<Cipher>,
    index: BTreeMap<String, IndexEntry>,
    offset: u64,
}

impl CodeArchiveWriter {
    pub fn create(path: &Path, options: CodeArchiveOptions) -> Result<Self, ArchiveError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_at(parent))?;
        }
        let file = File::create(path).map_err(io_at(path))?;
        let mut out = BufWriter::new(file);
        let encrypted = options.key.is_some();
        out.write_all(&header(options.host_magic, 0, options.level, encrypted))
            .map_err(io_at(path))?;

        Ok(Self {
            path: path.to_path_buf(),
            out,
            cipher: options.key.as_deref().map(Cipher::from_passphrase),
            options,
            index: BTreeMap::new(),
            offset: HEADER_LEN as u64,
        })
    }

    /// Append one module body.
    pub fn add(&mut self, name: &str, code: &[u8], is_package: bool) -> Result<(), ArchiveError> {
        let mut body = if self.options.level > 0 {
            compress(code, self.options.level).map_err(io_at(&self.path))?
        } else {
            code.to_vec()
        };
        if let Some(cipher) = &self.cipher {
            body = cipher.encrypt(name, &body)?;
        }

        let length = u32::try_from(body.len()).map_err(|_| ArchiveError::TooLarge {
            path: self.path.clone(),
            what: format!("module '{}' is {} bytes", name, body.len()),
        })?;
        self.out.write_all(&body).map_err(io_at(&self.path))?;
        self.index.insert(
            name.to_string(),
            IndexEntry {
                is_package,
                offset: self.offset,
                length,
            },
        );
        self.offset += length as u64;
        debug!(module = name, length, "added module to code archive");
        Ok(())
    }

    /// Write the index, rewrite the header, and close the archive.
    pub fn finish(mut self) -> Result<PathBuf, ArchiveError> {
        let index_offset = i32::try_from(self.offset).map_err(|_| ArchiveError::TooLarge {
            path: self.path.clone(),
            what: format!("index offset {} exceeds 2 GiB", self.offset),
        })?;
        let index = bincode::serialize(&self.index).map_err(|e| ArchiveError::Index {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        self.out.write_all(&index).map_err(io_at(&self.path))?;

        let encrypted = self.cipher.is_some();
        self.out.seek(SeekFrom::Start(0)).map_err(io_at(&self.path))?;
        self.out
            .write_all(&header(self.options.host_magic, index_offset, self.options.level, encrypted))
            .map_err(io_at(&self.path))?;
        self.out.flush().map_err(io_at(&self.path))?;

        info!(
            path = %self.path.display(),
            modules = self.index.len(),
            level = self.options.level,
            encrypted,
            "wrote code archive"
        );
        Ok(self.path)
    }
}

/// Build a code archive from the compiled modules in `modules`.
///
/// Only `CompiledModule` and `Source` entries are stored; their files hold
/// the serialized code. A module is a package when its file stem is the host
/// runtime's package-init stem.
pub fn build_code_archive(
    path: &Path,
    modules: &Toc,
    host: &HostRuntime,
    options: CodeArchiveOptions,
) -> Result<PathBuf, ArchiveError> {
    let mut writer = CodeArchiveWriter::create(path, options)?;
    for entry in modules {
        if !matches!(entry.kind, EntryKind::CompiledModule | EntryKind::Source) {
            continue;
        }
        let code = fs::read(&entry.path).map_err(io_at(&entry.path))?;
        writer.add(&entry.name, &code, host.is_package_path(&entry.path))?;
    }
    writer.finish()
}

/// A module read back from the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeObject {
    pub bytes: Vec<u8>,
    pub is_package: bool,
}

/// Read access to a finished code archive.
pub struct CodeArchive {
    path: PathBuf,
    file: File,
    host_magic: [u8; 4],
    level: u32,
    encrypted: bool,
    cipher: Option<Cipher>,
    index: BTreeMap<String, IndexEntry>,
}

impl CodeArchive {
    /// Open and validate an archive.
    ///
    /// `expected_magic` is the loading runtime's magic; `None` skips the
    /// compatibility check (inspection tools). `key` is needed to extract
    /// from an encrypted archive.
    pub fn open(path: &Path, expected_magic: Option<[u8; 4]>, key: Option<&str>) -> Result<Self, ArchiveError> {
        let mut file = File::open(path).map_err(io_at(path))?;
        let file_len = file.metadata().map_err(io_at(path))?.len();

        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header).map_err(|_| ArchiveError::BadMagic {
            path: path.to_path_buf(),
            format: FORMAT,
        })?;
        if header[0..4] != CODE_ARCHIVE_MAGIC {
            return Err(ArchiveError::BadMagic {
                path: path.to_path_buf(),
                format: FORMAT,
            });
        }
        let mut host_magic = [0u8; 4];
        host_magic.copy_from_slice(&header[4..8]);
        if let Some(expected) = expected_magic {
            if expected != host_magic {
                return Err(ArchiveError::HostMagicMismatch {
                    path: path.to_path_buf(),
                    expected: hex::encode(expected),
                    found: hex::encode(host_magic),
                });
            }
        }

        let index_offset = i32::from_be_bytes([header[8], header[9], header[10], header[11]]);
        let level = u32::from_be_bytes([header[12], header[13], header[14], header[15]]);
        let encrypted = header[16] != 0;
        let corrupt = |reason: String| ArchiveError::Corrupt {
            path: path.to_path_buf(),
            reason,
        };
        if index_offset < HEADER_LEN as i32 || index_offset as u64 > file_len {
            return Err(corrupt(format!("index offset {} out of range", index_offset)));
        }

        file.seek(SeekFrom::Start(index_offset as u64)).map_err(io_at(path))?;
        let mut raw_index = Vec::new();
        file.read_to_end(&mut raw_index).map_err(io_at(path))?;
        let index: BTreeMap<String, IndexEntry> =
            bincode::deserialize(&raw_index).map_err(|e| corrupt(format!("unreadable index: {}", e)))?;
        if let Some((name, entry)) = index
            .iter()
            .find(|(_, e)| e.offset.saturating_add(e.length as u64) > index_offset as u64)
        {
            return Err(corrupt(format!("entry '{}' overlaps the index ({:?})", name, entry)));
        }

        debug!(path = %path.display(), modules = index.len(), encrypted, "opened code archive");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            host_magic,
            level,
            encrypted,
            cipher: key.filter(|k| !k.is_empty()).map(Cipher::from_passphrase),
            index,
        })
    }

    /// Read, decrypt and decompress one module.
    pub fn extract(&mut self, name: &str) -> Result<CodeObject, ArchiveError> {
        let entry = *self.index.get(name).ok_or_else(|| ArchiveError::MissingEntry {
            name: name.to_string(),
            path: self.path.clone(),
        })?;

        self.file
            .seek(SeekFrom::Start(entry.offset))
            .map_err(io_at(&self.path))?;
        let mut body = vec![0u8; entry.length as usize];
        self.file.read_exact(&mut body).map_err(io_at(&self.path))?;

        if self.encrypted {
            let cipher = self.cipher.as_ref().ok_or_else(|| ArchiveError::Decrypt {
                name: name.to_string(),
                reason: "archive is encrypted but no key was supplied".to_string(),
            })?;
            body = cipher.decrypt(name, &body)?;
        }
        if self.level > 0 {
            body = decompress(&body).map_err(|source| ArchiveError::Decompress {
                name: name.to_string(),
                source,
            })?;
        }

        Ok(CodeObject {
            bytes: body,
            is_package: entry.is_package,
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    pub fn entry(&self, name: &str) -> Option<&IndexEntry> {
        self.index.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn is_package(&self, name: &str) -> Option<bool> {
        self.index.get(name).map(|e| e.is_package)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn host_magic(&self) -> [u8; 4] {
        self.host_magic
    }
}
