//! Container archive: typed entries with a trailing index.
//!
//! The bootstrap stub finds the package with one seek from the end of its
//! own executable, so everything it needs to locate the index lives in a
//! fixed-size trailer. Offsets are relative to the start of the package,
//! which lets the same bytes work standalone or appended to a stub.
//!
//! ```text
//! body:    entry bodies, raw or zlib, back to back
//! index:   record_len u32 | offset u64 | stored_len u64 | full_len u64
//!          | compressed u8 | type_tag u8 | name, NUL-padded to 8 bytes
//! trailer: MAGIC[8] | package_len u64 | index_offset u64 | index_len u32
//!          | entry_count u32 | format_version u32 | runtime_lib[64]
//! ```
//!
//! All integers are big-endian.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{compress, decompress};
use crate::bincache::BinaryCache;
use crate::error::{io_at, ArchiveError};
use crate::platform::TargetPlatform;
use crate::toc::{Entry, EntryKind, Toc};

pub const CONTAINER_MAGIC: [u8; 8] = *b"FRZPKG\x0c\x0b";
pub const FORMAT_VERSION: u32 = 1;
pub const TRAILER_LEN: usize = 100;
pub const RUNTIME_LIB_LEN: usize = 64;
const RECORD_FIXED_LEN: usize = 30;
const FORMAT: &str = "container archive";

/// One index record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub name: String,
    pub kind: EntryKind,
    pub compressed: bool,
    /// Offset of the body from the start of the package.
    pub offset: u64,
    pub stored_len: u64,
    pub full_len: u64,
}

impl ContainerRecord {
    fn encode(&self) -> Vec<u8> {
        let name_len = (self.name.len() + 1).next_multiple_of(8);
        let record_len = RECORD_FIXED_LEN + name_len;
        let mut out = Vec::with_capacity(record_len);
        out.extend_from_slice(&(record_len as u32).to_be_bytes());
        out.extend_from_slice(&self.offset.to_be_bytes());
        out.extend_from_slice(&self.stored_len.to_be_bytes());
        out.extend_from_slice(&self.full_len.to_be_bytes());
        out.push(self.compressed as u8);
        out.push(self.kind.type_tag());
        out.extend_from_slice(self.name.as_bytes());
        out.resize(record_len, 0);
        out
    }

    /// Decode the record at the start of `data`, returning it and its length.
    fn decode(data: &[u8]) -> Result<(Self, usize), String> {
        if data.len() < RECORD_FIXED_LEN {
            return Err("truncated index record".to_string());
        }
        let record_len = u32::from_be_bytes(data[0..4].try_into().map_err(|_| "bad record length")?) as usize;
        if record_len < RECORD_FIXED_LEN || record_len > data.len() {
            return Err(format!("record length {} out of range", record_len));
        }
        let u64_at = |at: usize| -> u64 {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&data[at..at + 8]);
            u64::from_be_bytes(buf)
        };
        let kind = EntryKind::from_type_tag(data[29])
            .ok_or_else(|| format!("unknown type tag {:#04x}", data[29]))?;
        let raw_name = &data[RECORD_FIXED_LEN..record_len];
        let name_end = raw_name.iter().position(|&b| b == 0).unwrap_or(raw_name.len());
        let name = std::str::from_utf8(&raw_name[..name_end])
            .map_err(|_| "entry name is not UTF-8".to_string())?
            .to_string();

        Ok((
            Self {
                name,
                kind,
                compressed: data[28] != 0,
                offset: u64_at(4),
                stored_len: u64_at(12),
                full_len: u64_at(20),
            },
            record_len,
        ))
    }
}

/// Which entry kinds get zlib-compressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionPolicy {
    by_kind: HashMap<EntryKind, bool>,
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        let compressed = [
            EntryKind::Source,
            EntryKind::CompiledModule,
            EntryKind::Extension,
            EntryKind::Binary,
            EntryKind::Data,
        ];
        Self {
            by_kind: EntryKind::ALL
                .into_iter()
                .map(|kind| (kind, compressed.contains(&kind)))
                .collect(),
        }
    }
}

impl CompressionPolicy {
    /// Store everything raw.
    pub fn none() -> Self {
        Self {
            by_kind: EntryKind::ALL.into_iter().map(|kind| (kind, false)).collect(),
        }
    }

    pub fn set(mut self, kind: EntryKind, compress: bool) -> Self {
        self.by_kind.insert(kind, compress);
        self
    }

    pub fn compresses(&self, kind: EntryKind) -> bool {
        // Options and dependency references have nothing worth compressing.
        if matches!(kind, EntryKind::RuntimeOption | EntryKind::Dependency) {
            return false;
        }
        self.by_kind.get(&kind).copied().unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct ContainerOptions {
    /// Runtime shared library name the stub loads before running entries.
    pub runtime_lib: String,
    pub level: u32,
    pub policy: CompressionPolicy,
}

impl ContainerOptions {
    pub fn new(runtime_lib: impl Into<String>) -> Self {
        Self {
            runtime_lib: runtime_lib.into(),
            level: 9,
            policy: CompressionPolicy::default(),
        }
    }
}

/// Streams entries into a new container archive.
pub struct ContainerWriter {
    path: PathBuf,
    out: BufWriter<File>,
    options: ContainerOptions,
    records: Vec<ContainerRecord>,
    names: HashSet<String>,
    offset: u64,
}

impl ContainerWriter {
    pub fn create(path: &Path, options: ContainerOptions) -> Result<Self, ArchiveError> {
        if options.runtime_lib.len() >= RUNTIME_LIB_LEN {
            return Err(ArchiveError::TooLarge {
                path: path.to_path_buf(),
                what: format!("runtime library name '{}' exceeds {} bytes", options.runtime_lib, RUNTIME_LIB_LEN - 1),
            });
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_at(parent))?;
        }
        let file = File::create(path).map_err(io_at(path))?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            options,
            records: Vec::new(),
            names: HashSet::new(),
            offset: 0,
        })
    }

    /// Append one entry body.
    ///
    /// A name already present is skipped and reported as `false`.
    pub fn add(&mut self, name: &str, kind: EntryKind, data: &[u8]) -> Result<bool, ArchiveError> {
        if name.as_bytes().contains(&0) {
            return Err(ArchiveError::Index {
                path: self.path.clone(),
                reason: format!("entry name {:?} contains NUL", name),
            });
        }
        if !self.names.insert(name.to_string()) {
            debug!(entry = name, "duplicate container entry skipped");
            return Ok(false);
        }

        let compressed = self.options.level > 0 && self.options.policy.compresses(kind);
        let stored = if compressed {
            compress(data, self.options.level).map_err(io_at(&self.path))?
        } else {
            data.to_vec()
        };
        self.out.write_all(&stored).map_err(io_at(&self.path))?;
        self.records.push(ContainerRecord {
            name: name.to_string(),
            kind,
            compressed,
            offset: self.offset,
            stored_len: stored.len() as u64,
            full_len: data.len() as u64,
        });
        self.offset += stored.len() as u64;
        Ok(true)
    }

    /// Append `entry`, reading its payload the way its kind requires.
    ///
    /// `source` overrides where the bytes are read from (a binary cache copy).
    pub fn add_entry(&mut self, entry: &Entry, source: Option<&Path>) -> Result<bool, ArchiveError> {
        let data = match entry.kind {
            EntryKind::RuntimeOption => Vec::new(),
            EntryKind::Dependency => entry.path.to_string_lossy().into_owned().into_bytes(),
            _ => {
                let path = source.unwrap_or(&entry.path);
                fs::read(path).map_err(io_at(path))?
            }
        };
        self.add(&entry.name, entry.kind, &data)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write the index and trailer.
    pub fn finish(mut self) -> Result<PathBuf, ArchiveError> {
        let index: Vec<u8> = self.records.iter().flat_map(|r| r.encode()).collect();
        let too_large = |what: String| ArchiveError::TooLarge {
            path: self.path.clone(),
            what,
        };
        let index_len = u32::try_from(index.len()).map_err(|_| too_large("index over 4 GiB".to_string()))?;
        let entry_count =
            u32::try_from(self.records.len()).map_err(|_| too_large("too many entries".to_string()))?;
        let index_offset = self.offset;
        let package_len = index_offset + index.len() as u64 + TRAILER_LEN as u64;

        let mut trailer = Vec::with_capacity(TRAILER_LEN);
        trailer.extend_from_slice(&CONTAINER_MAGIC);
        trailer.extend_from_slice(&package_len.to_be_bytes());
        trailer.extend_from_slice(&index_offset.to_be_bytes());
        trailer.extend_from_slice(&index_len.to_be_bytes());
        trailer.extend_from_slice(&entry_count.to_be_bytes());
        trailer.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
        trailer.extend_from_slice(self.options.runtime_lib.as_bytes());
        trailer.resize(TRAILER_LEN, 0);

        self.out.write_all(&index).map_err(io_at(&self.path))?;
        self.out.write_all(&trailer).map_err(io_at(&self.path))?;
        self.out.flush().map_err(io_at(&self.path))?;

        info!(
            path = %self.path.display(),
            entries = self.records.len(),
            bytes = package_len,
            "wrote container archive"
        );
        Ok(self.path)
    }
}

/// Build a container from a mixed entry list.
///
/// Native entries are read through `cache` when one is given, and two
/// native entries pointing at the same file (after case normalization) are
/// written once.
pub fn build_container(
    path: &Path,
    entries: &Toc,
    options: ContainerOptions,
    mut cache: Option<&mut BinaryCache>,
    platform: TargetPlatform,
) -> anyhow::Result<PathBuf> {
    let mut writer = ContainerWriter::create(path, options)?;
    let mut native_seen = HashSet::new();

    for entry in entries {
        if entry.kind.is_native() {
            if !native_seen.insert(platform.normalize_path(&entry.path)) {
                debug!(entry = %entry.name, path = %entry.path.display(), "native file already packaged");
                continue;
            }
            let source = match cache.as_deref_mut() {
                Some(cache) => Some(cache.resolve(&entry.path)?),
                None => None,
            };
            writer.add_entry(entry, source.as_deref())?;
        } else if !writer.add_entry(entry, None)? {
            warn!(entry = %entry.name, "entry name appears twice, keeping the first");
        }
    }

    Ok(writer.finish()?)
}

/// Read access to a container, standalone or appended to an executable.
pub struct Container {
    path: PathBuf,
    file: File,
    package_start: u64,
    runtime_lib: String,
    records: Vec<ContainerRecord>,
}

impl Container {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let mut file = File::open(path).map_err(io_at(path))?;
        let file_len = file.metadata().map_err(io_at(path))?.len();
        let bad_magic = || ArchiveError::BadMagic {
            path: path.to_path_buf(),
            format: FORMAT,
        };
        let corrupt = |reason: String| ArchiveError::Corrupt {
            path: path.to_path_buf(),
            reason,
        };

        if file_len < TRAILER_LEN as u64 {
            return Err(bad_magic());
        }
        file.seek(SeekFrom::End(-(TRAILER_LEN as i64))).map_err(io_at(path))?;
        let mut trailer = [0u8; TRAILER_LEN];
        file.read_exact(&mut trailer).map_err(io_at(path))?;
        if trailer[0..8] != CONTAINER_MAGIC {
            return Err(bad_magic());
        }

        let u64_at = |at: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&trailer[at..at + 8]);
            u64::from_be_bytes(buf)
        };
        let u32_at = |at: usize| {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&trailer[at..at + 4]);
            u32::from_be_bytes(buf)
        };
        let package_len = u64_at(8);
        let index_offset = u64_at(16);
        let index_len = u32_at(24) as u64;
        let entry_count = u32_at(28) as usize;
        let version = u32_at(32);
        if version != FORMAT_VERSION {
            return Err(ArchiveError::UnsupportedVersion {
                path: path.to_path_buf(),
                expected: FORMAT_VERSION,
                found: version,
            });
        }
        let lib = &trailer[36..];
        let lib_end = lib.iter().position(|&b| b == 0).unwrap_or(lib.len());
        let runtime_lib = String::from_utf8_lossy(&lib[..lib_end]).into_owned();

        if package_len > file_len || index_offset.checked_add(index_len + TRAILER_LEN as u64) != Some(package_len) {
            return Err(corrupt(format!(
                "trailer does not add up (package {} bytes, index at {} len {}, file {} bytes)",
                package_len, index_offset, index_len, file_len
            )));
        }
        if entry_count as u64 > index_len / RECORD_FIXED_LEN as u64 {
            return Err(corrupt(format!(
                "trailer promises {} entries but the index is only {} bytes",
                entry_count, index_len
            )));
        }
        let package_start = file_len - package_len;

        file.seek(SeekFrom::Start(package_start + index_offset))
            .map_err(io_at(path))?;
        let mut index = vec![0u8; index_len as usize];
        file.read_exact(&mut index).map_err(io_at(path))?;

        let mut records = Vec::with_capacity(entry_count);
        let mut at = 0;
        while at < index.len() {
            let (record, len) = ContainerRecord::decode(&index[at..]).map_err(&corrupt)?;
            if record.offset.saturating_add(record.stored_len) > index_offset {
                return Err(corrupt(format!("entry '{}' runs into the index", record.name)));
            }
            records.push(record);
            at += len;
        }
        if records.len() != entry_count {
            return Err(corrupt(format!(
                "trailer promises {} entries, index holds {}",
                entry_count,
                records.len()
            )));
        }

        debug!(path = %path.display(), entries = records.len(), package_start, "opened container archive");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            package_start,
            runtime_lib,
            records,
        })
    }

    pub fn records(&self) -> &[ContainerRecord] {
        &self.records
    }

    pub fn record(&self, name: &str) -> Option<&ContainerRecord> {
        self.records.iter().find(|r| r.name == name)
    }

    /// Names of the runtime option entries, in index order.
    pub fn options(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| r.kind == EntryKind::RuntimeOption)
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn runtime_lib(&self) -> &str {
        &self.runtime_lib
    }

    /// Offset of the package inside the file; non-zero behind a stub.
    pub fn package_start(&self) -> u64 {
        self.package_start
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Uncompressed body of `name`.
    pub fn extract(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        let record = self.record(name).cloned().ok_or_else(|| ArchiveError::MissingEntry {
            name: name.to_string(),
            path: self.path.clone(),
        })?;

        self.file
            .seek(SeekFrom::Start(self.package_start + record.offset))
            .map_err(io_at(&self.path))?;
        let mut stored = vec![0u8; record.stored_len as usize];
        self.file.read_exact(&mut stored).map_err(io_at(&self.path))?;

        let data = if record.compressed {
            decompress(&stored).map_err(|source| ArchiveError::Decompress {
                name: name.to_string(),
                source,
            })?
        } else {
            stored
        };
        if data.len() as u64 != record.full_len {
            return Err(ArchiveError::Corrupt {
                path: self.path.clone(),
                reason: format!(
                    "entry '{}' is {} bytes, index says {}",
                    name,
                    data.len(),
                    record.full_len
                ),
            });
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_padding() {
        let record = ContainerRecord {
            name: "abc".to_string(),
            kind: EntryKind::Data,
            compressed: true,
            offset: 1,
            stored_len: 2,
            full_len: 3,
        };
        let bytes = record.encode();
        assert_eq!(bytes.len(), RECORD_FIXED_LEN + 8);
        assert_eq!(u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize, bytes.len());
        assert_eq!(bytes[29], b'x');
        let (decoded, len) = ContainerRecord::decode(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(len, bytes.len());

        let exact = ContainerRecord {
            name: "1234567".to_string(),
            ..record
        };
        assert_eq!(exact.encode().len(), RECORD_FIXED_LEN + 8);
    }

    #[test]
    fn test_trailer_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkg");
        let mut writer = ContainerWriter::create(&path, ContainerOptions::new("libpython3.12.so.1.0")).unwrap();
        writer.add("opt", EntryKind::RuntimeOption, b"").unwrap();
        writer.finish().unwrap();

        let bytes = fs::read(&path).unwrap();
        let trailer = &bytes[bytes.len() - TRAILER_LEN..];
        assert_eq!(&trailer[0..8], &CONTAINER_MAGIC);
        assert_eq!(u64::from_be_bytes(trailer[8..16].try_into().unwrap()), bytes.len() as u64);
        assert_eq!(u64::from_be_bytes(trailer[16..24].try_into().unwrap()), 0);
        assert_eq!(u32::from_be_bytes(trailer[28..32].try_into().unwrap()), 1);
        assert_eq!(u32::from_be_bytes(trailer[32..36].try_into().unwrap()), FORMAT_VERSION);
        assert!(trailer[36..].starts_with(b"libpython3.12.so.1.0\0"));
    }

    #[test]
    fn test_compression_policy() {
        let policy = CompressionPolicy::default();
        assert!(policy.compresses(EntryKind::Binary));
        assert!(policy.compresses(EntryKind::Data));
        assert!(!policy.compresses(EntryKind::ArchiveRef));
        assert!(!policy.compresses(EntryKind::RuntimeOption));
        assert!(!CompressionPolicy::none().compresses(EntryKind::Data));
        assert!(!policy.set(EntryKind::Dependency, true).compresses(EntryKind::Dependency));
    }

    #[test]
    fn test_rejects_wrong_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkg");
        ContainerWriter::create(&path, ContainerOptions::new("lib")).unwrap().finish().unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let at = bytes.len() - TRAILER_LEN + 32;
        bytes[at..at + 4].copy_from_slice(&7u32.to_be_bytes());
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            Container::open(&path),
            Err(ArchiveError::UnsupportedVersion { found: 7, .. })
        ));
    }

    #[test]
    fn test_rejects_inflated_entry_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkg");
        let mut writer = ContainerWriter::create(&path, ContainerOptions::new("lib")).unwrap();
        writer.add("one", EntryKind::Data, b"payload").unwrap();
        writer.finish().unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let at = bytes.len() - TRAILER_LEN + 28;
        bytes[at..at + 4].copy_from_slice(&u32::MAX.to_be_bytes());
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(Container::open(&path), Err(ArchiveError::Corrupt { .. })));
    }

    #[test]
    fn test_rejects_short_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkg");
        fs::write(&path, b"tiny").unwrap();
        assert!(matches!(Container::open(&path), Err(ArchiveError::BadMagic { .. })));
        fs::write(&path, vec![0u8; 500]).unwrap();
        assert!(matches!(Container::open(&path), Err(ArchiveError::BadMagic { .. })));
    }

    #[test]
    fn test_rejects_long_runtime_lib() {
        let dir = tempfile::tempdir().unwrap();
        let options = ContainerOptions::new("x".repeat(RUNTIME_LIB_LEN));
        assert!(matches!(
            ContainerWriter::create(&dir.path().join("pkg"), options),
            Err(ArchiveError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_native_entries_coalesce_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("libz.so");
        fs::write(&lib, b"zlib bytes").unwrap();
        let platform = TargetPlatform::new(crate::platform::OsFamily::Linux, 64);

        let toc = Toc::from_entries(
            false,
            [
                Entry::new("libz.so", &lib, EntryKind::Binary),
                Entry::new("zlib_ext.so", &lib, EntryKind::Extension),
            ],
        );
        let path = dir.path().join("pkg");
        build_container(&path, &toc, ContainerOptions::new("lib"), None, platform).unwrap();

        let container = Container::open(&path).unwrap();
        assert_eq!(container.len(), 1);
        assert_eq!(container.records()[0].name, "libz.so");
    }
}
