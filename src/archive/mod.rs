//! Archive formats embedded in the frozen executable.
//!
//! - `code` - compact store of compiled modules, optionally compressed and
//!   encrypted, read by the interpreter-side importer
//! - `container` - heterogeneous package with a trailing index, read by
//!   the bootstrap stub with a single seek from the end of the file
//! - `crypto` - per-entry symmetric encryption for the code archive

pub mod code;
pub mod container;
pub mod crypto;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

pub use code::{CodeArchive, CodeArchiveOptions, CodeArchiveWriter, CodeObject};
pub use container::{CompressionPolicy, Container, ContainerOptions, ContainerRecord, ContainerWriter};

/// zlib-compress `data` at `level` (1-9).
pub fn compress(data: &[u8], level: u32) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level.min(9)));
    encoder.write_all(data)?;
    encoder.finish()
}

pub fn decompress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_roundtrip() {
        let data = b"frozen frozen frozen frozen".repeat(40);
        let packed = compress(&data, 9).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(decompress(&packed).unwrap(), data);
    }

    #[test]
    fn test_decompress_garbage_fails() {
        assert!(decompress(b"definitely not zlib").is_err());
    }
}
