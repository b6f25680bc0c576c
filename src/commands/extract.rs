//! Extract command - pulls one entry out of an archive for inspection.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use freezer::archive::code::CODE_ARCHIVE_MAGIC;
use freezer::archive::{CodeArchive, Container};

/// Execute the extract command.
///
/// The archive format is picked from the file's leading magic; anything
/// that isn't a code archive is read as a container.
pub fn cmd_extract(file: &Path, name: &str, output: Option<PathBuf>, key: Option<&str>) -> Result<()> {
    let bytes = if is_code_archive(file)? {
        CodeArchive::open(file, None, key)?.extract(name)?.bytes
    } else {
        Container::open(file)?.extract(name)?
    };

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, &bytes).with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Extracted {} ({} bytes) to {}", name, bytes.len(), path.display());
        }
        None => {
            io::stdout().write_all(&bytes)?;
        }
    }
    Ok(())
}

fn is_code_archive(file: &Path) -> Result<bool> {
    let mut magic = [0u8; 4];
    let mut handle = File::open(file).with_context(|| format!("Failed to open {}", file.display()))?;
    Ok(handle.read_exact(&mut magic).is_ok() && magic == CODE_ARCHIVE_MAGIC)
}
