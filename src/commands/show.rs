//! Show command - displays configuration and archive contents.

use anyhow::Result;
use std::path::PathBuf;

use freezer::archive::{CodeArchive, Container};
use freezer::config::Config;

/// Show target for the show command.
pub enum ShowTarget {
    /// Show configuration
    Config,
    /// List a code archive
    CodeArchive { file: PathBuf },
    /// List a container, standalone or inside an executable
    Container { file: PathBuf },
}

/// Execute the show command.
pub fn cmd_show(target: ShowTarget, config: &Config) -> Result<()> {
    match target {
        ShowTarget::Config => {
            config.print();
        }
        ShowTarget::CodeArchive { file } => {
            let archive = CodeArchive::open(&file, None, None)?;
            println!("{}", file.display());
            println!(
                "  host magic {}, level {}, {}encrypted, {} modules",
                hex::encode(archive.host_magic()),
                archive.level(),
                if archive.encrypted() { "" } else { "not " },
                archive.len()
            );
            for name in archive.names() {
                if let Some(entry) = archive.entry(name) {
                    let marker = if entry.is_package { " (package)" } else { "" };
                    println!("  {:>10}  {}{}", entry.length, name, marker);
                }
            }
        }
        ShowTarget::Container { file } => {
            let container = Container::open(&file)?;
            println!("{}", file.display());
            println!(
                "  runtime {}, {} entries, package at offset {}",
                container.runtime_lib(),
                container.len(),
                container.package_start()
            );
            for record in container.records() {
                println!(
                    "  {} {:>10} {:>10} {} {}",
                    record.kind.type_tag() as char,
                    record.stored_len,
                    record.full_len,
                    if record.compressed { "z" } else { "-" },
                    record.name
                );
            }
        }
    }
    Ok(())
}
