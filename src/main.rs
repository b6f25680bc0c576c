//! freezer - packages interpreter programs into self-contained executables.
//!
//! A build runs these steps, each skipped when its previous output is
//! still valid:
//! - Analysis (shared-library closure of every binary)
//! - Code archive (compiled modules)
//! - Container (scripts, code archive, binaries, data)
//! - Executable (bootstrap stub + container)
//! - Collect / Bundle for one-folder and `.app` layouts

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use freezer::config::Config;

#[derive(Parser)]
#[command(name = "freezer")]
#[command(about = "Freeze interpreter programs into self-contained executables")]
#[command(
    after_help = "QUICK START:\n  freezer build app.json          Build (incrementally)\n  freezer show container dist/app  List what got packaged\n  freezer clean                   Remove build artifacts"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an executable from a JSON manifest
    Build {
        /// Path to the build manifest
        manifest: PathBuf,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },

    /// Extract one entry from a code archive or container
    Extract {
        /// Archive, or an executable with a container appended
        file: PathBuf,
        /// Entry name
        name: String,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Passphrase for encrypted code archives (default: FREEZER_KEY)
        #[arg(long)]
        key: Option<String>,
    },

    /// Clean build artifacts (workpath and distpath)
    Clean {
        /// Also clear the binary cache
        #[arg(long)]
        cache: bool,
    },
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show current configuration
    Config,
    /// List the modules in a code archive
    CodeArchive { file: PathBuf },
    /// List the entries of a container
    Container { file: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .without_time()
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let base_dir = std::env::current_dir()?;
    let config = Config::load(&base_dir);

    match cli.command {
        Commands::Build { manifest } => {
            commands::cmd_build(&manifest, config)?;
        }

        Commands::Show { what } => {
            let show_target = match what {
                ShowTarget::Config => commands::show::ShowTarget::Config,
                ShowTarget::CodeArchive { file } => commands::show::ShowTarget::CodeArchive { file },
                ShowTarget::Container { file } => commands::show::ShowTarget::Container { file },
            };
            commands::cmd_show(show_target, &config)?;
        }

        Commands::Extract {
            file,
            name,
            output,
            key,
        } => {
            let key = key.or_else(|| config.key.clone());
            commands::cmd_extract(&file, &name, output, key.as_deref())?;
        }

        Commands::Clean { cache } => {
            commands::cmd_clean(&config, &base_dir, cache)?;
        }
    }

    Ok(())
}
