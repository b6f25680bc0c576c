//! Clean command - removes build artifacts.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use freezer::config::Config;
use freezer::paths;
use freezer::platform::TargetPlatform;

/// Execute the clean command.
///
/// Refuses to remove a directory that holds `base_dir` or the current
/// directory, so a misconfigured `FREEZER_DISTPATH=.` can't wipe the project.
pub fn cmd_clean(config: &Config, base_dir: &Path, cache: bool) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let protected = [base_dir, cwd.as_path()];
    let fold = TargetPlatform::host().case_insensitive();

    let mut targets = vec![config.workpath.as_path(), config.distpath.as_path()];
    if cache {
        targets.push(config.cache_dir.as_path());
    }
    // Check all of them before removing any.
    for dir in &targets {
        paths::check_removable(dir, &protected, fold)?;
    }

    remove_dir(&config.workpath)?;
    remove_dir(&config.distpath)?;
    if cache {
        println!("Clearing binary cache ({})...", config.cache_dir.display());
        remove_dir(&config.cache_dir)?;
    }
    println!("Clean complete.");
    Ok(())
}

fn remove_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        println!("Removing {}...", dir.display());
        fs::remove_dir_all(dir).with_context(|| format!("Failed to remove {}", dir.display()))?;
    }
    Ok(())
}
