//! Build command - freezes a program described by a manifest.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use freezer::build::{self, BuildManifest, Outcome};
use freezer::config::Config;

/// Execute the build command.
pub fn cmd_build(manifest_path: &Path, config: Config) -> Result<()> {
    let manifest = BuildManifest::load(manifest_path)?;
    println!("=== Freezing {} ===\n", manifest.name);

    let report = build::build(&manifest, config)
        .with_context(|| format!("Build of '{}' failed", manifest.name))?;

    for (kind, outcome) in &report.steps {
        match outcome {
            Outcome::Built(reason) => println!("  {:<12} built ({})", kind, reason),
            Outcome::Reused => println!("  {:<12} up to date", kind),
        }
    }
    if !report.warnings.is_empty() {
        println!("\n{} unresolved librar{}:", report.warnings.len(), if report.warnings.len() == 1 { "y" } else { "ies" });
        for warning in &report.warnings {
            println!("  {}", warning);
        }
    }

    let size = fs::metadata(&report.artifact)
        .ok()
        .filter(|m| m.is_file())
        .map(|m| format!(" ({:.1} MB)", m.len() as f64 / 1_000_000.0))
        .unwrap_or_default();
    println!("\n=== Build Complete ===");
    println!("  {}{}", report.artifact.display(), size);
    Ok(())
}
