//! Persisted step fingerprints.
//!
//! A fingerprint is `{"kind": ..., "guts": ...}` stored as JSON at the
//! step's descriptor path. The descriptor's modification time is the
//! step's last build time.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::SystemTime;

use crate::cache;

#[derive(Serialize)]
struct RecordOut<'a, G> {
    kind: &'a str,
    guts: &'a G,
}

#[derive(Deserialize)]
struct RecordIn<G> {
    kind: String,
    guts: G,
}

/// What was found at a descriptor path.
#[derive(Debug)]
pub enum Previous<G> {
    Missing,
    /// Present but unusable; the string says why.
    Corrupt(String),
    Found { guts: G, built_at: SystemTime },
}

pub fn load<G: DeserializeOwned>(path: &Path, kind: &str) -> Previous<G> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Previous::Missing,
        Err(e) => return Previous::Corrupt(e.to_string()),
    };
    let record: RecordIn<G> = match serde_json::from_str(&text) {
        Ok(record) => record,
        Err(e) => return Previous::Corrupt(e.to_string()),
    };
    if record.kind != kind {
        return Previous::Corrupt(format!("descriptor belongs to a {} step", record.kind));
    }
    match cache::mtime(path) {
        Some(built_at) => Previous::Found {
            guts: record.guts,
            built_at,
        },
        None => Previous::Corrupt("descriptor has no modification time".to_string()),
    }
}

/// Write a fingerprint via temp file and rename.
pub fn save<G: Serialize>(path: &Path, kind: &str, guts: &G) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(&RecordOut { kind, guts })?;
    let temp = path.with_extension("toc.tmp");
    fs::write(&temp, text).with_context(|| format!("Failed to write {}", temp.display()))?;
    fs::rename(&temp, path).with_context(|| format!("Failed to move fingerprint to {}", path.display()))?;
    Ok(())
}
