//! Bundle step: macOS `.app` layout.
//!
//! ```text
//! <name>.app/Contents/Info.plist
//! <name>.app/Contents/MacOS/       executable and collected files
//! <name>.app/Contents/Resources/   created empty
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;
use walkdir::WalkDir;

use super::{BuildContext, Check, Target};
use crate::error::BuildError;

#[derive(Debug, Serialize, Deserialize)]
pub struct BundleGuts {
    pub source: PathBuf,
    pub name: String,
    pub identifier: String,
    pub executable: String,
}

pub struct BundleStep {
    descriptor: PathBuf,
    /// Collected directory, or the one-file executable.
    source: PathBuf,
    app: PathBuf,
    name: String,
    identifier: String,
    executable: String,
}

impl BundleStep {
    pub fn new(ctx: &mut BuildContext, name: &str, source: &Path, identifier: Option<String>) -> Self {
        let executable = source
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());
        Self {
            descriptor: ctx.descriptor(Self::KIND),
            source: source.to_path_buf(),
            app: ctx.distpath.join(format!("{}.app", name)),
            name: name.to_string(),
            identifier: identifier.unwrap_or_else(|| name.to_string()),
            executable,
        }
    }

    fn info_plist(&self) -> String {
        let mut plist = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n\
             <plist version=\"1.0\">\n<dict>\n",
        );
        let strings = [
            ("CFBundleDisplayName", self.name.as_str()),
            ("CFBundleExecutable", self.executable.as_str()),
            ("CFBundleIdentifier", self.identifier.as_str()),
            ("CFBundleInfoDictionaryVersion", "6.0"),
            ("CFBundleName", self.name.as_str()),
            ("CFBundlePackageType", "APPL"),
            ("CFBundleShortVersionString", "0.0.0"),
        ];
        for (key, value) in strings {
            plist.push_str(&format!("  <key>{}</key>\n  <string>{}</string>\n", key, xml_escape(value)));
        }
        plist.push_str("  <key>LSBackgroundOnly</key>\n  <false/>\n");
        plist.push_str("  <key>NSHighResolutionCapable</key>\n  <true/>\n</dict>\n</plist>\n");
        plist
    }
}

pub(crate) fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

impl Target for BundleStep {
    type Guts = BundleGuts;
    const KIND: &'static str = "Bundle";

    fn descriptor(&self) -> &Path {
        &self.descriptor
    }

    fn output(&self) -> &Path {
        &self.app
    }

    fn guts(&self) -> BundleGuts {
        BundleGuts {
            source: self.source.clone(),
            name: self.name.clone(),
            identifier: self.identifier.clone(),
            executable: self.executable.clone(),
        }
    }

    fn checks(&self, previous: &BundleGuts) -> Vec<Check> {
        vec![
            Check::equal("source", &previous.source, &self.source),
            Check::equal("name", &previous.name, &self.name),
            Check::equal("identifier", &previous.identifier, &self.identifier),
            Check::equal("executable", &previous.executable, &self.executable),
            Check::Tree {
                field: "source",
                root: self.source.clone(),
            },
        ]
    }

    fn assemble(&mut self) -> Result<()> {
        if !self.source.exists() {
            return Err(BuildError::MissingInput {
                step: Self::KIND.to_string(),
                path: self.source.clone(),
            }
            .into());
        }
        if self.source.starts_with(&self.app) {
            return Err(BuildError::OutputConflict {
                output: self.app.clone(),
                conflict: self.source.clone(),
            }
            .into());
        }

        if self.app.exists() {
            fs::remove_dir_all(&self.app).with_context(|| format!("Failed to remove {}", self.app.display()))?;
        }
        let contents = self.app.join("Contents");
        let macos = contents.join("MacOS");
        fs::create_dir_all(&macos)?;
        fs::create_dir_all(contents.join("Resources"))?;

        if self.source.is_dir() {
            for entry in WalkDir::new(&self.source).min_depth(1) {
                let entry = entry?;
                let relative = entry.path().strip_prefix(&self.source)?;
                let target = macos.join(relative);
                if entry.file_type().is_dir() {
                    fs::create_dir_all(&target)?;
                } else {
                    fs::copy(entry.path(), &target)
                        .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
                }
            }
        } else {
            fs::copy(&self.source, macos.join(&self.executable))
                .with_context(|| format!("Failed to copy {}", self.source.display()))?;
        }

        fs::write(contents.join("Info.plist"), self.info_plist())?;
        info!(app = %self.app.display(), "wrote app bundle");
        Ok(())
    }
}
