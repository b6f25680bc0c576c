//! Code archive step.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{BuildContext, Check, Target};
use crate::archive::code::build_code_archive;
use crate::archive::CodeArchiveOptions;
use crate::cache;
use crate::platform::HostRuntime;
use crate::toc::Toc;

#[derive(Debug, Serialize, Deserialize)]
pub struct CodeArchiveGuts {
    pub modules: Toc,
    pub level: u32,
    pub host_magic: [u8; 4],
    /// Digest of the passphrase, never the passphrase itself.
    pub key_digest: Option<String>,
}

pub struct CodeArchiveStep {
    descriptor: PathBuf,
    output: PathBuf,
    modules: Toc,
    host: HostRuntime,
    level: u32,
    key: Option<String>,
}

impl CodeArchiveStep {
    pub fn new(ctx: &mut BuildContext, name: &str, modules: Toc, level: u32, key: Option<String>) -> Self {
        Self {
            descriptor: ctx.descriptor(Self::KIND),
            output: ctx.work_file(&format!("{}.frz", name)),
            modules,
            host: ctx.config.host.clone(),
            level: level.min(9),
            key: key.filter(|k| !k.is_empty()),
        }
    }

    fn key_digest(&self) -> Option<String> {
        self.key.as_deref().map(|k| cache::hash_bytes(k.as_bytes()))
    }
}

impl Target for CodeArchiveStep {
    type Guts = CodeArchiveGuts;
    const KIND: &'static str = "CodeArchive";

    fn descriptor(&self) -> &Path {
        &self.descriptor
    }

    fn output(&self) -> &Path {
        &self.output
    }

    fn guts(&self) -> CodeArchiveGuts {
        CodeArchiveGuts {
            modules: self.modules.clone(),
            level: self.level,
            host_magic: self.host.magic,
            key_digest: self.key_digest(),
        }
    }

    fn checks(&self, previous: &CodeArchiveGuts) -> Vec<Check> {
        vec![
            Check::equal("level", &previous.level, &self.level),
            Check::equal("host_magic", &previous.host_magic, &self.host.magic),
            Check::equal("key", &previous.key_digest, &self.key_digest()),
            Check::equal("modules", &previous.modules, &self.modules),
            Check::Toc {
                field: "modules",
                toc: self.modules.clone(),
                with_source: Some(self.host.source_ext.clone()),
            },
        ]
    }

    fn assemble(&mut self) -> Result<()> {
        let options = CodeArchiveOptions::new(&self.host, self.level).with_key(self.key.clone());
        build_code_archive(&self.output, &self.modules, &self.host, options)?;
        Ok(())
    }
}
