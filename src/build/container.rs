//! Container archive step.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{BuildContext, Check, Target};
use crate::archive::container::build_container;
use crate::archive::ContainerOptions;
use crate::bincache::BinaryCache;
use crate::platform::TargetPlatform;
use crate::toc::Toc;

#[derive(Debug, Serialize, Deserialize)]
pub struct ContainerGuts {
    pub entries: Toc,
    pub runtime_lib: String,
    pub level: u32,
    pub strip: bool,
    pub upx: bool,
}

pub struct ContainerStep {
    descriptor: PathBuf,
    output: PathBuf,
    entries: Toc,
    options: ContainerOptions,
    platform: TargetPlatform,
    cache_root: PathBuf,
    runtime_version: String,
    strip: bool,
    upx: bool,
}

impl ContainerStep {
    pub fn new(ctx: &mut BuildContext, name: &str, entries: Toc, strip: bool, upx: bool) -> Self {
        Self {
            descriptor: ctx.descriptor(Self::KIND),
            output: ctx.work_file(&format!("{}.pkg", name)),
            entries,
            options: ContainerOptions::new(ctx.config.host.lib_name.clone()),
            platform: ctx.platform,
            cache_root: ctx.config.cache_dir.clone(),
            runtime_version: ctx.config.host.version.clone(),
            strip,
            upx,
        }
    }
}

impl Target for ContainerStep {
    type Guts = ContainerGuts;
    const KIND: &'static str = "Container";

    fn descriptor(&self) -> &Path {
        &self.descriptor
    }

    fn output(&self) -> &Path {
        &self.output
    }

    fn guts(&self) -> ContainerGuts {
        ContainerGuts {
            entries: self.entries.clone(),
            runtime_lib: self.options.runtime_lib.clone(),
            level: self.options.level,
            strip: self.strip,
            upx: self.upx,
        }
    }

    fn checks(&self, previous: &ContainerGuts) -> Vec<Check> {
        vec![
            Check::equal("runtime_lib", &previous.runtime_lib, &self.options.runtime_lib),
            Check::equal("level", &previous.level, &self.options.level),
            Check::equal("strip", &previous.strip, &self.strip),
            Check::equal("upx", &previous.upx, &self.upx),
            Check::equal("entries", &previous.entries, &self.entries),
            Check::toc("entries", &self.entries),
        ]
    }

    fn assemble(&mut self) -> Result<()> {
        let mut cache = if self.strip || self.upx {
            Some(BinaryCache::open(
                &self.cache_root,
                &self.runtime_version,
                self.platform,
                self.strip,
                self.upx,
            )?)
        } else {
            None
        };
        build_container(
            &self.output,
            &self.entries,
            self.options.clone(),
            cache.as_mut(),
            self.platform,
        )?;
        Ok(())
    }
}
