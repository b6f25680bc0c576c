//! Analysis step: turns the declared inputs into the lists later steps
//! package, with the shared-library closure of every binary resolved.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use super::{BuildContext, Check, Target};
use crate::depend::{DependencyPolicy, Resolver};
use crate::toc::Toc;

/// Everything the analysis result depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisInputs {
    pub scripts: Toc,
    pub modules: Toc,
    pub binaries: Toc,
    pub datas: Toc,
    pub excludes: Vec<String>,
    pub includes: Vec<String>,
    pub search_path: Vec<PathBuf>,
    pub strict: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisOutputs {
    pub scripts: Toc,
    /// Compiled modules for the code archive.
    pub pure: Toc,
    /// Inputs binaries plus their resolved closure.
    pub binaries: Toc,
    pub datas: Toc,
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalysisGuts {
    pub inputs: AnalysisInputs,
    pub outputs: AnalysisOutputs,
}

pub struct Analysis {
    descriptor: PathBuf,
    warnfile: PathBuf,
    inputs: AnalysisInputs,
    resolver: Resolver,
    pub outputs: AnalysisOutputs,
}

impl Analysis {
    /// Analysis using the target platform's walker and policy plus the
    /// configured extra patterns and search path.
    pub fn new(ctx: &mut BuildContext, inputs: AnalysisInputs) -> Result<Self> {
        let policy = DependencyPolicy::for_platform(ctx.platform)
            .with_patterns(inputs.excludes.as_slice(), inputs.includes.as_slice())
            .context("Invalid library pattern in configuration")?
            .always_include(&ctx.config.host.lib_name);
        let resolver = Resolver::new(ctx.platform, policy)
            .with_search_path(inputs.search_path.clone())
            .strict(inputs.strict);
        Ok(Self::with_resolver(ctx, inputs, resolver))
    }

    pub fn with_resolver(ctx: &mut BuildContext, inputs: AnalysisInputs, resolver: Resolver) -> Self {
        let descriptor = ctx.descriptor(Self::KIND);
        let warnfile = BuildContext::warnfile(&descriptor);
        Self {
            descriptor,
            warnfile,
            inputs,
            resolver,
            outputs: AnalysisOutputs::default(),
        }
    }

    pub fn warnfile(&self) -> &Path {
        &self.warnfile
    }

    fn write_warnings(&self) -> Result<()> {
        let mut text = String::new();
        for line in &self.outputs.warnings {
            text.push_str(line);
            text.push('\n');
        }
        fs::write(&self.warnfile, text)
            .with_context(|| format!("Failed to write {}", self.warnfile.display()))
    }
}

impl Target for Analysis {
    type Guts = AnalysisGuts;
    const KIND: &'static str = "Analysis";

    fn descriptor(&self) -> &Path {
        &self.descriptor
    }

    /// The descriptor doubles as the output: analysis produces lists, not files.
    fn output(&self) -> &Path {
        &self.descriptor
    }

    fn guts(&self) -> AnalysisGuts {
        AnalysisGuts {
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
        }
    }

    fn checks(&self, previous: &AnalysisGuts) -> Vec<Check> {
        let (old, new) = (&previous.inputs, &self.inputs);
        vec![
            Check::equal("scripts", &old.scripts, &new.scripts),
            Check::equal("modules", &old.modules, &new.modules),
            Check::equal("binaries", &old.binaries, &new.binaries),
            Check::equal("datas", &old.datas, &new.datas),
            Check::equal("excludes", &old.excludes, &new.excludes),
            Check::equal("includes", &old.includes, &new.includes),
            Check::equal("search_path", &old.search_path, &new.search_path),
            Check::equal("strict", &old.strict, &new.strict),
            Check::toc("scripts", &new.scripts),
            Check::toc("binaries", &new.binaries),
            Check::toc("datas", &new.datas),
            // The resolved closure can change without any declared input changing.
            Check::toc("resolved binaries", &previous.outputs.binaries),
        ]
    }

    fn assemble(&mut self) -> Result<()> {
        let resolution = self.resolver.resolve(&self.inputs.binaries)?;
        self.outputs = AnalysisOutputs {
            scripts: self.inputs.scripts.clone(),
            pure: self.inputs.modules.clone(),
            binaries: resolution.binaries,
            datas: self.inputs.datas.clone(),
            warnings: resolution.warnings,
        };
        self.write_warnings()?;
        info!(
            scripts = self.outputs.scripts.len(),
            modules = self.outputs.pure.len(),
            binaries = self.outputs.binaries.len(),
            datas = self.outputs.datas.len(),
            "analysis complete"
        );
        Ok(())
    }

    fn reuse(&mut self, previous: AnalysisGuts) -> Result<()> {
        self.outputs = previous.outputs;
        Ok(())
    }
}
