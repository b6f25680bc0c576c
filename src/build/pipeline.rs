//! The build pipeline: every step in dependency order.

use anyhow::Result;
use std::path::PathBuf;

use tracing::{info, warn};

use super::analysis::AnalysisInputs;
use super::{
    run, Analysis, BuildContext, BuildManifest, BuildMode, BundleStep, CodeArchiveStep, CollectStep,
    ContainerStep, ExecutableStep, Outcome, Target,
};
use crate::config::Config;
use crate::platform::OsFamily;
use crate::timing::Timer;
use crate::toc::{Entry, EntryKind, Toc};

/// Container entry name of the embedded code archive.
pub const CODE_ARCHIVE_ENTRY: &str = "__code__";

/// Runtime option asking the stub not to open a console window.
pub const NOCONSOLE_OPTION: &str = "noconsole";

#[derive(Debug, Default)]
pub struct BuildReport {
    /// Each step's kind and what happened to it, in program order.
    pub steps: Vec<(&'static str, Outcome)>,
    /// Final artifact: executable, collected directory or app bundle.
    pub artifact: PathBuf,
    /// Unresolved library warnings from the analysis.
    pub warnings: Vec<String>,
}

impl BuildReport {
    fn record(&mut self, kind: &'static str, outcome: Outcome) {
        match &outcome {
            Outcome::Built(reason) => info!(step = kind, reason = %reason, "built"),
            Outcome::Reused => info!(step = kind, "up to date"),
        }
        self.steps.push((kind, outcome));
    }

    pub fn outcome(&self, kind: &str) -> Option<&Outcome> {
        self.steps.iter().find(|(k, _)| *k == kind).map(|(_, o)| o)
    }

    /// Number of steps that had to be rebuilt.
    pub fn built(&self) -> usize {
        self.steps.iter().filter(|(_, o)| o.was_built()).count()
    }
}

/// Run every step needed to freeze `manifest`.
pub fn build(manifest: &BuildManifest, config: Config) -> Result<BuildReport> {
    let platform = manifest.target_platform();
    let strip = manifest.strip.unwrap_or(config.strip);
    let upx = manifest.compress.unwrap_or(config.upx);
    let key = manifest.key.clone().or_else(|| config.key.clone());

    let inputs = AnalysisInputs {
        scripts: manifest.scripts_toc(platform),
        modules: manifest.modules_toc(platform),
        binaries: manifest.binaries_toc(platform),
        datas: manifest.datas_toc(platform),
        excludes: config.excludes.clone(),
        includes: config.includes.clone(),
        search_path: config.search_path.clone(),
        strict: config.strict,
    };
    let mut ctx = BuildContext::new(config, &manifest.name, platform)?;
    let mut report = BuildReport::default();
    let total = Timer::start(&format!("build {}", manifest.name));

    let timer = Timer::start("analysis");
    let mut analysis = Analysis::new(&mut ctx, inputs)?;
    report.record(Analysis::KIND, run(&mut analysis)?);
    timer.finish();
    let outputs = analysis.outputs.clone();

    let mut code = CodeArchiveStep::new(&mut ctx, &manifest.name, outputs.pure.clone(), manifest.code_level, key);
    report.record(CodeArchiveStep::KIND, run(&mut code)?);

    let mut package = Toc::for_platform(platform);
    package.extend(outputs.scripts.iter().cloned());
    package.append(Entry::new(CODE_ARCHIVE_ENTRY, code.output(), EntryKind::ArchiveRef));
    package.extend(manifest.options.iter().map(Entry::option));
    if !manifest.console {
        package.append(Entry::option(NOCONSOLE_OPTION));
    }
    let loose = &outputs.binaries + &outputs.datas;
    if manifest.mode == BuildMode::Onefile {
        package.extend(loose.iter().cloned());
    }

    let timer = Timer::start("container");
    let mut container = ContainerStep::new(&mut ctx, &manifest.name, package, strip, upx);
    report.record(ContainerStep::KIND, run(&mut container)?);
    timer.finish();

    let exe_name = platform.executable_name(&manifest.name);
    let exe_output = match manifest.mode {
        BuildMode::Onefile => ctx.distpath.join(&exe_name),
        BuildMode::Onedir => ctx.work_file(&exe_name),
    };
    let mut exe = ExecutableStep::new(&mut ctx, &manifest.stub, container.output(), exe_output);
    report.record(ExecutableStep::KIND, run(&mut exe)?);
    let mut artifact = exe.output().to_path_buf();

    if manifest.mode == BuildMode::Onedir {
        let mut collect = CollectStep::new(&mut ctx, &manifest.name, exe.output(), loose, strip, upx);
        report.record(CollectStep::KIND, run(&mut collect)?);
        artifact = collect.output().to_path_buf();
    }

    if manifest.bundle {
        if platform.os != OsFamily::Darwin {
            warn!(platform = %platform, "app bundles are a macOS layout; building one anyway");
        }
        let mut bundle = BundleStep::new(&mut ctx, &manifest.name, &artifact, manifest.identifier.clone());
        report.record(BundleStep::KIND, run(&mut bundle)?);
        artifact = bundle.output().to_path_buf();
    }

    total.finish();
    report.artifact = artifact;
    report.warnings = outputs.warnings;
    Ok(report)
}
