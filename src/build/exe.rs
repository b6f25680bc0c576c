//! Executable step: bootstrap stub with the container appended.
//!
//! The stub locates the container through its trailer, so concatenation
//! is all the assembly there is.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use super::{BuildContext, Check, Target};
use crate::bincache::make_executable;
use crate::error::BuildError;

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecutableGuts {
    pub stub: PathBuf,
    pub container: PathBuf,
}

pub struct ExecutableStep {
    descriptor: PathBuf,
    stub: PathBuf,
    container: PathBuf,
    output: PathBuf,
}

impl ExecutableStep {
    /// `output` is the full path of the executable to produce.
    pub fn new(ctx: &mut BuildContext, stub: &Path, container: &Path, output: PathBuf) -> Self {
        Self {
            descriptor: ctx.descriptor(Self::KIND),
            stub: stub.to_path_buf(),
            container: container.to_path_buf(),
            output,
        }
    }

    fn require(&self, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(BuildError::MissingInput {
                step: Self::KIND.to_string(),
                path: path.to_path_buf(),
            }
            .into());
        }
        Ok(())
    }
}

impl Target for ExecutableStep {
    type Guts = ExecutableGuts;
    const KIND: &'static str = "Executable";

    fn descriptor(&self) -> &Path {
        &self.descriptor
    }

    fn output(&self) -> &Path {
        &self.output
    }

    fn guts(&self) -> ExecutableGuts {
        ExecutableGuts {
            stub: self.stub.clone(),
            container: self.container.clone(),
        }
    }

    fn checks(&self, previous: &ExecutableGuts) -> Vec<Check> {
        vec![
            Check::equal("stub", &previous.stub, &self.stub),
            Check::equal("container", &previous.container, &self.container),
            Check::File {
                field: "stub",
                path: self.stub.clone(),
            },
            Check::File {
                field: "container",
                path: self.container.clone(),
            },
        ]
    }

    fn assemble(&mut self) -> Result<()> {
        self.require(&self.stub)?;
        self.require(&self.container)?;
        if let Some(parent) = self.output.parent() {
            fs::create_dir_all(parent)?;
        }

        let file_name = self
            .output
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = self.output.with_file_name(format!(".{}.tmp", file_name));
        {
            let mut out = BufWriter::new(
                File::create(&temp).with_context(|| format!("Failed to create {}", temp.display()))?,
            );
            for input in [&self.stub, &self.container] {
                let mut reader = File::open(input).with_context(|| format!("Failed to open {}", input.display()))?;
                io::copy(&mut reader, &mut out)
                    .with_context(|| format!("Failed to append {}", input.display()))?;
            }
            out.flush()?;
        }
        make_executable(&temp)?;
        fs::rename(&temp, &self.output)
            .with_context(|| format!("Failed to move executable to {}", self.output.display()))?;

        info!(output = %self.output.display(), "wrote executable");
        Ok(())
    }
}
