//! Process-backed implementations of the collaborator traits.
//!
//! Each wrapper shells out to the real tool (`kind`, `kubectl`, `docker`,
//! `crane`, `huggingface-cli`, `helm`). Children are killed when their
//! future is dropped, so a cancelled `select!` does not leak processes.

mod cluster;
mod helm;
mod model;
mod registry;

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use tokio::process::Command;

use crate::collab::LabContext;
use crate::config::LabConfig;
use crate::{klog_debug, klog_trace, Error, Result};

pub use cluster::{KindCluster, Kubectl, NodeRuntime};
pub use helm::{Helm, HelmTier};
pub use model::HuggingFaceCli;
pub use registry::{Crane, DockerRegistry};

/// A command-line tool, located on `PATH` the first time it is needed.
#[derive(Debug, Clone)]
pub struct Tool {
    name: &'static str,
    binary: Arc<OnceLock<PathBuf>>,
}

impl Tool {
    /// Defer the `PATH` lookup to the first `run`, so tools that a run never
    /// invokes need not be installed.
    pub fn lazy(name: &'static str) -> Self {
        Self {
            name,
            binary: Arc::new(OnceLock::new()),
        }
    }

    pub fn with_binary(name: &'static str, binary: PathBuf) -> Self {
        let tool = Self::lazy(name);
        tool.binary.get_or_init(|| binary);
        tool
    }

    fn binary(&self) -> Result<&Path> {
        if let Some(binary) = self.binary.get() {
            return Ok(binary);
        }
        let found =
            which::which(self.name).map_err(|_| Error::ToolNotFound(self.name.to_string()))?;
        Ok(self.binary.get_or_init(|| found))
    }

    /// Run to completion and return trimmed stdout.
    pub async fn run<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(self.binary()?);
        cmd.args(args).kill_on_drop(true);
        klog_debug!("exec {} {:?}", self.name, cmd.as_std().get_args().collect::<Vec<_>>());

        let output = cmd.output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        klog_trace!("{} stdout: {}", self.name, stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(Error::Command {
                program: self.name.to_string(),
                message: if stderr.is_empty() {
                    format!("exited with {}", output.status)
                } else {
                    stderr
                },
            });
        }
        Ok(stdout)
    }

    /// Run and report only whether the tool exited successfully.
    pub async fn succeeds<I, S>(&self, args: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        self.run(args).await.is_ok()
    }
}

/// Process-backed warmup collaborators for `config`.
///
/// Tools are looked up lazily: building the context never fails, and a run
/// with no model or image configured never touches `huggingface-cli` or
/// `crane`.
pub fn lab_context(config: &LabConfig) -> LabContext {
    LabContext::new(
        Arc::new(Kubectl::new(&config.cluster_name)),
        Arc::new(NodeRuntime::new(&config.registry)),
        Arc::new(DockerRegistry::new(&config.registry)),
        Arc::new(Crane::new()),
        Arc::new(HuggingFaceCli::new()),
    )
}

/// Split command output into non-empty trimmed lines.
fn lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}
