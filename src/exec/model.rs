use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::Tool;
use crate::collab::ModelDownloader;
use crate::{klog_debug, Error, Result};

/// Downloads models with `huggingface-cli` in a child process.
///
/// Files land in a sibling `.partial` directory first and are renamed into
/// place only after the download exits cleanly, so an interrupted run never
/// leaves a half-filled cache directory behind.
#[derive(Debug, Clone)]
pub struct HuggingFaceCli {
    tool: Tool,
}

impl HuggingFaceCli {
    pub fn new() -> Self {
        Self {
            tool: Tool::lazy("huggingface-cli"),
        }
    }
}

impl Default for HuggingFaceCli {
    fn default() -> Self {
        Self::new()
    }
}

fn partial_dir(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    target.with_file_name(name)
}

#[async_trait]
impl ModelDownloader for HuggingFaceCli {
    async fn download(&self, slug: &str, target: &Path) -> Result<()> {
        let staging = partial_dir(target);
        if staging.exists() {
            tokio::fs::remove_dir_all(&staging).await?;
        }
        if let Some(parent) = staging.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let staging_arg = staging.display().to_string();
        klog_debug!("huggingface-cli download {} -> {}", slug, staging_arg);
        self.tool
            .run(["download", slug, "--local-dir", staging_arg.as_str()])
            .await
            .map_err(|e| Error::Download(e.to_string()))?;

        if target.exists() {
            tokio::fs::remove_dir_all(target).await?;
        }
        tokio::fs::rename(&staging, target).await?;
        Ok(())
    }
}
