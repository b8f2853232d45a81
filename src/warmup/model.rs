//! Model acquisition: download a model into the local cache once.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cancel::CancellationScope;
use crate::collab::ModelDownloader;
use crate::util::dir_has_entries;
use crate::warmup::task::{TaskOutcome, TaskResult};
use crate::{klog, klog_error, Error, Result};

/// Deterministic cache directory for a model slug.
///
/// `org/name` maps to `<root>/org--name`.
pub fn cache_path(root: &Path, slug: &str) -> PathBuf {
    root.join(slug.trim_matches('/').replace('/', "--"))
}

pub struct ModelAcquisition {
    downloader: Arc<dyn ModelDownloader>,
    slug: String,
    path: PathBuf,
}

impl ModelAcquisition {
    pub fn new(downloader: Arc<dyn ModelDownloader>, slug: &str, cache_root: &Path) -> Self {
        Self {
            downloader,
            slug: slug.to_string(),
            path: cache_path(cache_root, slug),
        }
    }

    /// Make sure the model is cached.
    ///
    /// Any failure cancels `scope` so sibling tasks and the tier sequencer
    /// stop early.
    pub async fn run(&self, scope: &CancellationScope) -> TaskResult {
        match self.acquire(scope).await {
            Ok(downloaded) => self.result(downloaded, TaskOutcome::Succeeded),
            Err(Error::Aborted { cause }) => {
                klog!("Model warmup for {} abandoned: {}", self.slug, cause);
                self.result(false, TaskOutcome::Aborted { cause })
            }
            Err(e) => {
                let message = e.to_string();
                klog_error!("Model warmup for {} failed: {}", self.slug, message);
                scope.cancel(format!("model warmup failed: {}", message));
                self.result(false, TaskOutcome::Failed { message })
            }
        }
    }

    async fn acquire(&self, scope: &CancellationScope) -> Result<bool> {
        if dir_has_entries(&self.path).await? {
            klog!("Model {} already cached at {}", self.slug, self.path.display());
            return Ok(false);
        }
        scope.check()?;

        klog!("Downloading model {} into {}", self.slug, self.path.display());
        tokio::select! {
            _ = scope.cancelled() => return Err(scope.aborted()),
            res = self.downloader.download(&self.slug, &self.path) => res?,
        }

        if !dir_has_entries(&self.path).await? {
            return Err(Error::Download(format!(
                "{} produced no files in {}",
                self.slug,
                self.path.display()
            )));
        }
        klog!("Model {} cached", self.slug);
        Ok(true)
    }

    fn result(&self, downloaded: bool, outcome: TaskOutcome) -> TaskResult {
        TaskResult::Model {
            path: self.path.clone(),
            downloaded,
            outcome,
        }
    }
}
