//! Image pre-staging through the local mirror registry.
//!
//! The source image is streamed registry-to-registry into the mirror, then
//! pulled onto the elected node only and retagged to its original
//! reference. The image never passes through this process's memory.

use std::time::Duration;

use crate::cancel::CancellationScope;
use crate::collab::{LabContext, TlsOptions};
use crate::config::RegistryConfig;
use crate::warmup::election::{elect_node, ElectedNode};
use crate::warmup::retry::RetryPolicy;
use crate::warmup::task::{TaskOutcome, TaskResult};
use crate::{klog, klog_debug, klog_error, klog_warn, Error, Result};

/// Repository path of `image` inside the mirror, without the source host.
///
/// `ghcr.io/org/app:1.0` becomes `org/app:1.0`; references without a
/// registry host are kept as-is.
pub fn mirror_path(image: &str) -> String {
    match image.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            rest.to_string()
        }
        _ => image.to_string(),
    }
}

pub struct ImagePrestager {
    ctx: LabContext,
    target: ElectedNode,
    image: String,
    registry: RegistryConfig,
    policy: RetryPolicy,
}

impl ImagePrestager {
    /// The elected node is required up front: there is no way to stage an
    /// image without having run election first.
    pub fn new(
        ctx: &LabContext,
        target: ElectedNode,
        image: &str,
        registry: &RegistryConfig,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            ctx: ctx.clone(),
            target,
            image: image.to_string(),
            registry: registry.clone(),
            policy,
        }
    }

    /// Reference nodes pull from.
    pub fn node_reference(&self) -> String {
        format!("{}/{}", self.registry.in_cluster_host(), mirror_path(&self.image))
    }

    pub async fn run(&self, scope: &CancellationScope) -> TaskResult {
        let mut attempts = 0;
        let res = self.stage(scope, &mut attempts).await;
        let outcome = match res {
            Ok(()) => {
                klog!("Image {} staged on {}", self.image, self.target.name);
                TaskOutcome::Succeeded
            }
            Err(Error::Aborted { cause }) => {
                klog!("Image warmup for {} abandoned: {}", self.image, cause);
                TaskOutcome::Aborted { cause }
            }
            Err(e) => {
                let message = e.to_string();
                klog_error!("Image warmup for {} failed: {}", self.image, message);
                scope.cancel(format!("image warmup failed: {}", message));
                TaskOutcome::Failed { message }
            }
        };
        TaskResult::Image {
            image: self.image.clone(),
            attempts,
            outcome,
        }
    }

    async fn stage(&self, scope: &CancellationScope, attempts: &mut u32) -> Result<()> {
        let outcome = self
            .policy
            .run(scope, "mirror copy", |attempt| self.copy_attempt(scope, attempt))
            .await;
        *attempts = outcome.state.attempt;
        outcome.result?;

        scope.check()?;
        tokio::select! {
            _ = scope.cancelled() => Err(scope.aborted()),
            res = self.distribute() => res,
        }
    }

    async fn ensure_registry(&self) -> Result<()> {
        if self.ctx.registry.is_running().await? {
            return Ok(());
        }
        klog!("Mirror registry {} not running, starting it", self.registry.name);
        self.ctx.registry.start().await
    }

    async fn copy_attempt(&self, scope: &CancellationScope, attempt: u32) -> Result<()> {
        self.ensure_registry().await?;
        let dest = mirror_path(&self.image);
        klog_debug!(
            "copy attempt {}: {} -> {}/{}",
            attempt,
            self.image,
            self.registry.host(),
            dest
        );
        let tls = TlsOptions {
            insecure: self.registry.insecure,
        };
        let host = self.registry.host();
        tokio::select! {
            _ = scope.cancelled() => Err(scope.aborted()),
            res = self.ctx.copier.copy(&self.image, &host, &dest, tls) => res,
        }
    }

    async fn distribute(&self) -> Result<()> {
        let mirrored = self.node_reference();
        klog!("Pulling {} onto {}", mirrored, self.target.name);
        self.ctx.node_images.pull(&self.target.name, &mirrored).await?;
        self.ctx
            .node_images
            .tag(&self.target.name, &mirrored, &self.image)
            .await
    }
}

/// Poll until the cluster reports running, bailing out on cancellation.
pub async fn wait_for_cluster(ctx: &LabContext, scope: &CancellationScope) -> Result<()> {
    loop {
        scope.check()?;
        // Errors here just mean the cluster is still coming up.
        if ctx.cluster.is_running().await.unwrap_or(false) {
            return Ok(());
        }
        tokio::select! {
            _ = scope.cancelled() => return Err(scope.aborted()),
            _ = tokio::time::sleep(ctx.cluster_poll_interval) => {}
        }
    }
}

/// Settings for one image warmup run.
#[derive(Debug, Clone)]
pub struct ImageWarmup {
    pub image: String,
    pub gpu: bool,
    pub registry: RegistryConfig,
    pub policy: RetryPolicy,
    /// Upper bound on waiting for the cluster before election.
    pub cluster_timeout: Duration,
}

impl ImageWarmup {
    /// Wait for the cluster, elect a node, then stage the image on it.
    ///
    /// Election failure is not a task failure: the image is pulled lazily
    /// by whichever node later schedules the workload.
    pub async fn run(&self, ctx: &LabContext, scope: &CancellationScope) -> TaskResult {
        match self.elect(ctx, scope).await {
            Ok(Some(node)) => {
                ImagePrestager::new(ctx, node, &self.image, &self.registry, self.policy)
                    .run(scope)
                    .await
            }
            Ok(None) => self.result(TaskOutcome::Skipped {
                reason: "no node elected".to_string(),
            }),
            Err(Error::Aborted { cause }) => self.result(TaskOutcome::Aborted { cause }),
            Err(e) => {
                let message = e.to_string();
                klog_error!("Image warmup for {} failed before staging: {}", self.image, message);
                scope.cancel(format!("image warmup failed: {}", message));
                self.result(TaskOutcome::Failed { message })
            }
        }
    }

    async fn elect(
        &self,
        ctx: &LabContext,
        scope: &CancellationScope,
    ) -> Result<Option<ElectedNode>> {
        match tokio::time::timeout(self.cluster_timeout, wait_for_cluster(ctx, scope)).await {
            Ok(res) => res?,
            Err(_) => return Err(Error::Timeout(self.cluster_timeout)),
        }
        match elect_node(ctx.cluster.as_ref(), self.gpu).await {
            Ok(node) => Ok(Some(node)),
            Err(Error::Election { reason }) => {
                klog_warn!(
                    "No node elected for {} ({}); it will be pulled on demand",
                    self.image,
                    reason
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn result(&self, outcome: TaskOutcome) -> TaskResult {
        TaskResult::Image {
            image: self.image.clone(),
            attempts: 0,
            outcome,
        }
    }
}
