//! Warmup orchestrator.
//!
//! Launches model acquisition and image pre-staging as independent
//! background tasks that share one cancellation scope derived from the
//! caller's. Either task failing cancels the scope, which the tier
//! sequencer observes at its next tier boundary.
//!
//! Lifecycle: `Idle -> Started -> Joined`. Starting twice is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::cancel::CancellationScope;
use crate::collab::LabContext;
use crate::config::{LabConfig, RegistryConfig};
use crate::warmup::image::ImageWarmup;
use crate::warmup::model::{cache_path, ModelAcquisition};
use crate::warmup::retry::RetryPolicy;
use crate::warmup::task::{TaskHandle, TaskOutcome, TaskResult};
use crate::{klog, klog_debug, klog_error, Error, Result};

/// Longest the image task waits for the cluster before electing a node.
pub const DEFAULT_CLUSTER_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Inputs for a warmup run, resolved from `LabConfig`.
#[derive(Debug, Clone)]
pub struct WarmupSettings {
    pub model: Option<String>,
    pub model_cache_root: PathBuf,
    pub image: Option<String>,
    pub gpu: bool,
    pub image_gpu_only: bool,
    pub registry: RegistryConfig,
    pub retry: RetryPolicy,
    pub cluster_timeout: Duration,
}

impl WarmupSettings {
    pub fn from_config(config: &LabConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            model_cache_root: config.model_cache_dir()?,
            image: config.warmup_image.clone(),
            gpu: config.gpu,
            image_gpu_only: config.image_warmup_gpu_only,
            registry: config.registry.clone(),
            retry: RetryPolicy::from(&config.retry),
            cluster_timeout: DEFAULT_CLUSTER_TIMEOUT,
        })
    }
}

/// What `join` saw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmupResult {
    pub model_warmup_started: bool,
    pub image_warmup_started: bool,
    pub model: Option<TaskResult>,
    pub image: Option<TaskResult>,
}

impl WarmupResult {
    /// First failure in launch order (model, then image).
    ///
    /// A fresh failure is preferred over an abort, since an aborted task
    /// only echoes a failure that happened elsewhere.
    pub fn first_failure(&self) -> Option<Error> {
        let results = [self.model.as_ref(), self.image.as_ref()];
        results
            .iter()
            .flatten()
            .find(|r| matches!(r.outcome(), TaskOutcome::Failed { .. }))
            .or_else(|| results.iter().flatten().find(|r| !r.success()))
            .and_then(|r| r.to_error())
    }

    pub fn success(&self) -> bool {
        self.first_failure().is_none()
    }
}

/// Launch model acquisition, or `None` when no model is configured.
pub fn start_model_warmup_async(
    ctx: &LabContext,
    settings: &WarmupSettings,
    scope: &CancellationScope,
) -> Option<TaskHandle> {
    let Some(slug) = settings.model.as_deref() else {
        klog_debug!("No model configured, skipping model warmup");
        return None;
    };
    let task = ModelAcquisition::new(ctx.downloader.clone(), slug, &settings.model_cache_root);
    let scope = scope.clone();
    klog!("Starting model warmup for {}", slug);
    Some(TaskHandle::spawn("model", async move { task.run(&scope).await }))
}

/// Launch image pre-staging, or `None` when there is nothing to stage.
pub fn start_image_warmup_async(
    ctx: &LabContext,
    settings: &WarmupSettings,
    scope: &CancellationScope,
) -> Option<TaskHandle> {
    let Some(image) = settings.image.clone() else {
        klog_debug!("No warmup image configured, skipping image warmup");
        return None;
    };
    if settings.image_gpu_only && !settings.gpu {
        klog!("Acceleration disabled, skipping image warmup for {}", image);
        return None;
    }
    let warmup = ImageWarmup {
        image,
        gpu: settings.gpu,
        registry: settings.registry.clone(),
        policy: settings.retry,
        cluster_timeout: settings.cluster_timeout,
    };
    let ctx = ctx.clone();
    let scope = scope.clone();
    klog!("Starting image warmup for {}", warmup.image);
    Some(TaskHandle::spawn("image", async move {
        warmup.run(&ctx, &scope).await
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupState {
    Idle,
    Started,
    Joined,
}

pub struct WarmupOrchestrator {
    ctx: LabContext,
    settings: WarmupSettings,
    state: WarmupState,
    scope: Option<CancellationScope>,
    model: Option<TaskHandle>,
    image: Option<TaskHandle>,
    result: Option<WarmupResult>,
}

impl WarmupOrchestrator {
    pub fn new(ctx: LabContext, settings: WarmupSettings) -> Self {
        Self {
            ctx,
            settings,
            state: WarmupState::Idle,
            scope: None,
            model: None,
            image: None,
            result: None,
        }
    }

    pub fn state(&self) -> WarmupState {
        self.state
    }

    /// Shared scope of the running tasks, once started.
    pub fn scope(&self) -> Option<&CancellationScope> {
        self.scope.as_ref()
    }

    /// Launch the background tasks and return immediately.
    pub fn start(&mut self, parent: &CancellationScope) -> Result<CancellationScope> {
        if self.state != WarmupState::Idle {
            return Err(Error::AlreadyStarted);
        }
        let scope = parent.child();
        // Launch order decides which failure join reports first.
        self.model = start_model_warmup_async(&self.ctx, &self.settings, &scope);
        self.image = start_image_warmup_async(&self.ctx, &self.settings, &scope);
        self.scope = Some(scope.clone());
        self.state = WarmupState::Started;
        klog!(
            "Warmup started (model={}, image={})",
            self.model.is_some(),
            self.image.is_some()
        );
        Ok(scope)
    }

    /// Cancel the shared scope. Idempotent; false if nothing was cancelled.
    pub fn cancel(&self, cause: impl Into<String>) -> bool {
        match &self.scope {
            Some(scope) => scope.cancel(cause),
            None => false,
        }
    }

    /// Block until every launched task has published its result.
    pub async fn join(&mut self) -> Result<WarmupResult> {
        match self.state {
            WarmupState::Idle => {
                return Err(Error::Validation("warmup was never started".to_string()))
            }
            WarmupState::Joined => {}
            WarmupState::Started => {
                let mut result = WarmupResult {
                    model_warmup_started: self.model.is_some(),
                    image_warmup_started: self.image.is_some(),
                    ..Default::default()
                };
                if let Some(handle) = self.model.take() {
                    let path = self
                        .settings
                        .model
                        .as_deref()
                        .map(|slug| cache_path(&self.settings.model_cache_root, slug))
                        .unwrap_or_default();
                    result.model = Some(self.collect(handle, |message| TaskResult::Model {
                        path,
                        downloaded: false,
                        outcome: TaskOutcome::Failed { message },
                    })
                    .await);
                }
                if let Some(handle) = self.image.take() {
                    let image = self.settings.image.clone().unwrap_or_default();
                    result.image = Some(self.collect(handle, |message| TaskResult::Image {
                        image,
                        attempts: 0,
                        outcome: TaskOutcome::Failed { message },
                    })
                    .await);
                }
                self.result = Some(result);
                self.state = WarmupState::Joined;
            }
        }

        let result = self.result.clone().unwrap_or_default();
        match result.first_failure() {
            Some(e) => {
                klog_error!("Warmup failed: {}", e);
                Err(e)
            }
            None => {
                klog!("Warmup complete");
                Ok(result)
            }
        }
    }

    /// Result of the last join, kept for reporting after a failed join.
    pub fn result(&self) -> Option<&WarmupResult> {
        self.result.as_ref()
    }

    async fn collect<F>(&self, handle: TaskHandle, failed: F) -> TaskResult
    where
        F: FnOnce(String) -> TaskResult,
    {
        match handle.join().await {
            Ok(result) => result,
            Err(e) => {
                let message = e.to_string();
                self.cancel(format!("warmup task crashed: {}", message));
                failed(message)
            }
        }
    }
}

/// Start a warmup run under `parent`; join it through the returned handle.
pub fn start_warmup(
    ctx: LabContext,
    config: &LabConfig,
    parent: &CancellationScope,
) -> Result<WarmupOrchestrator> {
    let mut orchestrator = WarmupOrchestrator::new(ctx, WarmupSettings::from_config(config)?);
    orchestrator.start(parent)?;
    Ok(orchestrator)
}
