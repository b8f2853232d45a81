//! Results and one-shot handles for background warmup tasks.

use std::future::Future;
use std::path::PathBuf;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::{klog_debug, Error, Result};

/// How a warmup task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    /// Nothing to do; counts as success.
    Skipped { reason: String },
    Failed { message: String },
    /// Abandoned because the shared scope was already cancelled.
    Aborted { cause: String },
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded | TaskOutcome::Skipped { .. })
    }
}

/// Value produced exactly once by a warmup task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskResult {
    Model {
        path: PathBuf,
        /// False when the cache was already populated.
        downloaded: bool,
        outcome: TaskOutcome,
    },
    Image {
        image: String,
        /// Copy attempts made against the mirror registry.
        attempts: u32,
        outcome: TaskOutcome,
    },
}

impl TaskResult {
    pub fn task_name(&self) -> &'static str {
        match self {
            TaskResult::Model { .. } => "model",
            TaskResult::Image { .. } => "image",
        }
    }

    pub fn outcome(&self) -> &TaskOutcome {
        match self {
            TaskResult::Model { outcome, .. } | TaskResult::Image { outcome, .. } => outcome,
        }
    }

    pub fn success(&self) -> bool {
        self.outcome().is_success()
    }

    /// Join-level error for this result, if it did not succeed.
    pub fn to_error(&self) -> Option<Error> {
        match self.outcome() {
            TaskOutcome::Failed { message } => Some(Error::TaskFailed {
                task: self.task_name().to_string(),
                message: message.clone(),
            }),
            TaskOutcome::Aborted { cause } => Some(Error::Aborted {
                cause: cause.clone(),
            }),
            _ => None,
        }
    }
}

/// Handle to a spawned warmup task and its single-slot result channel.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    rx: oneshot::Receiver<TaskResult>,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    /// Spawn `fut` in the background; its output is published once.
    pub fn spawn<F>(name: &'static str, fut: F) -> Self
    where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let result = fut.await;
            klog_debug!("warmup task {} finished: {:?}", result.task_name(), result.outcome());
            // The receiver may already be gone if the run was torn down.
            let _ = tx.send(result);
        });
        Self { name, rx, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait for the task's result.
    pub async fn join(self) -> Result<TaskResult> {
        match self.rx.await {
            Ok(result) => Ok(result),
            Err(_) => {
                // Sender dropped without publishing: the task panicked.
                let reason = match self.handle.await {
                    Err(e) => e.to_string(),
                    Ok(()) => "result channel closed".to_string(),
                };
                Err(Error::TaskJoin(format!("{} warmup: {}", self.name, reason)))
            }
        }
    }
}
