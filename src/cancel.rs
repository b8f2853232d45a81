//! Cooperative, one-way cancellation scopes.
//!
//! A `CancellationScope` wraps a tokio-util `CancellationToken` and records
//! the cause of the first cancellation. Child scopes are cancelled with
//! their parent and report the nearest recorded cause. Once cancelled a
//! scope never reports "not cancelled" again.
//!
//! Consumers poll the scope at their own boundaries (the tier sequencer
//! checks once per tier), so cancellation latency is as coarse as the
//! slowest step between two checks.

use std::sync::{Arc, Mutex, OnceLock};

use tokio_util::sync::CancellationToken;

use crate::{klog_debug, Error, Result};

/// Cause reported when a scope was cancelled without an explicit reason.
pub const UNSPECIFIED_CAUSE: &str = "cancelled";

#[derive(Debug, Clone)]
pub struct CancellationScope {
    token: CancellationToken,
    cause: Arc<OnceLock<String>>,
    /// Cause slots of every ancestor, nearest first.
    ancestors: Vec<Arc<OnceLock<String>>>,
    /// Shared by the whole tree; serializes cancels so the scope that
    /// cancelled first is the one whose cause is recorded.
    latch: Arc<Mutex<()>>,
}

impl Default for CancellationScope {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationScope {
    /// Create a root scope.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            cause: Arc::new(OnceLock::new()),
            ancestors: Vec::new(),
            latch: Arc::new(Mutex::new(())),
        }
    }

    /// Derive a scope that is cancelled whenever this one is.
    ///
    /// Cancelling the child does not touch the parent.
    pub fn child(&self) -> Self {
        let mut ancestors = Vec::with_capacity(self.ancestors.len() + 1);
        ancestors.push(Arc::clone(&self.cause));
        ancestors.extend(self.ancestors.iter().cloned());
        Self {
            token: self.token.child_token(),
            cause: Arc::new(OnceLock::new()),
            ancestors,
            latch: Arc::clone(&self.latch),
        }
    }

    /// Cancel the scope, recording `cause` if no cause was recorded yet.
    ///
    /// Returns true only for the call that recorded the cause.
    pub fn cancel(&self, cause: impl Into<String>) -> bool {
        let recorded = {
            let _guard = self.latch.lock().unwrap_or_else(|e| e.into_inner());
            // Already cancelled through an ancestor: keep reporting its cause.
            if self.token.is_cancelled() {
                return false;
            }
            // The cause must be visible before any waiter wakes up.
            let recorded = self.cause.set(cause.into()).is_ok();
            self.token.cancel();
            recorded
        };
        if recorded {
            klog_debug!("CancellationScope cancelled: {}", self.cause());
        }
        recorded
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cause of the cancellation, searching this scope then its ancestors.
    pub fn cause(&self) -> String {
        std::iter::once(&self.cause)
            .chain(self.ancestors.iter())
            .find_map(|slot| slot.get().cloned())
            .unwrap_or_else(|| UNSPECIFIED_CAUSE.to_string())
    }

    /// Error carrying the recorded cause, for callers that observed cancellation.
    pub fn aborted(&self) -> Error {
        Error::Aborted {
            cause: self.cause(),
        }
    }

    /// Fail with `Error::Aborted` if the scope is cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(self.aborted());
        }
        Ok(())
    }

    /// Resolves once the scope is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Underlying token, for `select!` arms that need an owned future.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
