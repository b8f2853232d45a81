//! Shared utility functions.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tokio::task::spawn_blocking;
use tokio::time::timeout;

use crate::{Error, Result};

pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|e| Error::TaskJoin(e.to_string()))?
}

/// Await `fut`, failing with `Error::Timeout` once `duration` elapses.
pub async fn with_timeout<F, T>(duration: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, fut).await {
        Ok(inner) => inner,
        Err(_) => Err(Error::Timeout(duration)),
    }
}

/// True when `path` is a directory holding at least one entry.
pub async fn dir_has_entries(path: &Path) -> Result<bool> {
    let path = path.to_path_buf();
    blocking(move || {
        if !path.is_dir() {
            return Ok(false);
        }
        Ok(std::fs::read_dir(&path)?.next().is_some())
    })
    .await
}
