//! Contracts for the external tools kindlab drives.
//!
//! The orchestration core only talks to these traits. Process-backed
//! implementations live in `crate::exec`; tests substitute in-memory fakes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cancel::CancellationScope;
use crate::config::LabConfig;
use crate::Result;

/// Cluster manager (node discovery and node metadata).
#[async_trait]
pub trait ClusterManager: Send + Sync {
    async fn is_running(&self) -> Result<bool>;

    async fn node_names(&self) -> Result<Vec<String>>;

    async fn nodes_by_label(&self, selector: &str) -> Result<Vec<String>>;

    async fn label_node(&self, node: &str, key: &str, value: &str) -> Result<()>;

    async fn remove_taint(&self, node: &str, key: &str) -> Result<()>;

    /// Whether the node reports the `Ready` condition.
    async fn node_ready(&self, node: &str) -> Result<bool>;
}

/// Container runtime inside a cluster node.
#[async_trait]
pub trait NodeImageStore: Send + Sync {
    async fn pull(&self, node: &str, image: &str) -> Result<()>;

    async fn tag(&self, node: &str, source: &str, target: &str) -> Result<()>;
}

/// The local mirror registry container.
#[async_trait]
pub trait MirrorRegistry: Send + Sync {
    async fn is_running(&self) -> Result<bool>;

    async fn start(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TlsOptions {
    pub insecure: bool,
}

/// Registry-to-registry image copy that streams layers instead of loading
/// the image locally.
#[async_trait]
pub trait ImageCopier: Send + Sync {
    async fn copy(
        &self,
        source: &str,
        dest_registry: &str,
        dest_image: &str,
        tls: TlsOptions,
    ) -> Result<()>;
}

/// Materializes a model's files under `target`.
///
/// Success is judged by the caller from the directory contents afterwards.
#[async_trait]
pub trait ModelDownloader: Send + Sync {
    async fn download(&self, slug: &str, target: &Path) -> Result<()>;
}

/// Deploys the resources of a single tier.
#[async_trait]
pub trait TierDeployer: Send + Sync {
    async fn deploy(&self, scope: &CancellationScope, config: &LabConfig) -> Result<()>;
}

/// Chart installer queries used for status reporting.
#[async_trait]
pub trait ReleaseInspector: Send + Sync {
    /// Human-readable release status, e.g. `deployed`.
    async fn release_status(&self, release: &str, namespace: &str) -> Result<String>;
}

/// Everything a warmup run needs, passed explicitly into each component.
#[derive(Clone)]
pub struct LabContext {
    pub cluster: Arc<dyn ClusterManager>,
    pub node_images: Arc<dyn NodeImageStore>,
    pub registry: Arc<dyn MirrorRegistry>,
    pub copier: Arc<dyn ImageCopier>,
    pub downloader: Arc<dyn ModelDownloader>,
    /// How often the image task polls for the cluster to come up.
    pub cluster_poll_interval: Duration,
}

impl LabContext {
    pub fn new(
        cluster: Arc<dyn ClusterManager>,
        node_images: Arc<dyn NodeImageStore>,
        registry: Arc<dyn MirrorRegistry>,
        copier: Arc<dyn ImageCopier>,
        downloader: Arc<dyn ModelDownloader>,
    ) -> Self {
        Self {
            cluster,
            node_images,
            registry,
            copier,
            downloader,
            cluster_poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_cluster_poll_interval(mut self, interval: Duration) -> Self {
        self.cluster_poll_interval = interval;
        self
    }
}
