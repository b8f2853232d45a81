use async_trait::async_trait;

use super::Tool;
use crate::collab::{ImageCopier, MirrorRegistry, TlsOptions};
use crate::config::RegistryConfig;
use crate::{klog, Error, Result};

/// The mirror registry as a local `registry:2` container attached to the
/// `kind` docker network.
#[derive(Debug, Clone)]
pub struct DockerRegistry {
    docker: Tool,
    config: RegistryConfig,
}

impl DockerRegistry {
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            docker: Tool::lazy("docker"),
            config: config.clone(),
        }
    }

    /// Attach the registry to the `kind` network; nodes resolve it by
    /// container name only from there.
    async fn connect_to_kind(&self) -> Result<()> {
        let res = self
            .docker
            .run(["network", "connect", "kind", self.config.name.as_str()])
            .await;
        tolerate_already_connected(res.map(|_| ()))
    }
}

/// An endpoint that is already attached is as good as a fresh attach.
fn tolerate_already_connected(res: Result<()>) -> Result<()> {
    match res {
        Err(Error::Command { message, .. }) if message.contains("already exists") => Ok(()),
        other => other,
    }
}

#[async_trait]
impl MirrorRegistry for DockerRegistry {
    async fn is_running(&self) -> Result<bool> {
        let out = self
            .docker
            .run(["inspect", "-f", "{{.State.Running}}", self.config.name.as_str()])
            .await;
        Ok(matches!(out.as_deref(), Ok("true")))
    }

    async fn start(&self) -> Result<()> {
        let name = self.config.name.as_str();
        // A stopped container only needs starting.
        if self.docker.succeeds(["start", name]).await {
            return self.connect_to_kind().await;
        }
        klog!("Creating mirror registry container {}", name);
        let publish = format!("127.0.0.1:{}:5000", self.config.port);
        self.docker
            .run([
                "run",
                "-d",
                "--restart=always",
                "--name",
                name,
                "-p",
                publish.as_str(),
                "registry:2",
            ])
            .await?;
        self.connect_to_kind().await
    }
}

/// Registry-to-registry copy with `crane`, streaming layers without a
/// local image store.
#[derive(Debug, Clone)]
pub struct Crane {
    tool: Tool,
}

impl Crane {
    pub fn new() -> Self {
        Self {
            tool: Tool::lazy("crane"),
        }
    }
}

impl Default for Crane {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageCopier for Crane {
    async fn copy(
        &self,
        source: &str,
        dest_registry: &str,
        dest_image: &str,
        tls: TlsOptions,
    ) -> Result<()> {
        let dest = format!("{}/{}", dest_registry, dest_image);
        let mut args = vec!["copy", source, dest.as_str()];
        if tls.insecure {
            args.push("--insecure");
        }
        self.tool
            .run(args)
            .await
            .map(|_| ())
            .map_err(|e| Error::Copy(e.to_string()))
    }
}
