use async_trait::async_trait;

use super::{lines, Tool};
use crate::cancel::CancellationScope;
use crate::collab::{ClusterManager, NodeImageStore, TierDeployer};
use crate::config::{LabConfig, RegistryConfig};
use crate::{klog, Result};

const NODE_NAMES_JSONPATH: &str = "jsonpath={range .items[*]}{.metadata.name}{\"\\n\"}{end}";

/// `kubectl` against the lab cluster's context.
#[derive(Debug, Clone)]
pub struct Kubectl {
    tool: Tool,
    context: String,
}

impl Kubectl {
    pub fn new(cluster_name: &str) -> Self {
        Self {
            tool: Tool::lazy("kubectl"),
            context: format!("kind-{}", cluster_name),
        }
    }

    async fn kubectl(&self, args: &[&str]) -> Result<String> {
        let mut full = vec!["--context", self.context.as_str()];
        full.extend_from_slice(args);
        self.tool.run(full).await
    }
}

#[async_trait]
impl ClusterManager for Kubectl {
    async fn is_running(&self) -> Result<bool> {
        Ok(self.kubectl(&["get", "--raw", "/readyz"]).await.is_ok())
    }

    async fn node_names(&self) -> Result<Vec<String>> {
        let out = self.kubectl(&["get", "nodes", "-o", NODE_NAMES_JSONPATH]).await?;
        Ok(lines(&out))
    }

    async fn nodes_by_label(&self, selector: &str) -> Result<Vec<String>> {
        let out = self
            .kubectl(&["get", "nodes", "-l", selector, "-o", NODE_NAMES_JSONPATH])
            .await?;
        Ok(lines(&out))
    }

    async fn label_node(&self, node: &str, key: &str, value: &str) -> Result<()> {
        let label = format!("{}={}", key, value);
        self.kubectl(&["label", "node", node, label.as_str(), "--overwrite"])
            .await
            .map(|_| ())
    }

    async fn remove_taint(&self, node: &str, key: &str) -> Result<()> {
        let taint = format!("{}-", key);
        match self.kubectl(&["taint", "nodes", node, taint.as_str()]).await {
            Ok(_) => Ok(()),
            // Removing an absent taint is fine.
            Err(crate::Error::Command { message, .. }) if message.contains("not found") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn node_ready(&self, node: &str) -> Result<bool> {
        let out = self
            .kubectl(&[
                "get",
                "node",
                node,
                "-o",
                "jsonpath={.status.conditions[?(@.type==\"Ready\")].status}",
            ])
            .await?;
        Ok(out == "True")
    }
}

/// containerd inside kind node containers, reached through `docker exec`.
#[derive(Debug, Clone)]
pub struct NodeRuntime {
    docker: Tool,
    /// The mirror serves plain HTTP on a non-localhost name, which
    /// containerd only pulls from when told to.
    plain_http: bool,
}

impl NodeRuntime {
    pub fn new(registry: &RegistryConfig) -> Self {
        Self {
            docker: Tool::lazy("docker"),
            plain_http: registry.insecure,
        }
    }
}

fn pull_args<'a>(node: &'a str, image: &'a str, plain_http: bool) -> Vec<&'a str> {
    let mut args = vec!["exec", node, "ctr", "-n", "k8s.io", "images", "pull"];
    if plain_http {
        args.push("--plain-http");
    }
    args.push(image);
    args
}

#[async_trait]
impl NodeImageStore for NodeRuntime {
    async fn pull(&self, node: &str, image: &str) -> Result<()> {
        self.docker
            .run(pull_args(node, image, self.plain_http))
            .await
            .map(|_| ())
    }

    async fn tag(&self, node: &str, source: &str, target: &str) -> Result<()> {
        self.docker
            .run([
                "exec", node, "ctr", "-n", "k8s.io", "images", "tag", "--force", source, target,
            ])
            .await
            .map(|_| ())
    }
}

/// Cluster config that lets every node pull from the mirror over HTTP by its
/// in-cluster name.
pub fn kind_config(registry: &RegistryConfig) -> String {
    let host = registry.in_cluster_host();
    let scheme = if registry.insecure { "http" } else { "https" };
    format!(
        r#"kind: Cluster
apiVersion: kind.x-k8s.io/v1alpha4
containerdConfigPatches:
- |-
  [plugins."io.containerd.grpc.v1.cri".registry.mirrors."{host}"]
    endpoint = ["{scheme}://{host}"]
"#
    )
}

/// Tier 0: the kind cluster itself.
#[derive(Debug, Clone)]
pub struct KindCluster {
    kind: Tool,
}

impl Default for KindCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl KindCluster {
    pub fn new() -> Self {
        Self {
            kind: Tool::lazy("kind"),
        }
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        let out = self.kind.run(["get", "clusters"]).await?;
        Ok(lines(&out).iter().any(|c| c == name))
    }
}

#[async_trait]
impl TierDeployer for KindCluster {
    async fn deploy(&self, scope: &CancellationScope, config: &LabConfig) -> Result<()> {
        let name = config.cluster_name.as_str();
        if self.exists(name).await? {
            klog!("Cluster {} already exists", name);
            return Ok(());
        }
        scope.check()?;

        let config_path = LabConfig::lab_dir()?.join(format!("kind-{}.yaml", name));
        if let Some(dir) = config_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&config_path, kind_config(&config.registry)).await?;
        let config_arg = config_path.display().to_string();

        klog!("Creating kind cluster {}", name);
        let create = self.kind.run([
            "create",
            "cluster",
            "--name",
            name,
            "--config",
            config_arg.as_str(),
            "--wait",
            "120s",
        ]);
        tokio::select! {
            _ = scope.cancelled() => Err(scope.aborted()),
            res = create => res.map(|_| ()),
        }
    }
}
