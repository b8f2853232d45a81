use async_trait::async_trait;
use serde::Deserialize;

use super::Tool;
use crate::cancel::CancellationScope;
use crate::collab::{ReleaseInspector, TierDeployer};
use crate::config::{ChartRelease, LabConfig};
use crate::tiers::Tier;
use crate::{klog, Result};

#[derive(Debug, Deserialize)]
struct HelmStatus {
    info: HelmStatusInfo,
}

#[derive(Debug, Deserialize)]
struct HelmStatusInfo {
    status: String,
}

/// `helm` bound to the lab cluster's kube context.
#[derive(Debug, Clone)]
pub struct Helm {
    tool: Tool,
    context: String,
}

impl Helm {
    pub fn new(cluster_name: &str) -> Self {
        Self {
            tool: Tool::lazy("helm"),
            context: format!("kind-{}", cluster_name),
        }
    }

    pub async fn upgrade_install(&self, chart: &ChartRelease) -> Result<()> {
        let mut args = vec![
            "upgrade",
            "--install",
            chart.release.as_str(),
            chart.chart.as_str(),
            "--namespace",
            chart.namespace.as_str(),
            "--create-namespace",
            "--wait",
            "--kube-context",
            self.context.as_str(),
        ];
        if let Some(values) = &chart.values {
            args.push("--values");
            args.push(values.as_str());
        }
        self.tool.run(args).await.map(|_| ())
    }
}

#[async_trait]
impl ReleaseInspector for Helm {
    async fn release_status(&self, release: &str, namespace: &str) -> Result<String> {
        let out = self
            .tool
            .run([
                "status",
                release,
                "--namespace",
                namespace,
                "--kube-context",
                self.context.as_str(),
                "-o",
                "json",
            ])
            .await?;
        let status: HelmStatus = serde_json::from_str(&out)?;
        Ok(status.info.status)
    }
}

/// Installs the charts configured for one tier, in order.
#[derive(Debug, Clone)]
pub struct HelmTier {
    helm: Helm,
    tier: Tier,
}

impl HelmTier {
    pub fn new(helm: Helm, tier: Tier) -> Self {
        Self { helm, tier }
    }
}

#[async_trait]
impl TierDeployer for HelmTier {
    async fn deploy(&self, scope: &CancellationScope, config: &LabConfig) -> Result<()> {
        let charts = self.tier.charts(&config.tiers);
        if charts.is_empty() {
            klog!("{}: no charts configured", self.tier);
            return Ok(());
        }
        for chart in charts {
            scope.check()?;
            klog!("{}: installing {} ({})", self.tier, chart.release, chart.chart);
            tokio::select! {
                _ = scope.cancelled() => return Err(scope.aborted()),
                res = self.helm.upgrade_install(chart) => res?,
            }
        }
        Ok(())
    }
}
