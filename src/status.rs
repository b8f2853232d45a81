//! Concurrent, read-only health probing.
//!
//! Every check runs in its own task and reports through one channel sized
//! to the number of checks. A failing or slow check never stops the
//! others; the report is returned once all of them have answered.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::collab::{ClusterManager, MirrorRegistry, ReleaseInspector};
use crate::config::LabConfig;
use crate::tiers::Tier;
use crate::util::with_timeout;
use crate::{klog_debug, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckCategory {
    Node,
    HostService,
    Release,
}

impl fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckCategory::Node => write!(f, "node"),
            CheckCategory::HostService => write!(f, "service"),
            CheckCategory::Release => write!(f, "release"),
        }
    }
}

/// A single probe. `Ok(detail)` is healthy, `Err` carries the problem.
pub struct HealthCheck {
    pub name: String,
    pub category: CheckCategory,
    pub probe: BoxFuture<'static, Result<String>>,
}

impl HealthCheck {
    pub fn new(
        name: impl Into<String>,
        category: CheckCategory,
        probe: BoxFuture<'static, Result<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            probe,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub category: CheckCategory,
    pub healthy: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusReport {
    pub checks: Vec<CheckResult>,
}

impl StatusReport {
    pub fn healthy(&self) -> bool {
        self.checks.iter().all(|c| c.healthy)
    }

    pub fn unhealthy(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.healthy)
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.checks.iter().map(|c| c.name.len()).max().unwrap_or(0);
        for check in &self.checks {
            let mark = if check.healthy { "ok" } else { "FAIL" };
            writeln!(
                f,
                "{:<4} {:<8} {:<width$}  {}",
                mark,
                check.category.to_string(),
                check.name,
                check.detail,
                width = width
            )?;
        }
        Ok(())
    }
}

/// Run every check concurrently and wait for all of them.
///
/// Results keep the order the checks were given in.
pub async fn probe_all(checks: Vec<HealthCheck>, timeout: Duration) -> StatusReport {
    let total = checks.len();
    if total == 0 {
        return StatusReport::default();
    }
    let (tx, mut rx) = mpsc::channel(total);
    // Kept so a check whose task dies still shows up in the report.
    let labels: Vec<(String, CheckCategory)> =
        checks.iter().map(|c| (c.name.clone(), c.category)).collect();

    for (index, check) in checks.into_iter().enumerate() {
        let tx = tx.clone();
        tokio::spawn(async move {
            let (healthy, detail) = match with_timeout(timeout, check.probe).await {
                Ok(detail) => (true, detail),
                Err(e) => (false, e.to_string()),
            };
            let _ = tx
                .send((
                    index,
                    CheckResult {
                        name: check.name,
                        category: check.category,
                        healthy,
                        detail,
                    },
                ))
                .await;
        });
    }
    drop(tx);

    let mut slots: Vec<Option<CheckResult>> = vec![None; total];
    while let Some((index, result)) = rx.recv().await {
        slots[index] = Some(result);
    }
    klog_debug!("probe_all: {} checks reported", total);

    let checks = slots
        .into_iter()
        .zip(labels)
        .map(|(slot, (name, category))| {
            slot.unwrap_or_else(|| CheckResult {
                name,
                category,
                healthy: false,
                detail: "check panicked".to_string(),
            })
        })
        .collect();
    StatusReport { checks }
}

/// Checks for the cluster nodes, the mirror registry, and every configured
/// release.
pub async fn lab_checks(
    cluster: Arc<dyn ClusterManager>,
    registry: Arc<dyn MirrorRegistry>,
    releases: Arc<dyn ReleaseInspector>,
    config: &LabConfig,
) -> Vec<HealthCheck> {
    let mut checks = Vec::new();

    {
        let registry = Arc::clone(&registry);
        let name = config.registry.name.clone();
        checks.push(HealthCheck::new(
            name,
            CheckCategory::HostService,
            Box::pin(async move {
                if registry.is_running().await? {
                    Ok("running".to_string())
                } else {
                    Err(crate::Error::Validation("not running".to_string()))
                }
            }),
        ));
    }

    // Node list itself is a probe; on failure report a single cluster entry.
    match cluster.node_names().await {
        Ok(nodes) => {
            for node in nodes {
                let cluster = Arc::clone(&cluster);
                checks.push(HealthCheck::new(
                    node.clone(),
                    CheckCategory::Node,
                    Box::pin(async move {
                        if cluster.node_ready(&node).await? {
                            Ok("Ready".to_string())
                        } else {
                            Err(crate::Error::Validation("NotReady".to_string()))
                        }
                    }),
                ));
            }
        }
        Err(e) => {
            let message = e.to_string();
            checks.push(HealthCheck::new(
                config.cluster_name.clone(),
                CheckCategory::Node,
                Box::pin(async move { Err(crate::Error::Validation(message)) }),
            ));
        }
    }

    for tier in Tier::ALL {
        for chart in tier.charts(&config.tiers) {
            let releases = Arc::clone(&releases);
            let release = chart.release.clone();
            let namespace = chart.namespace.clone();
            checks.push(HealthCheck::new(
                format!("{}/{}", namespace, release),
                CheckCategory::Release,
                Box::pin(async move {
                    let status = releases.release_status(&release, &namespace).await?;
                    if status == "deployed" {
                        Ok(status)
                    } else {
                        Err(crate::Error::Validation(status))
                    }
                }),
            ));
        }
    }

    checks
}
