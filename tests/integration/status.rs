//! Status probing against fake collaborators.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kindlab::config::{ChartRelease, LabConfig};
use kindlab::status::{lab_checks, probe_all, CheckCategory};

use crate::fixtures::{FakeCluster, FakeRegistry, FakeReleases};

fn chart(release: &str, namespace: &str) -> ChartRelease {
    ChartRelease {
        release: release.to_string(),
        chart: format!("charts/{}", release),
        namespace: namespace.to_string(),
        values: None,
    }
}

fn lab_config() -> LabConfig {
    let mut config = LabConfig::default();
    config.tiers.infrastructure = vec![chart("ingress", "ingress-nginx")];
    config.tiers.applications = vec![chart("chat", "apps")];
    config
}

/// Test: Healthy lab
/// Given a running registry, ready nodes and deployed releases
/// When the lab is probed
/// Then every check passes, in registry, node, release order
#[tokio::test]
async fn test_healthy_lab_report() {
    let config = lab_config();
    let releases = FakeReleases {
        statuses: HashMap::from([
            ("ingress".to_string(), "deployed".to_string()),
            ("chat".to_string(), "deployed".to_string()),
        ]),
    };
    let checks = lab_checks(
        Arc::new(FakeCluster::with_nodes(&["cp", "worker"])),
        Arc::new(FakeRegistry::running()),
        Arc::new(releases),
        &config,
    )
    .await;

    let report = probe_all(checks, Duration::from_secs(1)).await;

    assert!(report.healthy());
    let names: Vec<_> = report.checks.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["kindlab-registry", "cp", "worker", "ingress-nginx/ingress", "apps/chat"]
    );
    assert_eq!(report.checks[0].category, CheckCategory::HostService);
    assert_eq!(report.checks[1].category, CheckCategory::Node);
}

/// Test: Partial failures
/// Given a stopped registry, one NotReady node and a missing release
/// When the lab is probed
/// Then each failure is reported and the healthy checks still pass
#[tokio::test]
async fn test_failures_are_reported_individually() {
    let config = lab_config();
    let mut cluster = FakeCluster::with_nodes(&["cp", "worker"]);
    cluster.not_ready = vec!["worker".to_string()];
    let releases = FakeReleases {
        statuses: HashMap::from([("ingress".to_string(), "failed".to_string())]),
    };
    let checks = lab_checks(
        Arc::new(cluster),
        Arc::new(FakeRegistry::stopped()),
        Arc::new(releases),
        &config,
    )
    .await;

    let report = probe_all(checks, Duration::from_secs(1)).await;

    assert!(!report.healthy());
    let failed: Vec<_> = report.unhealthy().map(|c| c.name.as_str()).collect();
    assert_eq!(
        failed,
        vec!["kindlab-registry", "worker", "ingress-nginx/ingress", "apps/chat"]
    );
    assert!(report.checks[1].healthy, "Ready node should still pass");
    assert!(report.to_string().contains("FAIL"));
}
