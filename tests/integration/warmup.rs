//! Warmup scenarios: model acquisition, image pre-staging and retries.

use std::sync::atomic::Ordering;
use std::time::Duration;

use kindlab::cancel::CancellationScope;
use kindlab::config::LabConfig;
use kindlab::exec::lab_context;
use kindlab::warmup::election::ACCELERATOR_SELECTOR;
use kindlab::warmup::model::cache_path;
use kindlab::warmup::{
    start_image_warmup_async, start_model_warmup_async, start_warmup, TaskOutcome, TaskResult,
    WarmupOrchestrator, WarmupState,
};
use kindlab::Error;

use crate::fixtures::{FakeCluster, FakeDownloader, FakeRegistry, LabHarness, ScriptedCopier};

const IMAGE: &str = "ghcr.io/acme/inference:1.0";

fn image_attempts(result: &Option<TaskResult>) -> u32 {
    match result {
        Some(TaskResult::Image { attempts, .. }) => *attempts,
        other => panic!("expected image result, got {:?}", other),
    }
}

/// Test: Model warmup from an empty cache
/// Given model "demo/model" and an empty cache
/// When warmup runs to completion
/// Then the model task was started and the files are cached
#[tokio::test]
async fn test_model_warmup_downloads_into_empty_cache() {
    let harness = LabHarness::new(
        FakeCluster::single("lab"),
        ScriptedCopier::default(),
        FakeDownloader::default(),
    );
    let mut warmup =
        WarmupOrchestrator::new(harness.ctx(), harness.settings(Some("demo/model"), None, false));

    warmup.start(&CancellationScope::new()).unwrap();
    let result = tokio_test::assert_ok!(warmup.join().await);

    assert!(result.model_warmup_started);
    assert!(!result.image_warmup_started);
    assert_eq!(harness.downloader.calls(), 1);
    let path = cache_path(&harness.cache_root(), "demo/model");
    assert!(path.join("model.safetensors").exists());
    assert!(matches!(
        result.model,
        Some(TaskResult::Model { downloaded: true, .. })
    ));
}

/// Test: Model warmup is idempotent
/// Given a model already present in the cache
/// When warmup runs a second time
/// Then no download happens and the task still succeeds
#[tokio::test]
async fn test_model_warmup_is_idempotent() {
    let harness = LabHarness::new(
        FakeCluster::single("lab"),
        ScriptedCopier::default(),
        FakeDownloader::default(),
    );
    for _ in 0..2 {
        let mut warmup = WarmupOrchestrator::new(
            harness.ctx(),
            harness.settings(Some("demo/model"), None, false),
        );
        warmup.start(&CancellationScope::new()).unwrap();
        warmup.join().await.unwrap();
    }

    assert_eq!(harness.downloader.calls(), 1, "Second run should hit the cache");
}

/// Test: No model configured
/// Given no model slug
/// When model warmup is requested
/// Then no task is launched
#[tokio::test]
async fn test_no_model_means_no_task() {
    let harness = LabHarness::new(
        FakeCluster::single("lab"),
        ScriptedCopier::default(),
        FakeDownloader::default(),
    );
    let handle = start_model_warmup_async(
        &harness.ctx(),
        &harness.settings(None, None, false),
        &CancellationScope::new(),
    );
    assert!(handle.is_none());
}

/// Test: Acceleration disabled
/// Given a warmup image but acceleration turned off
/// When image warmup is requested
/// Then no task is launched and nothing is copied
#[tokio::test]
async fn test_image_warmup_skipped_without_acceleration() {
    let harness = LabHarness::new(
        FakeCluster::single("lab"),
        ScriptedCopier::default(),
        FakeDownloader::default(),
    );
    let handle = start_image_warmup_async(
        &harness.ctx(),
        &harness.settings(None, Some(IMAGE), false),
        &CancellationScope::new(),
    );
    assert!(handle.is_none());
    assert_eq!(harness.copier.calls(), 0);
}

/// Test: Image staged on the elected node
/// Given a single-node cluster and acceleration enabled
/// When image warmup runs
/// Then the image is copied into the mirror once, pulled onto the node
/// and retagged to its original reference
#[tokio::test]
async fn test_image_staged_on_elected_node() {
    let harness = LabHarness::new(
        FakeCluster::single("lab-control-plane"),
        ScriptedCopier::default(),
        FakeDownloader::default(),
    );
    let mut warmup =
        WarmupOrchestrator::new(harness.ctx(), harness.settings(None, Some(IMAGE), true));

    warmup.start(&CancellationScope::new()).unwrap();
    let result = warmup.join().await.unwrap();

    assert!(result.image_warmup_started);
    assert_eq!(image_attempts(&result.image), 1);
    assert_eq!(
        *harness.copier.copied.lock().unwrap(),
        vec![(IMAGE.to_string(), "localhost:5001/acme/inference:1.0".to_string())]
    );
    let mirrored = "kindlab-registry:5000/acme/inference:1.0".to_string();
    assert_eq!(
        *harness.node_images.pulls.lock().unwrap(),
        vec![("lab-control-plane".to_string(), mirrored.clone())]
    );
    assert_eq!(
        *harness.node_images.tags.lock().unwrap(),
        vec![("lab-control-plane".to_string(), mirrored, IMAGE.to_string())]
    );
}

/// Test: Only the elected node receives the image
/// Given two accelerator nodes
/// When image warmup runs
/// Then exactly one node pulls the image
#[tokio::test]
async fn test_image_pulled_onto_one_node_only() {
    let cluster = FakeCluster::with_nodes(&["cp", "gpu-1", "gpu-0"])
        .label(ACCELERATOR_SELECTOR, &["gpu-1", "gpu-0"]);
    let harness = LabHarness::new(cluster, ScriptedCopier::default(), FakeDownloader::default());
    let mut warmup =
        WarmupOrchestrator::new(harness.ctx(), harness.settings(None, Some(IMAGE), true));

    warmup.start(&CancellationScope::new()).unwrap();
    warmup.join().await.unwrap();

    let pulls = harness.node_images.pulls.lock().unwrap().clone();
    assert_eq!(pulls.len(), 1);
    assert_eq!(pulls[0].0, "gpu-0");
}

/// Test: No node elected
/// Given a multi-node cluster with no accelerator labels
/// When image warmup runs
/// Then the task is skipped, nothing is copied and warmup still succeeds
#[tokio::test]
async fn test_no_elected_node_skips_image() {
    let harness = LabHarness::new(
        FakeCluster::with_nodes(&["cp", "worker-1"]),
        ScriptedCopier::default(),
        FakeDownloader::default(),
    );
    let mut warmup =
        WarmupOrchestrator::new(harness.ctx(), harness.settings(None, Some(IMAGE), true));
    let scope = warmup.start(&CancellationScope::new()).unwrap();

    let result = warmup.join().await.unwrap();

    assert!(matches!(
        result.image.as_ref().map(|r| r.outcome()),
        Some(TaskOutcome::Skipped { .. })
    ));
    assert_eq!(harness.copier.calls(), 0);
    assert!(!scope.is_cancelled());
}

/// Test: Transient failures recover
/// Given a copier that fails twice with "connection reset"
/// When image warmup runs
/// Then the third attempt succeeds and the scope is never cancelled
#[tokio::test]
async fn test_transient_copy_failures_are_retried() {
    let copier = ScriptedCopier::failing("read: connection reset by peer", 2);
    let harness = LabHarness::new(FakeCluster::single("lab"), copier, FakeDownloader::default());
    let mut warmup =
        WarmupOrchestrator::new(harness.ctx(), harness.settings(None, Some(IMAGE), true));
    let scope = warmup.start(&CancellationScope::new()).unwrap();

    let result = warmup.join().await.unwrap();

    assert_eq!(harness.copier.calls(), 3);
    assert_eq!(image_attempts(&result.image), 3);
    assert!(!scope.is_cancelled());
}

/// Test: Retry bound
/// Given a copier that always fails transiently
/// When image warmup runs
/// Then it gives up after exactly 3 attempts and cancels the scope
#[tokio::test]
async fn test_retry_stops_after_three_attempts() {
    let copier = ScriptedCopier::failing("connection reset", 10);
    let harness = LabHarness::new(FakeCluster::single("lab"), copier, FakeDownloader::default());
    let mut warmup =
        WarmupOrchestrator::new(harness.ctx(), harness.settings(None, Some(IMAGE), true));
    let scope = warmup.start(&CancellationScope::new()).unwrap();

    let err = warmup.join().await.unwrap_err();

    assert_eq!(harness.copier.calls(), 3);
    assert!(matches!(err, Error::TaskFailed { ref task, .. } if task == "image"));
    assert!(scope.is_cancelled());
    assert!(scope.cause().starts_with("image warmup failed"));
}

/// Test: Permanent failure
/// Given a copier failing with "permission denied"
/// When image warmup runs
/// Then only one attempt is made and the shared scope is cancelled
#[tokio::test]
async fn test_permanent_copy_failure_is_not_retried() {
    let copier = ScriptedCopier::failing("permission denied", 10);
    let harness = LabHarness::new(FakeCluster::single("lab"), copier, FakeDownloader::default());
    let mut warmup =
        WarmupOrchestrator::new(harness.ctx(), harness.settings(None, Some(IMAGE), true));
    let scope = warmup.start(&CancellationScope::new()).unwrap();

    let err = warmup.join().await.unwrap_err();

    assert_eq!(harness.copier.calls(), 1);
    assert!(err.to_string().contains("permission denied"));
    assert!(scope.is_cancelled());
    assert!(harness.node_images.pulls.lock().unwrap().is_empty());
}

/// Test: Mirror registry restarted
/// Given a stopped mirror registry
/// When image warmup runs
/// Then the registry is started before the copy
#[tokio::test]
async fn test_stopped_registry_is_started() {
    let harness = LabHarness::new(
        FakeCluster::single("lab"),
        ScriptedCopier::default(),
        FakeDownloader::default(),
    )
    .with_registry(FakeRegistry::stopped());
    let mut warmup =
        WarmupOrchestrator::new(harness.ctx(), harness.settings(None, Some(IMAGE), true));

    warmup.start(&CancellationScope::new()).unwrap();
    warmup.join().await.unwrap();

    assert_eq!(harness.registry.starts.load(Ordering::SeqCst), 1);
    assert_eq!(harness.copier.calls(), 1);
}

/// Test: Mirror registry re-checked before every attempt
/// Given a registry that dies after the first check and a copier refused twice
/// When image warmup runs
/// Then each retry restarts the registry before copying again
#[tokio::test]
async fn test_registry_checked_before_each_attempt() {
    let copier = ScriptedCopier::failing("dial tcp: connection refused", 2);
    let harness = LabHarness::new(FakeCluster::single("lab"), copier, FakeDownloader::default())
        .with_registry(FakeRegistry::crashing());
    let mut warmup =
        WarmupOrchestrator::new(harness.ctx(), harness.settings(None, Some(IMAGE), true));
    let scope = warmup.start(&CancellationScope::new()).unwrap();

    let result = warmup.join().await.unwrap();

    assert_eq!(image_attempts(&result.image), 3);
    assert_eq!(harness.copier.calls(), 3);
    assert_eq!(harness.registry.checks.load(Ordering::SeqCst), 3);
    assert_eq!(harness.registry.starts.load(Ordering::SeqCst), 2);
    assert!(!scope.is_cancelled());
}

/// Test: Nothing to warm up
/// Given process-backed collaborators and no model or image configured
/// When warmup runs
/// Then it succeeds without looking up any external tool
#[tokio::test]
async fn test_unconfigured_warmup_needs_no_tools() {
    let cache = tempfile::tempdir().unwrap();
    let config = LabConfig {
        model_cache_dir: Some(cache.path().display().to_string()),
        ..Default::default()
    };

    let mut warmup = tokio_test::assert_ok!(start_warmup(
        lab_context(&config),
        &config,
        &CancellationScope::new()
    ));
    let result = tokio_test::assert_ok!(warmup.join().await);

    assert!(!result.model_warmup_started);
    assert!(!result.image_warmup_started);
}

/// Test: Model failure stops the image task
/// Given a failing model download and a slow image copy
/// When both warmup tasks run
/// Then the image task is aborted with the model failure as cause
#[tokio::test]
async fn test_model_failure_aborts_image_task() {
    let copier = ScriptedCopier::default().with_delay(Duration::from_secs(30));
    let harness = LabHarness::new(
        FakeCluster::single("lab"),
        copier,
        FakeDownloader::failing("disk full"),
    );
    let mut warmup = WarmupOrchestrator::new(
        harness.ctx(),
        harness.settings(Some("demo/model"), Some(IMAGE), true),
    );
    warmup.start(&CancellationScope::new()).unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), warmup.join())
        .await
        .expect("join should not wait for the slow copy")
        .unwrap_err();

    assert!(matches!(err, Error::TaskFailed { ref task, .. } if task == "model"));
    let result = warmup.result().unwrap();
    match result.image.as_ref().map(|r| r.outcome()) {
        Some(TaskOutcome::Aborted { cause }) => assert!(cause.starts_with("model warmup failed")),
        other => panic!("expected aborted image task, got {:?}", other),
    }
}

/// Test: Cluster never comes up
/// Given a cluster that never reports running
/// When the caller cancels warmup
/// Then the image task ends as aborted without electing a node
#[tokio::test]
async fn test_cancel_while_waiting_for_cluster() {
    let cluster = FakeCluster::single("lab");
    cluster.running.store(false, Ordering::SeqCst);
    let harness = LabHarness::new(cluster, ScriptedCopier::default(), FakeDownloader::default());
    let mut warmup =
        WarmupOrchestrator::new(harness.ctx(), harness.settings(None, Some(IMAGE), true));
    warmup.start(&CancellationScope::new()).unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(warmup.cancel("interrupted by user"));
    let err = warmup.join().await.unwrap_err();

    assert!(err.is_aborted());
    assert!(harness.cluster.labeled_nodes().is_empty());
}

/// Test: Cancellation is one-way
/// Given a started warmup
/// When it is cancelled twice
/// Then only the first cancel takes effect and its cause is kept
#[tokio::test]
async fn test_cancellation_is_one_way() {
    let harness = LabHarness::new(
        FakeCluster::single("lab"),
        ScriptedCopier::default(),
        FakeDownloader::slow(Duration::from_secs(30)),
    );
    let mut warmup = WarmupOrchestrator::new(
        harness.ctx(),
        harness.settings(Some("demo/model"), None, false),
    );
    let scope = warmup.start(&CancellationScope::new()).unwrap();

    assert!(warmup.cancel("first"));
    assert!(!warmup.cancel("second"));
    assert_eq!(scope.cause(), "first");

    let err = warmup.join().await.unwrap_err();
    assert!(matches!(err, Error::Aborted { ref cause } if cause == "first"));
    assert!(scope.is_cancelled());
}

/// Test: Starting twice
/// Given a started orchestrator
/// When start is called again
/// Then AlreadyStarted is returned and state is unchanged
#[tokio::test]
async fn test_start_twice_is_rejected() {
    let harness = LabHarness::new(
        FakeCluster::single("lab"),
        ScriptedCopier::default(),
        FakeDownloader::default(),
    );
    let mut warmup = WarmupOrchestrator::new(harness.ctx(), harness.settings(None, None, false));
    let root = CancellationScope::new();

    tokio_test::assert_ok!(warmup.start(&root));
    assert!(matches!(warmup.start(&root), Err(Error::AlreadyStarted)));
    assert_eq!(warmup.state(), WarmupState::Started);

    let result = warmup.join().await.unwrap();
    assert!(!result.model_warmup_started && !result.image_warmup_started);
    assert_eq!(warmup.state(), WarmupState::Joined);
    assert!(matches!(warmup.start(&root), Err(Error::AlreadyStarted)));
}

/// Test: Join before start
/// Given an idle orchestrator
/// When join is called
/// Then it fails instead of hanging
#[tokio::test]
async fn test_join_before_start_fails() {
    let harness = LabHarness::new(
        FakeCluster::single("lab"),
        ScriptedCopier::default(),
        FakeDownloader::default(),
    );
    let mut warmup = WarmupOrchestrator::new(harness.ctx(), harness.settings(None, None, false));
    tokio_test::assert_err!(warmup.join().await);
}
