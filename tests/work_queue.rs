//! Reconciler driven by the kube-runtime work queue
//!
//! Runs the production `reconcile` and `error_policy` through
//! `kube::runtime::controller::applier`, the scheduler behind `Controller`,
//! so per-key serialization and error requeues are checked end to end.

mod common;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::controller::{applier, Config as ControllerConfig};
use kube::runtime::reflector::{self, ObjectRef};
use kube::runtime::watcher;

use common::{labels, FakeCluster};
use ns_labeler::config::LabelerConfig;
use ns_labeler::controller::{error_policy, reconcile, Context};

/// How long each test lets the queue run before inspecting the cluster
const QUEUE_RUN_TIME: Duration = Duration::from_millis(500);

// =============================================================================
// Test Helpers
// =============================================================================

/// A reflector store that has completed its initial list with `pods`
fn synced_store(pods: Vec<Pod>) -> reflector::Store<Pod> {
    let (store, mut writer) = reflector::store::<Pod>();
    writer.apply_watcher_event(&watcher::Event::Init);
    for pod in pods {
        writer.apply_watcher_event(&watcher::Event::InitApply(pod));
    }
    writer.apply_watcher_event(&watcher::Event::InitDone);
    store
}

/// Drive the work queue over `triggers` for a bounded time
///
/// Returns the number of finished reconciliations and how many of them failed.
async fn run_queue(
    cluster: &Arc<FakeCluster>,
    ctx: Context,
    triggers: Vec<ObjectRef<Pod>>,
) -> (usize, usize) {
    let store = synced_store(vec![cluster.pod("default", "p1")]);
    // Keep the trigger stream open; a finished queue shuts the applier down
    // before queued triggers run. `take_until` below bounds the run.
    let queue = futures::stream::iter(triggers.into_iter().map(Ok::<_, Infallible>))
        .chain(futures::stream::pending());
    let tracker = cluster.clone();

    let results: Vec<_> = applier(
        move |pod, ctx| {
            let tracker = tracker.clone();
            Box::pin(async move { tracker.tracked(reconcile(pod, ctx)).await })
        },
        error_policy,
        Arc::new(ctx),
        store,
        queue,
        ControllerConfig::default(),
    )
    .take_until(tokio::time::sleep(QUEUE_RUN_TIME))
    .collect()
    .await;

    let failed = results.iter().filter(|r| r.is_err()).count();
    (results.len(), failed)
}

fn p1_ref() -> ObjectRef<Pod> {
    ObjectRef::<Pod>::new("p1").within("default")
}

// =============================================================================
// Per-key Serialization
// =============================================================================

/// Story: two triggers for the same pod arrive back to back
///
/// The queue runs them one after the other (or coalesces them), never
/// concurrently, and the pod receives exactly one write.
#[tokio::test]
async fn story_duplicate_triggers_never_overlap() {
    let cluster = FakeCluster::new();
    cluster.add_namespace("default", Some("true"), &[("team", "foo")]);
    cluster.add_pod("default", "p1", &[]);
    cluster.delay_reads(Duration::from_millis(50));

    let (finished, failed) = run_queue(&cluster, cluster.context(), vec![p1_ref(), p1_ref()]).await;

    assert!(finished >= 1, "at least one reconciliation must run");
    assert_eq!(failed, 0);
    assert_eq!(cluster.max_in_flight(), 1, "reconciles for one pod overlapped");
    assert_eq!(cluster.write_count(), 1);
    assert_eq!(cluster.conflict_count(), 0);
    assert_eq!(cluster.pod_labels("default", "p1"), labels(&[("team", "foo")]));
}

// =============================================================================
// Error Requeue
// =============================================================================

/// Story: a conflicting edit lands mid-reconcile
///
/// The write is rejected, `error_policy` requeues the pod, and the retry
/// starts from the fresh object so the concurrent edit survives.
#[tokio::test]
async fn story_conflict_requeued_and_retried_from_fresh_state() {
    let cluster = FakeCluster::new();
    cluster.add_namespace("default", Some("true"), &[("team", "foo")]);
    cluster.add_pod("default", "p1", &[]);
    cluster.edit_before_next_write("default", "p1", "owner", "alice");
    let config = LabelerConfig::new(
        ["team"],
        Duration::from_secs(3600),
        Duration::from_millis(50),
    )
    .unwrap();

    let (finished, failed) = run_queue(&cluster, cluster.context_with(config), vec![p1_ref()]).await;

    assert_eq!(finished, 2, "one failed attempt then one successful retry");
    assert_eq!(failed, 1);
    assert_eq!(cluster.conflict_count(), 1);
    assert_eq!(cluster.write_count(), 1);
    assert_eq!(
        cluster.pod_labels("default", "p1"),
        labels(&[("owner", "alice"), ("team", "foo")])
    );
}
