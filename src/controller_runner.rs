//! Controller runner - wires the pod reconciler to its watches
//!
//! Pods are the primary resource. Namespaces are a secondary watch: when an
//! opted-in namespace changes, every cached pod in it is re-enqueued. The
//! runtime serializes work per pod key and coalesces repeated triggers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};

use crate::controller::{error_policy, reconcile, Context};
use crate::labels::is_propagation_enabled;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// so the API server closes idle watches before the client gives up.
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Build the pod controller future
pub fn build_pod_controller(
    client: Client,
    ctx: Arc<Context>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let pods: Api<Pod> = Api::all(client.clone());
    let namespaces: Api<Namespace> = Api::all(client);

    tracing::info!(tracked = ?ctx.config.tracked_labels, "- Pod label controller");

    let controller = Controller::new(pods, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS));
    let pod_store = controller.store();

    Box::pin(
        controller
            .watches(
                namespaces,
                WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
                move |namespace| pods_in_namespace(&pod_store.state(), &namespace),
            )
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("Pod")),
    )
}

/// Pods to re-enqueue after a namespace changed
///
/// Namespaces that have not opted in enqueue nothing: their pods are never
/// touched, so there is nothing to bring up to date.
pub fn pods_in_namespace(pods: &[Arc<Pod>], namespace: &Namespace) -> Vec<ObjectRef<Pod>> {
    if !is_propagation_enabled(namespace) {
        return vec![];
    }
    let ns = namespace.name_any();

    let affected: Vec<ObjectRef<Pod>> = pods
        .iter()
        .filter(|pod| pod.namespace().as_deref() == Some(ns.as_str()))
        .map(|pod| ObjectRef::<Pod>::new(&pod.name_any()).within(&ns))
        .collect();

    tracing::debug!(
        namespace = %ns,
        affected_count = affected.len(),
        "namespace changed, re-enqueueing pods"
    );
    affected
}

/// Create a logging closure for controller reconciliation results
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
