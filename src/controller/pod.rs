//! Pod label propagation controller
//!
//! Each reconciliation reads one Pod and its Namespace fresh from the API
//! server, checks the opt-in annotation, and issues at most one conditional
//! metadata write. The write carries the Pod's observed resourceVersion, so a
//! concurrent edit makes it fail with a conflict instead of clobbering the
//! newer state. The work queue then retries from a fresh read.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::config::LabelerConfig;
use crate::error::from_write_error;
use crate::labels::{desired_labels, is_propagation_enabled};
use crate::metrics;
use crate::Error;

/// Field manager recorded on label writes
pub const FIELD_MANAGER: &str = "ns-labeler";

/// Fully-qualified reference to a Pod
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PodRef {
    /// Namespace of the pod
    pub namespace: String,
    /// Name of the pod
    pub name: String,
}

impl PodRef {
    /// Create a reference from namespace and name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Derive a reference from a (possibly cached) pod object
    pub fn from_pod(pod: &Pod) -> Result<Self, Error> {
        let namespace = pod
            .namespace()
            .ok_or_else(|| Error::missing_metadata(format!("pod {} has no namespace", pod.name_any())))?;
        Ok(Self::new(namespace, pod.name_any()))
    }
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What a single reconciliation did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The pod was deleted before we got to it
    PodGone,
    /// The namespace has not opted in
    Disabled,
    /// Tracked labels already match; no write issued
    InSync,
    /// One conditional write updated these tracked keys
    Updated {
        /// Keys written, in tracked-key order
        changed: Vec<String>,
    },
}

impl ReconcileOutcome {
    /// Metric/log label for this outcome
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::PodGone => "pod_gone",
            ReconcileOutcome::Disabled => "disabled",
            ReconcileOutcome::InSync => "in_sync",
            ReconcileOutcome::Updated { .. } => "updated",
        }
    }
}

/// Trait abstracting the cluster API operations the labeler needs
///
/// This trait allows substituting a mock or in-memory store in tests while
/// using the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Fetch a pod; `Ok(None)` when it does not exist
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error>;

    /// Fetch a namespace; `Ok(None)` when it does not exist
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, Error>;

    /// Merge `labels` into the pod's metadata, only if its stored
    /// resourceVersion still equals `resource_version`
    ///
    /// Returns [`Error::Conflict`] when the pod changed since it was read.
    async fn update_pod_labels(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn update_pod_labels(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let patch = label_patch(resource_version, labels);

        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| from_write_error(e, namespace, name))?;

        Ok(())
    }
}

/// Merge patch body for a conditional label write
///
/// A `metadata.resourceVersion` in a merge patch is a precondition: the API
/// server answers 409 if the stored version differs.
pub fn label_patch(resource_version: &str, labels: &BTreeMap<String, String>) -> serde_json::Value {
    serde_json::json!({
        "metadata": {
            "resourceVersion": resource_version,
            "labels": labels,
        }
    })
}

/// Controller context shared across all reconciliations
///
/// Holds the cluster API capability and configuration. No per-pod state is
/// kept here; every reconciliation works from freshly read objects.
pub struct Context {
    /// Cluster API access (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Labeler configuration
    pub config: LabelerConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context around an explicit client implementation
    ///
    /// Used by tests and by callers that bring their own [`KubeClient`].
    pub fn with_kube_client(kube: Arc<dyn KubeClient>, config: LabelerConfig) -> Self {
        Self { kube, config }
    }
}

/// Builder for constructing [`Context`] instances
///
/// ```ignore
/// let ctx = Context::builder(client)
///     .config(LabelerConfig::default())
///     .build();
/// ```
pub struct ContextBuilder {
    client: Client,
    config: LabelerConfig,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            config: LabelerConfig::default(),
        }
    }

    /// Set the labeler configuration
    pub fn config(mut self, config: LabelerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            kube: Arc::new(KubeClientImpl::new(self.client)),
            config: self.config,
        }
    }
}

/// Bring one pod's tracked labels into agreement with its namespace
///
/// Steps:
/// 1. Fetch the pod. Gone means nothing to do.
/// 2. Fetch its namespace. Gone is an error (retried by the queue).
/// 3. Skip unless the namespace opted in.
/// 4. Diff tracked labels; write once, conditionally, if anything differs.
#[instrument(skip(ctx, pod_ref), fields(pod = %pod_ref))]
pub async fn reconcile_pod(ctx: &Context, pod_ref: &PodRef) -> Result<ReconcileOutcome, Error> {
    let Some(pod) = ctx.kube.get_pod(&pod_ref.namespace, &pod_ref.name).await? else {
        debug!("pod no longer exists, skipping");
        return Ok(ReconcileOutcome::PodGone);
    };

    let namespace_name = pod.namespace().unwrap_or_else(|| pod_ref.namespace.clone());
    let namespace = ctx
        .kube
        .get_namespace(&namespace_name)
        .await?
        .ok_or_else(|| Error::NamespaceNotFound(namespace_name.clone()))?;

    if !is_propagation_enabled(&namespace) {
        debug!(namespace = %namespace_name, "namespace not opted in, skipping");
        return Ok(ReconcileOutcome::Disabled);
    }

    let diff = desired_labels(
        pod.metadata.labels.as_ref(),
        namespace.metadata.labels.as_ref(),
        &ctx.config.tracked_labels,
    );

    if diff.is_empty() {
        debug!("tracked labels already in sync");
        return Ok(ReconcileOutcome::InSync);
    }

    let resource_version = pod
        .metadata
        .resource_version
        .as_deref()
        .ok_or_else(|| Error::missing_metadata(format!("pod {} has no resourceVersion", pod_ref)))?;

    ctx.kube
        .update_pod_labels(
            &pod_ref.namespace,
            &pod_ref.name,
            resource_version,
            &diff.changed_labels(),
        )
        .await?;

    info!(changed = ?diff.changed, "propagated namespace labels to pod");
    Ok(ReconcileOutcome::Updated {
        changed: diff.changed,
    })
}

/// Reconcile a Pod delivered by the controller runtime
///
/// The cached object only supplies the reference; state is re-read in
/// [`reconcile_pod`]. Healthy pods are requeued after the resync interval so
/// drift (e.g. a hand-edited label) self-heals.
pub async fn reconcile(pod: Arc<Pod>, ctx: Arc<Context>) -> Result<Action, Error> {
    let pod_ref = PodRef::from_pod(&pod)?;
    let started = Instant::now();

    let result = reconcile_pod(&ctx, &pod_ref).await;
    metrics::record_reconcile(&result, started.elapsed());

    match result? {
        ReconcileOutcome::PodGone => Ok(Action::await_change()),
        _ => Ok(Action::requeue(ctx.config.resync_interval)),
    }
}

/// Error policy for pod reconciliation
///
/// Every error is retried after the same delay; a conflict is not special
/// beyond its log level, since the retry always starts from a fresh read.
pub fn error_policy(pod: Arc<Pod>, error: &Error, ctx: Arc<Context>) -> Action {
    if error.is_conflict() {
        warn!(
            pod = %pod.name_any(),
            namespace = ?pod.namespace(),
            "pod changed during reconciliation, retrying from fresh state"
        );
    } else {
        error!(
            ?error,
            pod = %pod.name_any(),
            namespace = ?pod.namespace(),
            "pod reconciliation failed"
        );
    }
    Action::requeue(ctx.config.error_requeue)
}
