//! Pod label controller
//!
//! Reconciliation logic that copies tracked namespace labels onto the pods of
//! opted-in namespaces, following the observe-diff-act loop.

mod pod;

pub use pod::{
    error_policy, label_patch, reconcile, reconcile_pod, Context, ContextBuilder, KubeClient,
    KubeClientImpl, PodRef, ReconcileOutcome, FIELD_MANAGER,
};
