//! Error types for the namespace labeler
//!
//! Every variant is surfaced to the work queue, which owns backoff and
//! re-delivery. The reconciler itself never retries.

use thiserror::Error;

/// HTTP status returned by the API server when a precondition fails
const CONFLICT_CODE: u16 = 409;

/// HTTP status returned by the API server for a missing object
const NOT_FOUND_CODE: u16 = 404;

/// Main error type for labeler operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The pod changed between read and write; the write was rejected
    #[error("conflict writing labels on pod {namespace}/{name}: stored resourceVersion changed")]
    Conflict {
        /// Namespace of the pod
        namespace: String,
        /// Name of the pod
        name: String,
    },

    /// The namespace owning a pod could not be found
    #[error("namespace {0} not found")]
    NamespaceNotFound(String),

    /// An object is missing a metadata field the controller depends on
    #[error("missing metadata: {0}")]
    MissingMetadata(String),

    /// Invalid configuration
    #[error("validation error: {0}")]
    Validation(String),

    /// Internal/operational error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a missing-metadata error with the given message
    pub fn missing_metadata(msg: impl Into<String>) -> Self {
        Self::MissingMetadata(msg.into())
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a conflict error for a pod
    pub fn conflict(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// True for a rejected conditional write (stale resourceVersion)
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube(kube::Error::Api(ae)) => ae.code == CONFLICT_CODE,
            _ => false,
        }
    }

    /// True when the API server reported the object as missing
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NamespaceNotFound(_) => true,
            Error::Kube(kube::Error::Api(ae)) => ae.code == NOT_FOUND_CODE,
            _ => false,
        }
    }

    /// Short, bounded-cardinality name for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Kube(_) if self.is_conflict() => "conflict",
            Error::Kube(_) => "kube",
            Error::Conflict { .. } => "conflict",
            Error::NamespaceNotFound(_) => "namespace_not_found",
            Error::MissingMetadata(_) => "missing_metadata",
            Error::Validation(_) => "validation",
            Error::Internal(_) => "internal",
        }
    }
}

/// Map a kube error on a conditional pod write, turning 409 into [`Error::Conflict`]
pub(crate) fn from_write_error(err: kube::Error, namespace: &str, name: &str) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == CONFLICT_CODE => Error::conflict(namespace, name),
        other => Error::Kube(other),
    }
}
