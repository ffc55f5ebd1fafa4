//! ns-labeler - propagates namespace labels onto pods
//!
//! A namespace opts in with the annotation `labeler.uthark.dev/enabled: "true"`.
//! For every pod in an opted-in namespace, the controller copies a configured
//! set of tracked label keys (by default `team`, `product` and `project`) from
//! the namespace onto the pod, overwriting stale values. Writes are
//! conditional on the pod's resourceVersion, so concurrent edits are never
//! clobbered; a rejected write is retried from fresh state.
//!
//! # Modules
//!
//! - [`labels`] - Opt-in gate and label diff (pure)
//! - [`controller`] - Pod reconciliation logic
//! - [`controller_runner`] - Watches wiring pods and namespaces to the reconciler
//! - [`config`] - Tracked keys and requeue intervals
//! - [`leader_election`] - Lease-based leader election for HA deployments
//! - [`health`] - Liveness and readiness probes
//! - [`telemetry`] / [`metrics`] - Structured logging, tracing and metrics
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod client;
pub mod config;
pub mod controller;
pub mod controller_runner;
pub mod error;
pub mod health;
pub mod labels;
pub mod leader_election;
pub mod metrics;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default bind address for health probes
pub const DEFAULT_PROBE_ADDR: &str = "0.0.0.0:8081";
