//! OpenTelemetry metrics for the labeler
//!
//! Instruments are created lazily on the global meter, so recording is a
//! no-op until telemetry installs an exporting provider.

use std::time::Duration;

use once_cell::sync::Lazy;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};

use crate::controller::ReconcileOutcome;
use crate::Error;

/// Global meter for labeler metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("ns-labeler"));

/// Result label used for failed reconciliations
pub const RESULT_ERROR: &str = "error";

// ============================================================================
// Reconcile Metrics
// ============================================================================

/// Counter of pod reconciliations
///
/// Labels:
/// - `result`: updated, in_sync, disabled, pod_gone, error
/// - `error_type`: error kind, only when `result` is error
pub static RECONCILE_TOTAL: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("labeler_reconcile_total")
        .with_description("Total number of pod reconciliations by result")
        .with_unit("{reconciliations}")
        .build()
});

/// Histogram of pod reconciliation duration
///
/// Labels:
/// - `result`: updated, in_sync, disabled, pod_gone, error
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("labeler_reconcile_duration_seconds")
        .with_description("Duration of pod reconciliation in seconds")
        .with_unit("s")
        .build()
});

/// Counter of labels written onto pods
///
/// Labels:
/// - `label`: tracked label key
pub static LABELS_PROPAGATED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("labeler_labels_propagated_total")
        .with_description("Total number of tracked labels written onto pods")
        .with_unit("{labels}")
        .build()
});

// ============================================================================
// Recording Helpers
// ============================================================================

/// Attributes for one finished reconciliation
pub fn reconcile_attributes(result: &Result<ReconcileOutcome, Error>) -> Vec<KeyValue> {
    match result {
        Ok(outcome) => vec![KeyValue::new("result", outcome.as_str())],
        Err(e) => vec![
            KeyValue::new("result", RESULT_ERROR),
            KeyValue::new("error_type", e.kind()),
        ],
    }
}

/// Record one finished reconciliation, including any propagated labels
pub fn record_reconcile(result: &Result<ReconcileOutcome, Error>, elapsed: Duration) {
    let attributes = reconcile_attributes(result);
    RECONCILE_TOTAL.add(1, &attributes);
    RECONCILE_DURATION.record(elapsed.as_secs_f64(), &attributes[..1]);

    if let Ok(ReconcileOutcome::Updated { changed }) = result {
        for label in changed {
            record_propagated(label);
        }
    }
}

/// Record one tracked label written onto a pod
pub fn record_propagated(label: &str) {
    LABELS_PROPAGATED.add(1, &[KeyValue::new("label", label.to_string())]);
}
