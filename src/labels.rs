//! Label propagation decision logic
//!
//! Pure functions deciding whether a namespace opted in and which tracked
//! labels a pod is missing. No I/O happens here; the controller feeds in
//! observed state and writes back whatever [`LabelDiff`] says.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;

/// Namespace annotation that opts a namespace into propagation
pub const GATE_ANNOTATION: &str = "labeler.uthark.dev/enabled";

/// The only annotation value that enables propagation
pub const GATE_ENABLED: &str = "true";

/// Label keys propagated when no explicit list is configured, in order
pub const DEFAULT_TRACKED_LABELS: [&str; 3] = ["team", "product", "project"];

/// Returns true when the namespace carries `labeler.uthark.dev/enabled: "true"`
///
/// Any other value, including `"True"` or an empty string, disables propagation.
pub fn is_propagation_enabled(namespace: &Namespace) -> bool {
    namespace
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(GATE_ANNOTATION))
        .is_some_and(|v| v == GATE_ENABLED)
}

/// Result of comparing a pod's labels against its namespace's tracked labels
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelDiff {
    /// Pod labels after propagation (untracked keys preserved)
    pub labels: BTreeMap<String, String>,
    /// Tracked keys whose value changed, in tracked-key order
    pub changed: Vec<String>,
}

impl LabelDiff {
    /// True when the pod already agrees with the namespace
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    /// Only the labels that need writing
    pub fn changed_labels(&self) -> BTreeMap<String, String> {
        self.changed
            .iter()
            .filter_map(|k| self.labels.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }
}

/// Compute the pod labels implied by the namespace for the given tracked keys
///
/// A key is skipped when the namespace has no value or an empty value for it;
/// the pod's own value, if any, is left alone. Otherwise the namespace value
/// wins whenever the pod value is missing, empty, or different.
pub fn desired_labels<S: AsRef<str>>(
    pod_labels: Option<&BTreeMap<String, String>>,
    namespace_labels: Option<&BTreeMap<String, String>>,
    tracked_keys: &[S],
) -> LabelDiff {
    let mut labels = pod_labels.cloned().unwrap_or_default();
    let mut changed = Vec::new();

    let Some(namespace_labels) = namespace_labels else {
        return LabelDiff { labels, changed };
    };

    for key in tracked_keys {
        let key = key.as_ref();
        let Some(wanted) = namespace_labels.get(key).filter(|v| !v.is_empty()) else {
            continue;
        };

        let current = labels.get(key).map(String::as_str).unwrap_or_default();
        if current.is_empty() || current != wanted {
            labels.insert(key.to_string(), wanted.clone());
            changed.push(key.to_string());
        }
    }

    LabelDiff { labels, changed }
}
