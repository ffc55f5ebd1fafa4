//! Controller configuration
//!
//! The tracked label set is configuration rather than a compiled-in list, so
//! deployments can extend it without a rebuild. Values come from CLI flags or
//! their environment fallbacks (see `main.rs`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::labels::DEFAULT_TRACKED_LABELS;
use crate::Error;

/// Default interval between level-triggered resyncs of a healthy pod
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(10 * 60 * 60);

/// Default requeue delay after a failed reconciliation
pub const DEFAULT_ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Maximum length of a label name (the part after an optional prefix)
const MAX_LABEL_NAME_LEN: usize = 63;

/// Maximum length of a label key prefix (DNS subdomain)
const MAX_LABEL_PREFIX_LEN: usize = 253;

/// Labeler configuration shared by every reconciliation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelerConfig {
    /// Label keys copied from namespace to pod, in evaluation order
    #[serde(default = "default_tracked_labels")]
    pub tracked_labels: Vec<String>,

    /// How often a pod is reconciled again absent any change
    #[serde(default = "default_resync_interval", with = "duration_secs")]
    pub resync_interval: Duration,

    /// Delay before retrying a failed reconciliation
    #[serde(default = "default_error_requeue", with = "duration_secs")]
    pub error_requeue: Duration,
}

fn default_tracked_labels() -> Vec<String> {
    DEFAULT_TRACKED_LABELS.iter().map(|s| s.to_string()).collect()
}

fn default_resync_interval() -> Duration {
    DEFAULT_RESYNC_INTERVAL
}

fn default_error_requeue() -> Duration {
    DEFAULT_ERROR_REQUEUE
}

impl Default for LabelerConfig {
    fn default() -> Self {
        Self {
            tracked_labels: default_tracked_labels(),
            resync_interval: default_resync_interval(),
            error_requeue: default_error_requeue(),
        }
    }
}

impl LabelerConfig {
    /// Build a validated configuration
    ///
    /// Tracked keys are trimmed and de-duplicated keeping first-seen order.
    pub fn new<I, S>(
        tracked_labels: I,
        resync_interval: Duration,
        error_requeue: Duration,
    ) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys: Vec<String> = Vec::new();
        for raw in tracked_labels {
            let key = raw.as_ref().trim();
            validate_label_key(key)?;
            if !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }
        }

        if keys.is_empty() {
            return Err(Error::validation("at least one tracked label is required"));
        }
        if resync_interval.is_zero() {
            return Err(Error::validation("resync interval must be greater than zero"));
        }
        if error_requeue.is_zero() {
            return Err(Error::validation("error requeue must be greater than zero"));
        }

        Ok(Self {
            tracked_labels: keys,
            resync_interval,
            error_requeue,
        })
    }

    /// Parse a comma separated key list, e.g. `team,product,project`
    pub fn parse_tracked_labels(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}

/// Check a label key against Kubernetes syntax: `[prefix/]name`
pub fn validate_label_key(key: &str) -> Result<(), Error> {
    if key.is_empty() {
        return Err(Error::validation("label key must not be empty"));
    }

    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };

    if let Some(prefix) = prefix {
        if prefix.is_empty() || prefix.len() > MAX_LABEL_PREFIX_LEN {
            return Err(Error::validation(format!(
                "label key {key:?}: prefix must be 1-{MAX_LABEL_PREFIX_LEN} characters"
            )));
        }
        let valid_prefix = prefix.split('.').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                && !part.starts_with('-')
                && !part.ends_with('-')
        });
        if !valid_prefix {
            return Err(Error::validation(format!(
                "label key {key:?}: prefix must be a DNS subdomain"
            )));
        }
    }

    if name.is_empty() || name.len() > MAX_LABEL_NAME_LEN {
        return Err(Error::validation(format!(
            "label key {key:?}: name must be 1-{MAX_LABEL_NAME_LEN} characters"
        )));
    }
    let alnum_ends = name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name.ends_with(|c: char| c.is_ascii_alphanumeric());
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !alnum_ends || !valid_chars {
        return Err(Error::validation(format!(
            "label key {key:?}: name must be alphanumeric, '-', '_' or '.', starting and ending alphanumeric"
        )));
    }

    Ok(())
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
