//! In-memory cluster used by the integration tests
//!
//! Implements [`KubeClient`] over a map of pods and namespaces. Every pod
//! write bumps the resourceVersion and a write carrying a stale version is
//! rejected with a conflict, the same way the API server behaves.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::ObjectMeta;
use tokio::sync::Barrier;

use ns_labeler::config::LabelerConfig;
use ns_labeler::controller::{Context, KubeClient};
use ns_labeler::labels::GATE_ANNOTATION;
use ns_labeler::Error;

#[derive(Default)]
struct State {
    pods: HashMap<(String, String), Pod>,
    namespaces: HashMap<String, Namespace>,
    next_version: u64,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

/// Fake API server state
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
    writes: AtomicUsize,
    conflicts: AtomicUsize,
    /// Pod edited by "someone else" right before the next label write lands
    edit_before_next_write: Mutex<Option<(String, String, String, String)>>,
    /// When set, every pod read waits here after reading
    read_barrier: Mutex<Option<Arc<Barrier>>>,
    /// Simulated API latency on pod reads
    read_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_namespace(&self, name: &str, gate: Option<&str>, ns_labels: &[(&str, &str)]) {
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                annotations: gate.map(|v| labels(&[(GATE_ANNOTATION, v)])),
                labels: Some(labels(ns_labels)),
                ..Default::default()
            },
            ..Default::default()
        };
        self.state
            .lock()
            .unwrap()
            .namespaces
            .insert(name.to_string(), namespace);
    }

    pub fn add_pod(&self, namespace: &str, name: &str, pod_labels: &[(&str, &str)]) {
        let mut state = self.state.lock().unwrap();
        let version = state.bump();
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                resource_version: Some(version),
                labels: Some(labels(pod_labels)),
                ..Default::default()
            },
            ..Default::default()
        };
        state
            .pods
            .insert((namespace.to_string(), name.to_string()), pod);
    }

    pub fn delete_pod(&self, namespace: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .pods
            .remove(&(namespace.to_string(), name.to_string()));
    }

    /// Out-of-band edit, as a human or another controller would make
    pub fn set_pod_label(&self, namespace: &str, name: &str, key: &str, value: &str) {
        let mut state = self.state.lock().unwrap();
        let version = state.bump();
        if let Some(pod) = state
            .pods
            .get_mut(&(namespace.to_string(), name.to_string()))
        {
            pod.metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .insert(key.to_string(), value.to_string());
            pod.metadata.resource_version = Some(version);
        }
    }

    pub fn edit_before_next_write(&self, namespace: &str, name: &str, key: &str, value: &str) {
        *self.edit_before_next_write.lock().unwrap() = Some((
            namespace.to_string(),
            name.to_string(),
            key.to_string(),
            value.to_string(),
        ));
    }

    pub fn hold_reads_at(&self, barrier: Arc<Barrier>) {
        *self.read_barrier.lock().unwrap() = Some(barrier);
    }

    pub fn delay_reads(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = Some(delay);
    }

    /// Run one reconciliation, recording how many overlap
    pub async fn tracked<F: Future>(&self, reconciliation: F) -> F::Output {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let output = reconciliation.await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        output
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Pod {
        self.state
            .lock()
            .unwrap()
            .pods
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .expect("pod exists")
    }

    pub fn pod_labels(&self, namespace: &str, name: &str) -> BTreeMap<String, String> {
        self.pod(namespace, name).metadata.labels.unwrap_or_default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn conflict_count(&self) -> usize {
        self.conflicts.load(Ordering::SeqCst)
    }

    pub fn context(self: &Arc<Self>) -> Context {
        self.context_with(LabelerConfig::default())
    }

    pub fn context_with(self: &Arc<Self>, config: LabelerConfig) -> Context {
        Context::with_kube_client(self.clone(), config)
    }
}

#[async_trait]
impl KubeClient for FakeCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error> {
        let pod = self
            .state
            .lock()
            .unwrap()
            .pods
            .get(&(namespace.to_string(), name.to_string()))
            .cloned();

        let barrier = self.read_barrier.lock().unwrap().clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        let delay = *self.read_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(pod)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, Error> {
        Ok(self.state.lock().unwrap().namespaces.get(name).cloned())
    }

    async fn update_pod_labels(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
        new_labels: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let edit = self.edit_before_next_write.lock().unwrap().take();
        if let Some((ns, pod, key, value)) = edit {
            self.set_pod_label(&ns, &pod, &key, &value);
        }

        let mut state = self.state.lock().unwrap();
        let version = state.bump();
        let pod = state
            .pods
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| Error::internal(format!("pod {namespace}/{name} not found")))?;

        if pod.metadata.resource_version.as_deref() != Some(resource_version) {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
            return Err(Error::conflict(namespace, name));
        }

        pod.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(new_labels.clone());
        pod.metadata.resource_version = Some(version);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
