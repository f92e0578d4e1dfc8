//! In-memory collaborators for sweep tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use quiesce_core::{
    FlowRecordId, Instance, ProviderError, QuiesceConfig, Sample, TrafficWindow, Workload,
};
use quiesce_engine::{ClusterState, FlowStore, MetricsProvider, QueryOutput, RangeQuery};

pub fn config() -> QuiesceConfig {
    QuiesceConfig {
        prometheus_host: Some("http://prometheus:9090".to_string()),
        scale_enable: true,
        ..QuiesceConfig::default()
    }
}

pub fn with_cross_check(safe: bool) -> QuiesceConfig {
    QuiesceConfig {
        deepflow_host: Some("http://clickhouse:8123".to_string()),
        use_deepflow: true,
        safe_scale: safe,
        ..config()
    }
}

// ── Cluster ────────────────────────────────────────────────────

pub struct FakeCluster {
    workloads: Mutex<Vec<Workload>>,
    instances: HashMap<String, Vec<Instance>>,
    list_delay: Duration,
    rejected_updates: HashSet<String>,
    failing_instances: HashSet<String>,
    panicking_instances: HashSet<String>,
    pub instance_lists: AtomicUsize,
    pub updates: Mutex<Vec<(String, i32)>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            workloads: Mutex::new(Vec::new()),
            instances: HashMap::new(),
            list_delay: Duration::ZERO,
            rejected_updates: HashSet::new(),
            failing_instances: HashSet::new(),
            panicking_instances: HashSet::new(),
            instance_lists: AtomicUsize::new(0),
            updates: Mutex::new(Vec::new()),
        }
    }

    /// Delay every workload listing.
    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = delay;
        self
    }

    /// Refuse replica updates for this workload key.
    pub fn reject_update(mut self, key: &str) -> Self {
        self.rejected_updates.insert(key.to_string());
        self
    }

    /// Fail instance listings for this workload key.
    pub fn fail_instances(mut self, key: &str) -> Self {
        self.failing_instances.insert(key.to_string());
        self
    }

    /// Panic while listing instances for this workload key.
    pub fn panic_on_instances(mut self, key: &str) -> Self {
        self.panicking_instances.insert(key.to_string());
        self
    }

    /// Add a workload with one pod per name.
    pub fn workload(mut self, workload: Workload, pods: &[&str]) -> Self {
        let instances = pods
            .iter()
            .map(|pod| Instance::new(workload.namespace.clone(), *pod))
            .collect();
        self.instances.insert(workload.key(), instances);
        self.workloads.lock().unwrap().push(workload);
        self
    }

    pub fn updates(&self) -> Vec<(String, i32)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn replicas(&self, key: &str) -> Option<i32> {
        self.workloads
            .lock()
            .unwrap()
            .iter()
            .find(|w| w.key() == key)
            .map(|w| w.replicas)
    }
}

#[async_trait]
impl ClusterState for FakeCluster {
    async fn list_workloads(&self) -> Result<Vec<Workload>, ProviderError> {
        if !self.list_delay.is_zero() {
            tokio::time::sleep(self.list_delay).await;
        }
        Ok(self.workloads.lock().unwrap().clone())
    }

    async fn list_instances(&self, workload: &Workload) -> Result<Vec<Instance>, ProviderError> {
        self.instance_lists.fetch_add(1, Ordering::SeqCst);
        let key = workload.key();
        if self.panicking_instances.contains(&key) {
            panic!("instance listing for {key} blew up");
        }
        if self.failing_instances.contains(&key) {
            return Err(ProviderError::Transport("connection reset".to_string()));
        }
        Ok(self.instances.get(&workload.key()).cloned().unwrap_or_default())
    }

    async fn update_desired_replicas(
        &self,
        workload: &Workload,
        replicas: i32,
    ) -> Result<Workload, ProviderError> {
        self.updates.lock().unwrap().push((workload.key(), replicas));
        if self.rejected_updates.contains(&workload.key()) {
            return Err(ProviderError::Api(format!(
                "admission webhook denied {}",
                workload.key()
            )));
        }
        let mut workloads = self.workloads.lock().unwrap();
        let stored = workloads
            .iter_mut()
            .find(|w| w.key() == workload.key())
            .ok_or_else(|| ProviderError::Api(format!("{} not found", workload.key())))?;
        stored.replicas = replicas;
        Ok(stored.clone())
    }
}

// ── Metrics ────────────────────────────────────────────────────

#[derive(Clone, Copy)]
pub enum Traffic {
    Zeros,
    /// One sample at this rate among zeros.
    Spike(f64),
    NoSeries,
    Hang,
}

pub struct FakeMetrics {
    traffic: HashMap<String, Traffic>,
    delay: Duration,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeMetrics {
    pub fn new(traffic: &[(&str, Traffic)]) -> Self {
        Self {
            traffic: traffic.iter().map(|(pod, t)| (pod.to_string(), *t)).collect(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

fn series(pod: &str, values: &[f64]) -> TrafficWindow {
    let start = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default();
    let samples = values
        .iter()
        .enumerate()
        .map(|(i, value)| Sample {
            timestamp: start + TimeDelta::minutes(i as i64),
            value: *value,
        })
        .collect();
    let labels = BTreeMap::from([("pod".to_string(), pod.to_string())]);
    TrafficWindow::new(labels, samples).unwrap()
}

#[async_trait]
impl MetricsProvider for FakeMetrics {
    async fn range_query(&self, query: &RangeQuery) -> Result<QueryOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let pod = self
            .traffic
            .keys()
            .find(|pod| query.expr.contains(&format!("pod=\"{pod}\"")))
            .cloned()
            .unwrap_or_default();
        let traffic = self.traffic.get(&pod).copied().unwrap_or(Traffic::NoSeries);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let output = match traffic {
            Traffic::Zeros => QueryOutput {
                series: vec![series(&pod, &[0.0, 0.0, 0.0])],
                warnings: Vec::new(),
            },
            Traffic::Spike(rate) => QueryOutput {
                series: vec![series(&pod, &[0.0, rate, 0.0])],
                warnings: Vec::new(),
            },
            Traffic::NoSeries => QueryOutput::default(),
            Traffic::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                QueryOutput::default()
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(output)
    }
}

// ── Flow store ─────────────────────────────────────────────────

#[derive(Clone, Copy)]
pub enum Flows {
    /// Resolves to no ids.
    Unknown,
    Recent,
    Stale,
    Broken,
}

pub struct FakeFlows {
    flows: HashMap<String, Flows>,
    pub lookups: AtomicUsize,
}

impl FakeFlows {
    pub fn new(flows: &[(&str, Flows)]) -> Self {
        Self {
            flows: flows.iter().map(|(pod, f)| (pod.to_string(), *f)).collect(),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FlowStore for FakeFlows {
    async fn resolve_ids(&self, instance_name: &str) -> Result<Vec<FlowRecordId>, ProviderError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        match self.flows.get(instance_name).copied().unwrap_or(Flows::Unknown) {
            Flows::Unknown => Ok(Vec::new()),
            Flows::Recent => Ok(vec![FlowRecordId(1)]),
            Flows::Stale => Ok(vec![FlowRecordId(2)]),
            Flows::Broken => Err(ProviderError::Transport("connection refused".to_string())),
        }
    }

    async fn has_flows_since(
        &self,
        id: FlowRecordId,
        _cutoff: DateTime<Utc>,
    ) -> Result<bool, ProviderError> {
        Ok(id == FlowRecordId(1))
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
