//! Collaborator interfaces consumed by the engine.
//!
//! Implementations are constructed once at startup and shared as
//! `Arc<dyn ...>`; the engine never reaches for globals. Tests plug in
//! in-memory fakes.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use quiesce_core::{FlowRecordId, Instance, ProviderError, SeriesSet, Workload};

/// Cluster-state inquiry and the single mutation the engine performs.
#[async_trait]
pub trait ClusterState: Send + Sync + 'static {
    /// All workloads across all namespaces.
    async fn list_workloads(&self) -> Result<Vec<Workload>, ProviderError>;

    /// Instances currently matching the workload's selector.
    async fn list_instances(&self, workload: &Workload) -> Result<Vec<Instance>, ProviderError>;

    /// Set the desired replica count and return the workload as observed
    /// after the update.
    async fn update_desired_replicas(
        &self,
        workload: &Workload,
        replicas: i32,
    ) -> Result<Workload, ProviderError>;
}

/// A windowed range query.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    pub expr: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step: Duration,
    /// Server-side evaluation timeout passed along with the query.
    pub timeout: Duration,
}

/// Result of a range query: the series plus any warnings the server
/// attached.
#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    pub series: SeriesSet,
    pub warnings: Vec<String>,
}

/// Time-series query service.
#[async_trait]
pub trait MetricsProvider: Send + Sync + 'static {
    async fn range_query(&self, query: &RangeQuery) -> Result<QueryOutput, ProviderError>;
}

/// Flow-record store, queried in two stages.
#[async_trait]
pub trait FlowStore: Send + Sync + 'static {
    /// Resolve an instance name to its internal ids. A name may map to
    /// several ids when historical reassignments were not deduplicated.
    async fn resolve_ids(&self, instance_name: &str) -> Result<Vec<FlowRecordId>, ProviderError>;

    /// Whether any flow with `id` at either endpoint ended after `cutoff`.
    async fn has_flows_since(
        &self,
        id: FlowRecordId,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, ProviderError>;
}
