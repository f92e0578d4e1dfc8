//! quiesce-providers — production collaborators for the engine.
//!
//! # Architecture
//!
//! ```text
//! Providers::connect(config)
//!   ├── KubeCluster          Deployments / Pods, merge-patch on spec.replicas
//!   ├── PrometheusClient     GET /api/v1/query_range
//!   └── ClickHouseFlowStore  flow_tag.pod_map → flow_log.l7_flow_log
//!                            (only when use_deepflow is set)
//! ```
//!
//! Construction failures are the only errors that abort a run; once
//! built, every call failure is returned as a `ProviderError` and handled
//! per instance by the engine.

pub mod clickhouse;
pub mod kube_cluster;
pub mod prometheus;

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use quiesce_core::QuiesceConfig;
use quiesce_engine::{ClusterState, FlowStore, MetricsProvider};

pub use clickhouse::ClickHouseFlowStore;
pub use kube_cluster::KubeCluster;
pub use prometheus::PrometheusClient;

#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to read kubeconfig {path}: {reason}")]
    Kubeconfig { path: String, reason: String },

    #[error("failed to load cluster config: {0}")]
    ClusterConfig(String),

    #[error("failed to build cluster client: {0}")]
    ClusterClient(#[source] kube::Error),

    #[error("failed to build http client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

/// The three collaborators, ready to hand to `Sweep::from_config`.
pub struct Providers {
    pub cluster: Arc<dyn ClusterState>,
    pub metrics: Arc<dyn MetricsProvider>,
    pub flows: Option<Arc<dyn FlowStore>>,
}

impl Providers {
    /// Build every collaborator the configuration asks for. Expects a
    /// validated configuration.
    pub async fn connect(config: &QuiesceConfig) -> Result<Self, InitError> {
        let prometheus = config
            .prometheus_host
            .as_deref()
            .ok_or(InitError::Missing("prometheus_host"))?;
        let metrics = PrometheusClient::new(prometheus, config.metrics_timeout())?;

        let flows: Option<Arc<dyn FlowStore>> = if config.use_deepflow {
            let host = config
                .deepflow_host
                .as_deref()
                .ok_or(InitError::Missing("deepflow_host"))?;
            info!(host, "flow cross-check enabled");
            Some(Arc::new(ClickHouseFlowStore::new(
                host,
                config.deepflow_clickhouse_username.clone(),
                config.deepflow_clickhouse_password.clone(),
                config.flow_timeout(),
            )?))
        } else {
            None
        };

        let cluster =
            KubeCluster::connect(config.kubeconfig.as_deref(), config.kube_context.as_deref())
                .await?;

        Ok(Self {
            cluster: Arc::new(cluster),
            metrics: Arc::new(metrics),
            flows,
        })
    }
}
