//! Scale actuator — the single mutation the engine performs.
//!
//! Sets a workload's desired replicas to zero and verifies the observed
//! result. A workload already below one replica is left untouched, so
//! repeated calls never issue a second update.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use quiesce_core::{ActuationError, ApplyMode, ProviderError, Workload};

use crate::provider::ClusterState;

/// Result of one scale-down attempt.
#[derive(Debug)]
pub enum ActuationOutcome {
    Scaled,
    AlreadyAtZero,
    /// Dry-run mode: the update was not sent.
    DryRun,
    Failed(ActuationError),
}

pub struct ScaleActuator {
    cluster: Arc<dyn ClusterState>,
    mode: ApplyMode,
    timeout: Duration,
}

impl ScaleActuator {
    pub fn new(cluster: Arc<dyn ClusterState>, mode: ApplyMode, timeout: Duration) -> Self {
        Self {
            cluster,
            mode,
            timeout,
        }
    }

    pub fn mode(&self) -> ApplyMode {
        self.mode
    }

    pub async fn scale_to_zero(&self, workload: &Workload) -> ActuationOutcome {
        if workload.replicas < 1 {
            info!(
                namespace = %workload.namespace,
                workload = %workload.name,
                "already at zero replicas"
            );
            return ActuationOutcome::AlreadyAtZero;
        }

        if self.mode == ApplyMode::DryRun {
            info!(
                namespace = %workload.namespace,
                workload = %workload.name,
                replicas = workload.replicas,
                "dry run: would scale to zero"
            );
            return ActuationOutcome::DryRun;
        }

        info!(
            namespace = %workload.namespace,
            workload = %workload.name,
            replicas = workload.replicas,
            "scaling to zero"
        );

        let result = tokio::time::timeout(
            self.timeout,
            self.cluster.update_desired_replicas(workload, 0),
        )
        .await
        .unwrap_or(Err(ProviderError::Timeout {
            operation: "replica update",
            after: self.timeout,
        }));

        match result {
            Ok(observed) if observed.replicas == 0 => {
                info!(
                    namespace = %workload.namespace,
                    workload = %workload.name,
                    "scaled to zero"
                );
                ActuationOutcome::Scaled
            }
            Ok(observed) => {
                let err = ActuationError::Consistency {
                    observed: observed.replicas,
                };
                error!(
                    namespace = %workload.namespace,
                    workload = %workload.name,
                    error = %err,
                    "scale-down failed"
                );
                ActuationOutcome::Failed(err)
            }
            Err(e) => {
                let err = ActuationError::Update(e);
                error!(
                    namespace = %workload.namespace,
                    workload = %workload.name,
                    error = %err,
                    "scale-down failed"
                );
                ActuationOutcome::Failed(err)
            }
        }
    }
}
