//! Sweep error types.

use thiserror::Error;

use quiesce_core::ProviderError;

/// Failures that abort a whole sweep. Everything else is recorded per
/// workload in the report.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("failed to list workloads: {0}")]
    ListWorkloads(#[source] ProviderError),
}

pub type SweepResult<T> = Result<T, SweepError>;
