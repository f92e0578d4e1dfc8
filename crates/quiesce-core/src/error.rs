//! Error types shared by the engine and the provider adapters.

use std::time::Duration;

use thiserror::Error;

/// Invalid or unreadable configuration. Fatal: the run aborts before
/// anything is scaled.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// A failed call to an external collaborator.
///
/// Never escalated by the engine: each component turns it into an
/// inconclusive signal or a lookup failure.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("decode error: {0}")]
    Decode(String),
}

/// A failed scale-down of one workload. Reported, not retried.
#[derive(Debug, Error)]
pub enum ActuationError {
    #[error("replica update failed: {0}")]
    Update(#[source] ProviderError),

    #[error("replica update not applied: observed {observed} desired replicas, expected 0")]
    Consistency { observed: i32 },
}
