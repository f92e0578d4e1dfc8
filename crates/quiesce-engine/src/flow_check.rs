//! Flow-existence checker — corroborating evidence from the flow store.
//!
//! Two sequential lookups: instance name → internal ids, then per id
//! "any flow ending after the cutoff?". Ids are evaluated independently
//! and reduced as follows:
//!
//! ```text
//! any id has records            → HasRecords
//! else any lookup failed        → LookupFailed
//! else (no ids, or all empty)   → NoRecords
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use quiesce_core::FlowRecordId;

use crate::provider::FlowStore;

/// Flow-store answer for one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowSignal {
    HasRecords,
    NoRecords,
    LookupFailed,
}

pub struct FlowChecker {
    store: Arc<dyn FlowStore>,
    /// Bound on each individual store query.
    timeout: Duration,
}

impl FlowChecker {
    pub fn new(store: Arc<dyn FlowStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn check(&self, instance_name: &str, cutoff: DateTime<Utc>) -> FlowSignal {
        let ids = match tokio::time::timeout(self.timeout, self.store.resolve_ids(instance_name))
            .await
        {
            Ok(Ok(ids)) => ids,
            Ok(Err(e)) => {
                warn!(pod = %instance_name, error = %e, "flow id lookup failed");
                return FlowSignal::LookupFailed;
            }
            Err(_) => {
                warn!(pod = %instance_name, timeout = ?self.timeout, "flow id lookup timed out");
                return FlowSignal::LookupFailed;
            }
        };

        if ids.is_empty() {
            debug!(pod = %instance_name, "no flow ids for instance");
            return FlowSignal::NoRecords;
        }

        let mut failed = false;
        for id in ids {
            match self.has_flows(instance_name, id, cutoff).await {
                Some(true) => {
                    debug!(pod = %instance_name, %id, %cutoff, "flow records found");
                    return FlowSignal::HasRecords;
                }
                Some(false) => {}
                None => failed = true,
            }
        }

        if failed {
            FlowSignal::LookupFailed
        } else {
            debug!(pod = %instance_name, %cutoff, "no flow records since cutoff");
            FlowSignal::NoRecords
        }
    }

    /// `None` when the existence query failed or timed out.
    async fn has_flows(
        &self,
        instance_name: &str,
        id: FlowRecordId,
        cutoff: DateTime<Utc>,
    ) -> Option<bool> {
        match tokio::time::timeout(self.timeout, self.store.has_flows_since(id, cutoff)).await {
            Ok(Ok(found)) => Some(found),
            Ok(Err(e)) => {
                warn!(pod = %instance_name, %id, error = %e, "flow record query failed");
                None
            }
            Err(_) => {
                warn!(pod = %instance_name, %id, timeout = ?self.timeout, "flow record query timed out");
                None
            }
        }
    }
}
