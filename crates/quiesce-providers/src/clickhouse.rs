//! DeepFlow flow store over the ClickHouse HTTP interface.
//!
//! Both lookups are parameterized queries: values travel as `param_*`
//! URL parameters and are bound server-side, never spliced into SQL.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::debug;

use quiesce_core::{FlowRecordId, ProviderError};
use quiesce_engine::FlowStore;

use crate::InitError;
use crate::prometheus::transport_error;

const RESOLVE_IDS: &str =
    "SELECT id FROM flow_tag.pod_map WHERE name = {name:String} FORMAT TabSeparated";

const FLOWS_SINCE: &str = "SELECT EXISTS(\
    SELECT 1 FROM flow_log.l7_flow_log \
    WHERE (pod_id_0 = {id:UInt64} OR pod_id_1 = {id:UInt64}) \
    AND end_time > {cutoff:DateTime64(3, 'UTC')} LIMIT 1) \
    FORMAT TabSeparated";

pub struct ClickHouseFlowStore {
    http: Client,
    base_url: String,
    user: String,
    password: String,
    timeout: Duration,
}

impl ClickHouseFlowStore {
    pub fn new(
        base_url: &str,
        user: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, InitError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(InitError::HttpClient)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            user: user.into(),
            password: password.into(),
            timeout,
        })
    }

    async fn query(
        &self,
        operation: &'static str,
        sql: &'static str,
        params: &[(&str, String)],
    ) -> Result<String, ProviderError> {
        let response = self
            .http
            .post(format!("{}/", self.base_url))
            .header("X-ClickHouse-User", &self.user)
            .header("X-ClickHouse-Key", &self.password)
            .query(params)
            .body(sql)
            .send()
            .await
            .map_err(|e| transport_error(e, operation, self.timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(e, operation, self.timeout))?;

        if !status.is_success() {
            return Err(ProviderError::Api(format!(
                "clickhouse {operation} returned {status}: {}",
                body.trim()
            )));
        }
        Ok(body)
    }
}

#[async_trait]
impl FlowStore for ClickHouseFlowStore {
    async fn resolve_ids(&self, instance_name: &str) -> Result<Vec<FlowRecordId>, ProviderError> {
        let body = self
            .query(
                "pod id lookup",
                RESOLVE_IDS,
                &[("param_name", instance_name.to_string())],
            )
            .await?;
        let ids = parse_ids(&body)?;
        debug!(pod = %instance_name, ids = ids.len(), "resolved flow ids");
        Ok(ids)
    }

    async fn has_flows_since(
        &self,
        id: FlowRecordId,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, ProviderError> {
        let body = self
            .query(
                "flow existence check",
                FLOWS_SINCE,
                &[
                    ("param_id", id.0.to_string()),
                    ("param_cutoff", cutoff_param(cutoff)),
                ],
            )
            .await?;
        parse_exists(&body)
    }
}

/// `2024-05-01 00:00:00.000`, UTC.
pub fn cutoff_param(cutoff: DateTime<Utc>) -> String {
    cutoff.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// One id per line; duplicates collapse.
pub fn parse_ids(body: &str) -> Result<Vec<FlowRecordId>, ProviderError> {
    let mut ids = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.parse::<u64>()
                .map(FlowRecordId)
                .map_err(|e| ProviderError::Decode(format!("pod id {line:?}: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    ids.sort_by_key(|id| id.0);
    ids.dedup();
    Ok(ids)
}

pub fn parse_exists(body: &str) -> Result<bool, ProviderError> {
    match body.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(ProviderError::Decode(format!(
            "unexpected EXISTS result {other:?}"
        ))),
    }
}
