//! Prometheus HTTP API client for range queries.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use quiesce_core::{ProviderError, Sample, TrafficWindow};
use quiesce_engine::{MetricsProvider, QueryOutput, RangeQuery};

use crate::InitError;

pub struct PrometheusClient {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl PrometheusClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, InitError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(InitError::HttpClient)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl MetricsProvider for PrometheusClient {
    async fn range_query(&self, query: &RangeQuery) -> Result<QueryOutput, ProviderError> {
        let url = format!("{}/api/v1/query_range", self.base_url);
        let params = [
            ("query", query.expr.clone()),
            ("start", query.start.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ("end", query.end.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ("step", prom_duration(query.step)),
            ("timeout", prom_duration(query.timeout)),
        ];

        debug!(expr = %query.expr, start = %query.start, end = %query.end, "range query");
        let response = self
            .http
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| transport_error(e, "range query", self.timeout))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, "range query", self.timeout))?;

        // Error responses carry the same envelope, so decode before
        // looking at the status.
        match decode_range_response(&body) {
            Err(ProviderError::Decode(_)) if !status.is_success() => {
                Err(ProviderError::Api(format!("prometheus returned {status}")))
            }
            other => other,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    status: String,
    data: Option<RangeData>,
    error_type: Option<String>,
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RangeData {
    result_type: String,
    #[serde(default)]
    result: Vec<RangeSeries>,
}

#[derive(Debug, Deserialize)]
struct RangeSeries {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

/// Decode a `query_range` response body into series plus warnings.
pub fn decode_range_response(body: &[u8]) -> Result<QueryOutput, ProviderError> {
    let envelope: Envelope =
        serde_json::from_slice(body).map_err(|e| ProviderError::Decode(e.to_string()))?;

    if envelope.status != "success" {
        return Err(ProviderError::Api(format!(
            "{}: {}",
            envelope.error_type.as_deref().unwrap_or("error"),
            envelope.error.as_deref().unwrap_or("unknown")
        )));
    }

    let data = envelope
        .data
        .ok_or_else(|| ProviderError::Decode("missing data".to_string()))?;
    if data.result_type != "matrix" {
        return Err(ProviderError::Decode(format!(
            "expected matrix result, got {}",
            data.result_type
        )));
    }

    let series = data
        .result
        .into_iter()
        .map(|s| {
            let samples = s
                .values
                .iter()
                .map(|(ts, value)| sample(*ts, value))
                .collect::<Result<Vec<_>, _>>()?;
            TrafficWindow::new(s.metric, samples).map_err(|e| ProviderError::Decode(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(QueryOutput {
        series,
        warnings: envelope.warnings,
    })
}

fn sample(ts: f64, value: &str) -> Result<Sample, ProviderError> {
    let timestamp = DateTime::<Utc>::from_timestamp_millis((ts * 1000.0).round() as i64)
        .ok_or_else(|| ProviderError::Decode(format!("timestamp out of range: {ts}")))?;
    let value = value
        .parse::<f64>()
        .map_err(|e| ProviderError::Decode(format!("sample value {value:?}: {e}")))?;
    Ok(Sample { timestamp, value })
}

/// Prometheus duration string: `60s`, `1500ms`.
fn prom_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

pub(crate) fn transport_error(
    err: reqwest::Error,
    operation: &'static str,
    after: Duration,
) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout { operation, after }
    } else {
        ProviderError::Transport(err.to_string())
    }
}
