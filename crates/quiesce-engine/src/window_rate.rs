//! Window-rate evaluator — the network receive-rate signal.
//!
//! Queries the smoothed rate of received bytes for one instance from the
//! start of the current local day up to now, and classifies the window:
//!
//! ```text
//! query error / timeout / warnings  → Inconclusive
//! no series                         → Inconclusive   (not scraped ≠ idle)
//! series without samples            → Inconclusive
//! every sample < epsilon            → Idle
//! any sample ≥ epsilon              → Active
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use quiesce_core::{Instance, SeriesSet};

use crate::clock::start_of_day;
use crate::provider::{MetricsProvider, RangeQuery};

/// Rates below this are treated as zero traffic.
pub const IDLE_EPSILON: f64 = 0.001;

/// Traffic signal for one instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum WindowSignal {
    Idle,
    Active { peak: f64 },
    Inconclusive { cause: InconclusiveCause },
}

/// Why the rate window did not produce a usable answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InconclusiveCause {
    Timeout,
    QueryFailed,
    Warnings,
    NoSeries,
    EmptySeries,
}

#[derive(Debug, Clone)]
pub struct WindowRateSettings {
    /// Smoothing window of the `rate()` expression.
    pub rate_window: String,
    pub step: Duration,
    /// Evaluation timeout passed to the server.
    pub query_timeout: Duration,
    /// Client-side bound on the whole call.
    pub call_timeout: Duration,
    pub epsilon: f64,
}

impl Default for WindowRateSettings {
    fn default() -> Self {
        Self {
            rate_window: "3m".to_string(),
            step: Duration::from_secs(60),
            query_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(10),
            epsilon: IDLE_EPSILON,
        }
    }
}

pub struct WindowRateEvaluator {
    metrics: Arc<dyn MetricsProvider>,
    settings: WindowRateSettings,
}

impl WindowRateEvaluator {
    pub fn new(metrics: Arc<dyn MetricsProvider>, settings: WindowRateSettings) -> Self {
        Self { metrics, settings }
    }

    /// Build the range query for an instance: local midnight → `now`.
    pub fn range_for(&self, instance: &Instance, now: DateTime<Local>) -> RangeQuery {
        RangeQuery {
            expr: receive_rate_expr(&instance.namespace, &instance.name, &self.settings.rate_window),
            start: start_of_day(&now).with_timezone(&Utc),
            end: now.with_timezone(&Utc),
            step: self.settings.step,
            timeout: self.settings.query_timeout,
        }
    }

    pub async fn evaluate(&self, instance: &Instance, now: DateTime<Local>) -> WindowSignal {
        let query = self.range_for(instance, now);
        let result =
            tokio::time::timeout(self.settings.call_timeout, self.metrics.range_query(&query))
                .await;

        let output = match result {
            Err(_) => {
                warn!(
                    namespace = %instance.namespace,
                    pod = %instance.name,
                    timeout = ?self.settings.call_timeout,
                    "receive-rate query timed out"
                );
                return WindowSignal::Inconclusive {
                    cause: InconclusiveCause::Timeout,
                };
            }
            Ok(Err(e)) => {
                warn!(
                    namespace = %instance.namespace,
                    pod = %instance.name,
                    error = %e,
                    "receive-rate query failed"
                );
                return WindowSignal::Inconclusive {
                    cause: InconclusiveCause::QueryFailed,
                };
            }
            Ok(Ok(output)) => output,
        };

        if !output.warnings.is_empty() {
            warn!(
                namespace = %instance.namespace,
                pod = %instance.name,
                warnings = ?output.warnings,
                "receive-rate query returned warnings"
            );
            return WindowSignal::Inconclusive {
                cause: InconclusiveCause::Warnings,
            };
        }

        let signal = classify(&output.series, self.settings.epsilon);
        debug!(
            namespace = %instance.namespace,
            pod = %instance.name,
            series = output.series.len(),
            ?signal,
            "receive-rate window evaluated"
        );
        signal
    }
}

/// Classify a query result. Every sample of every series must be below
/// `epsilon` for the window to count as idle.
pub fn classify(series: &SeriesSet, epsilon: f64) -> WindowSignal {
    if series.is_empty() {
        return WindowSignal::Inconclusive {
            cause: InconclusiveCause::NoSeries,
        };
    }
    if series.iter().all(|s| s.is_empty()) {
        return WindowSignal::Inconclusive {
            cause: InconclusiveCause::EmptySeries,
        };
    }

    let peak = series
        .iter()
        .filter_map(|s| s.peak())
        .fold(0.0_f64, f64::max);

    if peak >= epsilon {
        WindowSignal::Active { peak }
    } else {
        WindowSignal::Idle
    }
}

/// `rate(container_network_receive_bytes_total{namespace="..",pod=".."}[3m])`
pub fn receive_rate_expr(namespace: &str, pod: &str, rate_window: &str) -> String {
    format!(
        "rate(container_network_receive_bytes_total{{namespace=\"{}\",pod=\"{}\"}}[{}])",
        escape_label(namespace),
        escape_label(pod),
        rate_window
    )
}

fn escape_label(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
