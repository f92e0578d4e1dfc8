//! config.yaml parser.
//!
//! Field names follow the deployed config format (`deepflow_*`,
//! `ignore_*`, `safe_scale`, ...). Durations are strings such as `"5s"`,
//! `"500ms"` or `"2m"`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{ApplyMode, SafetyMode, WorkloadReduction};

/// Environment variable that overrides `deepflow_clickhouse_password`.
pub const PASSWORD_ENV: &str = "QUIESCE_CLICKHOUSE_PASSWORD";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuiesceConfig {
    /// ClickHouse HTTP endpoint of the flow store.
    pub deepflow_host: Option<String>,
    pub deepflow_clickhouse_username: String,
    pub deepflow_clickhouse_password: String,
    /// Flow records older than this many days (at local midnight) are stale.
    pub deepflow_check_days: u32,
    pub ignore_namespaces: Vec<String>,
    pub ignore_deployments: Vec<String>,
    /// Annotation key; a value of `"true"` opts the workload out.
    pub ignore_annotations: String,
    pub prometheus_host: Option<String>,
    pub safe_scale: bool,
    pub scale_enable: bool,
    pub use_deepflow: bool,
    pub load_test_namespace_prefix: String,
    pub reserved_node_pools: Vec<String>,
    pub workload_reduction: WorkloadReduction,
    pub concurrency: usize,
    pub metrics_query_timeout: String,
    pub flow_query_timeout: String,
    pub cluster_timeout: String,
    pub sweep_deadline: Option<String>,
    pub kubeconfig: Option<String>,
    pub kube_context: Option<String>,
}

impl Default for QuiesceConfig {
    fn default() -> Self {
        Self {
            deepflow_host: None,
            deepflow_clickhouse_username: "default".to_string(),
            deepflow_clickhouse_password: String::new(),
            deepflow_check_days: 7,
            ignore_namespaces: Vec::new(),
            ignore_deployments: Vec::new(),
            ignore_annotations: "quiesce.io/ignore".to_string(),
            prometheus_host: None,
            safe_scale: true,
            scale_enable: false,
            use_deepflow: false,
            load_test_namespace_prefix: "load-".to_string(),
            reserved_node_pools: vec!["load".to_string(), "staging".to_string()],
            workload_reduction: WorkloadReduction::Any,
            concurrency: 4,
            metrics_query_timeout: "10s".to_string(),
            flow_query_timeout: "5s".to_string(),
            cluster_timeout: "30s".to_string(),
            sweep_deadline: None,
            kubeconfig: None,
            kube_context: None,
        }
    }
}

impl QuiesceConfig {
    /// Read, parse, apply environment overrides, and validate.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_yaml_str(&content)?;
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            config.deepflow_clickhouse_password = password;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse without validating.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.prometheus_host.as_deref() {
            None | Some("") => return Err(ConfigError::Missing("prometheus_host")),
            Some(host) => check_url("prometheus_host", host)?,
        }

        if self.use_deepflow {
            match self.deepflow_host.as_deref() {
                None | Some("") => return Err(ConfigError::Missing("deepflow_host")),
                Some(host) => check_url("deepflow_host", host)?,
            }
        }

        if self.ignore_annotations.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "ignore_annotations",
                reason: "annotation key must not be empty".to_string(),
            });
        }

        if self.concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "concurrency",
                reason: "must be at least 1".to_string(),
            });
        }

        check_duration("metrics_query_timeout", &self.metrics_query_timeout)?;
        check_duration("flow_query_timeout", &self.flow_query_timeout)?;
        check_duration("cluster_timeout", &self.cluster_timeout)?;
        if let Some(deadline) = &self.sweep_deadline {
            check_duration("sweep_deadline", deadline)?;
        }

        Ok(())
    }

    pub fn safety_mode(&self) -> SafetyMode {
        SafetyMode::from_flag(self.safe_scale)
    }

    pub fn apply_mode(&self) -> ApplyMode {
        ApplyMode::from_flag(self.scale_enable)
    }

    pub fn metrics_timeout(&self) -> Duration {
        parse_duration(&self.metrics_query_timeout).unwrap_or(Duration::from_secs(10))
    }

    pub fn flow_timeout(&self) -> Duration {
        parse_duration(&self.flow_query_timeout).unwrap_or(Duration::from_secs(5))
    }

    pub fn cluster_call_timeout(&self) -> Duration {
        parse_duration(&self.cluster_timeout).unwrap_or(Duration::from_secs(30))
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.sweep_deadline.as_deref().and_then(parse_duration)
    }
}

/// Parse a duration string like "5s", "500ms", "2m", "1h" or a bare number
/// of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .parse::<u64>()
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn check_duration(field: &'static str, value: &str) -> Result<(), ConfigError> {
    match parse_duration(value) {
        Some(d) if !d.is_zero() => Ok(()),
        _ => Err(ConfigError::Invalid {
            field,
            reason: format!("{value:?} is not a positive duration"),
        }),
    }
}

fn check_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("{value:?} must be an http(s) URL"),
        })
    }
}
