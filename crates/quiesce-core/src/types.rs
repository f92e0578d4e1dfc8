//! Shared types used across quiesce crates.
//!
//! Workloads and instances are read from the cluster provider, traffic
//! windows from the metrics provider, flow ids from the flow store. The
//! verdict types describe what the decision engine concluded about them.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Workload ──────────────────────────────────────────────────────

/// A horizontally-scalable unit (a Deployment) and the fields the
/// decision engine reads from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    /// Desired replica count (`spec.replicas`).
    pub replicas: i32,
    /// Match-labels used to discover the workload's instances.
    pub selector: BTreeMap<String, String>,
    /// Set-based selector requirements, ANDed with `selector`.
    #[serde(default)]
    pub selector_expressions: Vec<MatchExpression>,
    pub annotations: BTreeMap<String, String>,
    /// Required node-affinity terms, empty when none are declared.
    pub node_affinity: Vec<NodeSelectorTerm>,
    /// Last observed replica count (`status.replicas`).
    pub observed_replicas: i32,
}

impl Workload {
    /// Create a workload with no selector, annotations, or affinity.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, replicas: i32) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            replicas,
            selector: BTreeMap::new(),
            selector_expressions: Vec::new(),
            annotations: BTreeMap::new(),
            node_affinity: Vec::new(),
            observed_replicas: replicas,
        }
    }

    /// `{namespace}/{name}`, used as the workload key in logs and reports.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// One required node-selector term of a node-affinity declaration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeSelectorTerm {
    pub match_expressions: Vec<MatchExpression>,
}

/// A single `key <operator> values` requirement, used by node-selector
/// terms and set-based label selectors alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchExpression {
    pub key: String,
    pub operator: String,
    pub values: Vec<String>,
}

// ── Instance ──────────────────────────────────────────────────────

/// One running replica (a Pod) of a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub namespace: String,
    pub name: String,
}

impl Instance {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

// ── Traffic window ────────────────────────────────────────────────

/// A single `(timestamp, value)` point of a rate series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Rejected traffic window construction.
#[derive(Debug, Error, PartialEq)]
pub enum WindowError {
    #[error("sample timestamps must be strictly increasing (at index {0})")]
    OutOfOrder(usize),

    #[error("sample value {value} at index {index} is not a non-negative rate")]
    InvalidValue { index: usize, value: f64 },
}

/// Ordered samples of one instance's traffic-rate series over a bounded
/// recent interval.
///
/// Timestamps are strictly increasing and values are finite and
/// non-negative; [`TrafficWindow::new`] enforces both.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TrafficWindow {
    labels: BTreeMap<String, String>,
    samples: Vec<Sample>,
}

impl TrafficWindow {
    pub fn new(
        labels: BTreeMap<String, String>,
        samples: Vec<Sample>,
    ) -> Result<Self, WindowError> {
        for (index, sample) in samples.iter().enumerate() {
            if !sample.value.is_finite() || sample.value < 0.0 {
                return Err(WindowError::InvalidValue {
                    index,
                    value: sample.value,
                });
            }
            if index > 0 && samples[index - 1].timestamp >= sample.timestamp {
                return Err(WindowError::OutOfOrder(index));
            }
        }
        Ok(Self { labels, samples })
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Largest sample value, `None` for an empty window.
    pub fn peak(&self) -> Option<f64> {
        self.samples.iter().map(|s| s.value).reduce(f64::max)
    }
}

/// All series returned by one range query.
pub type SeriesSet = Vec<TrafficWindow>;

// ── Flow store ────────────────────────────────────────────────────

/// Opaque internal identifier of an instance in the flow store.
///
/// Resolved fresh on every evaluation: ids are not stable across the
/// store's housekeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowRecordId(pub u64);

impl fmt::Display for FlowRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Policy ────────────────────────────────────────────────────────

/// How an ambiguous signal (rate active, no corroborating flow record)
/// is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyMode {
    /// Ambiguity is not acted upon.
    Safe,
    /// Ambiguity is treated as idle.
    Unsafe,
}

impl SafetyMode {
    pub fn from_flag(safe_scale: bool) -> Self {
        if safe_scale {
            SafetyMode::Safe
        } else {
            SafetyMode::Unsafe
        }
    }
}

/// Whether scale actions are applied or only reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    Live,
    DryRun,
}

impl ApplyMode {
    pub fn from_flag(scale_enable: bool) -> Self {
        if scale_enable {
            ApplyMode::Live
        } else {
            ApplyMode::DryRun
        }
    }
}

/// How per-instance verdicts are reduced to one workload decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadReduction {
    /// One eligible instance is enough to scale the workload.
    #[default]
    Any,
    /// Every instance must be eligible.
    All,
}

// ── Verdicts ──────────────────────────────────────────────────────

/// The exclusion rule that put a workload out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionRule {
    AlreadyScaledDown,
    LoadTestNamespace,
    OptOutAnnotation,
    IgnoredNamespace,
    IgnoredWorkload,
    ReservedNodeAffinity,
}

impl ExclusionRule {
    pub fn label(&self) -> &'static str {
        match self {
            ExclusionRule::AlreadyScaledDown => "already scaled down",
            ExclusionRule::LoadTestNamespace => "load-test namespace",
            ExclusionRule::OptOutAnnotation => "opt-out annotation",
            ExclusionRule::IgnoredNamespace => "ignored namespace",
            ExclusionRule::IgnoredWorkload => "ignored workload",
            ExclusionRule::ReservedNodeAffinity => "load/staging node affinity",
        }
    }
}

impl fmt::Display for ExclusionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why an instance or workload was not eligible for scale-down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Traffic observed (or inconclusive) and the flow cross-check is off.
    CrossCheckDisabled,
    /// The flow store holds records newer than the cutoff.
    FlowRecordsFound,
    /// A flow-store lookup failed; no action on partial evidence.
    FlowLookupFailed,
    /// Traffic observed, no flow records, and safety mode is on.
    AmbiguousInSafeMode,
    /// The workload has no running instances.
    NoInstances,
    /// Listing the workload's instances failed.
    InstanceListFailed,
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::CrossCheckDisabled => "traffic observed and flow cross-check disabled",
            SkipReason::FlowRecordsFound => "flow records found",
            SkipReason::FlowLookupFailed => "flow lookup failed",
            SkipReason::AmbiguousInSafeMode => {
                "traffic observed but no flow records, safe mode keeps it"
            }
            SkipReason::NoInstances => "no running instances",
            SkipReason::InstanceListFailed => "instance listing failed",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-instance outcome of the decision engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum ScaleVerdict {
    /// No traffic in the rate window.
    EligibleIdle,
    /// Traffic in the rate window but no flow records; unsafe mode only.
    EligibleAmbiguous,
    NotEligible(SkipReason),
    Excluded(ExclusionRule),
}

impl ScaleVerdict {
    pub fn is_eligible(&self) -> bool {
        matches!(
            self,
            ScaleVerdict::EligibleIdle | ScaleVerdict::EligibleAmbiguous
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScaleVerdict::EligibleIdle => "eligible-idle",
            ScaleVerdict::EligibleAmbiguous => "eligible-ambiguous",
            ScaleVerdict::NotEligible(_) => "not-eligible",
            ScaleVerdict::Excluded(_) => "excluded",
        }
    }
}

impl fmt::Display for ScaleVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleVerdict::NotEligible(reason) => write!(f, "{} ({reason})", self.label()),
            ScaleVerdict::Excluded(rule) => write!(f, "{} ({rule})", self.label()),
            _ => f.write_str(self.label()),
        }
    }
}
