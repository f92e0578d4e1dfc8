//! Sweep report — which instance, which verdict, which action.
//!
//! Every decision the sweep logs is also captured here so callers can
//! assert on it, print it, or serialize it.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use quiesce_core::{ExclusionRule, ScaleVerdict, SkipReason};

use crate::actuator::ActuationOutcome;
use crate::flow_check::FlowSignal;
use crate::window_rate::WindowSignal;

/// Evidence and verdict for one instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceReport {
    pub pod: String,
    pub window: WindowSignal,
    /// `None` when the flow store was not consulted.
    pub flow: Option<FlowSignal>,
    pub verdict: ScaleVerdict,
}

impl InstanceReport {
    /// Traffic observed, no flow records, and safe mode held back.
    pub fn is_near_miss(&self) -> bool {
        self.verdict == ScaleVerdict::NotEligible(SkipReason::AmbiguousInSafeMode)
    }
}

/// What the sweep did with a workload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WorkloadAction {
    Excluded { rule: ExclusionRule },
    Kept { blocking: ScaleVerdict },
    ScaledDown,
    AlreadyAtZero,
    /// Eligible, but scale actions are disabled.
    WouldScale,
    Failed { error: String },
    /// Evaluation did not finish before cancellation; discarded.
    Cancelled,
}

impl WorkloadAction {
    pub fn from_outcome(outcome: ActuationOutcome) -> Self {
        match outcome {
            ActuationOutcome::Scaled => WorkloadAction::ScaledDown,
            ActuationOutcome::AlreadyAtZero => WorkloadAction::AlreadyAtZero,
            ActuationOutcome::DryRun => WorkloadAction::WouldScale,
            ActuationOutcome::Failed(e) => WorkloadAction::Failed {
                error: e.to_string(),
            },
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            WorkloadAction::Excluded { .. } => "excluded",
            WorkloadAction::Kept { .. } => "kept",
            WorkloadAction::ScaledDown => "scaled-down",
            WorkloadAction::AlreadyAtZero => "already-at-zero",
            WorkloadAction::WouldScale => "would-scale",
            WorkloadAction::Failed { .. } => "failed",
            WorkloadAction::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkloadReport {
    pub namespace: String,
    pub name: String,
    pub instances: Vec<InstanceReport>,
    pub action: WorkloadAction,
}

impl WorkloadReport {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Totals per action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub workloads: usize,
    pub excluded: usize,
    pub kept: usize,
    pub scaled_down: usize,
    pub would_scale: usize,
    pub already_at_zero: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub near_misses: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    /// Whether cancellation or the deadline cut the sweep short.
    pub cancelled: bool,
    pub workloads: Vec<WorkloadReport>,
}

impl SweepReport {
    pub fn find(&self, namespace: &str, name: &str) -> Option<&WorkloadReport> {
        self.workloads
            .iter()
            .find(|w| w.namespace == namespace && w.name == name)
    }

    /// Instances held back by safe mode.
    pub fn near_misses(&self) -> impl Iterator<Item = (&WorkloadReport, &InstanceReport)> {
        self.workloads.iter().flat_map(|w| {
            w.instances
                .iter()
                .filter(|i| i.is_near_miss())
                .map(move |i| (w, i))
        })
    }

    pub fn summary(&self) -> SweepSummary {
        let mut s = SweepSummary {
            workloads: self.workloads.len(),
            near_misses: self.near_misses().count(),
            ..SweepSummary::default()
        };
        for w in &self.workloads {
            match w.action {
                WorkloadAction::Excluded { .. } => s.excluded += 1,
                WorkloadAction::Kept { .. } => s.kept += 1,
                WorkloadAction::ScaledDown => s.scaled_down += 1,
                WorkloadAction::WouldScale => s.would_scale += 1,
                WorkloadAction::AlreadyAtZero => s.already_at_zero += 1,
                WorkloadAction::Failed { .. } => s.failed += 1,
                WorkloadAction::Cancelled => s.cancelled += 1,
            }
        }
        s
    }

    /// One line per evaluated instance and per workload, then totals.
    /// Excluded workloads are listed with their rule.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for w in &self.workloads {
            for i in &w.instances {
                let _ = writeln!(out, "  {}/{} pod={} verdict={}", w.namespace, w.name, i.pod, i.verdict);
            }
            let _ = match &w.action {
                WorkloadAction::Excluded { rule } => {
                    writeln!(out, "{} {} ({rule})", w.key(), w.action.label())
                }
                WorkloadAction::Kept { blocking } => {
                    writeln!(out, "{} {} ({blocking})", w.key(), w.action.label())
                }
                WorkloadAction::Failed { error } => {
                    writeln!(out, "{} {} ({error})", w.key(), w.action.label())
                }
                other => writeln!(out, "{} {}", w.key(), other.label()),
            };
        }
        let s = self.summary();
        let _ = writeln!(
            out,
            "workloads={} excluded={} kept={} scaled_down={} would_scale={} already_at_zero={} failed={} cancelled={} near_misses={} elapsed={}ms",
            s.workloads,
            s.excluded,
            s.kept,
            s.scaled_down,
            s.would_scale,
            s.already_at_zero,
            s.failed,
            s.cancelled,
            s.near_misses,
            self.elapsed_ms
        );
        out
    }
}
