//! Decision combinator — merges the two traffic signals under the safety
//! mode into a per-instance verdict, then reduces instance verdicts to one
//! workload decision.
//!
//! ```text
//! Start ── Idle ─────────────────────────────► EligibleIdle
//!   │
//!   └─ Active | Inconclusive
//!        ├─ cross-check off ─────────────────► NotEligible(CrossCheckDisabled)
//!        ├─ NoRecords,   Unsafe ─────────────► EligibleAmbiguous
//!        ├─ NoRecords,   Safe ───────────────► NotEligible(AmbiguousInSafeMode)
//!        ├─ HasRecords ──────────────────────► NotEligible(FlowRecordsFound)
//!        └─ LookupFailed ────────────────────► NotEligible(FlowLookupFailed)
//! ```

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tracing::{debug, info};

use quiesce_core::{Instance, SafetyMode, ScaleVerdict, SkipReason, WorkloadReduction};

use crate::flow_check::{FlowChecker, FlowSignal};
use crate::report::InstanceReport;
use crate::window_rate::{WindowRateEvaluator, WindowSignal};

/// Per-instance state machine. `flow` is `None` when the cross-check is
/// disabled.
pub fn decide_instance(
    window: WindowSignal,
    flow: Option<FlowSignal>,
    safety: SafetyMode,
) -> ScaleVerdict {
    if window == WindowSignal::Idle {
        return ScaleVerdict::EligibleIdle;
    }
    match (flow, safety) {
        (None, _) => ScaleVerdict::NotEligible(SkipReason::CrossCheckDisabled),
        (Some(FlowSignal::NoRecords), SafetyMode::Unsafe) => ScaleVerdict::EligibleAmbiguous,
        (Some(FlowSignal::NoRecords), SafetyMode::Safe) => {
            ScaleVerdict::NotEligible(SkipReason::AmbiguousInSafeMode)
        }
        (Some(FlowSignal::HasRecords), _) => {
            ScaleVerdict::NotEligible(SkipReason::FlowRecordsFound)
        }
        (Some(FlowSignal::LookupFailed), _) => {
            ScaleVerdict::NotEligible(SkipReason::FlowLookupFailed)
        }
    }
}

/// What happens to a whole workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "blocking", rename_all = "snake_case")]
pub enum WorkloadDecision {
    ScaleDown,
    /// Kept as-is; carries the verdict that blocked the scale-down.
    Keep(ScaleVerdict),
}

/// Whether `verdict` already settles the workload decision, so the
/// remaining instances need not be evaluated.
pub fn settles(reduction: WorkloadReduction, verdict: &ScaleVerdict) -> bool {
    match reduction {
        WorkloadReduction::Any => verdict.is_eligible(),
        WorkloadReduction::All => !verdict.is_eligible(),
    }
}

/// Reduce instance verdicts to a workload decision. A workload without
/// evaluated instances is never scaled.
pub fn reduce_workload(verdicts: &[ScaleVerdict], reduction: WorkloadReduction) -> WorkloadDecision {
    if verdicts.is_empty() {
        return WorkloadDecision::Keep(ScaleVerdict::NotEligible(SkipReason::NoInstances));
    }
    let first_blocking = verdicts.iter().find(|v| !v.is_eligible()).copied();
    let scale = match reduction {
        WorkloadReduction::Any => verdicts.iter().any(ScaleVerdict::is_eligible),
        WorkloadReduction::All => first_blocking.is_none(),
    };
    match (scale, first_blocking) {
        (true, _) => WorkloadDecision::ScaleDown,
        (false, Some(blocking)) => WorkloadDecision::Keep(blocking),
        (false, None) => WorkloadDecision::Keep(ScaleVerdict::NotEligible(SkipReason::NoInstances)),
    }
}

/// Runs both evaluators for one instance and applies [`decide_instance`].
pub struct DecisionCombinator {
    window: WindowRateEvaluator,
    flows: Option<FlowChecker>,
    safety: SafetyMode,
}

impl DecisionCombinator {
    /// `flows` is the cross-check; `None` disables it.
    pub fn new(window: WindowRateEvaluator, flows: Option<FlowChecker>, safety: SafetyMode) -> Self {
        Self {
            window,
            flows,
            safety,
        }
    }

    pub fn cross_check_enabled(&self) -> bool {
        self.flows.is_some()
    }

    pub async fn evaluate(&self, instance: &Instance, cutoff: DateTime<Utc>) -> InstanceReport {
        let window = self.window.evaluate(instance, Local::now()).await;

        let flow = match (&window, &self.flows) {
            (WindowSignal::Idle, _) | (_, None) => None,
            (_, Some(checker)) => Some(checker.check(&instance.name, cutoff).await),
        };

        let verdict = decide_instance(window, flow, self.safety);
        let report = InstanceReport {
            pod: instance.name.clone(),
            window,
            flow,
            verdict,
        };

        match verdict {
            ScaleVerdict::EligibleIdle => info!(
                namespace = %instance.namespace,
                pod = %instance.name,
                "no network traffic recorded, eligible for scale-down"
            ),
            ScaleVerdict::EligibleAmbiguous => info!(
                namespace = %instance.namespace,
                pod = %instance.name,
                "traffic observed but no flow records, eligible for scale-down in unsafe mode"
            ),
            ScaleVerdict::NotEligible(SkipReason::AmbiguousInSafeMode) => info!(
                namespace = %instance.namespace,
                pod = %instance.name,
                near_miss = true,
                "traffic observed but no flow records, safe mode keeps it"
            ),
            other => debug!(
                namespace = %instance.namespace,
                pod = %instance.name,
                verdict = %other,
                "instance not eligible"
            ),
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window_rate::InconclusiveCause;

    const WINDOWS: [WindowSignal; 3] = [
        WindowSignal::Idle,
        WindowSignal::Active { peak: 0.01 },
        WindowSignal::Inconclusive {
            cause: InconclusiveCause::Timeout,
        },
    ];

    const FLOWS: [Option<FlowSignal>; 4] = [
        None,
        Some(FlowSignal::HasRecords),
        Some(FlowSignal::NoRecords),
        Some(FlowSignal::LookupFailed),
    ];

    #[test]
    fn idle_wins_regardless_of_flow() {
        for flow in FLOWS {
            for safety in [SafetyMode::Safe, SafetyMode::Unsafe] {
                assert_eq!(
                    decide_instance(WindowSignal::Idle, flow, safety),
                    ScaleVerdict::EligibleIdle
                );
            }
        }
    }

    #[test]
    fn active_without_cross_check_is_not_eligible() {
        assert_eq!(
            decide_instance(WindowSignal::Active { peak: 0.01 }, None, SafetyMode::Unsafe),
            ScaleVerdict::NotEligible(SkipReason::CrossCheckDisabled)
        );
    }

    #[test]
    fn no_records_depends_on_safety_mode() {
        let active = WindowSignal::Active { peak: 2.0 };
        assert_eq!(
            decide_instance(active, Some(FlowSignal::NoRecords), SafetyMode::Unsafe),
            ScaleVerdict::EligibleAmbiguous
        );
        assert_eq!(
            decide_instance(active, Some(FlowSignal::NoRecords), SafetyMode::Safe),
            ScaleVerdict::NotEligible(SkipReason::AmbiguousInSafeMode)
        );
    }

    #[test]
    fn records_or_failures_block() {
        for window in &WINDOWS[1..] {
            for safety in [SafetyMode::Safe, SafetyMode::Unsafe] {
                assert_eq!(
                    decide_instance(*window, Some(FlowSignal::HasRecords), safety),
                    ScaleVerdict::NotEligible(SkipReason::FlowRecordsFound)
                );
                assert_eq!(
                    decide_instance(*window, Some(FlowSignal::LookupFailed), safety),
                    ScaleVerdict::NotEligible(SkipReason::FlowLookupFailed)
                );
            }
        }
    }

    #[test]
    fn unsafe_is_never_less_permissive_than_safe() {
        for window in WINDOWS {
            for flow in FLOWS {
                let safe = decide_instance(window, flow, SafetyMode::Safe);
                let unsafe_ = decide_instance(window, flow, SafetyMode::Unsafe);
                assert!(
                    !safe.is_eligible() || unsafe_.is_eligible(),
                    "{window:?}/{flow:?}: safe={safe} unsafe={unsafe_}"
                );
            }
        }
    }

    #[test]
    fn any_reduction_needs_one_eligible() {
        let blocked = ScaleVerdict::NotEligible(SkipReason::FlowRecordsFound);
        assert_eq!(
            reduce_workload(&[blocked, ScaleVerdict::EligibleIdle], WorkloadReduction::Any),
            WorkloadDecision::ScaleDown
        );
        assert_eq!(
            reduce_workload(&[blocked, blocked], WorkloadReduction::Any),
            WorkloadDecision::Keep(blocked)
        );
    }

    #[test]
    fn all_reduction_needs_every_instance() {
        let blocked = ScaleVerdict::NotEligible(SkipReason::CrossCheckDisabled);
        assert_eq!(
            reduce_workload(
                &[ScaleVerdict::EligibleIdle, ScaleVerdict::EligibleAmbiguous],
                WorkloadReduction::All
            ),
            WorkloadDecision::ScaleDown
        );
        assert_eq!(
            reduce_workload(&[ScaleVerdict::EligibleIdle, blocked], WorkloadReduction::All),
            WorkloadDecision::Keep(blocked)
        );
    }

    #[test]
    fn empty_workload_is_kept() {
        for reduction in [WorkloadReduction::Any, WorkloadReduction::All] {
            assert_eq!(
                reduce_workload(&[], reduction),
                WorkloadDecision::Keep(ScaleVerdict::NotEligible(SkipReason::NoInstances))
            );
        }
    }

    #[test]
    fn settles_short_circuits_by_reduction() {
        let blocked = ScaleVerdict::NotEligible(SkipReason::FlowLookupFailed);
        assert!(settles(WorkloadReduction::Any, &ScaleVerdict::EligibleIdle));
        assert!(!settles(WorkloadReduction::Any, &blocked));
        assert!(settles(WorkloadReduction::All, &blocked));
        assert!(!settles(WorkloadReduction::All, &ScaleVerdict::EligibleAmbiguous));
    }
}
