//! quiesce-engine — idle-workload detection and safe scale-to-zero.
//!
//! One sweep walks every workload, filters out what policy protects,
//! evaluates each remaining instance against two traffic signals, and
//! scales a workload to zero only when its verdicts allow it.
//!
//! # Pipeline
//!
//! ```text
//! ClusterState::list_workloads
//!        │
//!   PolicyFilter ── excluded ──► report (rule)
//!        │
//!   per instance (bounded, cancellable):
//!     WindowRateEvaluator ── Idle ───────────────► EligibleIdle
//!        │ Active / Inconclusive
//!     FlowChecker (optional) ─► DecisionCombinator (Safe | Unsafe)
//!        │
//!   reduce_workload (Any | All)
//!        │
//!   ScaleActuator ── replicas = 0, verified ──► report (action)
//! ```
//!
//! Every signal that cannot be established reads as "traffic may exist";
//! uncertainty never makes a workload eligible.

pub mod actuator;
pub mod clock;
pub mod decision;
pub mod error;
pub mod flow_check;
pub mod policy;
pub mod provider;
pub mod report;
pub mod sweep;
pub mod window_rate;

pub use actuator::{ActuationOutcome, ScaleActuator};
pub use decision::{DecisionCombinator, WorkloadDecision, decide_instance, reduce_workload};
pub use error::{SweepError, SweepResult};
pub use flow_check::{FlowChecker, FlowSignal};
pub use policy::PolicyFilter;
pub use provider::{ClusterState, FlowStore, MetricsProvider, QueryOutput, RangeQuery};
pub use report::{InstanceReport, SweepReport, SweepSummary, WorkloadAction, WorkloadReport};
pub use sweep::{Sweep, SweepSettings};
pub use window_rate::{InconclusiveCause, WindowRateEvaluator, WindowRateSettings, WindowSignal};
