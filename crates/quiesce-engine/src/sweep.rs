//! Sweep — one pass over every workload in the cluster.
//!
//! Workloads are filtered by policy, then fanned out onto a `JoinSet`
//! bounded by a semaphore. Each workload's evaluation races the shutdown
//! signal and the sweep deadline; a workload whose evaluation is cut
//! short is reported as cancelled and never scaled. Nothing is cached
//! between workloads or between sweeps.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use quiesce_core::{
    ProviderError, QuiesceConfig, ScaleVerdict, SkipReason, Workload, WorkloadReduction,
};

use crate::actuator::ScaleActuator;
use crate::clock::flow_cutoff;
use crate::decision::{reduce_workload, settles, DecisionCombinator, WorkloadDecision};
use crate::error::{SweepError, SweepResult};
use crate::flow_check::FlowChecker;
use crate::policy::PolicyFilter;
use crate::provider::{ClusterState, FlowStore, MetricsProvider};
use crate::report::{InstanceReport, SweepReport, WorkloadAction, WorkloadReport};
use crate::window_rate::{WindowRateEvaluator, WindowRateSettings};

#[derive(Debug, Clone)]
pub struct SweepSettings {
    /// Workloads evaluated at the same time.
    pub concurrency: usize,
    pub reduction: WorkloadReduction,
    pub check_days: u32,
    pub cluster_timeout: Duration,
    /// Overall bound on one sweep.
    pub deadline: Option<Duration>,
}

impl SweepSettings {
    pub fn from_config(config: &QuiesceConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            reduction: config.workload_reduction,
            check_days: config.deepflow_check_days,
            cluster_timeout: config.cluster_call_timeout(),
            deadline: config.deadline(),
        }
    }
}

/// Per-workload pipeline shared by the sweep's tasks.
struct Worker {
    cluster: Arc<dyn ClusterState>,
    combinator: DecisionCombinator,
    actuator: ScaleActuator,
    reduction: WorkloadReduction,
    cluster_timeout: Duration,
}

pub struct Sweep {
    filter: PolicyFilter,
    worker: Arc<Worker>,
    concurrency: usize,
    check_days: u32,
    deadline: Option<Duration>,
}

impl Sweep {
    pub fn new(
        cluster: Arc<dyn ClusterState>,
        filter: PolicyFilter,
        combinator: DecisionCombinator,
        actuator: ScaleActuator,
        settings: SweepSettings,
    ) -> Self {
        Self {
            filter,
            worker: Arc::new(Worker {
                cluster,
                combinator,
                actuator,
                reduction: settings.reduction,
                cluster_timeout: settings.cluster_timeout,
            }),
            concurrency: settings.concurrency.max(1),
            check_days: settings.check_days,
            deadline: settings.deadline,
        }
    }

    /// Wire every component from the configuration. The flow store is
    /// consulted only when `use_deepflow` is set.
    pub fn from_config(
        config: &QuiesceConfig,
        cluster: Arc<dyn ClusterState>,
        metrics: Arc<dyn MetricsProvider>,
        flows: Option<Arc<dyn FlowStore>>,
    ) -> Self {
        let call_timeout = config.metrics_timeout();
        let window = WindowRateEvaluator::new(
            metrics,
            WindowRateSettings {
                call_timeout,
                query_timeout: Duration::from_secs(5).min(call_timeout),
                ..WindowRateSettings::default()
            },
        );
        let flows = flows
            .filter(|_| config.use_deepflow)
            .map(|store| FlowChecker::new(store, config.flow_timeout()));
        let combinator = DecisionCombinator::new(window, flows, config.safety_mode());
        let actuator = ScaleActuator::new(
            Arc::clone(&cluster),
            config.apply_mode(),
            config.cluster_call_timeout(),
        );

        Self::new(
            cluster,
            PolicyFilter::from_config(config),
            combinator,
            actuator,
            SweepSettings::from_config(config),
        )
    }

    /// Run one sweep. Only a failure to list workloads is an error; a
    /// sweep cancelled while listing returns an empty, cancelled report.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> SweepResult<SweepReport> {
        let started_at = Utc::now();
        let started = Instant::now();
        let deadline = self.deadline.map(|d| started + d);

        let mut listing_shutdown = shutdown.clone();
        let listed = tokio::select! {
            biased;
            _ = cancelled(&mut listing_shutdown, deadline) => None,
            listed = tokio::time::timeout(
                self.worker.cluster_timeout,
                self.worker.cluster.list_workloads(),
            ) => Some(listed),
        };
        let workloads = match listed {
            None => {
                warn!("sweep cancelled while listing workloads");
                return Ok(finish(started_at, started, true, Vec::new()));
            }
            Some(Ok(Ok(workloads))) => workloads,
            Some(Ok(Err(e))) => return Err(SweepError::ListWorkloads(e)),
            Some(Err(_)) => {
                return Err(SweepError::ListWorkloads(ProviderError::Timeout {
                    operation: "list workloads",
                    after: self.worker.cluster_timeout,
                }));
            }
        };

        let cutoff = flow_cutoff(&Local::now(), self.check_days);
        info!(
            workloads = workloads.len(),
            concurrency = self.concurrency,
            cross_check = self.worker.combinator.cross_check_enabled(),
            apply_mode = ?self.worker.actuator.mode(),
            %cutoff,
            "sweep started"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut slots: Vec<Option<WorkloadReport>> = vec![None; workloads.len()];
        let identities: Vec<(String, String)> = workloads
            .iter()
            .map(|w| (w.namespace.clone(), w.name.clone()))
            .collect();
        let mut tasks = JoinSet::new();

        for (index, workload) in workloads.into_iter().enumerate() {
            if let Some(rule) = self.filter.check(&workload) {
                info!(
                    namespace = %workload.namespace,
                    workload = %workload.name,
                    %rule,
                    "workload excluded"
                );
                slots[index] = Some(report_for(
                    &workload,
                    Vec::new(),
                    WorkloadAction::Excluded { rule },
                ));
                continue;
            }

            let worker = Arc::clone(&self.worker);
            let semaphore = Arc::clone(&semaphore);
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                let report = worker
                    .process(workload, cutoff, semaphore, shutdown, deadline)
                    .await;
                (index, report)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, report)) => slots[index] = Some(report),
                Err(e) => error!(error = %e, "workload task failed"),
            }
        }

        // A slot left empty belongs to a task that panicked.
        let workloads: Vec<WorkloadReport> = slots
            .into_iter()
            .zip(identities)
            .map(|(slot, (namespace, name))| {
                slot.unwrap_or_else(|| WorkloadReport {
                    namespace,
                    name,
                    instances: Vec::new(),
                    action: WorkloadAction::Failed {
                        error: "evaluation task panicked".to_string(),
                    },
                })
            })
            .collect();
        let any_cancelled = workloads
            .iter()
            .any(|w| w.action == WorkloadAction::Cancelled);
        Ok(finish(started_at, started, any_cancelled, workloads))
    }

    /// Run independent sweeps every `interval` until shutdown.
    pub async fn run_every<F>(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
        mut on_report: F,
    ) where
        F: FnMut(&SweepReport),
    {
        info!(interval_secs = interval.as_secs(), "periodic sweeps started");

        loop {
            match self.run(shutdown.clone()).await {
                Ok(report) => on_report(&report),
                Err(e) => error!(error = %e, "sweep failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancelled(&mut shutdown, None) => {
                    info!("periodic sweeps shutting down");
                    break;
                }
            }
        }
    }
}

impl Worker {
    async fn process(
        &self,
        workload: Workload,
        cutoff: DateTime<Utc>,
        semaphore: Arc<Semaphore>,
        mut shutdown: watch::Receiver<bool>,
        deadline: Option<Instant>,
    ) -> WorkloadReport {
        let permit = tokio::select! {
            biased;
            _ = cancelled(&mut shutdown, deadline) => None,
            permit = semaphore.acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            warn!(
                namespace = %workload.namespace,
                workload = %workload.name,
                "sweep cancelled before evaluation"
            );
            return report_for(&workload, Vec::new(), WorkloadAction::Cancelled);
        };

        let evaluated = tokio::select! {
            biased;
            _ = cancelled(&mut shutdown, deadline) => None,
            evaluated = self.evaluate(&workload, cutoff) => Some(evaluated),
        };
        let Some((instances, decision)) = evaluated else {
            warn!(
                namespace = %workload.namespace,
                workload = %workload.name,
                "evaluation cancelled, discarding partial verdicts"
            );
            return report_for(&workload, Vec::new(), WorkloadAction::Cancelled);
        };

        let action = match decision {
            WorkloadDecision::Keep(blocking) => {
                info!(
                    namespace = %workload.namespace,
                    workload = %workload.name,
                    reason = %blocking,
                    "workload kept"
                );
                WorkloadAction::Kept { blocking }
            }
            WorkloadDecision::ScaleDown if is_cancelled(&shutdown, deadline) => {
                warn!(
                    namespace = %workload.namespace,
                    workload = %workload.name,
                    "sweep cancelled, scale-down not started"
                );
                WorkloadAction::Cancelled
            }
            WorkloadDecision::ScaleDown => {
                WorkloadAction::from_outcome(self.actuator.scale_to_zero(&workload).await)
            }
        };

        report_for(&workload, instances, action)
    }

    async fn evaluate(
        &self,
        workload: &Workload,
        cutoff: DateTime<Utc>,
    ) -> (Vec<InstanceReport>, WorkloadDecision) {
        let listed =
            tokio::time::timeout(self.cluster_timeout, self.cluster.list_instances(workload)).await;
        let instances = match listed {
            Ok(Ok(instances)) => instances,
            Ok(Err(e)) => {
                warn!(
                    namespace = %workload.namespace,
                    workload = %workload.name,
                    error = %e,
                    "failed to list instances"
                );
                return (Vec::new(), instance_list_failed());
            }
            Err(_) => {
                warn!(
                    namespace = %workload.namespace,
                    workload = %workload.name,
                    timeout = ?self.cluster_timeout,
                    "listing instances timed out"
                );
                return (Vec::new(), instance_list_failed());
            }
        };

        debug!(
            namespace = %workload.namespace,
            workload = %workload.name,
            instances = instances.len(),
            "evaluating instances"
        );

        let mut reports = Vec::with_capacity(instances.len());
        for instance in &instances {
            let report = self.combinator.evaluate(instance, cutoff).await;
            let settled = settles(self.reduction, &report.verdict);
            reports.push(report);
            if settled {
                break;
            }
        }

        let verdicts: Vec<ScaleVerdict> = reports.iter().map(|r| r.verdict).collect();
        let decision = reduce_workload(&verdicts, self.reduction);
        (reports, decision)
    }
}

fn finish(
    started_at: DateTime<Utc>,
    started: Instant,
    cancelled: bool,
    workloads: Vec<WorkloadReport>,
) -> SweepReport {
    let report = SweepReport {
        started_at,
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        cancelled,
        workloads,
    };

    let summary = report.summary();
    info!(
        workloads = summary.workloads,
        excluded = summary.excluded,
        kept = summary.kept,
        scaled_down = summary.scaled_down,
        would_scale = summary.would_scale,
        failed = summary.failed,
        cancelled = summary.cancelled,
        near_misses = summary.near_misses,
        elapsed_ms = report.elapsed_ms,
        "sweep finished"
    );
    report
}

fn instance_list_failed() -> WorkloadDecision {
    WorkloadDecision::Keep(ScaleVerdict::NotEligible(SkipReason::InstanceListFailed))
}

fn report_for(
    workload: &Workload,
    instances: Vec<InstanceReport>,
    action: WorkloadAction,
) -> WorkloadReport {
    WorkloadReport {
        namespace: workload.namespace.clone(),
        name: workload.name.clone(),
        instances,
        action,
    }
}

/// Resolves once shutdown is signalled or the deadline passes. A dropped
/// sender never cancels.
async fn cancelled(shutdown: &mut watch::Receiver<bool>, deadline: Option<Instant>) {
    let deadline_reached = async {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };
    let signalled = async {
        loop {
            if *shutdown.borrow_and_update() {
                return;
            }
            if shutdown.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = deadline_reached => {}
        _ = signalled => {}
    }
}

fn is_cancelled(shutdown: &watch::Receiver<bool>, deadline: Option<Instant>) -> bool {
    *shutdown.borrow() || deadline.is_some_and(|at| Instant::now() >= at)
}
