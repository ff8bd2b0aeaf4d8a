//! Graph-driven provisioning
//!
//! The [`Orchestrator`] walks a [`DependencyGraph`]: every kind whose
//! prerequisites are Active is executed, polled to readiness and tagged, and
//! its handle is recorded for the kinds after it. Ready steps run
//! concurrently on the calling task, so the certificate and identity branches
//! make progress side by side.
//!
//! # Failure handling
//!
//! - Transient provider errors are retried inside the step with backoff.
//! - The first non-retryable failure stops scheduling. Steps already in
//!   flight run to completion and their handles are kept; the run ends
//!   Aborted.
//! - Cancellation or the run deadline stops scheduling and drops in-flight
//!   steps, which stops their polling. Those kinds are reported interrupted.
//! - Nothing is deleted on failure. [`Orchestrator::teardown`] is explicit.

mod report;

pub use report::{Checkpoint, RunReport, RunState, StepFailure, TeardownReport};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TagConfig;
use crate::graph::DependencyGraph;
use crate::outputs::OutputRegistry;
use crate::provider::ControlPlane;
use crate::readiness::{PollConfig, ReadinessPoller};
use crate::resource::{HandleSnapshot, ResourceHandle, ResourceKind};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::step::{ProvisioningStep, StepContext};
use crate::{Error, Result};

/// Orchestrator settings
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Retries for transient provider errors
    pub retry: RetryConfig,
    /// Readiness polling
    pub poll: PollConfig,
    /// Deadline for a whole run
    pub run_timeout: Option<Duration>,
    /// Prefix of export names
    pub stack_name: String,
    /// Tags applied per kind once Active
    pub tags: TagConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            poll: PollConfig::default(),
            run_timeout: None,
            stack_name: "trustchain".to_string(),
            tags: TagConfig::new(),
        }
    }
}

/// One async lock per kind, held across execute and readiness
#[derive(Debug, Default)]
struct KindLocks {
    locks: DashMap<ResourceKind, Arc<tokio::sync::Mutex<()>>>,
}

impl KindLocks {
    fn get(&self, kind: ResourceKind) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.entry(kind).or_default().clone()
    }
}

type StepFuture<'a> = BoxFuture<'a, (ResourceKind, Result<ResourceHandle>)>;

/// Drives a dependency graph against a control plane
pub struct Orchestrator {
    control_plane: Arc<dyn ControlPlane>,
    config: OrchestratorConfig,
    poller: ReadinessPoller,
    registry: OutputRegistry,
    cancel: CancellationToken,
    state: Mutex<RunState>,
    locks: KindLocks,
}

impl Orchestrator {
    /// Create an orchestrator
    pub fn new(control_plane: Arc<dyn ControlPlane>, config: OrchestratorConfig) -> Self {
        Self {
            poller: ReadinessPoller::new(config.poll.clone()),
            registry: OutputRegistry::new(config.stack_name.clone()),
            control_plane,
            config,
            cancel: CancellationToken::new(),
            state: Mutex::new(RunState::Idle),
            locks: KindLocks::default(),
        }
    }

    /// Current run state
    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    /// Live view of the Active handles registered so far
    pub fn outputs(&self) -> &OutputRegistry {
        &self.registry
    }

    /// Token that cancels the current run and any later one
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop scheduling and drop in-flight steps
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Provision every kind in the graph
    pub async fn run(&self, graph: &DependencyGraph) -> Result<RunReport> {
        self.resume(graph, Checkpoint::default()).await
    }

    /// Provision the kinds a checkpoint does not already hold.
    ///
    /// Active checkpoint handles count as completed and are not executed
    /// again. A checkpoint from another stack is rejected.
    pub async fn resume(&self, graph: &DependencyGraph, checkpoint: Checkpoint) -> Result<RunReport> {
        graph.validate()?;
        if !checkpoint.handles.is_empty() && checkpoint.stack_name != self.config.stack_name {
            return Err(Error::config(format!(
                "checkpoint belongs to stack '{}', not '{}'",
                checkpoint.stack_name, self.config.stack_name
            )));
        }

        {
            let mut state = self.state.lock();
            if *state == RunState::Running {
                return Err(Error::terminal("a run is already in progress"));
            }
            *state = RunState::Running;
        }

        let report = self.drive(graph, checkpoint.handles).await;
        *self.state.lock() = report.state;
        Ok(report)
    }

    async fn drive(&self, graph: &DependencyGraph, seed: HandleSnapshot) -> RunReport {
        let mut handles = HandleSnapshot::new();
        let mut completed = BTreeSet::new();
        let mut resumed = Vec::new();
        for (kind, handle) in seed {
            if !handle.is_active() || graph.step(kind).is_none() {
                continue;
            }
            if let Err(e) = self.registry.register(kind, handle.clone()) {
                warn!(kind = %kind, error = %e, "Ignoring checkpoint handle");
                continue;
            }
            debug!(kind = %kind, id = %handle.id(), "Resuming from checkpoint");
            handles.insert(kind, handle);
            completed.insert(kind);
            resumed.push(kind);
        }

        let deadline = self.config.run_timeout.map(|timeout| Instant::now() + timeout);
        let deadline_elapsed = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline_elapsed);

        let mut in_flight: FuturesUnordered<StepFuture<'_>> = FuturesUnordered::new();
        let mut in_flight_kinds = BTreeSet::new();
        let mut attempted = BTreeSet::new();
        let mut finished = Vec::new();
        let mut failed = Vec::new();
        let mut interruption = None;

        info!(kinds = graph.len(), resumed = resumed.len(), "Starting provisioning run");

        loop {
            if self.cancel.is_cancelled() {
                interruption = Some("cancelled".to_string());
                break;
            }

            if failed.is_empty() {
                for kind in graph.next_ready(&completed) {
                    if in_flight_kinds.contains(&kind) {
                        continue;
                    }
                    let Some(step) = graph.step(kind) else {
                        continue;
                    };
                    debug!(kind = %kind, "Scheduling step");
                    in_flight_kinds.insert(kind);
                    attempted.insert(kind);
                    let snapshot = handles.clone();
                    in_flight.push(
                        self.drive_step(step, snapshot)
                            .map(move |result| (kind, result))
                            .boxed(),
                    );
                }
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    interruption = Some("cancelled".to_string());
                    break;
                }
                _ = &mut deadline_elapsed => {
                    interruption = Some(format!(
                        "run deadline of {:?} exceeded",
                        self.config.run_timeout.unwrap_or_default()
                    ));
                    break;
                }
                Some((kind, result)) = in_flight.next() => {
                    in_flight_kinds.remove(&kind);
                    match result {
                        Ok(handle) => {
                            info!(kind = %kind, id = %handle.id(), "Resource active");
                            if let Err(e) = self.registry.register(kind, handle.clone()) {
                                warn!(kind = %kind, error = %e, "Handle not admitted to outputs");
                            }
                            handles.insert(kind, handle);
                            completed.insert(kind);
                            finished.push(kind);
                        }
                        Err(e) => {
                            error!(kind = %kind, error = %e, "Step failed, halting scheduling");
                            failed.push(StepFailure { kind, error: e });
                        }
                    }
                }
            }
        }
        drop(in_flight);

        let interrupted: Vec<ResourceKind> = if interruption.is_some() {
            in_flight_kinds.into_iter().collect()
        } else {
            Vec::new()
        };
        if let Some(reason) = &interruption {
            warn!(reason = %reason, interrupted = interrupted.len(), "Run interrupted");
        }

        let never_attempted: Vec<ResourceKind> = graph
            .kinds()
            .filter(|k| !attempted.contains(k) && !completed.contains(k))
            .collect();

        let state = if failed.is_empty() && interruption.is_none() && graph.is_complete(&completed)
        {
            RunState::Completed
        } else {
            RunState::Aborted
        };
        info!(
            state = %state,
            completed = finished.len(),
            failed = failed.len(),
            "Provisioning run finished"
        );

        RunReport {
            state,
            completed: finished,
            resumed,
            failed,
            interrupted,
            never_attempted,
            interruption,
            outputs: self.registry.export(),
            handles,
            stack_name: self.config.stack_name.clone(),
        }
    }

    /// Execute, poll to Active and tag one step
    async fn drive_step(
        &self,
        step: Arc<dyn ProvisioningStep>,
        handles: HandleSnapshot,
    ) -> Result<ResourceHandle> {
        let kind = step.kind();
        let lock = self.locks.get(kind);
        let _guard = lock.lock().await;

        let step_ref: &dyn ProvisioningStep = step.as_ref();
        let ctx = StepContext::new(self.control_plane.as_ref(), &handles);
        let ctx_ref = &ctx;
        let operation = format!("provision {}", kind);

        let handle = retry_with_backoff(
            &self.config.retry,
            &operation,
            || step_ref.execute(ctx_ref),
            Error::is_retryable,
        )
        .await?;

        let handle = self
            .poller
            .wait_until_active(self.control_plane.as_ref(), step_ref, handle)
            .await?;

        Ok(self.apply_tags(handle).await)
    }

    /// Tag an Active handle. Failures are logged and never abort the run.
    async fn apply_tags(&self, handle: ResourceHandle) -> ResourceHandle {
        let kind = handle.kind();
        let Some(tags) = self.config.tags.get(&kind).filter(|t| !t.is_empty()) else {
            return handle;
        };

        let operation = format!("tag {}", kind);
        let result = retry_with_backoff(
            &self.config.retry,
            &operation,
            || self.control_plane.tag(kind, handle.id(), tags),
            Error::is_retryable,
        )
        .await;

        match result {
            Ok(()) => handle.with_tags(tags),
            Err(e) => {
                warn!(kind = %kind, id = %handle.id(), error = %e, "Failed to tag resource");
                handle
            }
        }
    }

    /// Delete recorded resources, dependents first.
    ///
    /// A kind whose dependent failed to delete (or was kept) is kept as well.
    /// CA activation has no resource of its own and is always skipped.
    pub async fn teardown(
        &self,
        graph: &DependencyGraph,
        handles: &HandleSnapshot,
    ) -> Result<TeardownReport> {
        let order = graph.topological_order()?;
        let mut report = TeardownReport::default();
        let mut kept: BTreeSet<ResourceKind> = BTreeSet::new();

        for kind in order.into_iter().rev() {
            let Some(handle) = handles.get(&kind) else {
                continue;
            };

            let blocked_by: Vec<ResourceKind> = graph
                .dependents(kind)
                .into_iter()
                .filter(|d| kept.contains(d))
                .collect();
            if !blocked_by.is_empty() {
                warn!(kind = %kind, blocked_by = ?blocked_by, "Keeping resource, a dependent still exists");
                kept.insert(kind);
                report.skipped.push(kind);
                continue;
            }
            if kind == ResourceKind::CAActivation {
                report.skipped.push(kind);
                continue;
            }

            let lock = self.locks.get(kind);
            let _guard = lock.lock().await;
            let operation = format!("delete {}", kind);
            let result = retry_with_backoff(
                &self.config.retry,
                &operation,
                || self.control_plane.delete(kind, handle.id()),
                Error::is_retryable,
            )
            .await;

            match result {
                Ok(()) => {
                    info!(kind = %kind, id = %handle.id(), "Deleted resource");
                    report.deleted.push(kind);
                }
                Err(e) => {
                    error!(kind = %kind, id = %handle.id(), error = %e, "Failed to delete resource");
                    kept.insert(kind);
                    report.failed.push(StepFailure { kind, error: e });
                }
            }
        }
        Ok(report)
    }
}
