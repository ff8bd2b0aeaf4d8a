//! Readiness polling
//!
//! After a mutating call, a resource is polled until its step's readiness
//! predicate reports Active or Failed, or the deadline passes. Polling sleeps
//! between checks, so other graph branches keep making progress on the same
//! task, and dropping the future stops polling immediately.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::provider::ControlPlane;
use crate::resource::{Lifecycle, ResourceHandle, ResourceKind};
use crate::step::ProvisioningStep;
use crate::{Error, Result};

/// Poll timing
#[derive(Clone, Debug, PartialEq)]
pub struct PollConfig {
    /// Delay before the first check
    pub initial_interval: Duration,
    /// Upper bound for the delay between checks
    pub max_interval: Duration,
    /// Growth factor applied after each check
    pub multiplier: f64,
    /// Total time allowed for the resource to become active
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(15),
            multiplier: 1.5,
            // CA activation beyond a few minutes is an upstream problem
            timeout: Duration::from_secs(300),
        }
    }
}

/// Outcome of one readiness check
#[derive(Debug)]
pub enum PollStatus<T> {
    /// Done, with the final value
    Ready(T),
    /// Keep polling; the state observed this round
    Waiting(Lifecycle),
}

/// Poll until a check reports ready, backing off between checks.
///
/// Transient check errors are logged and polling continues; any other error
/// ends polling. Fails with [`Error::Timeout`] once `config.timeout` has
/// elapsed without the check reporting ready.
pub async fn poll_until<F, Fut, T>(config: &PollConfig, kind: ResourceKind, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus<T>>>,
{
    let deadline = Instant::now() + config.timeout;
    let mut interval = config.initial_interval;
    let mut polls = 0u32;

    loop {
        let now = Instant::now();
        if now >= deadline {
            debug!(kind = %kind, polls = polls, "Readiness deadline exceeded");
            return Err(Error::Timeout {
                kind,
                waited: config.timeout,
            });
        }

        tokio::time::sleep(interval.min(deadline - now)).await;
        polls += 1;

        match check().await {
            Ok(PollStatus::Ready(value)) => {
                debug!(kind = %kind, polls = polls, "Resource ready");
                return Ok(value);
            }
            Ok(PollStatus::Waiting(state)) => {
                trace!(kind = %kind, state = %state, polls = polls, "Resource not ready yet");
            }
            Err(e) if e.is_retryable() => {
                debug!(
                    kind = %kind,
                    error = %e,
                    polls = polls,
                    "Readiness check failed transiently, polling again"
                );
            }
            Err(e) => return Err(e),
        }

        interval = Duration::from_secs_f64(
            (interval.as_secs_f64() * config.multiplier).min(config.max_interval.as_secs_f64()),
        );
    }
}

/// Waits for handles to reach Active using each step's readiness predicate
#[derive(Clone, Debug, Default)]
pub struct ReadinessPoller {
    config: PollConfig,
}

impl ReadinessPoller {
    /// Create a poller
    pub fn new(config: PollConfig) -> Self {
        Self { config }
    }

    /// Poll timing in use
    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Describe `handle` until the step's predicate reports Active.
    ///
    /// A Failed state ends polling with [`Error::Terminal`].
    pub async fn wait_until_active(
        &self,
        control_plane: &dyn ControlPlane,
        step: &dyn ProvisioningStep,
        handle: ResourceHandle,
    ) -> Result<ResourceHandle> {
        if handle.is_active() {
            return Ok(handle);
        }

        let kind = handle.kind();
        let handle_ref = &handle;
        poll_until(&self.config, kind, move || async move {
            let remote = control_plane.describe(kind, handle_ref.id()).await?;
            match step.readiness(&remote) {
                Lifecycle::Active => Ok(PollStatus::Ready(
                    handle_ref.transitioned(&remote, Lifecycle::Active),
                )),
                Lifecycle::Failed => Err(Error::terminal(format!(
                    "{} {} failed: {}",
                    kind,
                    handle_ref.id(),
                    remote
                        .status_reason
                        .as_deref()
                        .unwrap_or("no reason reported")
                ))),
                state => Ok(PollStatus::Waiting(state)),
            }
        })
        .await
    }
}
