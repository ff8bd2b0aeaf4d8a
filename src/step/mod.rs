//! Provisioning steps
//!
//! A step creates (or finds) exactly one resource and knows when that
//! resource is ready. Steps are stateless with respect to a run: everything
//! they depend on arrives through [`StepContext`], which carries the control
//! plane and a snapshot of the handles recorded so far.
//!
//! # Contract
//!
//! - `execute` is idempotent. It looks up an existing resource by the spec's
//!   identity before creating; a match with identical attributes is reused, a
//!   match with different attributes is a [`Error::Terminal`] conflict.
//! - `execute` reads prerequisites through [`StepContext::require`], which
//!   fails with [`Error::NotReady`] unless the handle is Active.
//! - `readiness` maps a provider description onto [`Lifecycle`].

mod certificates;
mod federation;
mod identity;

pub use certificates::{ActivateCa, CreateCertificateAuthority, IssueCaCertificate, IssueLeafCertificate};
pub use federation::{CreateProfile, CreateTrustAnchor, MAX_SESSION_DURATION_SECS, MIN_SESSION_DURATION_SECS};
pub use identity::{CreateManagedPolicy, CreateRole};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::provider::{ControlPlane, RemoteResource, RemoteStatus, ResourceSpec};
use crate::resource::{HandleSnapshot, Lifecycle, ResourceHandle, ResourceKind};
use crate::{Error, Result};

/// What a step sees while executing
pub struct StepContext<'a> {
    control_plane: &'a dyn ControlPlane,
    handles: &'a HandleSnapshot,
}

impl<'a> StepContext<'a> {
    /// Create a context over a handle snapshot
    pub fn new(control_plane: &'a dyn ControlPlane, handles: &'a HandleSnapshot) -> Self {
        Self {
            control_plane,
            handles,
        }
    }

    /// The control plane
    pub fn control_plane(&self) -> &'a dyn ControlPlane {
        self.control_plane
    }

    /// The Active handle of a prerequisite kind
    pub fn require(&self, kind: ResourceKind) -> Result<&'a ResourceHandle> {
        match self.handles.get(&kind) {
            Some(handle) if handle.is_active() => Ok(handle),
            Some(handle) => Err(Error::not_ready(kind, Some(handle.state()))),
            None => Err(Error::not_ready(kind, None)),
        }
    }
}

/// One idempotent create-or-reuse operation plus its readiness predicate
#[async_trait]
pub trait ProvisioningStep: Send + Sync {
    /// Kind of resource this step provisions
    fn kind(&self) -> ResourceKind;

    /// Create the resource, or return the existing one
    async fn execute(&self, ctx: &StepContext<'_>) -> Result<ResourceHandle>;

    /// Map a provider description to a lifecycle state
    fn readiness(&self, remote: &RemoteResource) -> Lifecycle;
}

/// Lifecycle for a status, given the statuses that count as ready
pub(crate) fn lifecycle_for(status: &RemoteStatus, ready: &[RemoteStatus]) -> Lifecycle {
    if ready.contains(status) {
        return Lifecycle::Active;
    }
    match status {
        RemoteStatus::Creating => Lifecycle::Creating,
        RemoteStatus::Failed => Lifecycle::Failed,
        _ => Lifecycle::Pending,
    }
}

/// Find a resource with the spec's identity, or create it
pub(crate) async fn create_or_reuse(
    ctx: &StepContext<'_>,
    spec: &ResourceSpec,
) -> Result<RemoteResource> {
    let kind = spec.kind();

    if let Some(existing) = ctx.control_plane().find(spec).await? {
        if let Some(recorded) = &existing.spec {
            if recorded != spec {
                return Err(Error::terminal(format!(
                    "{} '{}' already exists as {} with different attributes",
                    kind,
                    spec.identity(),
                    existing.id
                )));
            }
        }
        debug!(kind = %kind, id = %existing.id, "Reusing existing resource");
        return Ok(existing);
    }

    let created = ctx.control_plane().create(spec).await?;
    info!(kind = %kind, id = %created.id, "Created resource");
    Ok(created)
}

/// Handle for a described resource using the step's own predicate
pub(crate) fn handle_for(step: &dyn ProvisioningStep, remote: &RemoteResource) -> ResourceHandle {
    ResourceHandle::from_remote(step.kind(), remote, step.readiness(remote))
}
