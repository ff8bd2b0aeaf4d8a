//! Federation steps: trust anchor and profile

use async_trait::async_trait;

use super::{create_or_reuse, handle_for, lifecycle_for, ProvisioningStep, StepContext};
use crate::provider::{
    ProfileSpec, RemoteResource, RemoteStatus, ResourceSpec, TrustAnchorSourceType,
    TrustAnchorSpec,
};
use crate::resource::{Lifecycle, ResourceHandle, ResourceKind};
use crate::{Error, Result};

/// Shortest session a profile may grant
pub const MIN_SESSION_DURATION_SECS: u32 = 900;
/// Longest session a profile may grant
pub const MAX_SESSION_DURATION_SECS: u32 = 43_200;

fn ready_statuses(enabled: bool) -> &'static [RemoteStatus] {
    if enabled {
        &[RemoteStatus::Active]
    } else {
        &[RemoteStatus::Active, RemoteStatus::Disabled]
    }
}

/// Bind the federation boundary's root of trust to the activated CA.
///
/// The CA ARN is read from the CAActivation handle, never from the RootCA
/// handle: an anchor on a CA that is not yet active never accepts
/// certificates and reports no error.
pub struct CreateTrustAnchor {
    name: String,
    enabled: bool,
}

impl CreateTrustAnchor {
    /// Trust anchor `name`
    pub fn new(name: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            enabled,
        }
    }
}

#[async_trait]
impl ProvisioningStep for CreateTrustAnchor {
    fn kind(&self) -> ResourceKind {
        ResourceKind::TrustAnchor
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> Result<ResourceHandle> {
        let activation = ctx.require(ResourceKind::CAActivation)?;

        let spec = ResourceSpec::TrustAnchor(TrustAnchorSpec {
            name: self.name.clone(),
            source_type: TrustAnchorSourceType::PrivateCa,
            certificate_authority_arn: activation.id().to_string(),
            enabled: self.enabled,
        });
        let remote = create_or_reuse(ctx, &spec).await?;
        Ok(handle_for(self, &remote))
    }

    fn readiness(&self, remote: &RemoteResource) -> Lifecycle {
        lifecycle_for(&remote.status, ready_statuses(self.enabled))
    }
}

/// Map certificate-derived identities to the role
pub struct CreateProfile {
    name: String,
    duration_seconds: u32,
    enabled: bool,
}

impl CreateProfile {
    /// Profile `name` granting sessions of `duration_seconds`
    pub fn new(name: impl Into<String>, duration_seconds: u32, enabled: bool) -> Self {
        Self {
            name: name.into(),
            duration_seconds,
            enabled,
        }
    }
}

#[async_trait]
impl ProvisioningStep for CreateProfile {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Profile
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> Result<ResourceHandle> {
        if !(MIN_SESSION_DURATION_SECS..=MAX_SESSION_DURATION_SECS).contains(&self.duration_seconds)
        {
            return Err(Error::terminal(format!(
                "session duration {}s is outside {}..={}s",
                self.duration_seconds, MIN_SESSION_DURATION_SECS, MAX_SESSION_DURATION_SECS
            )));
        }
        let role = ctx.require(ResourceKind::Role)?;

        let spec = ResourceSpec::Profile(ProfileSpec {
            name: self.name.clone(),
            role_arns: vec![role.id().to_string()],
            duration_seconds: self.duration_seconds,
            enabled: self.enabled,
        });
        let remote = create_or_reuse(ctx, &spec).await?;
        Ok(handle_for(self, &remote))
    }

    fn readiness(&self, remote: &RemoteResource) -> Lifecycle {
        lifecycle_for(&remote.status, ready_statuses(self.enabled))
    }
}
