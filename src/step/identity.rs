//! Identity steps: managed policy and role

use async_trait::async_trait;

use super::{create_or_reuse, handle_for, lifecycle_for, ProvisioningStep, StepContext};
use crate::policy::PolicyDocument;
use crate::provider::{ManagedPolicySpec, RemoteResource, RemoteStatus, ResourceSpec, RoleSpec};
use crate::resource::{Lifecycle, ResourceHandle, ResourceKind};
use crate::Result;

/// Create the customer-managed permissions policy
pub struct CreateManagedPolicy {
    name: String,
    document: PolicyDocument,
}

impl CreateManagedPolicy {
    /// Policy `name` with the given document
    pub fn new(name: impl Into<String>, document: PolicyDocument) -> Self {
        Self {
            name: name.into(),
            document,
        }
    }
}

#[async_trait]
impl ProvisioningStep for CreateManagedPolicy {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ManagedPolicy
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> Result<ResourceHandle> {
        self.document.validate()?;

        let spec = ResourceSpec::ManagedPolicy(ManagedPolicySpec {
            name: self.name.clone(),
            document: self.document.clone(),
        });
        let remote = create_or_reuse(ctx, &spec).await?;
        Ok(handle_for(self, &remote))
    }

    fn readiness(&self, remote: &RemoteResource) -> Lifecycle {
        lifecycle_for(&remote.status, &[RemoteStatus::Active])
    }
}

/// Create the federated role and attach the managed policy
pub struct CreateRole {
    name: String,
    description: String,
    trust_policy: PolicyDocument,
}

impl CreateRole {
    /// Role `name` assumable under `trust_policy`
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        trust_policy: PolicyDocument,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            trust_policy,
        }
    }
}

#[async_trait]
impl ProvisioningStep for CreateRole {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Role
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> Result<ResourceHandle> {
        self.trust_policy.validate()?;
        let policy = ctx.require(ResourceKind::ManagedPolicy)?;
        crate::policy::validate_arn(policy.id()).map_err(crate::Error::policy_attachment)?;

        let spec = ResourceSpec::Role(RoleSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            trust_policy: self.trust_policy.clone(),
            managed_policy_arns: vec![policy.id().to_string()],
        });
        let remote = create_or_reuse(ctx, &spec).await?;
        Ok(handle_for(self, &remote))
    }

    fn readiness(&self, remote: &RemoteResource) -> Lifecycle {
        lifecycle_for(&remote.status, &[RemoteStatus::Active])
    }
}
