//! Certificate authority steps: create, issue, activate, issue leaf

use async_trait::async_trait;
use tracing::info;

use super::{create_or_reuse, handle_for, lifecycle_for, ProvisioningStep, StepContext};
use crate::pki::{self, KeyAlgorithm, KeyUsage, SigningAlgorithm, Subject, Validity};
use crate::policy::{ArnContext, CertificateTemplate};
use crate::provider::{
    CaCertificateSpec, CaType, CertificateAuthoritySpec, LeafCertificateSpec, RemoteResource,
    RemoteStatus, ResourceSpec, ATTR_CERTIFICATE, ATTR_CSR,
};
use crate::resource::{Lifecycle, ResourceHandle, ResourceKind};
use crate::{Error, Result};

/// Create the root CA.
///
/// The CA is satisfied for this step once it has produced its CSR; it is not
/// usable for issuance until [`ActivateCa`] imports its certificate.
pub struct CreateCertificateAuthority {
    spec: CertificateAuthoritySpec,
}

impl CreateCertificateAuthority {
    /// Root CA with keyCertSign and cRLSign usage
    pub fn new(subject: Subject, key_algorithm: KeyAlgorithm, signing_algorithm: SigningAlgorithm) -> Self {
        Self {
            spec: CertificateAuthoritySpec {
                ca_type: CaType::Root,
                subject,
                key_algorithm,
                signing_algorithm,
                key_usage: KeyUsage::certificate_authority(),
            },
        }
    }
}

#[async_trait]
impl ProvisioningStep for CreateCertificateAuthority {
    fn kind(&self) -> ResourceKind {
        ResourceKind::RootCA
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> Result<ResourceHandle> {
        // The subject must encode as an X.509 name before the provider sees it
        self.spec
            .subject
            .to_distinguished_name()
            .map_err(|e| Error::terminal(e.to_string()))?;
        pki::check_algorithms(self.spec.key_algorithm, self.spec.signing_algorithm)
            .map_err(|e| Error::terminal(e.to_string()))?;

        let spec = ResourceSpec::CertificateAuthority(self.spec.clone());
        let remote = create_or_reuse(ctx, &spec).await?;
        Ok(handle_for(self, &remote))
    }

    fn readiness(&self, remote: &RemoteResource) -> Lifecycle {
        lifecycle_for(
            &remote.status,
            &[RemoteStatus::PendingCertificate, RemoteStatus::Active],
        )
    }
}

/// Issue the root CA's self-signed certificate from its own CSR
pub struct IssueCaCertificate {
    signing_algorithm: SigningAlgorithm,
    validity: Validity,
    template_arn: String,
}

impl IssueCaCertificate {
    /// Root certificate issued with the RootCACertificate template
    pub fn new(arns: &ArnContext, signing_algorithm: SigningAlgorithm, validity: Validity) -> Self {
        Self {
            signing_algorithm,
            validity,
            template_arn: arns.certificate_template_arn(CertificateTemplate::RootCaCertificate),
        }
    }
}

#[async_trait]
impl ProvisioningStep for IssueCaCertificate {
    fn kind(&self) -> ResourceKind {
        ResourceKind::CACertificate
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> Result<ResourceHandle> {
        if self.validity.value == 0 {
            return Err(Error::terminal("certificate validity must be positive"));
        }

        let ca = ctx.require(ResourceKind::RootCA)?;
        let csr = ca.attribute(ATTR_CSR).ok_or_else(|| {
            Error::terminal(format!("certificate authority {} has no CSR", ca.id()))
        })?;

        let spec = ResourceSpec::CaCertificate(CaCertificateSpec {
            certificate_authority_arn: ca.id().to_string(),
            csr_pem: csr.to_string(),
            signing_algorithm: self.signing_algorithm,
            template_arn: self.template_arn.clone(),
            validity: self.validity,
        });
        let remote = create_or_reuse(ctx, &spec).await?;
        Ok(handle_for(self, &remote))
    }

    fn readiness(&self, remote: &RemoteResource) -> Lifecycle {
        lifecycle_for(&remote.status, &[RemoteStatus::Issued, RemoteStatus::Active])
    }
}

/// Import the issued certificate into the CA.
///
/// The activation handle's id is the CA ARN: once Active, it is the proof
/// that the CA can issue and anchor trust.
pub struct ActivateCa;

#[async_trait]
impl ProvisioningStep for ActivateCa {
    fn kind(&self) -> ResourceKind {
        ResourceKind::CAActivation
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> Result<ResourceHandle> {
        let ca = ctx.require(ResourceKind::RootCA)?;
        let certificate = ctx.require(ResourceKind::CACertificate)?;
        let pem = certificate.attribute(ATTR_CERTIFICATE).ok_or_else(|| {
            Error::terminal(format!("certificate {} has no PEM body", certificate.id()))
        })?;

        let info = pki::inspect_certificate(pem).map_err(|e| Error::terminal(e.to_string()))?;
        if !info.is_ca {
            return Err(Error::terminal(format!(
                "certificate {} is not a CA certificate and cannot activate {}",
                certificate.id(),
                ca.id()
            )));
        }

        let remote = ctx
            .control_plane()
            .describe(ResourceKind::CAActivation, ca.id())
            .await?;

        match remote.status {
            RemoteStatus::PendingCertificate => {
                ctx.control_plane().activate(ca.id(), pem).await?;
                info!(ca = %ca.id(), "Imported CA certificate");
                Ok(ResourceHandle::new(self.kind(), ca.id(), Lifecycle::Pending))
            }
            RemoteStatus::Failed | RemoteStatus::Disabled => Err(Error::terminal(format!(
                "certificate authority {} cannot be activated from status {:?}",
                ca.id(),
                remote.status
            ))),
            // Already imported (Active) or import in progress
            _ => Ok(handle_for(self, &remote)),
        }
    }

    fn readiness(&self, remote: &RemoteResource) -> Lifecycle {
        lifecycle_for(&remote.status, &[RemoteStatus::Active])
    }
}

/// Issue a client certificate from the activated CA
pub struct IssueLeafCertificate {
    domain_name: String,
    subject_alternative_names: Vec<String>,
    key_algorithm: KeyAlgorithm,
}

impl IssueLeafCertificate {
    /// Leaf certificate for `domain_name`
    pub fn new(
        domain_name: impl Into<String>,
        subject_alternative_names: Vec<String>,
        key_algorithm: KeyAlgorithm,
    ) -> Self {
        Self {
            domain_name: domain_name.into(),
            subject_alternative_names,
            key_algorithm,
        }
    }
}

#[async_trait]
impl ProvisioningStep for IssueLeafCertificate {
    fn kind(&self) -> ResourceKind {
        ResourceKind::LeafCertificate
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> Result<ResourceHandle> {
        for name in std::iter::once(&self.domain_name).chain(&self.subject_alternative_names) {
            pki::validate_dns_name(name).map_err(|e| Error::terminal(e.to_string()))?;
        }

        let ca = ctx.require(ResourceKind::RootCA)?;
        ctx.require(ResourceKind::CAActivation)?;

        let spec = ResourceSpec::LeafCertificate(LeafCertificateSpec {
            certificate_authority_arn: ca.id().to_string(),
            domain_name: self.domain_name.clone(),
            subject_alternative_names: self.subject_alternative_names.clone(),
            key_algorithm: self.key_algorithm,
        });
        let remote = create_or_reuse(ctx, &spec).await?;
        Ok(handle_for(self, &remote))
    }

    fn readiness(&self, remote: &RemoteResource) -> Lifecycle {
        lifecycle_for(&remote.status, &[RemoteStatus::Issued, RemoteStatus::Active])
    }
}
