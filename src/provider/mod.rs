//! Provisioning control-plane abstraction
//!
//! The cloud control plane (certificate authority, certificate manager,
//! identity and federation services) is reached only through the
//! [`ControlPlane`] trait. Requests are typed [`ResourceSpec`] values; the
//! provider answers with [`RemoteResource`] descriptions.
//!
//! # Idempotency
//!
//! Every spec has an [`identity`](ResourceSpec::identity): the attributes that
//! name the resource (a role name, a CA subject). Steps call
//! [`ControlPlane::find`] with the spec before creating, and pass
//! [`idempotency_token`](ResourceSpec::idempotency_token) to services that
//! accept client tokens, so a retried create never produces a duplicate.

use std::collections::BTreeMap;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::pki::{KeyAlgorithm, KeyUsage, SigningAlgorithm, Subject, Validity};
use crate::policy::PolicyDocument;
use crate::resource::ResourceKind;
use crate::Result;

/// Attribute carrying a CA's certificate signing request (PEM)
pub const ATTR_CSR: &str = "csr";
/// Attribute carrying an issued certificate (PEM)
pub const ATTR_CERTIFICATE: &str = "certificate";

/// Status as reported by the provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteStatus {
    /// Creation in progress
    Creating,
    /// CA exists and waits for its certificate to be imported
    PendingCertificate,
    /// Certificate has been issued
    Issued,
    /// Usable
    Active,
    /// Exists but is switched off
    Disabled,
    /// Permanent failure
    Failed,
}

/// Provider view of a resource
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteResource {
    /// Provider-assigned identifier
    pub id: String,
    /// Current status
    pub status: RemoteStatus,
    /// Provider explanation for the status, mostly set on failure
    pub status_reason: Option<String>,
    /// The request the resource was created from, when the provider records it
    pub spec: Option<ResourceSpec>,
    /// Extra outputs (CSR, certificate PEM)
    pub attributes: BTreeMap<String, String>,
}

impl RemoteResource {
    /// Describe a resource with no recorded spec or attributes
    pub fn new(id: impl Into<String>, status: RemoteStatus) -> Self {
        Self {
            id: id.into(),
            status,
            status_reason: None,
            spec: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Attach the originating spec
    pub fn with_spec(mut self, spec: ResourceSpec) -> Self {
        self.spec = Some(spec);
        self
    }

    /// Attach one attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Attach a status reason
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.status_reason = Some(reason.into());
        self
    }
}

/// Position of a CA in its hierarchy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaType {
    /// Self-signed root
    #[default]
    Root,
    /// Signed by a parent CA
    Subordinate,
}

/// Root certificate authority request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateAuthoritySpec {
    /// Root or subordinate
    pub ca_type: CaType,
    /// Subject DN
    pub subject: Subject,
    /// Key algorithm
    pub key_algorithm: KeyAlgorithm,
    /// Signing algorithm
    pub signing_algorithm: SigningAlgorithm,
    /// CSR key usage extension
    pub key_usage: KeyUsage,
}

/// Issuance of the CA's own certificate
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaCertificateSpec {
    /// Issuing CA
    pub certificate_authority_arn: String,
    /// CSR produced by the CA
    pub csr_pem: String,
    /// Signing algorithm
    pub signing_algorithm: SigningAlgorithm,
    /// Issuance template ARN
    pub template_arn: String,
    /// Validity
    pub validity: Validity,
}

/// Client certificate issued by the private CA
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafCertificateSpec {
    /// Issuing CA
    pub certificate_authority_arn: String,
    /// Primary domain
    pub domain_name: String,
    /// Additional names
    pub subject_alternative_names: Vec<String>,
    /// Key algorithm
    pub key_algorithm: KeyAlgorithm,
}

/// Customer-managed permissions policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedPolicySpec {
    /// Policy name
    pub name: String,
    /// Document
    pub document: PolicyDocument,
}

/// Role assumed by federated sessions
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    /// Role name
    pub name: String,
    /// Description
    pub description: String,
    /// Who may assume the role
    pub trust_policy: PolicyDocument,
    /// Managed policies attached on creation
    pub managed_policy_arns: Vec<String>,
}

/// Source of a trust anchor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustAnchorSourceType {
    /// Private CA managed by the provider
    #[serde(rename = "AWS_ACM_PCA")]
    PrivateCa,
}

/// Federation trust anchor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustAnchorSpec {
    /// Anchor name
    pub name: String,
    /// Source type
    pub source_type: TrustAnchorSourceType,
    /// CA the anchor trusts
    pub certificate_authority_arn: String,
    /// Whether the anchor accepts certificates
    pub enabled: bool,
}

/// Federation profile
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSpec {
    /// Profile name
    pub name: String,
    /// Roles a session may assume
    pub role_arns: Vec<String>,
    /// Session duration in seconds
    pub duration_seconds: u32,
    /// Whether the profile is usable
    pub enabled: bool,
}

/// A typed create request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ResourceSpec {
    /// Root CA
    CertificateAuthority(CertificateAuthoritySpec),
    /// CA certificate
    CaCertificate(CaCertificateSpec),
    /// Leaf certificate
    LeafCertificate(LeafCertificateSpec),
    /// Managed policy
    ManagedPolicy(ManagedPolicySpec),
    /// Role
    Role(RoleSpec),
    /// Trust anchor
    TrustAnchor(TrustAnchorSpec),
    /// Profile
    Profile(ProfileSpec),
}

impl ResourceSpec {
    /// Kind of resource this request creates
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::CertificateAuthority(_) => ResourceKind::RootCA,
            ResourceSpec::CaCertificate(_) => ResourceKind::CACertificate,
            ResourceSpec::LeafCertificate(_) => ResourceKind::LeafCertificate,
            ResourceSpec::ManagedPolicy(_) => ResourceKind::ManagedPolicy,
            ResourceSpec::Role(_) => ResourceKind::Role,
            ResourceSpec::TrustAnchor(_) => ResourceKind::TrustAnchor,
            ResourceSpec::Profile(_) => ResourceKind::Profile,
        }
    }

    /// Identifying attributes: two requests with the same identity name the
    /// same resource
    pub fn identity(&self) -> String {
        match self {
            ResourceSpec::CertificateAuthority(s) => s.subject.to_dn_string(),
            ResourceSpec::CaCertificate(s) => {
                format!("{}|{}", s.certificate_authority_arn, s.template_arn)
            }
            ResourceSpec::LeafCertificate(s) => {
                format!("{}|{}", s.certificate_authority_arn, s.domain_name)
            }
            ResourceSpec::ManagedPolicy(s) => s.name.clone(),
            ResourceSpec::Role(s) => s.name.clone(),
            ResourceSpec::TrustAnchor(s) => s.name.clone(),
            ResourceSpec::Profile(s) => s.name.clone(),
        }
    }

    /// Stable client token derived from kind and identity
    pub fn idempotency_token(&self) -> String {
        deterministic_hash(&format!("{}:{}", self.kind(), self.identity()))
    }
}

/// Compute a deterministic hash of the input string, returning a 16-char hex digest.
///
/// Uses truncated SHA-256 so tokens survive toolchain upgrades.
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

/// The provisioning control plane.
///
/// Implementations map errors onto [`crate::Error::Transient`] (throttling,
/// unavailability) or [`crate::Error::Terminal`] (validation, conflicts).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Look up an existing resource with the spec's identity
    async fn find(&self, spec: &ResourceSpec) -> Result<Option<RemoteResource>>;

    /// Create a resource
    async fn create(&self, spec: &ResourceSpec) -> Result<RemoteResource>;

    /// Describe a resource by kind and id.
    ///
    /// For [`ResourceKind::CAActivation`] the id is the CA ARN and the
    /// status is the CA's.
    async fn describe(&self, kind: ResourceKind, id: &str) -> Result<RemoteResource>;

    /// Import a certificate into a CA that is pending its certificate
    async fn activate(&self, certificate_authority_arn: &str, certificate_pem: &str)
        -> Result<()>;

    /// Apply tags to a resource
    async fn tag(&self, kind: ResourceKind, id: &str, tags: &BTreeMap<String, String>)
        -> Result<()>;

    /// Delete a resource (teardown only)
    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<()>;
}
