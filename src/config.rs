//! Deployment configuration
//!
//! A deployment is described by one YAML document. Every section has
//! defaults reproducing the reference GovCloud deployment, so a minimal file
//! only names the stack and the account:
//!
//! ```yaml
//! stack_name: VsCodeAiStack
//! account_id: "123456789012"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::orchestrator::OrchestratorConfig;
use crate::pki::{self, KeyAlgorithm, SigningAlgorithm, Subject, Validity};
use crate::policy::{ArnContext, Partition};
use crate::readiness::PollConfig;
use crate::resource::ResourceKind;
use crate::retry::RetryConfig;
use crate::step::{MAX_SESSION_DURATION_SECS, MIN_SESSION_DURATION_SECS};
use crate::{Error, Result};

/// Tags applied to each kind after it becomes active
pub type TagConfig = BTreeMap<ResourceKind, BTreeMap<String, String>>;

/// Complete description of one deployment
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Stack name, prefix of every export name
    pub stack_name: String,
    /// Twelve-digit account id
    pub account_id: String,
    /// Region
    #[serde(default = "default_region")]
    pub region: String,
    /// Partition override, derived from the region when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<Partition>,
    /// Root certificate authority
    #[serde(default)]
    pub certificate_authority: CertificateAuthorityConfig,
    /// Client certificate issued by the CA
    #[serde(default)]
    pub client_certificate: ClientCertificateConfig,
    /// Role and permissions
    #[serde(default)]
    pub access: AccessConfig,
    /// Trust anchor and profile
    #[serde(default)]
    pub federation: FederationConfig,
    /// Per-kind tags
    #[serde(default = "default_tags")]
    pub tags: TagConfig,
    /// Retry, polling and deadline tuning
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
}

/// Root CA settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CertificateAuthorityConfig {
    /// Subject DN
    pub subject: Subject,
    /// Key algorithm
    #[serde(default)]
    pub key_algorithm: KeyAlgorithm,
    /// Signing algorithm
    #[serde(default)]
    pub signing_algorithm: SigningAlgorithm,
    /// Validity of the CA's own certificate
    #[serde(default = "default_ca_validity")]
    pub validity: Validity,
}

impl Default for CertificateAuthorityConfig {
    fn default() -> Self {
        Self {
            subject: Subject {
                country: "US".to_string(),
                organization: "Your Organization".to_string(),
                organizational_unit: "Your Org Unit".to_string(),
                state: "Your State".to_string(),
                common_name: "your-domain.com".to_string(),
                locality: "Your City".to_string(),
            },
            key_algorithm: KeyAlgorithm::default(),
            signing_algorithm: SigningAlgorithm::default(),
            validity: default_ca_validity(),
        }
    }
}

/// Client certificate settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientCertificateConfig {
    /// Primary domain
    pub domain_name: String,
    /// Additional names
    #[serde(default)]
    pub subject_alternative_names: Vec<String>,
    /// Key algorithm
    #[serde(default)]
    pub key_algorithm: KeyAlgorithm,
}

impl Default for ClientCertificateConfig {
    fn default() -> Self {
        Self {
            domain_name: "your-domain.com".to_string(),
            subject_alternative_names: vec!["alt.your-domain.com".to_string()],
            key_algorithm: KeyAlgorithm::default(),
        }
    }
}

/// Role and permissions policy settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Role name
    pub role_name: String,
    /// Role description
    pub role_description: String,
    /// Managed policy name
    pub policy_name: String,
    /// Foundation model ids the role may invoke
    pub foundation_models: Vec<String>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            role_name: "bedrock-role-anywhere".to_string(),
            role_description: "Role for accessing Bedrock via IAM Roles Anywhere in GovCloud"
                .to_string(),
            policy_name: "bedrock-access-policy".to_string(),
            foundation_models: vec![
                "anthropic.claude-3-haiku-20240307-v1:0".to_string(),
                "amazon.titan-text-express-v1".to_string(),
            ],
        }
    }
}

/// Trust anchor and profile settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    /// Trust anchor name
    pub trust_anchor_name: String,
    /// Profile name
    pub profile_name: String,
    /// Session duration granted by the profile
    pub session_duration_secs: u32,
    /// Whether anchor and profile are enabled
    pub enabled: bool,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            trust_anchor_name: "bedrock-trust-anchor".to_string(),
            profile_name: "bedrock-profile".to_string(),
            session_duration_secs: 3600,
            enabled: true,
        }
    }
}

/// Retry tuning, in milliseconds
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts including the first
    pub max_attempts: u32,
    /// First backoff delay
    pub initial_delay_ms: u64,
    /// Backoff cap
    pub max_delay_ms: u64,
    /// Backoff growth
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            max_attempts: retry.max_attempts,
            initial_delay_ms: retry.initial_delay.as_millis() as u64,
            max_delay_ms: retry.max_delay.as_millis() as u64,
            multiplier: retry.backoff_multiplier,
        }
    }
}

/// Readiness polling tuning
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    /// First poll delay
    pub initial_interval_ms: u64,
    /// Poll delay cap
    pub max_interval_ms: u64,
    /// Poll delay growth
    pub multiplier: f64,
    /// Readiness deadline per resource
    pub timeout_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        let poll = PollConfig::default();
        Self {
            initial_interval_ms: poll.initial_interval.as_millis() as u64,
            max_interval_ms: poll.max_interval.as_millis() as u64,
            multiplier: poll.multiplier,
            timeout_secs: poll.timeout.as_secs(),
        }
    }
}

/// Retry, polling and run deadline
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Transient failure retries
    pub retry: RetrySettings,
    /// Readiness polling
    pub poll: PollSettings,
    /// Deadline for a whole run, unbounded when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_timeout_secs: Option<u64>,
}

fn default_region() -> String {
    "us-gov-west-1".to_string()
}

fn default_ca_validity() -> Validity {
    Validity::years(2)
}

fn default_tags() -> TagConfig {
    let tags = |pairs: &[(&str, &str)]| {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>()
    };

    let mut all = TagConfig::new();
    all.insert(
        ResourceKind::RootCA,
        tags(&[("Purpose", "RolesAnywhere"), ("Environment", "GovCloud")]),
    );
    all.insert(
        ResourceKind::Role,
        tags(&[("Purpose", "BedrockAccess"), ("Environment", "GovCloud")]),
    );
    all.insert(ResourceKind::TrustAnchor, tags(&[("Purpose", "RolesAnywhere")]));
    all.insert(ResourceKind::Profile, tags(&[("Purpose", "RolesAnywhere")]));
    all
}

impl DeploymentConfig {
    /// Default deployment for an account
    pub fn new(stack_name: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            stack_name: stack_name.into(),
            account_id: account_id.into(),
            region: default_region(),
            partition: None,
            certificate_authority: CertificateAuthorityConfig::default(),
            client_certificate: ClientCertificateConfig::default(),
            access: AccessConfig::default(),
            federation: FederationConfig::default(),
            tags: default_tags(),
            provisioning: ProvisioningConfig::default(),
        }
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| Error::config(format!("failed to parse deployment YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    /// Check the configuration for values the provider would reject
    pub fn validate(&self) -> Result<()> {
        if self.stack_name.is_empty()
            || !self
                .stack_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(Error::config(format!(
                "stack_name '{}' must be non-empty and contain only letters, digits and '-'",
                self.stack_name
            )));
        }
        if self.account_id.len() != 12 || !self.account_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::config(format!(
                "account_id '{}' must be 12 digits",
                self.account_id
            )));
        }
        if self.region.is_empty() {
            return Err(Error::config("region must not be empty"));
        }
        if let Some(partition) = self.partition {
            let derived = Partition::from_region(&self.region);
            if partition != derived {
                return Err(Error::config(format!(
                    "partition {} does not match region {} ({})",
                    partition, self.region, derived
                )));
            }
        }

        let ca = &self.certificate_authority;
        ca.subject.to_distinguished_name()?;
        pki::check_algorithms(ca.key_algorithm, ca.signing_algorithm)?;
        if ca.validity.value == 0 {
            return Err(Error::config("certificate_authority.validity must be positive"));
        }

        let client = &self.client_certificate;
        pki::validate_dns_name(&client.domain_name)?;
        for san in &client.subject_alternative_names {
            pki::validate_dns_name(san)?;
        }

        if self.access.role_name.is_empty() || self.access.policy_name.is_empty() {
            return Err(Error::config("access.role_name and access.policy_name are required"));
        }
        if self.access.foundation_models.is_empty() {
            return Err(Error::config("access.foundation_models must name at least one model"));
        }

        let duration = self.federation.session_duration_secs;
        if !(MIN_SESSION_DURATION_SECS..=MAX_SESSION_DURATION_SECS).contains(&duration) {
            return Err(Error::config(format!(
                "federation.session_duration_secs {} is outside {}..={}",
                duration, MIN_SESSION_DURATION_SECS, MAX_SESSION_DURATION_SECS
            )));
        }

        for kind in self.tags.keys() {
            if *kind == ResourceKind::TrustPolicy {
                return Err(Error::config("TrustPolicy is rendered into the role and cannot be tagged"));
            }
        }

        let retry = &self.provisioning.retry;
        let poll = &self.provisioning.poll;
        if retry.max_attempts == 0 {
            return Err(Error::config("provisioning.retry.max_attempts must be at least 1"));
        }
        if retry.initial_delay_ms == 0 || poll.initial_interval_ms == 0 {
            return Err(Error::config(
                "provisioning.retry.initial_delay_ms and provisioning.poll.initial_interval_ms must be positive",
            ));
        }
        if retry.max_delay_ms < retry.initial_delay_ms {
            return Err(Error::config(format!(
                "provisioning.retry.max_delay_ms {} is below initial_delay_ms {}",
                retry.max_delay_ms, retry.initial_delay_ms
            )));
        }
        if poll.max_interval_ms < poll.initial_interval_ms {
            return Err(Error::config(format!(
                "provisioning.poll.max_interval_ms {} is below initial_interval_ms {}",
                poll.max_interval_ms, poll.initial_interval_ms
            )));
        }
        if retry.multiplier < 1.0 || poll.multiplier < 1.0 {
            return Err(Error::config("backoff multipliers must be at least 1.0"));
        }
        if poll.timeout_secs == 0 {
            return Err(Error::config("provisioning.poll.timeout_secs must be positive"));
        }
        Ok(())
    }

    /// Partition, explicit or derived from the region
    pub fn partition(&self) -> Partition {
        self.partition
            .unwrap_or_else(|| Partition::from_region(&self.region))
    }

    /// Account coordinates for ARN construction
    pub fn arn_context(&self) -> ArnContext {
        ArnContext {
            partition: self.partition(),
            region: self.region.clone(),
            account_id: self.account_id.clone(),
        }
    }

    /// Orchestrator settings derived from `provisioning` and `tags`
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let retry = &self.provisioning.retry;
        let poll = &self.provisioning.poll;
        OrchestratorConfig {
            retry: RetryConfig {
                max_attempts: retry.max_attempts,
                initial_delay: Duration::from_millis(retry.initial_delay_ms),
                max_delay: Duration::from_millis(retry.max_delay_ms),
                backoff_multiplier: retry.multiplier,
            },
            poll: PollConfig {
                initial_interval: Duration::from_millis(poll.initial_interval_ms),
                max_interval: Duration::from_millis(poll.max_interval_ms),
                multiplier: poll.multiplier,
                timeout: Duration::from_secs(poll.timeout_secs),
            },
            run_timeout: self.provisioning.run_timeout_secs.map(Duration::from_secs),
            stack_name: self.stack_name.clone(),
            tags: self.tags.clone(),
        }
    }
}
