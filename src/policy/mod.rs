//! Permission documents for the federated role
//!
//! Two documents are rendered from deployment configuration:
//!
//! - **Trust policy**: who may assume the role. Restricted to the federation
//!   service principal, with the session-policy-mode principal tag pinned.
//! - **Permissions policy**: which inference APIs the role may call, scoped to
//!   explicit foundation-model ARNs.
//!
//! Rendering is pure and deterministic. [`PolicyDocument::validate`] runs
//! before a document is sent anywhere; a malformed document surfaces as
//! [`Error::PolicyAttachment`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Policy language version
pub const POLICY_VERSION: &str = "2012-10-17";

/// Service principal of the certificate-based federation service
pub const FEDERATION_SERVICE_PRINCIPAL: &str = "rolesanywhere.amazonaws.com";

/// Actions the federation service needs on the role
pub const TRUST_ACTIONS: [&str; 3] = ["sts:AssumeRole", "sts:TagSession", "sts:SetSourceIdentity"];

/// Inference actions granted on the configured foundation models
pub const INFERENCE_ACTIONS: [&str; 4] = [
    "bedrock:InvokeModel",
    "bedrock:InvokeModelWithResponseStream",
    "bedrock:ListFoundationModels",
    "bedrock:GetFoundationModel",
];

/// Principal tag set by the federation service on every session
pub const SESSION_POLICY_MODE_TAG: &str = "x-aws-rolesanywhere:session-policy-mode";

/// Cloud partition an account lives in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Partition {
    /// Commercial regions
    #[serde(rename = "aws")]
    Aws,
    /// GovCloud regions
    #[serde(rename = "aws-us-gov")]
    AwsUsGov,
    /// China regions
    #[serde(rename = "aws-cn")]
    AwsCn,
}

impl Partition {
    /// Partition segment used in ARNs
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Aws => "aws",
            Partition::AwsUsGov => "aws-us-gov",
            Partition::AwsCn => "aws-cn",
        }
    }

    /// Derive the partition from a region name
    pub fn from_region(region: &str) -> Self {
        if region.starts_with("us-gov-") {
            Partition::AwsUsGov
        } else if region.starts_with("cn-") {
            Partition::AwsCn
        } else {
            Partition::Aws
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "aws" => Some(Partition::Aws),
            "aws-us-gov" => Some(Partition::AwsUsGov),
            "aws-cn" => Some(Partition::AwsCn),
            _ => None,
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account coordinates used to build ARNs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArnContext {
    /// Partition
    pub partition: Partition,
    /// Region
    pub region: String,
    /// Twelve-digit account id
    pub account_id: String,
}

impl ArnContext {
    /// ARN of a foundation model in this account's region
    pub fn foundation_model_arn(&self, model_id: &str) -> String {
        format!(
            "arn:{}:bedrock:{}:{}:foundation-model/{}",
            self.partition, self.region, self.account_id, model_id
        )
    }

    /// ARN of a private CA certificate template
    pub fn certificate_template_arn(&self, template: CertificateTemplate) -> String {
        format!(
            "arn:{}:acm-pca:::template/{}",
            self.partition,
            template.as_str()
        )
    }
}

/// Issuance template selector
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CertificateTemplate {
    /// Self-signed certificate for a root CA's own CSR
    RootCaCertificate,
    /// General end-entity certificate
    EndEntityCertificate,
}

impl CertificateTemplate {
    fn as_str(&self) -> &'static str {
        match self {
            CertificateTemplate::RootCaCertificate => "RootCACertificate/V1",
            CertificateTemplate::EndEntityCertificate => "EndEntityCertificate/V1",
        }
    }
}

/// Statement effect
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Allow
    Allow,
    /// Deny
    Deny,
}

/// Service principal block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Service principals
    #[serde(rename = "Service")]
    pub service: Vec<String>,
}

/// Condition block: operator -> (key -> value)
pub type Conditions = BTreeMap<String, BTreeMap<String, String>>;

/// One policy statement
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    /// Statement id
    #[serde(rename = "Sid", default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Effect
    #[serde(rename = "Effect")]
    pub effect: Effect,
    /// Principal (trust policies only)
    #[serde(rename = "Principal", default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    /// Actions
    #[serde(rename = "Action")]
    pub actions: Vec<String>,
    /// Resources (permission policies only)
    #[serde(rename = "Resource", default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    /// Conditions
    #[serde(rename = "Condition", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conditions: Conditions,
}

/// A policy document in canonical form
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    /// Language version
    #[serde(rename = "Version")]
    pub version: String,
    /// Statements
    #[serde(rename = "Statement")]
    pub statements: Vec<Statement>,
}

impl PolicyDocument {
    /// Render as compact JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::serialization(e.to_string()))
    }

    /// Render as indented JSON
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::serialization(e.to_string()))
    }

    /// Check that the document can be attached as-is
    pub fn validate(&self) -> Result<()> {
        if self.version != POLICY_VERSION {
            return Err(Error::policy_attachment(format!(
                "unsupported policy version '{}'",
                self.version
            )));
        }
        if self.statements.is_empty() {
            return Err(Error::policy_attachment("document has no statements"));
        }

        for (idx, statement) in self.statements.iter().enumerate() {
            if statement.actions.is_empty() {
                return Err(Error::policy_attachment(format!(
                    "statement {} has no actions",
                    idx
                )));
            }
            for action in &statement.actions {
                validate_action(action)
                    .map_err(|e| Error::policy_attachment(format!("statement {}: {}", idx, e)))?;
            }
            for resource in &statement.resources {
                validate_arn(resource)
                    .map_err(|e| Error::policy_attachment(format!("statement {}: {}", idx, e)))?;
            }
            if statement.principal.is_none() && statement.resources.is_empty() {
                return Err(Error::policy_attachment(format!(
                    "statement {} names neither a principal nor resources",
                    idx
                )));
            }
            for (operator, entries) in &statement.conditions {
                for (key, value) in entries {
                    for text in [operator, key, value] {
                        if is_unresolved(text) {
                            return Err(Error::policy_attachment(format!(
                                "statement {}: unresolved template in condition '{}'",
                                idx, text
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Trust policy letting the federation service assume the role.
///
/// The condition key is partition-qualified and fully resolved.
pub fn trust_policy(partition: Partition) -> PolicyDocument {
    let mut equals = BTreeMap::new();
    equals.insert(
        format!("{}:PrincipalTag/{}", partition, SESSION_POLICY_MODE_TAG),
        "default".to_string(),
    );
    let mut conditions = Conditions::new();
    conditions.insert("StringEquals".to_string(), equals);

    PolicyDocument {
        version: POLICY_VERSION.to_string(),
        statements: vec![Statement {
            sid: None,
            effect: Effect::Allow,
            principal: Some(Principal {
                service: vec![FEDERATION_SERVICE_PRINCIPAL.to_string()],
            }),
            actions: TRUST_ACTIONS.iter().map(|a| a.to_string()).collect(),
            resources: Vec::new(),
            conditions,
        }],
    }
}

/// Permissions policy granting inference on the given foundation models
pub fn inference_policy(arns: &ArnContext, model_ids: &[String]) -> PolicyDocument {
    PolicyDocument {
        version: POLICY_VERSION.to_string(),
        statements: vec![Statement {
            sid: None,
            effect: Effect::Allow,
            principal: None,
            actions: INFERENCE_ACTIONS.iter().map(|a| a.to_string()).collect(),
            resources: model_ids
                .iter()
                .map(|m| arns.foundation_model_arn(m))
                .collect(),
            conditions: Conditions::new(),
        }],
    }
}

fn is_unresolved(text: &str) -> bool {
    text.contains("${") || text.contains('`')
}

fn validate_action(action: &str) -> std::result::Result<(), String> {
    let Some((service, name)) = action.split_once(':') else {
        return Err(format!("action '{}' is not service-qualified", action));
    };
    let valid_part = |s: &str| {
        !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '*')
    };
    if !valid_part(service) || !valid_part(name) {
        return Err(format!("action '{}' is malformed", action));
    }
    Ok(())
}

/// Check that a resource ARN is concrete: known partition, service, resource
pub fn validate_arn(arn: &str) -> std::result::Result<(), String> {
    if is_unresolved(arn) {
        return Err(format!("resource '{}' contains an unresolved template", arn));
    }
    let parts: Vec<&str> = arn.splitn(6, ':').collect();
    if parts.len() != 6 || parts[0] != "arn" {
        return Err(format!("resource '{}' is not an ARN", arn));
    }
    if Partition::parse(parts[1]).is_none() {
        return Err(format!(
            "resource '{}' has unknown partition '{}'",
            arn, parts[1]
        ));
    }
    if parts[2].is_empty() {
        return Err(format!("resource '{}' has no service", arn));
    }
    if parts[5].is_empty() {
        return Err(format!("resource '{}' has no resource part", arn));
    }
    Ok(())
}
