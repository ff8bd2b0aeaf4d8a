//! Resource kinds, lifecycle states and handles
//!
//! A [`ResourceHandle`] is the orchestrator's record of a provisioned cloud
//! object. Handles are values: state transitions produce a new handle rather
//! than mutating a shared one, so snapshots handed to steps and to the output
//! registry never change underneath their readers.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::provider::RemoteResource;

/// Logical kind of a provisioned resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Private root certificate authority
    RootCA,
    /// Self-signed certificate issued for the root CA's own CSR
    CACertificate,
    /// Import of the CA certificate back into the CA
    CAActivation,
    /// Client certificate issued by the activated CA
    LeafCertificate,
    /// Role trust policy document (rendered, never created on its own)
    TrustPolicy,
    /// Customer-managed permissions policy
    ManagedPolicy,
    /// Role assumed through the federation profile
    Role,
    /// Federation trust anchor bound to the CA
    TrustAnchor,
    /// Federation profile mapping certificates to roles
    Profile,
}

impl ResourceKind {
    /// All kinds, in declaration order
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::RootCA,
        ResourceKind::CACertificate,
        ResourceKind::CAActivation,
        ResourceKind::LeafCertificate,
        ResourceKind::TrustPolicy,
        ResourceKind::ManagedPolicy,
        ResourceKind::Role,
        ResourceKind::TrustAnchor,
        ResourceKind::Profile,
    ];

    /// Stable name used in logs, errors and configuration keys
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::RootCA => "RootCA",
            ResourceKind::CACertificate => "CACertificate",
            ResourceKind::CAActivation => "CAActivation",
            ResourceKind::LeafCertificate => "LeafCertificate",
            ResourceKind::TrustPolicy => "TrustPolicy",
            ResourceKind::ManagedPolicy => "ManagedPolicy",
            ResourceKind::Role => "Role",
            ResourceKind::TrustAnchor => "TrustAnchor",
            ResourceKind::Profile => "Profile",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a resource as seen by the orchestrator
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Exists (or was requested) but is not usable yet
    #[default]
    Pending,
    /// Provider reports the resource is still being created
    Creating,
    /// Usable by dependents and visible to consumers
    Active,
    /// Provider reports a permanent failure
    Failed,
}

impl Lifecycle {
    /// Whether polling can stop
    pub fn is_terminal(&self) -> bool {
        matches!(self, Lifecycle::Active | Lifecycle::Failed)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Lifecycle::Pending => "Pending",
            Lifecycle::Creating => "Creating",
            Lifecycle::Active => "Active",
            Lifecycle::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Immutable record of a provisioned cloud object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    kind: ResourceKind,
    id: String,
    state: Lifecycle,
    /// Tags successfully applied to the resource
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
    /// Provider attributes needed by dependent steps (CSR, certificate PEM)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    attributes: BTreeMap<String, String>,
}

impl ResourceHandle {
    /// Create a handle with no tags or attributes
    pub fn new(kind: ResourceKind, id: impl Into<String>, state: Lifecycle) -> Self {
        Self {
            kind,
            id: id.into(),
            state,
            metadata: BTreeMap::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Build a handle from what the provider reported
    pub fn from_remote(kind: ResourceKind, remote: &RemoteResource, state: Lifecycle) -> Self {
        Self {
            kind,
            id: remote.id.clone(),
            state,
            metadata: BTreeMap::new(),
            attributes: remote.attributes.clone(),
        }
    }

    /// Resource kind
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Provider-assigned identifier (an ARN for every kind in this system)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> Lifecycle {
        self.state
    }

    /// Whether the handle may be depended on or exported
    pub fn is_active(&self) -> bool {
        self.state == Lifecycle::Active
    }

    /// Applied tags
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Look up a provider attribute
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// All provider attributes
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Copy of this handle in a new state, refreshed with the latest provider attributes
    pub fn transitioned(&self, remote: &RemoteResource, state: Lifecycle) -> Self {
        let mut attributes = self.attributes.clone();
        attributes.extend(remote.attributes.clone());
        Self {
            kind: self.kind,
            id: self.id.clone(),
            state,
            metadata: self.metadata.clone(),
            attributes,
        }
    }

    /// Copy of this handle carrying the given tags
    pub fn with_tags(mut self, tags: &BTreeMap<String, String>) -> Self {
        self.metadata
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Copy of this handle with one more attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Read-only view of the handles recorded so far in a run
pub type HandleSnapshot = BTreeMap<ResourceKind, ResourceHandle>;
