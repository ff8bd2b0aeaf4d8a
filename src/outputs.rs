//! Exported identifiers
//!
//! Consumers (a CLI, a client configurator) read the role, CA, trust anchor
//! and profile ARNs from here. Only Active handles are admitted, so a
//! partially failed run can never export an identifier that does not work.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::resource::{ResourceHandle, ResourceKind};
use crate::{Error, Result};

/// One exported value
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    /// Logical output name
    pub name: String,
    /// Globally unique export name, `{stack}-{name}`
    pub export_name: String,
    /// The identifier
    pub value: String,
    /// What the value is for
    pub description: String,
}

/// Exported kinds, in export order
const EXPORTS: [(ResourceKind, &str, &str); 4] = [
    (
        ResourceKind::Role,
        "RoleArn",
        "ARN of the role assumed through certificate federation",
    ),
    (
        ResourceKind::CAActivation,
        "CertificateAuthorityArn",
        "ARN of the activated private root CA",
    ),
    (
        ResourceKind::TrustAnchor,
        "TrustAnchorArn",
        "ARN of the trust anchor bound to the CA",
    ),
    (
        ResourceKind::Profile,
        "ProfileArn",
        "ARN of the federation profile",
    ),
];

/// Active-only registry of handles, shared between the run loop and readers
#[derive(Clone, Debug)]
pub struct OutputRegistry {
    stack_name: String,
    handles: Arc<RwLock<BTreeMap<ResourceKind, ResourceHandle>>>,
}

impl OutputRegistry {
    /// Empty registry for a stack
    pub fn new(stack_name: impl Into<String>) -> Self {
        Self {
            stack_name: stack_name.into(),
            handles: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Admit a handle. Fails with [`Error::NotReady`] unless it is Active.
    pub fn register(&self, kind: ResourceKind, handle: ResourceHandle) -> Result<()> {
        if !handle.is_active() {
            return Err(Error::not_ready(kind, Some(handle.state())));
        }
        if handle.kind() != kind {
            return Err(Error::graph(format!(
                "{} handle registered as {}",
                handle.kind(),
                kind
            )));
        }
        self.handles.write().insert(kind, handle);
        Ok(())
    }

    /// Registered handles at this moment
    pub fn snapshot(&self) -> BTreeMap<ResourceKind, ResourceHandle> {
        self.handles.read().clone()
    }

    /// Exported values for every registered exportable kind
    pub fn export(&self) -> Vec<Output> {
        let handles = self.handles.read();
        EXPORTS
            .iter()
            .filter_map(|(kind, name, description)| {
                handles.get(kind).map(|handle| Output {
                    name: name.to_string(),
                    export_name: format!("{}-{}", self.stack_name, name),
                    value: handle.id().to_string(),
                    description: description.to_string(),
                })
            })
            .collect()
    }
}
