//! Error types for trust chain provisioning

use std::time::Duration;

use thiserror::Error;

use crate::pki::PkiError;
use crate::resource::{Lifecycle, ResourceKind};

/// Main error type for provisioning operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Retryable provider failure (throttling, brief unavailability)
    #[error("transient error: {0}")]
    Transient(String),

    /// Non-retryable input or state conflict
    #[error("terminal error: {0}")]
    Terminal(String),

    /// A resource did not become active before its readiness deadline
    #[error("timed out after {waited:?} waiting for {kind} to become active")]
    Timeout {
        /// Kind of the resource being waited on
        kind: ResourceKind,
        /// How long the poller waited
        waited: Duration,
    },

    /// Adding a step would close a prerequisite cycle
    #[error("dependency cycle: {}", format_cycle(.path))]
    Cycle {
        /// Kinds along the cycle, first and last entries are the same kind
        path: Vec<ResourceKind>,
    },

    /// A handle was used or exported before reaching Active
    #[error("{kind} is not ready (state: {})", format_state(.state))]
    NotReady {
        /// Kind of the handle
        kind: ResourceKind,
        /// Observed lifecycle state, `None` when no handle exists yet
        state: Option<Lifecycle>,
    },

    /// Malformed permission document
    #[error("policy attachment error: {0}")]
    PolicyAttachment(String),

    /// Invalid graph construction other than a cycle
    #[error("graph error: {0}")]
    Graph(String),

    /// Invalid deployment configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Certificate or distinguished name problem
    #[error("pki error: {0}")]
    Pki(#[from] PkiError),

    /// The run was cancelled or exceeded its overall deadline
    #[error("run cancelled: {0}")]
    Cancelled(String),
}

fn format_cycle(path: &[ResourceKind]) -> String {
    path.iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn format_state(state: &Option<Lifecycle>) -> String {
    match state {
        Some(state) => state.to_string(),
        None => "missing".to_string(),
    }
}

impl Error {
    /// Create a transient error with the given message
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a terminal error with the given message
    pub fn terminal(msg: impl Into<String>) -> Self {
        Self::Terminal(msg.into())
    }

    /// Create a policy attachment error with the given message
    pub fn policy_attachment(msg: impl Into<String>) -> Self {
        Self::PolicyAttachment(msg.into())
    }

    /// Create a graph error with the given message
    pub fn graph(msg: impl Into<String>) -> Self {
        Self::Graph(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a not-ready error for a handle in the given state
    pub fn not_ready(kind: ResourceKind, state: Option<Lifecycle>) -> Self {
        Self::NotReady { kind, state }
    }

    /// Whether the failed operation may be retried with backoff.
    ///
    /// Only transient provider errors qualify. Timeouts are surfaced, not
    /// retried: a CA that misses its activation deadline points at an
    /// upstream problem.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
