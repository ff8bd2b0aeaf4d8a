//! trustchain - dependency-ordered provisioning of a private-CA backed
//! workload identity federation
//!
//! A private root CA is created, its certificate issued and imported, and a
//! federation trust anchor bound to it; in parallel a permissions policy,
//! role and federation profile are created. Certificate holders then obtain
//! short-lived credentials for the role.
//!
//! # Architecture
//!
//! - Steps are idempotent create-or-reuse operations with a readiness
//!   predicate
//! - A dependency graph orders the steps; the orchestrator runs every ready
//!   step concurrently and polls each resource to Active
//! - Only Active handles are exported
//!
//! # Modules
//!
//! - [`resource`] - Resource kinds, lifecycle states and handles
//! - [`graph`] - Dependency graph and the standard eight-step graph
//! - [`step`] - Provisioning steps
//! - [`readiness`] - Readiness polling
//! - [`orchestrator`] - Graph execution, checkpoints and teardown
//! - [`outputs`] - Active-only exported identifiers
//! - [`provider`] - Control-plane abstraction
//! - [`policy`] - Trust and permissions documents
//! - [`pki`] - Subject, DNS name and certificate checks
//! - [`config`] - YAML deployment configuration
//! - [`retry`] - Backoff for transient failures
//! - [`telemetry`] - Tracing setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod outputs;
pub mod pki;
pub mod policy;
pub mod provider;
pub mod readiness;
pub mod resource;
pub mod retry;
pub mod step;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
