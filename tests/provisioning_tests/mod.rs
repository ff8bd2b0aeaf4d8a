//! Provisioning stories
//!
//! # Test Organization
//!
//! - `fake`: an in-memory control plane with knobs for slow, stuck, throttled
//!   and rejecting resources
//!
//! - `scenarios`: stories about full runs, aborted runs, retries, resuming
//!   and tearing down a deployment

pub mod fake;
mod scenarios;

use std::sync::Arc;

use trustchain::config::DeploymentConfig;
use trustchain::graph::{standard_graph, DependencyGraph};
use trustchain::orchestrator::Orchestrator;

use fake::FakeControlPlane;

/// GovCloud deployment with test-friendly timings
pub fn config() -> DeploymentConfig {
    let mut config = DeploymentConfig::new("VsCodeAiStack", "123456789012");
    config.provisioning.retry.initial_delay_ms = 100;
    config.provisioning.retry.max_delay_ms = 1_000;
    config.provisioning.poll.initial_interval_ms = 1_000;
    config.provisioning.poll.max_interval_ms = 4_000;
    config.provisioning.poll.multiplier = 2.0;
    config.provisioning.poll.timeout_secs = 30;
    config.validate().expect("test config is valid");
    config
}

/// The standard graph for [`config`]
pub fn graph() -> DependencyGraph {
    standard_graph(&config()).expect("standard graph builds")
}

/// Fake control plane using the deployment's account coordinates
pub fn fake() -> Arc<FakeControlPlane> {
    Arc::new(FakeControlPlane::new(config().arn_context()))
}

/// Orchestrator bound to a fake
pub fn orchestrator(fake: &Arc<FakeControlPlane>) -> Orchestrator {
    Orchestrator::new(fake.clone(), config().orchestrator_config())
}
