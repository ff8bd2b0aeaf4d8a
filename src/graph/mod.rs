//! Provisioning dependency graph
//!
//! A DAG of [`ProvisioningStep`]s keyed by [`ResourceKind`]. Each node lists
//! the kinds that must be Active before its step may execute. The graph is
//! built once, validated, and then only read while a run uses it.
//!
//! Edges point from a kind to its prerequisites. Prerequisites may be declared
//! before the kind they name is added, so insertion order does not matter;
//! [`DependencyGraph::validate`] checks that every name resolves.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::config::DeploymentConfig;
use crate::policy::{inference_policy, trust_policy};
use crate::resource::ResourceKind;
use crate::step::{
    ActivateCa, CreateCertificateAuthority, CreateManagedPolicy, CreateProfile, CreateRole,
    CreateTrustAnchor, IssueCaCertificate, IssueLeafCertificate, ProvisioningStep,
};
use crate::{Error, Result};

struct Node {
    prerequisites: BTreeSet<ResourceKind>,
    step: Arc<dyn ProvisioningStep>,
}

/// Kinds, their prerequisites and the step provisioning each
#[derive(Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<ResourceKind, Node>,
}

impl fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.nodes.iter().map(|(k, n)| (k, &n.prerequisites)))
            .finish()
    }
}

impl DependencyGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `kind` with its prerequisites.
    ///
    /// Fails with [`Error::Cycle`] if the new edges close a cycle and with
    /// [`Error::Graph`] for a duplicate kind or a step of another kind. The
    /// graph is unchanged on failure.
    pub fn add_step(
        &mut self,
        kind: ResourceKind,
        prerequisites: impl IntoIterator<Item = ResourceKind>,
        step: Arc<dyn ProvisioningStep>,
    ) -> Result<()> {
        if self.nodes.contains_key(&kind) {
            return Err(Error::graph(format!("{} is already in the graph", kind)));
        }
        if step.kind() != kind {
            return Err(Error::graph(format!(
                "step for {} registered under {}",
                step.kind(),
                kind
            )));
        }

        let prerequisites: BTreeSet<ResourceKind> = prerequisites.into_iter().collect();
        if prerequisites.contains(&kind) {
            return Err(Error::Cycle {
                path: vec![kind, kind],
            });
        }

        self.nodes.insert(
            kind,
            Node {
                prerequisites,
                step,
            },
        );

        // The graph was acyclic before, so any cycle passes through `kind`
        if let Some(path) = self.cycle_through(kind) {
            self.nodes.remove(&kind);
            return Err(Error::Cycle { path });
        }
        Ok(())
    }

    fn cycle_through(&self, start: ResourceKind) -> Option<Vec<ResourceKind>> {
        let mut stack = Vec::new();
        let mut finished = BTreeSet::new();
        self.visit(start, &mut stack, &mut finished)
    }

    fn visit(
        &self,
        kind: ResourceKind,
        stack: &mut Vec<ResourceKind>,
        finished: &mut BTreeSet<ResourceKind>,
    ) -> Option<Vec<ResourceKind>> {
        if let Some(pos) = stack.iter().position(|k| *k == kind) {
            let mut path = stack[pos..].to_vec();
            path.push(kind);
            return Some(path);
        }
        if finished.contains(&kind) {
            return None;
        }
        let node = self.nodes.get(&kind)?;

        stack.push(kind);
        for prerequisite in &node.prerequisites {
            if let Some(path) = self.visit(*prerequisite, stack, finished) {
                return Some(path);
            }
        }
        stack.pop();
        finished.insert(kind);
        None
    }

    /// Check that every prerequisite names a kind in the graph
    pub fn validate(&self) -> Result<()> {
        for (kind, node) in &self.nodes {
            for prerequisite in &node.prerequisites {
                if !self.nodes.contains_key(prerequisite) {
                    return Err(Error::graph(format!(
                        "{} depends on {}, which is not in the graph",
                        kind, prerequisite
                    )));
                }
            }
        }
        Ok(())
    }

    /// Kinds not yet completed whose prerequisites are all completed
    pub fn next_ready(&self, completed: &BTreeSet<ResourceKind>) -> Vec<ResourceKind> {
        self.nodes
            .iter()
            .filter(|(kind, node)| {
                !completed.contains(*kind) && node.prerequisites.is_subset(completed)
            })
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Every kind in the graph is completed
    pub fn is_complete(&self, completed: &BTreeSet<ResourceKind>) -> bool {
        self.nodes.keys().all(|kind| completed.contains(kind))
    }

    /// Kinds grouped into batches; every kind's prerequisites are in earlier
    /// batches, and kinds within a batch may run concurrently
    pub fn waves(&self) -> Result<Vec<Vec<ResourceKind>>> {
        self.validate()?;

        let mut completed = BTreeSet::new();
        let mut waves = Vec::new();
        loop {
            let wave = self.next_ready(&completed);
            if wave.is_empty() {
                break;
            }
            completed.extend(wave.iter().copied());
            waves.push(wave);
        }
        Ok(waves)
    }

    /// All kinds, prerequisites first
    pub fn topological_order(&self) -> Result<Vec<ResourceKind>> {
        Ok(self.waves()?.into_iter().flatten().collect())
    }

    /// Kinds that list `kind` as a prerequisite
    pub fn dependents(&self, kind: ResourceKind) -> Vec<ResourceKind> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.prerequisites.contains(&kind))
            .map(|(k, _)| *k)
            .collect()
    }

    /// Prerequisites of `kind`
    pub fn prerequisites(&self, kind: ResourceKind) -> Option<&BTreeSet<ResourceKind>> {
        self.nodes.get(&kind).map(|n| &n.prerequisites)
    }

    /// Step provisioning `kind`
    pub fn step(&self, kind: ResourceKind) -> Option<Arc<dyn ProvisioningStep>> {
        self.nodes.get(&kind).map(|n| n.step.clone())
    }

    /// Kinds in the graph
    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.nodes.keys().copied()
    }

    /// Number of kinds
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// No kinds at all
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// The eight-step graph for a deployment.
///
/// ```text
/// RootCA -> CACertificate -> CAActivation -> LeafCertificate
///                                         -> TrustAnchor
/// ManagedPolicy -> Role -> Profile
/// ```
///
/// The certificate and identity branches share no edge.
pub fn standard_graph(config: &DeploymentConfig) -> Result<DependencyGraph> {
    use ResourceKind::*;

    let arns = config.arn_context();
    let ca = &config.certificate_authority;
    let client = &config.client_certificate;
    let access = &config.access;
    let federation = &config.federation;

    let mut graph = DependencyGraph::new();
    graph.add_step(
        RootCA,
        [],
        Arc::new(CreateCertificateAuthority::new(
            ca.subject.clone(),
            ca.key_algorithm,
            ca.signing_algorithm,
        )),
    )?;
    graph.add_step(
        CACertificate,
        [RootCA],
        Arc::new(IssueCaCertificate::new(
            &arns,
            ca.signing_algorithm,
            ca.validity,
        )),
    )?;
    graph.add_step(CAActivation, [CACertificate], Arc::new(ActivateCa))?;
    graph.add_step(
        LeafCertificate,
        [RootCA, CAActivation],
        Arc::new(IssueLeafCertificate::new(
            client.domain_name.clone(),
            client.subject_alternative_names.clone(),
            client.key_algorithm,
        )),
    )?;
    graph.add_step(
        TrustAnchor,
        [CAActivation],
        Arc::new(CreateTrustAnchor::new(
            federation.trust_anchor_name.clone(),
            federation.enabled,
        )),
    )?;
    graph.add_step(
        ManagedPolicy,
        [],
        Arc::new(CreateManagedPolicy::new(
            access.policy_name.clone(),
            inference_policy(&arns, &access.foundation_models),
        )),
    )?;
    graph.add_step(
        Role,
        [ManagedPolicy],
        Arc::new(CreateRole::new(
            access.role_name.clone(),
            access.role_description.clone(),
            trust_policy(arns.partition),
        )),
    )?;
    graph.add_step(
        Profile,
        [Role],
        Arc::new(CreateProfile::new(
            federation.profile_name.clone(),
            federation.session_duration_secs,
            federation.enabled,
        )),
    )?;

    graph.validate()?;
    Ok(graph)
}
