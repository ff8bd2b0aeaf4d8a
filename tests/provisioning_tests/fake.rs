//! In-memory control plane
//!
//! Resources are created in `Creating` and reach their ready status after a
//! configurable number of describes. Identity and policy resources are ready
//! on creation, like the real services. Creates are keyed on the request's
//! client token: replaying a create returns the resource it made.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};

use trustchain::pki::Subject;
use trustchain::policy::ArnContext;
use trustchain::provider::{
    ControlPlane, RemoteResource, RemoteStatus, ResourceSpec, ATTR_CERTIFICATE, ATTR_CSR,
};
use trustchain::resource::ResourceKind;
use trustchain::{Error, Result};

struct Record {
    kind: ResourceKind,
    spec: ResourceSpec,
    status: RemoteStatus,
    target: RemoteStatus,
    remaining: u32,
    client_token: Option<String>,
    attributes: BTreeMap<String, String>,
}

impl Record {
    fn remote(&self, id: &str) -> RemoteResource {
        let mut remote = RemoteResource::new(id, self.status.clone()).with_spec(self.spec.clone());
        remote.attributes = self.attributes.clone();
        remote
    }
}

#[derive(Default)]
struct State {
    records: BTreeMap<String, Record>,
    next_id: u32,
    polls_until_ready: u32,
    stuck: BTreeSet<ResourceKind>,
    transient_failures: BTreeMap<ResourceKind, u32>,
    rejected: BTreeMap<ResourceKind, String>,
    fail_tagging: bool,
    end_entity_ca_certificates: bool,
    creates: BTreeMap<ResourceKind, u32>,
    describes: BTreeMap<ResourceKind, u32>,
    activations: u32,
    tags: BTreeMap<String, BTreeMap<String, String>>,
    tag_attempts: u32,
    deleted: Vec<ResourceKind>,
}

/// Control plane backed by a map of records
pub struct FakeControlPlane {
    arns: ArnContext,
    state: Mutex<State>,
}

impl FakeControlPlane {
    /// Resources need two describes to become ready
    pub fn new(arns: ArnContext) -> Self {
        Self {
            arns,
            state: Mutex::new(State {
                polls_until_ready: 2,
                ..Default::default()
            }),
        }
    }

    /// Resources described as `kind` never become ready
    pub fn stick(&self, kind: ResourceKind) {
        self.state.lock().stuck.insert(kind);
    }

    /// Let a stuck kind progress again
    pub fn unstick(&self, kind: ResourceKind) {
        self.state.lock().stuck.remove(&kind);
    }

    /// The next `count` creates of `kind` are throttled
    pub fn fail_transiently(&self, kind: ResourceKind, count: u32) {
        self.state.lock().transient_failures.insert(kind, count);
    }

    /// Every create of `kind` fails validation
    pub fn reject(&self, kind: ResourceKind, message: &str) {
        self.state.lock().rejected.insert(kind, message.to_string());
    }

    /// Every tag call is denied
    pub fn fail_tagging(&self) {
        self.state.lock().fail_tagging = true;
    }

    /// Issue end-entity certificates where a CA certificate is expected
    pub fn issue_end_entity_certificates(&self) {
        self.state.lock().end_entity_ca_certificates = true;
    }

    /// Insert a resource that already exists before the run
    pub fn seed(&self, spec: ResourceSpec, status: RemoteStatus) -> String {
        let mut state = self.state.lock();
        let id = self.id_for(&spec, &mut state);
        state.records.insert(
            id.clone(),
            Record {
                kind: spec.kind(),
                spec,
                status: status.clone(),
                target: status,
                remaining: 0,
                client_token: None,
                attributes: BTreeMap::new(),
            },
        );
        id
    }

    /// Create calls for `kind`, failed ones included
    pub fn creates(&self, kind: ResourceKind) -> u32 {
        self.state.lock().creates.get(&kind).copied().unwrap_or(0)
    }

    /// Describe calls for `kind`
    pub fn describes(&self, kind: ResourceKind) -> u32 {
        self.state.lock().describes.get(&kind).copied().unwrap_or(0)
    }

    /// Certificate imports
    pub fn activations(&self) -> u32 {
        self.state.lock().activations
    }

    /// Tags applied to a resource id
    pub fn tags(&self, id: &str) -> BTreeMap<String, String> {
        self.state.lock().tags.get(id).cloned().unwrap_or_default()
    }

    /// Tag calls, failed ones included
    pub fn tag_attempts(&self) -> u32 {
        self.state.lock().tag_attempts
    }

    /// Kinds deleted, in order
    pub fn deleted(&self) -> Vec<ResourceKind> {
        self.state.lock().deleted.clone()
    }

    /// Client token a resource of `kind` was created with
    pub fn client_token(&self, kind: ResourceKind) -> Option<String> {
        self.state
            .lock()
            .records
            .values()
            .find(|r| r.kind == kind)
            .and_then(|r| r.client_token.clone())
    }

    /// Spec a resource of `kind` was created from
    pub fn spec_of(&self, kind: ResourceKind) -> Option<ResourceSpec> {
        self.state
            .lock()
            .records
            .values()
            .find(|r| r.kind == kind)
            .map(|r| r.spec.clone())
    }

    fn id_for(&self, spec: &ResourceSpec, state: &mut State) -> String {
        state.next_id += 1;
        let n = state.next_id;
        let ArnContext {
            partition,
            region,
            account_id,
        } = &self.arns;
        match spec {
            ResourceSpec::CertificateAuthority(_) => format!(
                "arn:{}:acm-pca:{}:{}:certificate-authority/{:08}",
                partition, region, account_id, n
            ),
            ResourceSpec::CaCertificate(s) => {
                format!("{}/certificate/{:08}", s.certificate_authority_arn, n)
            }
            ResourceSpec::LeafCertificate(s) => {
                format!("{}/certificate/{:08}", s.certificate_authority_arn, n)
            }
            ResourceSpec::ManagedPolicy(s) => {
                format!("arn:{}:iam::{}:policy/{}", partition, account_id, s.name)
            }
            ResourceSpec::Role(s) => format!("arn:{}:iam::{}:role/{}", partition, account_id, s.name),
            ResourceSpec::TrustAnchor(_) => format!(
                "arn:{}:rolesanywhere:{}:{}:trust-anchor/{:08}",
                partition, region, account_id, n
            ),
            ResourceSpec::Profile(_) => format!(
                "arn:{}:rolesanywhere:{}:{}:profile/{:08}",
                partition, region, account_id, n
            ),
        }
    }
}

fn csr_for(subject: &Subject) -> String {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::default();
    params.distinguished_name = subject.to_distinguished_name().unwrap();
    params.serialize_request(&key).unwrap().pem().unwrap()
}

fn certificate(is_ca: bool) -> String {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(vec!["your-domain.com".to_string()]).unwrap();
    if is_ca {
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    }
    params.self_signed(&key).unwrap().pem()
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn find(&self, spec: &ResourceSpec) -> Result<Option<RemoteResource>> {
        let state = self.state.lock();
        let identity = spec.identity();
        Ok(state
            .records
            .iter()
            .find(|(_, r)| r.kind == spec.kind() && r.spec.identity() == identity)
            .map(|(id, r)| r.remote(id)))
    }

    async fn create(&self, spec: &ResourceSpec) -> Result<RemoteResource> {
        let kind = spec.kind();
        let mut state = self.state.lock();
        *state.creates.entry(kind).or_default() += 1;

        if let Some(message) = state.rejected.get(&kind) {
            return Err(Error::terminal(format!("ValidationException: {}", message)));
        }
        if let Some(remaining) = state.transient_failures.get_mut(&kind) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::transient("ThrottlingException: Rate exceeded"));
            }
        }

        let client_token = spec.idempotency_token();
        if let Some((id, record)) = state
            .records
            .iter()
            .find(|(_, r)| r.client_token.as_deref() == Some(client_token.as_str()))
        {
            return Ok(record.remote(id));
        }

        let mut attributes = BTreeMap::new();
        let (target, synchronous) = match spec {
            ResourceSpec::CertificateAuthority(s) => {
                attributes.insert(ATTR_CSR.to_string(), csr_for(&s.subject));
                (RemoteStatus::PendingCertificate, false)
            }
            ResourceSpec::CaCertificate(_) => {
                let is_ca = !state.end_entity_ca_certificates;
                attributes.insert(ATTR_CERTIFICATE.to_string(), certificate(is_ca));
                (RemoteStatus::Issued, false)
            }
            ResourceSpec::LeafCertificate(_) => (RemoteStatus::Issued, false),
            ResourceSpec::ManagedPolicy(_) | ResourceSpec::Role(_) => (RemoteStatus::Active, true),
            ResourceSpec::TrustAnchor(s) if !s.enabled => (RemoteStatus::Disabled, false),
            ResourceSpec::Profile(s) if !s.enabled => (RemoteStatus::Disabled, false),
            ResourceSpec::TrustAnchor(_) | ResourceSpec::Profile(_) => (RemoteStatus::Active, false),
        };

        let remaining = if synchronous { 0 } else { state.polls_until_ready };
        let status = if remaining == 0 && !state.stuck.contains(&kind) {
            target.clone()
        } else {
            RemoteStatus::Creating
        };

        let id = self.id_for(spec, &mut state);
        let record = Record {
            kind,
            spec: spec.clone(),
            status,
            target,
            remaining,
            client_token: Some(client_token),
            attributes,
        };
        let remote = record.remote(&id);
        state.records.insert(id, record);
        Ok(remote)
    }

    async fn describe(&self, kind: ResourceKind, id: &str) -> Result<RemoteResource> {
        let mut state = self.state.lock();
        *state.describes.entry(kind).or_default() += 1;
        let stuck = state.stuck.contains(&kind);

        let record = state
            .records
            .get_mut(id)
            .ok_or_else(|| Error::terminal(format!("ResourceNotFoundException: {}", id)))?;
        if !stuck && record.status != record.target {
            record.remaining = record.remaining.saturating_sub(1);
            if record.remaining == 0 {
                record.status = record.target.clone();
            }
        }
        Ok(record.remote(id))
    }

    async fn activate(&self, certificate_authority_arn: &str, _certificate_pem: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.activations += 1;
        let polls = state.polls_until_ready;
        let stuck = state.stuck.contains(&ResourceKind::CAActivation);

        let record = state
            .records
            .get_mut(certificate_authority_arn)
            .filter(|r| r.kind == ResourceKind::RootCA)
            .ok_or_else(|| {
                Error::terminal(format!(
                    "ResourceNotFoundException: {}",
                    certificate_authority_arn
                ))
            })?;
        if record.status == RemoteStatus::Active {
            return Ok(());
        }
        record.target = RemoteStatus::Active;
        record.remaining = polls;
        if polls == 0 && !stuck {
            record.status = RemoteStatus::Active;
        }
        Ok(())
    }

    async fn tag(&self, _kind: ResourceKind, id: &str, tags: &BTreeMap<String, String>) -> Result<()> {
        let mut state = self.state.lock();
        state.tag_attempts += 1;
        if state.fail_tagging {
            return Err(Error::terminal("AccessDeniedException: not authorized to tag"));
        }
        if !state.records.contains_key(id) {
            return Err(Error::terminal(format!("ResourceNotFoundException: {}", id)));
        }
        state
            .tags
            .entry(id.to_string())
            .or_default()
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.records.remove(id).is_none() {
            return Err(Error::terminal(format!("ResourceNotFoundException: {}", id)));
        }
        state.deleted.push(kind);
        Ok(())
    }
}
