//! Provisioning scenarios against the in-memory control plane

use std::time::Duration;

use trustchain::orchestrator::RunState;
use trustchain::policy::{trust_policy, Partition};
use trustchain::provider::{ControlPlane, RemoteStatus, ResourceSpec, RoleSpec};
use trustchain::resource::ResourceKind::{self, *};
use trustchain::Error;

use super::{fake, graph, orchestrator};

const ALL_STEPS: [ResourceKind; 8] = [
    RootCA,
    CACertificate,
    CAActivation,
    LeafCertificate,
    TrustAnchor,
    ManagedPolicy,
    Role,
    Profile,
];

// ==========================================================================
// Story: a fresh deployment provisions both branches and exports four ARNs
// ==========================================================================

#[tokio::test(start_paused = true)]
async fn full_deployment_completes_with_four_outputs() {
    let fake = fake();
    let orch = orchestrator(&fake);

    let report = orch.run(&graph()).await.unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert!(report.failed.is_empty());
    assert!(report.never_attempted.is_empty());
    assert_eq!(report.completed.len(), 8);
    for kind in ALL_STEPS {
        assert!(report.handles[&kind].is_active(), "{} not active", kind);
        assert!(fake.describes(kind) <= 3, "{} polled {} times", kind, fake.describes(kind));
    }

    let names: Vec<_> = report.outputs.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["RoleArn", "CertificateAuthorityArn", "TrustAnchorArn", "ProfileArn"]
    );
    for output in &report.outputs {
        assert!(!output.value.is_empty());
        assert_eq!(output.export_name, format!("VsCodeAiStack-{}", output.name));
    }
    assert_eq!(report.outputs, orch.outputs().export());
}

#[tokio::test(start_paused = true)]
async fn trust_anchor_is_bound_to_the_activated_ca() {
    let fake = fake();
    let report = orchestrator(&fake).run(&graph()).await.unwrap();

    let ca_arn = report.handles[&CAActivation].id();
    assert_eq!(ca_arn, report.handles[&RootCA].id());
    match fake.spec_of(TrustAnchor) {
        Some(ResourceSpec::TrustAnchor(anchor)) => {
            assert_eq!(anchor.certificate_authority_arn, ca_arn);
        }
        other => panic!("unexpected trust anchor spec {:?}", other),
    }
    assert_eq!(fake.activations(), 1);
}

#[tokio::test(start_paused = true)]
async fn configured_tags_are_applied_and_recorded() {
    let fake = fake();
    let report = orchestrator(&fake).run(&graph()).await.unwrap();

    let role = &report.handles[&Role];
    assert_eq!(
        role.metadata().get("Purpose").map(String::as_str),
        Some("BedrockAccess")
    );
    assert_eq!(fake.tags(role.id()), *role.metadata());
    assert!(report.handles[&ManagedPolicy].metadata().is_empty());
}

// ==========================================================================
// Story: re-running a finished deployment changes nothing
// ==========================================================================

#[tokio::test(start_paused = true)]
async fn second_run_reuses_every_resource() {
    let fake = fake();
    let graph = graph();

    let first = orchestrator(&fake).run(&graph).await.unwrap();
    let second = orchestrator(&fake).run(&graph).await.unwrap();

    assert_eq!(second.state, RunState::Completed);
    for kind in ALL_STEPS {
        assert_eq!(first.handles[&kind].id(), second.handles[&kind].id());
    }
    for kind in [RootCA, CACertificate, LeafCertificate, ManagedPolicy, Role, TrustAnchor, Profile] {
        assert_eq!(fake.creates(kind), 1, "{} created twice", kind);
        let spec = fake.spec_of(kind).unwrap();
        assert_eq!(fake.client_token(kind), Some(spec.idempotency_token()));
    }
    assert_eq!(fake.activations(), 1);
}

#[tokio::test]
async fn replayed_create_returns_the_original_resource() {
    let fake = fake();
    let spec = ResourceSpec::Role(RoleSpec {
        name: "bedrock-role-anywhere".to_string(),
        description: "Role for accessing Bedrock".to_string(),
        trust_policy: trust_policy(Partition::AwsUsGov),
        managed_policy_arns: vec![],
    });

    let first = fake.create(&spec).await.unwrap();
    let replay = fake.create(&spec).await.unwrap();

    assert_eq!(first.id, replay.id);
    assert_eq!(fake.creates(Role), 2);
    assert_eq!(fake.client_token(Role), Some(spec.idempotency_token()));
}

// ==========================================================================
// Story: a CA that never activates aborts the certificate branch only
// ==========================================================================

#[tokio::test(start_paused = true)]
async fn stuck_activation_times_out_and_blocks_dependents() {
    let fake = fake();
    fake.stick(CAActivation);
    let orch = orchestrator(&fake);

    let report = orch.run(&graph()).await.unwrap();

    assert_eq!(report.state, RunState::Aborted);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].kind, CAActivation);
    assert!(matches!(
        report.failed[0].error,
        Error::Timeout {
            kind: CAActivation,
            ..
        }
    ));
    assert_eq!(report.never_attempted, vec![LeafCertificate, TrustAnchor]);
    assert_eq!(fake.creates(TrustAnchor), 0);
    assert_eq!(fake.creates(LeafCertificate), 0);
}

#[tokio::test(start_paused = true)]
async fn aborted_run_exports_only_active_resources() {
    let fake = fake();
    fake.stick(CAActivation);

    let report = orchestrator(&fake).run(&graph()).await.unwrap();

    let names: Vec<_> = report.outputs.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, vec!["RoleArn", "ProfileArn"]);
    for output in &report.outputs {
        assert!(report
            .handles
            .values()
            .any(|h| h.is_active() && h.id() == output.value));
    }
    assert!(!report.handles.contains_key(&CAActivation));
}

// ==========================================================================
// Story: throttling is absorbed, validation failures are not
// ==========================================================================

#[tokio::test(start_paused = true)]
async fn throttled_creates_are_retried() {
    let fake = fake();
    fake.fail_transiently(Role, 2);

    let report = orchestrator(&fake).run(&graph()).await.unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(fake.creates(Role), 3);
}

#[tokio::test(start_paused = true)]
async fn persistent_throttling_gives_up_after_max_attempts() {
    let fake = fake();
    fake.fail_transiently(Role, 500);

    let report = orchestrator(&fake).run(&graph()).await.unwrap();

    assert_eq!(report.state, RunState::Aborted);
    assert_eq!(report.failed[0].kind, Role);
    assert!(matches!(report.failed[0].error, Error::Transient(_)));
    assert_eq!(fake.creates(Role), super::config().provisioning.retry.max_attempts);
    assert!(report.never_attempted.contains(&Profile));
}

#[tokio::test(start_paused = true)]
async fn rejected_policy_aborts_without_retry() {
    let fake = fake();
    fake.reject(ManagedPolicy, "MalformedPolicyDocument");

    let report = orchestrator(&fake).run(&graph()).await.unwrap();

    assert_eq!(report.state, RunState::Aborted);
    assert_eq!(report.failed[0].kind, ManagedPolicy);
    assert!(matches!(report.failed[0].error, Error::Terminal(_)));
    assert_eq!(fake.creates(ManagedPolicy), 1);

    // RootCA was already in flight and finished; nothing after it started
    assert!(report.handles[&RootCA].is_active());
    assert!(report.never_attempted.contains(&Role));
    assert!(report.never_attempted.contains(&CACertificate));
    assert!(matches!(report.into_outputs(), Err(Error::Terminal(_))));
}

#[tokio::test(start_paused = true)]
async fn existing_role_with_other_attributes_is_a_conflict() {
    let fake = fake();
    fake.seed(
        ResourceSpec::Role(RoleSpec {
            name: "bedrock-role-anywhere".to_string(),
            description: "created by hand".to_string(),
            trust_policy: trust_policy(Partition::AwsUsGov),
            managed_policy_arns: vec![],
        }),
        RemoteStatus::Active,
    );

    let report = orchestrator(&fake).run(&graph()).await.unwrap();

    assert_eq!(report.state, RunState::Aborted);
    assert_eq!(report.failed[0].kind, Role);
    assert!(report.failed[0]
        .error
        .to_string()
        .contains("different attributes"));
    assert_eq!(fake.creates(Role), 0);
}

#[tokio::test(start_paused = true)]
async fn end_entity_certificate_never_activates_the_ca() {
    let fake = fake();
    fake.issue_end_entity_certificates();

    let report = orchestrator(&fake).run(&graph()).await.unwrap();

    assert_eq!(report.state, RunState::Aborted);
    assert_eq!(report.failed[0].kind, CAActivation);
    assert!(report.failed[0].error.to_string().contains("not a CA certificate"));
    assert_eq!(fake.activations(), 0);
}

#[tokio::test(start_paused = true)]
async fn tagging_failures_do_not_abort() {
    let fake = fake();
    fake.fail_tagging();

    let report = orchestrator(&fake).run(&graph()).await.unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(fake.tag_attempts(), 4);
    assert!(report.handles.values().all(|h| h.metadata().is_empty()));
}

// ==========================================================================
// Story: an operator stops a run and picks it up later
// ==========================================================================

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_polling() {
    let fake = fake();
    fake.stick(CAActivation);
    let orch = orchestrator(&fake);
    let token = orch.cancellation_token();
    let graph = graph();

    let (report, _) = tokio::join!(orch.run(&graph), async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        token.cancel();
    });
    let report = report.unwrap();

    assert_eq!(report.state, RunState::Aborted);
    assert_eq!(report.interrupted, vec![CAActivation]);
    assert!(report.failed.is_empty());
    assert_eq!(report.interruption.as_deref(), Some("cancelled"));

    let polls = fake.describes(CAActivation);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(fake.describes(CAActivation), polls);
}

#[tokio::test(start_paused = true)]
async fn resume_finishes_from_checkpoint() {
    let fake = fake();
    fake.stick(CAActivation);
    let graph = graph();

    let aborted = orchestrator(&fake).run(&graph).await.unwrap();
    assert_eq!(aborted.state, RunState::Aborted);
    let checkpoint = aborted.checkpoint();
    assert!(!checkpoint.handles.contains_key(&CAActivation));

    fake.unstick(CAActivation);
    let report = orchestrator(&fake)
        .resume(&graph, checkpoint)
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(
        report.resumed,
        vec![RootCA, CACertificate, ManagedPolicy, Role, Profile]
    );
    assert!(report.completed.contains(&CAActivation));
    assert!(report.completed.contains(&TrustAnchor));
    assert_eq!(report.outputs.len(), 4);
    for kind in [RootCA, CACertificate, ManagedPolicy, Role, Profile] {
        assert_eq!(fake.creates(kind), 1);
    }
}

// ==========================================================================
// Story: teardown removes dependents before what they depend on
// ==========================================================================

#[tokio::test(start_paused = true)]
async fn teardown_runs_in_reverse_dependency_order() {
    let fake = fake();
    let graph = graph();
    let orch = orchestrator(&fake);
    let report = orch.run(&graph).await.unwrap();

    let teardown = orch.teardown(&graph, &report.handles).await.unwrap();

    assert!(teardown.is_clean());
    assert_eq!(teardown.skipped, vec![CAActivation]);
    assert_eq!(teardown.deleted, fake.deleted());
    assert_eq!(teardown.deleted.len(), 7);

    let pos = |kind| teardown.deleted.iter().position(|k| *k == kind).unwrap();
    assert!(pos(TrustAnchor) < pos(RootCA));
    assert!(pos(LeafCertificate) < pos(CACertificate));
    assert!(pos(Profile) < pos(Role));
    assert!(pos(Role) < pos(ManagedPolicy));
}
