//! End-to-end scenarios over the assembled core: gateway validation,
//! pipeline transport, ledger sequencing, Merkle sealing, and
//! verification, all against the in-memory backend with a manual clock
//! and deterministic keys.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use caracal_crypto::{sha256, SignatureAlgorithm, SignerHandle};
use caracal_gateway::{ValidationRequest, Validator, ValidatorConfig, Verdict};
use caracal_ledger::{BatcherConfig, LedgerConfig, LedgerError, PartitionWriter};
use caracal_pipeline::{InMemoryPipeline, PipelineConfig, PipelineProducer};
use caracal_store::{
    EventStore, InMemoryStore, IssueMandateRequest, IssuedMandate, KeyStore, MandateIssuer,
    NewPrincipal, PolicyCache, PolicyDraft, PolicyStore, PrincipalStore, SequenceStore,
};
use caracal_types::{
    Clock, Decision, DenialReason, EventKind, KeyId, ManualClock, MandateToken, Principal,
    PrincipalKind, SigningKeyRecord, ValidatorId,
};
use caracal_verifier::{verify_inclusion, QueryService, RangeVerification};

struct Harness {
    store: Arc<InMemoryStore>,
    clock: Arc<ManualClock>,
    validator: Validator,
    issuer: MandateIssuer,
    verifier: QueryService,
    pipeline: Arc<InMemoryPipeline>,
    root_signer: SignerHandle,
    shutdown: watch::Sender<bool>,
    writer: Option<JoinHandle<Result<(), LedgerError>>>,
}

impl Harness {
    /// Assemble the full core with a frozen clock at t=1000 and a writer
    /// that seals at `batch_max` events.
    async fn start(batch_max: usize) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::at_epoch_seconds(1000));
        let pipeline = Arc::new(InMemoryPipeline::new(PipelineConfig::default()));

        let root_signer = SignerHandle::from_seed(SignatureAlgorithm::Ed25519, [42u8; 32]).unwrap();
        let key_id = KeyId::new("key:root");
        store
            .register_key(SigningKeyRecord {
                id: key_id.clone(),
                algorithm: root_signer.algorithm(),
                public_key: root_signer.public_key_hex(),
                created_at: clock.now(),
                retired_at: None,
            })
            .await
            .unwrap();

        let validator = Validator::new(
            store.clone(),
            Arc::new(PolicyCache::with_default_ttl()),
            pipeline.clone(),
            clock.clone(),
            ValidatorConfig {
                validator_id: ValidatorId::new("val:gw-1"),
                clock_skew: ChronoDuration::seconds(0),
                ..ValidatorConfig::default()
            },
        );
        let issuer = MandateIssuer::new(store.clone(), clock.clone(), ValidatorId::new("val:iss"));
        let verifier = QueryService::new(store.clone());

        let writer_signer =
            Arc::new(SignerHandle::from_seed(SignatureAlgorithm::Ed25519, [42u8; 32]).unwrap());
        let writer = PartitionWriter::new(
            0,
            store.clone(),
            pipeline.clone(),
            writer_signer,
            key_id,
            clock.clone(),
            LedgerConfig {
                poll_wait: Duration::from_millis(20),
                batch: BatcherConfig {
                    max_events: batch_max,
                    max_age: ChronoDuration::seconds(300),
                },
                ..LedgerConfig::default()
            },
        );
        let (shutdown, shutdown_rx) = watch::channel(false);
        let writer = Some(tokio::spawn(writer.run(shutdown_rx)));

        Self {
            store,
            clock,
            validator,
            issuer,
            verifier,
            pipeline,
            root_signer,
            shutdown,
            writer,
        }
    }

    /// Let the writer drain everything currently in the pipeline.
    async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    /// Drain and stop the writer, sealing any open buffer.
    async fn stop(mut self) -> Arc<InMemoryStore> {
        self.shutdown.send(true).unwrap();
        if let Some(writer) = self.writer.take() {
            writer.await.unwrap().unwrap();
        }
        self.store
    }

    async fn principal(&self, name: &str, signer: &SignerHandle) -> Principal {
        self.store
            .register_principal(NewPrincipal {
                workspace: "ws".into(),
                name: name.into(),
                owner: "ops".into(),
                kind: PrincipalKind::Agent,
                parent_id: None,
                metadata: HashMap::new(),
                public_key: signer.public_key_hex(),
                algorithm: signer.algorithm(),
            })
            .await
            .unwrap()
    }

    async fn policy(&self, principal: &Principal, max_depth: u32) {
        self.store
            .put_policy(PolicyDraft {
                principal_id: principal.id.clone(),
                resource_patterns: vec!["api:x/*".into()],
                allowed_actions: vec!["read".into(), "write".into()],
                max_validity_seconds: 3600,
                max_delegation_depth: max_depth,
                effective_from: self.clock.now(),
                change_reason: "initial".into(),
            })
            .await
            .unwrap();
    }

    async fn issue(
        &self,
        issuer: &Principal,
        subject: &Principal,
        signer: &SignerHandle,
        window: (i64, i64),
        parent: Option<&IssuedMandate>,
    ) -> IssuedMandate {
        let issued = self
            .issuer
            .issue(
                IssueMandateRequest {
                    issuer_id: issuer.id.clone(),
                    subject_id: subject.id.clone(),
                    resource_scope: vec!["api:x/y".into()],
                    action_scope: vec!["read".into()],
                    valid_from: DateTime::from_timestamp(window.0, 0).unwrap(),
                    valid_until: DateTime::from_timestamp(window.1, 0).unwrap(),
                    parent_id: parent.map(|p| p.mandate.id.clone()),
                    intent: Default::default(),
                },
                signer,
            )
            .await
            .unwrap();
        self.pipeline
            .publish(&issued.event, Duration::from_millis(100))
            .await
            .unwrap();
        issued
    }

    async fn request(
        &self,
        token: &MandateToken,
        nonce: &str,
        action: &str,
        resource: &str,
    ) -> Verdict {
        self.validator
            .validate(ValidationRequest {
                token: token.clone(),
                action: action.into(),
                resource: resource.into(),
                nonce: nonce.into(),
                timestamp: self.clock.now().timestamp(),
            })
            .await
            .unwrap()
            .verdict
    }
}

fn p1_signer() -> SignerHandle {
    SignerHandle::from_seed(SignatureAlgorithm::Ed25519, [1u8; 32]).unwrap()
}

fn p2_signer() -> SignerHandle {
    SignerHandle::from_seed(SignatureAlgorithm::Ed25519, [2u8; 32]).unwrap()
}

/// S1 — happy path: allow, one `validated` event at the next sequence.
#[tokio::test]
async fn s1_happy_path_records_validated_event() {
    let h = Harness::start(1000).await;
    let signer = p1_signer();
    let p1 = h.principal("p1", &signer).await;
    h.policy(&p1, 0).await;
    let mandate = h.issue(&p1, &p1, &signer, (1000, 1600), None).await;

    h.settle().await;
    let seq_before = h.store.current_sequence().await.unwrap();

    h.clock.set_epoch_seconds(1200);
    let verdict = h.request(&mandate.token, "n-s1", "read", "api:x/y").await;
    assert_eq!(verdict, Verdict::Allow);

    h.settle().await;
    let event = h
        .store
        .get_event(seq_before + 1)
        .await
        .unwrap()
        .expect("decision persisted at the next sequence");
    assert_eq!(event.event.kind, EventKind::Validated);
    assert_eq!(event.event.decision, Decision::Allowed);
    assert_eq!(event.event.principal_id, p1.id);
    assert_eq!(event.event.mandate_id, Some(mandate.mandate.id.clone()));
    h.stop().await;
}

/// S2 — scope escape: `write` is outside the mandate's action scope.
#[tokio::test]
async fn s2_action_outside_scope_is_denied_and_recorded() {
    let h = Harness::start(1000).await;
    let signer = p1_signer();
    let p1 = h.principal("p1", &signer).await;
    h.policy(&p1, 0).await;
    let mandate = h.issue(&p1, &p1, &signer, (1000, 1600), None).await;

    h.clock.set_epoch_seconds(1200);
    let verdict = h.request(&mandate.token, "n-s2", "write", "api:x/y").await;
    assert_eq!(verdict, Verdict::Deny(DenialReason::ScopeAction));

    h.settle().await;
    let store = h.stop().await;
    let head = store.current_sequence().await.unwrap();
    let event = store.get_event(head).await.unwrap().unwrap();
    assert_eq!(event.event.kind, EventKind::Denied);
    assert_eq!(event.event.denial_reason, Some(DenialReason::ScopeAction));
}

/// S3 — temporal: one second past `valid_until` is expired.
#[tokio::test]
async fn s3_expired_mandate_is_denied() {
    let h = Harness::start(1000).await;
    let signer = p1_signer();
    let p1 = h.principal("p1", &signer).await;
    h.policy(&p1, 0).await;
    let mandate = h.issue(&p1, &p1, &signer, (1000, 1600), None).await;

    h.clock.set_epoch_seconds(1601);
    let verdict = h.request(&mandate.token, "n-s3", "read", "api:x/y").await;
    assert_eq!(verdict, Verdict::Deny(DenialReason::TemporalExpired));
    h.stop().await;
}

/// S4 — replay: an identical nonce inside the window is rejected.
#[tokio::test]
async fn s4_replayed_nonce_is_denied() {
    let h = Harness::start(1000).await;
    let signer = p1_signer();
    let p1 = h.principal("p1", &signer).await;
    h.policy(&p1, 0).await;
    let mandate = h.issue(&p1, &p1, &signer, (1000, 1600), None).await;

    h.clock.set_epoch_seconds(1200);
    let first = h.request(&mandate.token, "n-s4", "read", "api:x/y").await;
    assert_eq!(first, Verdict::Allow);

    h.clock.set_epoch_seconds(1201);
    let second = h.request(&mandate.token, "n-s4", "read", "api:x/y").await;
    assert_eq!(second, Verdict::Deny(DenialReason::ReplayDetected));
    h.stop().await;
}

/// S5 — delegation chain plus revocation cascade.
#[tokio::test]
async fn s5_revoking_the_root_kills_the_grandchild() {
    let h = Harness::start(1000).await;
    let s1 = p1_signer();
    let s2 = p2_signer();
    let s3 = SignerHandle::from_seed(SignatureAlgorithm::Ed25519, [3u8; 32]).unwrap();
    let p1 = h.principal("p1", &s1).await;
    let p2 = h.principal("p2", &s2).await;
    let p3 = h.principal("p3", &s3).await;
    h.policy(&p1, 2).await;
    h.policy(&p2, 2).await;

    let root = h.issue(&p1, &p1, &s1, (1000, 1600), None).await;
    let child = h.issue(&p1, &p2, &s1, (1100, 1500), Some(&root)).await;
    let grandchild = h.issue(&p2, &p3, &s2, (1150, 1400), Some(&child)).await;
    assert_eq!(grandchild.mandate.delegation_depth, 2);

    h.clock.set_epoch_seconds(1200);
    let verdict = h
        .request(&grandchild.token, "n-s5-a", "read", "api:x/y")
        .await;
    assert_eq!(verdict, Verdict::Allow);

    h.clock.set_epoch_seconds(1205);
    let outcome = h.issuer.revoke(&root.mandate.id, "incident").await.unwrap();
    assert_eq!(outcome.revoked.len(), 3);
    h.pipeline
        .publish(&outcome.event, Duration::from_millis(100))
        .await
        .unwrap();

    h.clock.set_epoch_seconds(1210);
    let verdict = h
        .request(&grandchild.token, "n-s5-b", "read", "api:x/y")
        .await;
    assert_eq!(verdict, Verdict::Deny(DenialReason::Revoked));

    // The audit trace shows the full ancestry with tombstones and the
    // persisted issuance events.
    h.settle().await;
    let trace = h.verifier.chain_trace(&grandchild.mandate.id).await.unwrap();
    assert_eq!(trace.len(), 3);
    assert!(trace.iter().all(|link| link.revocation.is_some()));
    assert!(trace.iter().all(|link| link.issuance_event.is_some()));
    assert_eq!(trace[0].mandate.id, root.mandate.id);
    assert_eq!(trace[2].mandate.id, grandchild.mandate.id);
    h.stop().await;
}

/// S6 — Merkle tamper detection over a four-event batch.
#[tokio::test]
async fn s6_range_verification_localizes_tampering() {
    let h = Harness::start(4).await;
    let signer = p1_signer();
    let p1 = h.principal("p1", &signer).await;
    h.policy(&p1, 0).await;
    let mandate = h.issue(&p1, &p1, &signer, (1000, 1600), None).await;

    h.clock.set_epoch_seconds(1200);
    // The issuance event plus three validations make four leaves.
    for i in 0..3 {
        let verdict = h
            .request(&mandate.token, &format!("n-s6-{i}"), "read", "api:x/y")
            .await;
        assert_eq!(verdict, Verdict::Allow);
    }
    h.settle().await;

    let batch = h
        .store
        .batch_for_seq(1)
        .await
        .unwrap()
        .expect("four events sealed at the size threshold");
    assert_eq!((batch.seq_lo, batch.seq_hi), (1, 4));

    // Root is exactly H(H(h0 ∥ h1) ∥ H(h2 ∥ h3)) over the stored leaves.
    let events = h.store.events_in_range(1, 4).await.unwrap();
    let leaves: Vec<[u8; 32]> = events.iter().map(|e| e.leaf_hash().unwrap()).collect();
    let pair = |a: &[u8; 32], b: &[u8; 32]| {
        let mut joined = [0u8; 64];
        joined[..32].copy_from_slice(a);
        joined[32..].copy_from_slice(b);
        sha256(&joined)
    };
    let expected_root = pair(&pair(&leaves[0], &leaves[1]), &pair(&leaves[2], &leaves[3]));
    assert_eq!(hex::encode(expected_root), batch.root_hash);

    // Every persisted event proves its inclusion.
    for seq in 1..=4 {
        let proof = h.verifier.inclusion_proof(seq).await.unwrap();
        assert!(verify_inclusion(&proof, &h.root_signer.public_key_hex()));
    }
    assert_eq!(
        h.verifier.verify_range(1, 4).await.unwrap(),
        RangeVerification::Verified {
            batches: 1,
            events: 4
        }
    );

    // Mutate event 2's stored resource field.
    let mut tampered = h.store.get_event(2).await.unwrap().unwrap();
    tampered.event.resource = "api:x/tampered".into();
    h.store.overwrite_event_unchecked(tampered).unwrap();

    match h.verifier.verify_range(1, 4).await.unwrap() {
        RangeVerification::TamperDetected {
            first_divergent_seq,
            ..
        } => assert_eq!(first_divergent_seq, 2),
        other => panic!("expected tamper detection, got {other:?}"),
    }
    h.stop().await;
}

/// Sequence numbers stay unique and gap-free across mixed traffic.
#[tokio::test]
async fn sequences_are_gap_free_across_scenarios() {
    let h = Harness::start(1000).await;
    let signer = p1_signer();
    let p1 = h.principal("p1", &signer).await;
    h.policy(&p1, 0).await;
    let mandate = h.issue(&p1, &p1, &signer, (1000, 1600), None).await;

    h.clock.set_epoch_seconds(1200);
    for i in 0..5 {
        h.request(&mandate.token, &format!("n-gap-{i}"), "read", "api:x/y")
            .await;
    }
    // A denial and a replay also consume sequence numbers.
    h.request(&mandate.token, "n-gap-deny", "write", "api:x/y").await;
    h.request(&mandate.token, "n-gap-0", "read", "api:x/y").await;

    h.settle().await;
    let store = h.stop().await;
    let head = store.current_sequence().await.unwrap();
    assert_eq!(head, 8); // 1 issuance + 5 allows + 1 scope denial + 1 replay denial
    let events = store.events_in_range(1, head).await.unwrap();
    assert_eq!(events.len(), head as usize);
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.seq, i as u64 + 1);
    }
}

/// A token round-trips the wire encoding and still validates.
#[tokio::test]
async fn token_wire_round_trip_validates() {
    let h = Harness::start(1000).await;
    let signer = p1_signer();
    let p1 = h.principal("p1", &signer).await;
    h.policy(&p1, 0).await;
    let mandate = h.issue(&p1, &p1, &signer, (1000, 1600), None).await;

    let encoded = mandate.token.encode().unwrap();
    let decoded = MandateToken::decode(&encoded).unwrap();

    h.clock.set_epoch_seconds(1200);
    let verdict = h.request(&decoded, "n-rt", "read", "api:x/y").await;
    assert_eq!(verdict, Verdict::Allow);
    h.stop().await;
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    fn action_subset() -> impl Strategy<Value = Vec<String>> {
        proptest::collection::vec(
            prop_oneof![
                Just("read".to_string()),
                Just("write".to_string()),
                Just("execute".to_string()),
            ],
            1..3,
        )
    }

    proptest! {
        /// Invariant: a mandate's action scope is a subset of the issuer
        /// policy's actions — issuance succeeds exactly when the request
        /// stays inside `{read, write}`.
        #[test]
        fn issuance_enforces_action_subset(actions in action_subset()) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");

            rt.block_on(async move {
                let store = Arc::new(InMemoryStore::new());
                let clock = Arc::new(ManualClock::at_epoch_seconds(1000));
                let signer = p1_signer();
                let principal = store
                    .register_principal(NewPrincipal {
                        workspace: "ws".into(),
                        name: "p1".into(),
                        owner: "ops".into(),
                        kind: PrincipalKind::Agent,
                        parent_id: None,
                        metadata: HashMap::new(),
                        public_key: signer.public_key_hex(),
                        algorithm: signer.algorithm(),
                    })
                    .await
                    .unwrap();
                store
                    .put_policy(PolicyDraft {
                        principal_id: principal.id.clone(),
                        resource_patterns: vec!["api:x/*".into()],
                        allowed_actions: vec!["read".into(), "write".into()],
                        max_validity_seconds: 3600,
                        max_delegation_depth: 0,
                        effective_from: clock.now(),
                        change_reason: "initial".into(),
                    })
                    .await
                    .unwrap();

                let issuer = MandateIssuer::new(
                    store.clone(),
                    clock.clone(),
                    ValidatorId::new("val:iss"),
                );
                let in_policy = actions.iter().all(|a| a == "read" || a == "write");
                let result = issuer
                    .issue(
                        IssueMandateRequest {
                            issuer_id: principal.id.clone(),
                            subject_id: principal.id.clone(),
                            resource_scope: vec!["api:x/y".into()],
                            action_scope: actions.clone(),
                            valid_from: DateTime::from_timestamp(1000, 0).unwrap(),
                            valid_until: DateTime::from_timestamp(1600, 0).unwrap(),
                            parent_id: None,
                            intent: Default::default(),
                        },
                        &signer,
                    )
                    .await;

                assert_eq!(result.is_ok(), in_policy, "actions: {actions:?}");
            });
        }
    }
}
