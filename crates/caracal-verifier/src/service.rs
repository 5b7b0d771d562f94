use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use caracal_ledger::merkle::{merkle_proof, merkle_root};
use caracal_store::{
    CaracalStore, EventStore, KeyStore, MandateStore, SequenceStore, StoreError,
};
use caracal_types::{
    BatchId, LedgerEvent, Mandate, MandateId, MerkleBatch, Revocation,
};

use crate::proof::InclusionProof;

/// Verifier-layer errors.
#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("event {0} not found")]
    UnknownEvent(u64),

    #[error("event {0} is not yet sealed into a batch")]
    Unbatched(u64),

    #[error("mandate {0} not found")]
    UnknownMandate(String),

    #[error("signing key {0} not found")]
    UnknownKey(String),

    #[error("ledger inconsistency: {0}")]
    Inconsistent(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a range verification.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RangeVerification {
    Verified {
        batches: usize,
        events: usize,
    },
    /// The stored ledger diverges from what its hashes commit to.
    TamperDetected {
        first_divergent_seq: u64,
        batch_id: BatchId,
    },
}

/// One link of a mandate's ancestry, root first.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ChainLink {
    pub mandate: Mandate,
    pub revocation: Option<Revocation>,
    pub issuance_event: Option<LedgerEvent>,
}

/// Ledger summary counts.
#[derive(Clone, Debug, serde::Serialize)]
pub struct LedgerStatistics {
    pub total_events: u64,
    pub allowed: u64,
    pub denied: u64,
    pub by_kind: HashMap<String, u64>,
    pub sealed_batches: u64,
    pub unbatched_events: u64,
}

/// Read-only query service over the store.
pub struct QueryService {
    store: Arc<dyn CaracalStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn CaracalStore>) -> Self {
        Self { store }
    }

    /// O(log n) inclusion proof for one event, via its batch back-pointer.
    pub async fn inclusion_proof(&self, seq: u64) -> Result<InclusionProof, VerifierError> {
        let event = self
            .store
            .get_event(seq)
            .await?
            .ok_or(VerifierError::UnknownEvent(seq))?;
        let batch = self
            .store
            .batch_for_seq(seq)
            .await?
            .ok_or(VerifierError::Unbatched(seq))?;
        let members = self.store.events_for_batch(&batch.id).await?;

        let leaves = members
            .iter()
            .map(|e| e.leaf_hash())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| VerifierError::Inconsistent(e.to_string()))?;
        let index = members
            .iter()
            .position(|e| e.seq == seq)
            .ok_or_else(|| VerifierError::Inconsistent(format!("event {seq} missing from batch")))?;
        let steps = merkle_proof(&leaves, index)
            .ok_or_else(|| VerifierError::Inconsistent("proof index out of range".into()))?;

        let key = self
            .store
            .get_key(&batch.signer_key_id)
            .await?
            .ok_or_else(|| VerifierError::UnknownKey(batch.signer_key_id.to_string()))?;

        debug!(seq, batch = %batch.id, "inclusion proof generated");
        Ok(InclusionProof {
            seq,
            leaf_hash: event.event_hash,
            steps,
            expected_root: batch.root_hash,
            batch_id: batch.id,
            signer_key_id: key.id,
            algorithm: key.algorithm,
            root_signature: batch.signature,
        })
    }

    /// Recompute every batch root covering `[lo, hi]` from the stored
    /// events and compare to the persisted roots. Reports the first
    /// diverging sequence number on mismatch.
    pub async fn verify_range(&self, lo: u64, hi: u64) -> Result<RangeVerification, VerifierError> {
        let events = self.store.events_in_range(lo, hi).await?;

        let mut batch_ids: Vec<BatchId> = Vec::new();
        for event in &events {
            if let Some(batch_id) = &event.batch_id {
                if !batch_ids.contains(batch_id) {
                    batch_ids.push(batch_id.clone());
                }
            }
        }

        let mut verified_events = 0usize;
        for batch_id in &batch_ids {
            let batch = self
                .store
                .get_batch(batch_id)
                .await?
                .ok_or_else(|| VerifierError::Inconsistent(format!("batch {batch_id} missing")))?;
            if let Some(divergent) = self.verify_batch(&batch).await? {
                warn!(batch = %batch.id, seq = divergent, "tamper detected");
                return Ok(RangeVerification::TamperDetected {
                    first_divergent_seq: divergent,
                    batch_id: batch.id,
                });
            }
            verified_events += batch.len() as usize;
        }

        Ok(RangeVerification::Verified {
            batches: batch_ids.len(),
            events: verified_events,
        })
    }

    /// Returns the first diverging sequence number inside one batch, or
    /// `None` when the stored root reproduces exactly.
    async fn verify_batch(&self, batch: &MerkleBatch) -> Result<Option<u64>, VerifierError> {
        let members = self.store.events_for_batch(&batch.id).await?;
        if members.is_empty() {
            return Err(VerifierError::Inconsistent(format!(
                "batch {} has no member events",
                batch.id
            )));
        }

        // Leaves recomputed from the stored fields, not the stored hash:
        // a mutated row diverges here and names its own sequence.
        let mut leaves = Vec::with_capacity(members.len());
        for event in &members {
            let recomputed = event
                .recompute_hash()
                .map_err(|e| VerifierError::Inconsistent(e.to_string()))?;
            if recomputed != event.event_hash {
                return Ok(Some(event.seq));
            }
            let event_hash = hex::decode(&recomputed)
                .map_err(|e| VerifierError::Inconsistent(e.to_string()))?;
            let leaf = <[u8; 32]>::try_from(event_hash.as_slice())
                .map_err(|_| VerifierError::Inconsistent("event hash must be 32 bytes".into()))?;
            leaves.push(leaf);
        }

        let root = merkle_root(&leaves)
            .ok_or_else(|| VerifierError::Inconsistent("empty leaf set".into()))?;
        if hex::encode(root) != batch.root_hash {
            // Leaves all reproduce but the root does not: the batch row
            // itself diverged. Name its first member.
            return Ok(Some(members[0].seq));
        }
        Ok(None)
    }

    /// Ordered ancestry of a mandate with issuance events, for audit.
    pub async fn chain_trace(&self, mandate_id: &MandateId) -> Result<Vec<ChainLink>, VerifierError> {
        let lookup = self
            .store
            .lookup_mandate(mandate_id)
            .await?
            .ok_or_else(|| VerifierError::UnknownMandate(mandate_id.to_string()))?;

        let mut links = Vec::with_capacity(lookup.chain.len());
        for id in &lookup.chain {
            let mandate = self
                .store
                .get_mandate(id)
                .await?
                .ok_or_else(|| VerifierError::UnknownMandate(id.to_string()))?;
            let revocation = self.store.get_revocation(id).await?;
            let issuance_event = self.store.issuance_event(id).await?;
            links.push(ChainLink {
                mandate,
                revocation,
                issuance_event,
            });
        }
        Ok(links)
    }

    /// Point-in-time summary of the ledger.
    pub async fn statistics(&self) -> Result<LedgerStatistics, VerifierError> {
        let head = self.store.current_sequence().await?;
        if head == 0 {
            return Ok(LedgerStatistics {
                total_events: 0,
                allowed: 0,
                denied: 0,
                by_kind: HashMap::new(),
                sealed_batches: 0,
                unbatched_events: 0,
            });
        }

        let events = self.store.events_in_range(1, head).await?;
        let mut by_kind: HashMap<String, u64> = HashMap::new();
        let mut allowed = 0;
        let mut denied = 0;
        let mut batches: Vec<BatchId> = Vec::new();
        let mut unbatched = 0;

        for event in &events {
            let kind = format!("{:?}", event.event.kind).to_lowercase();
            *by_kind.entry(kind).or_insert(0) += 1;
            match event.event.decision {
                caracal_types::Decision::Allowed => allowed += 1,
                caracal_types::Decision::Denied => denied += 1,
            }
            match &event.batch_id {
                Some(batch_id) if !batches.contains(batch_id) => batches.push(batch_id.clone()),
                Some(_) => {}
                None => unbatched += 1,
            }
        }

        Ok(LedgerStatistics {
            total_events: events.len() as u64,
            allowed,
            denied,
            by_kind,
            sealed_batches: batches.len() as u64,
            unbatched_events: unbatched,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::verify_inclusion;
    use caracal_crypto::{SignatureAlgorithm, SignerHandle};
    use caracal_ledger::{BatcherConfig, MerkleBatcher};
    use caracal_store::{EventStore, InMemoryStore, KeyStore, SequenceStore};
    use caracal_types::{
        AuthorityEvent, BatchCloseReason, Decision, EventKind, KeyId, PrincipalId,
        SigningKeyRecord, ValidatorId,
    };
    use chrono::{DateTime, Utc};

    fn event(nonce: &str, resource: &str) -> AuthorityEvent {
        AuthorityEvent {
            timestamp: DateTime::from_timestamp(1200, 0).unwrap(),
            kind: EventKind::Validated,
            principal_id: PrincipalId::new("prn:p1"),
            mandate_id: None,
            action: "read".into(),
            resource: resource.into(),
            decision: Decision::Allowed,
            denial_reason: None,
            delegation_chain: vec![],
            origin_validator: ValidatorId::new("val:gw"),
            nonce: nonce.into(),
            correlation_id: None,
        }
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        service: QueryService,
        signer: SignerHandle,
    }

    /// Persist `count` events and seal them into one signed batch.
    async fn sealed_fixture(count: u64) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let signer = SignerHandle::from_seed(SignatureAlgorithm::Ed25519, [5u8; 32]).unwrap();
        let key_id = KeyId::new("key:test");
        store
            .register_key(SigningKeyRecord {
                id: key_id.clone(),
                algorithm: signer.algorithm(),
                public_key: signer.public_key_hex(),
                created_at: Utc::now(),
                retired_at: None,
            })
            .await
            .unwrap();

        let mut batcher = MerkleBatcher::new(BatcherConfig::default());
        let now = Utc::now();
        for i in 1..=count {
            let seq = store.next_sequence().await.unwrap();
            let sealed =
                caracal_types::LedgerEvent::sealed(seq, event(&format!("n-{i}"), "api:x/y"))
                    .unwrap();
            store
                .append_events(0, vec![sealed.clone()], seq)
                .await
                .unwrap();
            batcher.push(sealed, now);
        }
        let sealed = batcher
            .seal(BatchCloseReason::SizeThreshold, &signer, &key_id, now)
            .unwrap();
        store
            .insert_batch(sealed.batch, &sealed.member_seqs)
            .await
            .unwrap();

        Fixture {
            service: QueryService::new(store.clone()),
            store,
            signer,
        }
    }

    #[tokio::test]
    async fn proofs_verify_for_every_event_in_a_batch() {
        let fx = sealed_fixture(4).await;
        for seq in 1..=4 {
            let proof = fx.service.inclusion_proof(seq).await.unwrap();
            assert!(verify_inclusion(&proof, &fx.signer.public_key_hex()));
            assert_eq!(proof.steps.len(), 2);
        }
    }

    #[tokio::test]
    async fn single_event_batch_has_empty_sibling_list() {
        let fx = sealed_fixture(1).await;
        let proof = fx.service.inclusion_proof(1).await.unwrap();
        assert!(proof.steps.is_empty());
        assert_eq!(proof.leaf_hash, proof.expected_root);
        assert!(verify_inclusion(&proof, &fx.signer.public_key_hex()));
    }

    #[tokio::test]
    async fn odd_leaf_count_proofs_still_verify() {
        let fx = sealed_fixture(5).await;
        for seq in 1..=5 {
            let proof = fx.service.inclusion_proof(seq).await.unwrap();
            assert!(verify_inclusion(&proof, &fx.signer.public_key_hex()));
        }
    }

    #[tokio::test]
    async fn wrong_public_key_rejects_a_valid_proof() {
        let fx = sealed_fixture(2).await;
        let proof = fx.service.inclusion_proof(1).await.unwrap();
        let other = SignerHandle::from_seed(SignatureAlgorithm::Ed25519, [6u8; 32]).unwrap();
        assert!(!verify_inclusion(&proof, &other.public_key_hex()));
    }

    #[tokio::test]
    async fn range_verification_localizes_a_mutated_event() {
        let fx = sealed_fixture(4).await;
        assert_eq!(
            fx.service.verify_range(1, 4).await.unwrap(),
            RangeVerification::Verified {
                batches: 1,
                events: 4
            }
        );

        // Mutate event 2's stored resource field in place.
        let mut tampered = fx.store.get_event(2).await.unwrap().unwrap();
        tampered.event.resource = "api:x/else".into();
        fx.store.overwrite_event_unchecked(tampered).unwrap();

        match fx.service.verify_range(1, 4).await.unwrap() {
            RangeVerification::TamperDetected {
                first_divergent_seq,
                ..
            } => assert_eq!(first_divergent_seq, 2),
            other => panic!("expected tamper detection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unbatched_events_cannot_be_proved_yet() {
        let store = Arc::new(InMemoryStore::new());
        let seq = store.next_sequence().await.unwrap();
        store
            .append_events(
                0,
                vec![caracal_types::LedgerEvent::sealed(seq, event("n-1", "api:x/y")).unwrap()],
                seq,
            )
            .await
            .unwrap();

        let service = QueryService::new(store);
        assert!(matches!(
            service.inclusion_proof(1).await,
            Err(VerifierError::Unbatched(1))
        ));
    }

    #[tokio::test]
    async fn statistics_count_decisions_and_batches() {
        let fx = sealed_fixture(3).await;
        let stats = fx.service.statistics().await.unwrap();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.allowed, 3);
        assert_eq!(stats.denied, 0);
        assert_eq!(stats.sealed_batches, 1);
        assert_eq!(stats.unbatched_events, 0);
        assert_eq!(stats.by_kind.get("validated"), Some(&3));
    }
}
