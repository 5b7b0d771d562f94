use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use caracal_crypto::SignerHandle;
use caracal_types::{BatchCloseReason, BatchId, KeyId, LedgerEvent, MerkleBatch};

use crate::error::LedgerError;
use crate::merkle::merkle_root;

/// Sealing thresholds. Defaults carry the contract values.
#[derive(Clone, Copy, Debug)]
pub struct BatcherConfig {
    pub max_events: usize,
    /// Wall-clock age of the oldest buffered event.
    pub max_age: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_events: 1000,
            max_age: Duration::seconds(300),
        }
    }
}

/// A sealed batch ready for persistence.
#[derive(Clone, Debug)]
pub struct SealedBatch {
    pub batch: MerkleBatch,
    /// Member sequence numbers, in leaf order.
    pub member_seqs: Vec<u64>,
}

/// Ordered in-memory buffer of un-batched events.
///
/// Owned exclusively by its partition's writer task; no locks on the
/// hot path.
pub struct MerkleBatcher {
    config: BatcherConfig,
    buffer: Vec<LedgerEvent>,
    first_buffered_at: Option<DateTime<Utc>>,
}

impl MerkleBatcher {
    pub fn new(config: BatcherConfig) -> Self {
        Self {
            config,
            buffer: Vec::new(),
            first_buffered_at: None,
        }
    }

    pub fn push(&mut self, event: LedgerEvent, now: DateTime<Utc>) {
        if self.buffer.is_empty() {
            self.first_buffered_at = Some(now);
        }
        self.buffer.push(event);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Which threshold, if any, fires right now.
    pub fn due(&self, now: DateTime<Utc>) -> Option<BatchCloseReason> {
        if self.buffer.is_empty() {
            return None;
        }
        if self.buffer.len() >= self.config.max_events {
            return Some(BatchCloseReason::SizeThreshold);
        }
        match self.first_buffered_at {
            Some(first) if now - first >= self.config.max_age => {
                Some(BatchCloseReason::TimeThreshold)
            }
            _ => None,
        }
    }

    /// Seal the buffer into a signed batch. The buffer empties on
    /// success; sealing an empty buffer is an error, never a no-op batch.
    pub fn seal(
        &mut self,
        reason: BatchCloseReason,
        signer: &SignerHandle,
        signer_key_id: &KeyId,
        now: DateTime<Utc>,
    ) -> Result<SealedBatch, LedgerError> {
        if self.buffer.is_empty() {
            return Err(LedgerError::EmptyBatch);
        }

        self.buffer.sort_by_key(|e| e.seq);
        let leaves = self
            .buffer
            .iter()
            .map(|e| e.leaf_hash())
            .collect::<Result<Vec<_>, _>>()?;
        let root = merkle_root(&leaves).ok_or(LedgerError::EmptyBatch)?;
        let signature = signer.sign(&root);

        let member_seqs: Vec<u64> = self.buffer.iter().map(|e| e.seq).collect();
        let batch = MerkleBatch {
            id: BatchId::generate(),
            seq_lo: member_seqs[0],
            seq_hi: member_seqs[member_seqs.len() - 1],
            root_hash: hex::encode(root),
            signer_key_id: signer_key_id.clone(),
            signature: hex::encode(signature),
            close_reason: reason,
            closed_at: now,
        };
        debug!(batch = %batch.id, lo = batch.seq_lo, hi = batch.seq_hi,
               reason = ?reason, "batch sealed");

        self.buffer.clear();
        self.first_buffered_at = None;
        Ok(SealedBatch { batch, member_seqs })
    }
}
