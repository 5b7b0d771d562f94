use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BatchId, KeyId};

/// Why a Merkle batch was sealed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchCloseReason {
    SizeThreshold,
    TimeThreshold,
    Shutdown,
}

/// A sealed, ordered group of consecutively-numbered events with a signed
/// root. Batches partition the event sequence: no overlaps, no gaps.
/// Immutable once persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MerkleBatch {
    pub id: BatchId,
    /// Inclusive sequence range.
    pub seq_lo: u64,
    pub seq_hi: u64,
    /// Hex SHA-256 root over the ordered leaves.
    pub root_hash: String,
    pub signer_key_id: KeyId,
    /// Hex signature over the raw root bytes.
    pub signature: String,
    pub close_reason: BatchCloseReason,
    pub closed_at: DateTime<Utc>,
}

impl MerkleBatch {
    pub fn len(&self) -> u64 {
        self.seq_hi - self.seq_lo + 1
    }

    pub fn is_empty(&self) -> bool {
        false // empty batches are never sealed
    }

    pub fn covers(&self, seq: u64) -> bool {
        self.seq_lo <= seq && seq <= self.seq_hi
    }
}
