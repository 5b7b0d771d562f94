use std::collections::HashMap;

use caracal_crypto::SignatureAlgorithm;
use caracal_types::{Mandate, MandateId, PrincipalId, PrincipalKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generic query window for paged reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    /// 0 means unbounded.
    pub limit: usize,
    pub offset: usize,
}

/// Registration payload; the store assigns id and creation timestamp.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewPrincipal {
    pub workspace: String,
    pub name: String,
    pub owner: String,
    pub kind: PrincipalKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<PrincipalId>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Hex-encoded signing public key.
    pub public_key: String,
    pub algorithm: SignatureAlgorithm,
}

/// Policy create/update payload. The store assigns the next version and
/// keeps every prior version addressable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyDraft {
    pub principal_id: PrincipalId,
    pub resource_patterns: Vec<String>,
    pub allowed_actions: Vec<String>,
    pub max_validity_seconds: u64,
    pub max_delegation_depth: u32,
    pub effective_from: DateTime<Utc>,
    pub change_reason: String,
}

/// Hot-path lookup result: the mandate plus the lazily derived
/// revocation state of its whole ancestor chain.
#[derive(Clone, Debug)]
pub struct MandateLookup {
    pub mandate: Mandate,
    /// True when this mandate or any ancestor bears a tombstone.
    pub revoked_in_chain: bool,
    /// Ordered ancestry, root first, ending with this mandate.
    pub chain: Vec<MandateId>,
    /// A parent reference that failed to resolve, if the chain is broken.
    pub missing_ancestor: Option<MandateId>,
}
