use std::collections::BTreeMap;

use caracal_crypto::SignatureAlgorithm;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MandateId, PrincipalId};
use crate::token::MandateToken;

/// A scoped, time-bound permission, immutable once issued.
///
/// Only the revocation side-table can mark a mandate defunct.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Mandate {
    pub id: MandateId,
    pub issuer_id: PrincipalId,
    pub subject_id: PrincipalId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<MandateId>,
    pub resource_scope: Vec<String>,
    pub action_scope: Vec<String>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    /// 0 for a root mandate, parent depth + 1 otherwise.
    pub delegation_depth: u32,
    /// Issuer policy version in force at issuance.
    pub policy_version: u32,
    #[serde(default)]
    pub intent: BTreeMap<String, String>,
    pub algorithm: SignatureAlgorithm,
    /// Hex-encoded issuer signature over the token signing payload.
    pub signature: String,
    pub created_at: DateTime<Utc>,
}

impl Mandate {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// The wire token carrying exactly this mandate's signed fields.
    pub fn to_token(&self) -> MandateToken {
        MandateToken {
            version: crate::token::TOKEN_FORMAT_VERSION,
            mandate_id: self.id.clone(),
            issuer_id: self.issuer_id.clone(),
            subject_id: self.subject_id.clone(),
            resource_patterns: self.resource_scope.clone(),
            actions: self.action_scope.clone(),
            valid_from: self.valid_from.timestamp(),
            valid_until: self.valid_until.timestamp(),
            parent_id: self.parent_id.clone(),
            delegation_depth: self.delegation_depth,
            intent: self.intent.clone(),
            algorithm: self.algorithm,
            signature: self.signature.clone(),
        }
    }
}

/// Revocation tombstone. Writing one is idempotent; revoking a mandate
/// logically revokes every descendant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Revocation {
    pub mandate_id: MandateId,
    pub revoked_at: DateTime<Utc>,
    pub reason: String,
}
