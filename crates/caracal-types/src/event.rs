use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use caracal_crypto::CryptoError;

use crate::ids::{BatchId, MandateId, PrincipalId, ValidatorId};

/// What produced an authority event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Issued,
    Validated,
    Denied,
    Revoked,
}

/// Outcome of a validation or issuance check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allowed,
    Denied,
}

/// Why a request was denied. Surfaced to callers as the wire reason string
/// and always recorded in the authority event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    SignatureInvalid,
    TemporalNotYetValid,
    TemporalExpired,
    ClockSkew,
    ReplayDetected,
    Revoked,
    ScopeAction,
    ScopeResource,
    DelegationTooDeep,
    DelegationBroken,
    UnknownPrincipal,
    UnknownMandate,
    InternalError,
}

impl DenialReason {
    /// Compact machine-readable reason string.
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::SignatureInvalid => "signature_invalid",
            DenialReason::TemporalNotYetValid => "temporal_not_yet_valid",
            DenialReason::TemporalExpired => "temporal_expired",
            DenialReason::ClockSkew => "clock_skew",
            DenialReason::ReplayDetected => "replay_detected",
            DenialReason::Revoked => "revoked",
            DenialReason::ScopeAction => "scope_action",
            DenialReason::ScopeResource => "scope_resource",
            DenialReason::DelegationTooDeep => "delegation_too_deep",
            DenialReason::DelegationBroken => "delegation_broken",
            DenialReason::UnknownPrincipal => "unknown_principal",
            DenialReason::UnknownMandate => "unknown_mandate",
            DenialReason::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// One authority decision, as produced by the gateway (or by issuance and
/// revocation paths). The sequence number and event hash are assigned
/// later, by the ledger writer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorityEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub principal_id: PrincipalId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mandate_id: Option<MandateId>,
    pub action: String,
    pub resource: String,
    pub decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial_reason: Option<DenialReason>,
    /// Ordered ancestor mandate ids, root first.
    #[serde(default)]
    pub delegation_chain: Vec<MandateId>,
    pub origin_validator: ValidatorId,
    /// Replay nonce of the originating request; part of the idempotency key.
    pub nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl AuthorityEvent {
    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey {
            origin_validator: self.origin_validator.clone(),
            created_at: self.timestamp,
            nonce: self.nonce.clone(),
        }
    }
}

/// Duplicate-suppression key for exactly-once persistence.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub origin_validator: ValidatorId,
    pub created_at: DateTime<Utc>,
    pub nonce: String,
}

impl IdempotencyKey {
    /// Stable index form.
    pub fn as_index_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.origin_validator,
            self.created_at.timestamp_micros(),
            self.nonce
        )
    }
}

/// A persisted, sequence-numbered authority event.
///
/// Content-addressed by `event_hash`; `batch_id` is back-filled when the
/// event is sealed into a Merkle batch. Never mutated otherwise.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub seq: u64,
    pub event: AuthorityEvent,
    /// Hex SHA-256 over the canonical serialization of (seq, event).
    pub event_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
}

#[derive(Serialize)]
struct EventHashInput<'a> {
    seq: u64,
    event: &'a AuthorityEvent,
}

impl LedgerEvent {
    /// Seal an event under its assigned sequence number.
    pub fn sealed(seq: u64, event: AuthorityEvent) -> Result<Self, CryptoError> {
        let event_hash = Self::compute_hash(seq, &event)?;
        Ok(Self {
            seq,
            event,
            event_hash,
            batch_id: None,
        })
    }

    /// The leaf hash: SHA-256 of the canonical (seq, event) serialization.
    pub fn compute_hash(seq: u64, event: &AuthorityEvent) -> Result<String, CryptoError> {
        let digest = caracal_crypto::hash_canonical(&EventHashInput { seq, event })?;
        Ok(hex::encode(digest))
    }

    /// Recompute the hash from the stored fields.
    pub fn recompute_hash(&self) -> Result<String, CryptoError> {
        Self::compute_hash(self.seq, &self.event)
    }

    /// Leaf hash as raw bytes for tree construction.
    pub fn leaf_hash(&self) -> Result<[u8; 32], CryptoError> {
        let bytes = hex::decode(&self.event_hash)
            .map_err(|e| CryptoError::Serialization(e.to_string()))?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::Serialization("event hash must be 32 bytes".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> AuthorityEvent {
        AuthorityEvent {
            timestamp: DateTime::from_timestamp(1200, 0).unwrap(),
            kind: EventKind::Validated,
            principal_id: PrincipalId::new("prn:p1"),
            mandate_id: Some(MandateId::new("mnd:m1")),
            action: "read".into(),
            resource: "api:x/y".into(),
            decision: Decision::Allowed,
            denial_reason: None,
            delegation_chain: vec![],
            origin_validator: ValidatorId::new("val:gw-1"),
            nonce: "n-1".into(),
            correlation_id: None,
        }
    }

    #[test]
    fn denial_reason_codes_match_wire_format() {
        assert_eq!(DenialReason::TemporalExpired.code(), "temporal_expired");
        assert_eq!(
            serde_json::to_string(&DenialReason::ScopeAction).unwrap(),
            r#""scope_action""#
        );
    }

    #[test]
    fn sealed_event_hash_is_reproducible() {
        let sealed = LedgerEvent::sealed(1, event()).unwrap();
        assert_eq!(sealed.recompute_hash().unwrap(), sealed.event_hash);
        assert_eq!(sealed.leaf_hash().unwrap().len(), 32);
    }

    #[test]
    fn mutating_a_field_changes_the_hash() {
        let sealed = LedgerEvent::sealed(1, event()).unwrap();
        let mut tampered = sealed.clone();
        tampered.event.resource = "api:x/z".into();
        assert_ne!(tampered.recompute_hash().unwrap(), sealed.event_hash);
    }

    #[test]
    fn event_round_trips_through_canonical_serialization() {
        let sealed = LedgerEvent::sealed(3, event()).unwrap();
        let bytes = caracal_crypto::canonical_bytes(&sealed).unwrap();
        let back: LedgerEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.seq, sealed.seq);
        assert_eq!(back.event_hash, sealed.event_hash);
        assert_eq!(back.event.resource, sealed.event.resource);
    }

    #[test]
    fn idempotency_key_is_stable() {
        let e = event();
        assert_eq!(
            e.idempotency_key().as_index_key(),
            e.idempotency_key().as_index_key()
        );
    }
}
