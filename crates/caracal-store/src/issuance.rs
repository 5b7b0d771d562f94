//! Mandate issuance and revocation.
//!
//! Issuance performs the full invariant check against the issuer's current
//! policy (or the parent mandate, for delegations), signs the token with
//! the issuer's key, and writes atomically. Both operations hand back the
//! authority event the caller publishes through the pipeline, so the
//! ledger carries `issued` and `revoked` kinds alongside validation
//! outcomes.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info};

use caracal_crypto::{CryptoError, SignerHandle};
use caracal_scope::{PatternSet, ScopeError};
use caracal_types::{
    AuthorityEvent, AuthorityPolicy, Clock, Decision, EventKind, Mandate, MandateId, Principal,
    PrincipalId, Revocation, ValidatorId,
};

use crate::traits::{CaracalStore, MandateStore, PolicyStore, PrincipalStore};
use crate::StoreError;

/// Issuance inputs; the store assigns id, depth, policy version, and
/// signature.
#[derive(Clone, Debug)]
pub struct IssueMandateRequest {
    pub issuer_id: PrincipalId,
    pub subject_id: PrincipalId,
    pub resource_scope: Vec<String>,
    pub action_scope: Vec<String>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub parent_id: Option<MandateId>,
    pub intent: BTreeMap<String, String>,
}

/// A freshly issued mandate plus the event to record.
#[derive(Clone, Debug)]
pub struct IssuedMandate {
    pub mandate: Mandate,
    pub token: caracal_types::MandateToken,
    pub event: AuthorityEvent,
}

/// Result of a (cascading) revocation.
#[derive(Clone, Debug)]
pub struct RevocationOutcome {
    /// Every mandate tombstoned by this call, target first.
    pub revoked: Vec<MandateId>,
    pub event: AuthorityEvent,
}

/// Issuance failures, one variant per denial code of the contract.
#[derive(Debug, Error)]
pub enum IssueError {
    #[error("requested scope exceeds what the issuer may grant")]
    ScopeExceeded,

    #[error("validity window exceeds the policy maximum")]
    ValidityExceeded,

    #[error("delegation depth would exceed the policy maximum")]
    DelegationTooDeep,

    #[error("parent mandate is revoked")]
    ParentRevoked,

    #[error("parent mandate is expired")]
    ParentExpired,

    #[error("issuer is not entitled to issue this mandate: {0}")]
    UnauthorizedIssuer(String),

    #[error("unknown principal: {0}")]
    UnknownPrincipal(String),

    #[error("unknown mandate: {0}")]
    UnknownMandate(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl IssueError {
    /// Compact machine-readable failure code.
    pub fn code(&self) -> &'static str {
        match self {
            IssueError::ScopeExceeded => "scope_exceeded",
            IssueError::ValidityExceeded => "validity_exceeded",
            IssueError::DelegationTooDeep => "delegation_too_deep",
            IssueError::ParentRevoked => "parent_revoked",
            IssueError::ParentExpired => "parent_expired",
            IssueError::UnauthorizedIssuer(_) => "unauthorized_issuer",
            IssueError::UnknownPrincipal(_) => "unknown_principal",
            IssueError::UnknownMandate(_) => "unknown_mandate",
            IssueError::InvalidRequest(_) | IssueError::Scope(_) => "invalid_request",
            IssueError::Store(_) | IssueError::Crypto(_) => "internal_error",
        }
    }
}

/// Revocation failures.
#[derive(Debug, Error)]
pub enum RevokeError {
    #[error("unknown mandate: {0}")]
    UnknownMandate(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Issues and revokes mandates against a store.
pub struct MandateIssuer {
    store: Arc<dyn CaracalStore>,
    clock: Arc<dyn Clock>,
    /// Recorded as the origin of issuance/revocation events.
    origin: ValidatorId,
}

impl MandateIssuer {
    pub fn new(store: Arc<dyn CaracalStore>, clock: Arc<dyn Clock>, origin: ValidatorId) -> Self {
        Self {
            store,
            clock,
            origin,
        }
    }

    /// Issue a mandate signed by `signer`, which must hold the issuer
    /// principal's registered key.
    pub async fn issue(
        &self,
        request: IssueMandateRequest,
        signer: &SignerHandle,
    ) -> Result<IssuedMandate, IssueError> {
        let now = self.clock.now();

        let issuer = self.load_principal(&request.issuer_id).await?;
        if issuer.is_retired() {
            return Err(IssueError::UnauthorizedIssuer(format!(
                "issuer {} is retired",
                issuer.id
            )));
        }
        if signer.public_key_hex() != issuer.public_key
            || signer.algorithm() != issuer.algorithm
        {
            return Err(IssueError::UnauthorizedIssuer(format!(
                "signing key does not match the registered key of {}",
                issuer.id
            )));
        }

        let subject = self.load_principal(&request.subject_id).await?;
        if subject.is_retired() {
            return Err(IssueError::InvalidRequest(format!(
                "subject {} is retired",
                subject.id
            )));
        }

        let policy = self
            .store
            .current_policy(&issuer.id)
            .await?
            .ok_or_else(|| {
                IssueError::UnauthorizedIssuer(format!("issuer {} has no policy", issuer.id))
            })?;

        if request.valid_until <= request.valid_from {
            return Err(IssueError::InvalidRequest(
                "valid_until must be after valid_from".to_string(),
            ));
        }
        let validity = request.valid_until - request.valid_from;
        if validity > Duration::seconds(policy.max_validity_seconds as i64) {
            return Err(IssueError::ValidityExceeded);
        }

        if request.resource_scope.is_empty() || request.action_scope.is_empty() {
            return Err(IssueError::InvalidRequest(
                "resource and action scopes must be non-empty".to_string(),
            ));
        }
        let requested_resources = PatternSet::parse(&request.resource_scope)?;

        let (delegation_depth, delegation_chain) = match &request.parent_id {
            Some(parent_id) => {
                let lookup = self
                    .store
                    .lookup_mandate(parent_id)
                    .await?
                    .ok_or_else(|| IssueError::UnknownMandate(parent_id.to_string()))?;
                if lookup.missing_ancestor.is_some() {
                    return Err(IssueError::UnknownMandate(parent_id.to_string()));
                }
                if lookup.revoked_in_chain {
                    return Err(IssueError::ParentRevoked);
                }
                let parent = &lookup.mandate;
                if now > parent.valid_until {
                    return Err(IssueError::ParentExpired);
                }
                if parent.subject_id != issuer.id {
                    return Err(IssueError::UnauthorizedIssuer(format!(
                        "issuer {} does not hold parent mandate {}",
                        issuer.id, parent.id
                    )));
                }

                let parent_resources = PatternSet::parse(&parent.resource_scope)?;
                if !requested_resources.is_subset_of(&parent_resources) {
                    return Err(IssueError::ScopeExceeded);
                }
                if !subset_of_actions(&request.action_scope, &parent.action_scope) {
                    return Err(IssueError::ScopeExceeded);
                }

                let depth = parent.delegation_depth + 1;
                if depth > policy.max_delegation_depth {
                    return Err(IssueError::DelegationTooDeep);
                }
                (depth, lookup.chain)
            }
            None => {
                self.check_against_policy(&policy, &requested_resources, &request.action_scope)?;
                (0, Vec::new())
            }
        };

        let mut mandate = Mandate {
            id: MandateId::generate(),
            issuer_id: issuer.id.clone(),
            subject_id: subject.id.clone(),
            parent_id: request.parent_id.clone(),
            resource_scope: request.resource_scope.clone(),
            action_scope: request.action_scope.clone(),
            valid_from: request.valid_from,
            valid_until: request.valid_until,
            delegation_depth,
            policy_version: policy.version,
            intent: request.intent.clone(),
            algorithm: signer.algorithm(),
            signature: String::new(),
            created_at: now,
        };

        let payload = mandate.to_token().signing_payload()?;
        mandate.signature = hex::encode(signer.sign(&payload));

        self.store.insert_mandate(mandate.clone()).await?;
        info!(mandate = %mandate.id, issuer = %issuer.id, subject = %subject.id,
              depth = delegation_depth, "mandate issued");

        let mut chain = delegation_chain;
        chain.push(mandate.id.clone());

        let event = AuthorityEvent {
            timestamp: now,
            kind: EventKind::Issued,
            principal_id: issuer.id,
            mandate_id: Some(mandate.id.clone()),
            action: "mandate:issue".to_string(),
            resource: mandate.id.to_string(),
            decision: Decision::Allowed,
            denial_reason: None,
            delegation_chain: chain,
            origin_validator: self.origin.clone(),
            nonce: uuid::Uuid::new_v4().to_string(),
            correlation_id: None,
        };

        Ok(IssuedMandate {
            token: mandate.to_token(),
            mandate,
            event,
        })
    }

    /// The denial event to record when issuance fails. The mandate id is
    /// null (nothing was issued); the failure code travels in the
    /// correlation field and the nearest denial reason is recorded.
    pub fn issuance_denial_event(
        &self,
        request: &IssueMandateRequest,
        error: &IssueError,
    ) -> AuthorityEvent {
        AuthorityEvent {
            timestamp: self.clock.now(),
            kind: EventKind::Denied,
            principal_id: request.issuer_id.clone(),
            mandate_id: None,
            action: "mandate:issue".to_string(),
            resource: request
                .resource_scope
                .first()
                .cloned()
                .unwrap_or_default(),
            decision: Decision::Denied,
            denial_reason: Some(issuance_denial_reason(error)),
            delegation_chain: request.parent_id.iter().cloned().collect(),
            origin_validator: self.origin.clone(),
            nonce: uuid::Uuid::new_v4().to_string(),
            correlation_id: Some(error.code().to_string()),
        }
    }

    /// Revoke a mandate and every transitive descendant. Idempotent.
    pub async fn revoke(
        &self,
        mandate_id: &MandateId,
        reason: &str,
    ) -> Result<RevocationOutcome, RevokeError> {
        let now = self.clock.now();
        let lookup = self
            .store
            .lookup_mandate(mandate_id)
            .await?
            .ok_or_else(|| RevokeError::UnknownMandate(mandate_id.to_string()))?;

        self.store
            .insert_revocation(Revocation {
                mandate_id: mandate_id.clone(),
                revoked_at: now,
                reason: reason.to_string(),
            })
            .await?;

        let mut revoked = vec![mandate_id.clone()];
        let mut frontier = VecDeque::from([mandate_id.clone()]);
        while let Some(current) = frontier.pop_front() {
            for child in self.store.children_of(&current).await? {
                self.store
                    .insert_revocation(Revocation {
                        mandate_id: child.clone(),
                        revoked_at: now,
                        reason: format!("ancestor {mandate_id} revoked: {reason}"),
                    })
                    .await?;
                debug!(mandate = %child, ancestor = %mandate_id, "cascading revocation");
                revoked.push(child.clone());
                frontier.push_back(child);
            }
        }
        info!(mandate = %mandate_id, cascade = revoked.len() - 1, "mandate revoked");

        let event = AuthorityEvent {
            timestamp: now,
            kind: EventKind::Revoked,
            principal_id: lookup.mandate.issuer_id.clone(),
            mandate_id: Some(mandate_id.clone()),
            action: "mandate:revoke".to_string(),
            resource: mandate_id.to_string(),
            decision: Decision::Allowed,
            denial_reason: None,
            delegation_chain: lookup.chain,
            origin_validator: self.origin.clone(),
            nonce: uuid::Uuid::new_v4().to_string(),
            correlation_id: None,
        };

        Ok(RevocationOutcome { revoked, event })
    }

    async fn load_principal(&self, id: &PrincipalId) -> Result<Principal, IssueError> {
        self.store
            .get_principal(id)
            .await?
            .ok_or_else(|| IssueError::UnknownPrincipal(id.to_string()))
    }

    fn check_against_policy(
        &self,
        policy: &AuthorityPolicy,
        resources: &PatternSet,
        actions: &[String],
    ) -> Result<(), IssueError> {
        let allowed = PatternSet::parse(&policy.resource_patterns)?;
        if !resources.is_subset_of(&allowed) {
            return Err(IssueError::ScopeExceeded);
        }
        if !subset_of_actions(actions, &policy.allowed_actions) {
            return Err(IssueError::ScopeExceeded);
        }
        Ok(())
    }
}

fn subset_of_actions(requested: &[String], allowed: &[String]) -> bool {
    requested.iter().all(|a| allowed.contains(a))
}

fn issuance_denial_reason(error: &IssueError) -> caracal_types::DenialReason {
    use caracal_types::DenialReason;
    match error {
        IssueError::ScopeExceeded => DenialReason::ScopeResource,
        IssueError::ValidityExceeded | IssueError::ParentExpired => DenialReason::TemporalExpired,
        IssueError::DelegationTooDeep => DenialReason::DelegationTooDeep,
        IssueError::ParentRevoked => DenialReason::Revoked,
        IssueError::UnauthorizedIssuer(_) => DenialReason::SignatureInvalid,
        IssueError::UnknownPrincipal(_) => DenialReason::UnknownPrincipal,
        IssueError::UnknownMandate(_) => DenialReason::UnknownMandate,
        IssueError::InvalidRequest(_)
        | IssueError::Scope(_)
        | IssueError::Store(_)
        | IssueError::Crypto(_) => DenialReason::InternalError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::model::{NewPrincipal, PolicyDraft};
    use crate::traits::{MandateStore, PolicyStore, PrincipalStore};
    use caracal_crypto::SignatureAlgorithm;
    use caracal_types::{ManualClock, PrincipalKind};

    struct Fixture {
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
        issuer: MandateIssuer,
        p1: PrincipalId,
        p2: PrincipalId,
        p1_signer: SignerHandle,
        p2_signer: SignerHandle,
    }

    async fn fixture(max_depth: u32) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::at_epoch_seconds(1000));
        let p1_signer = SignerHandle::from_seed(SignatureAlgorithm::Ed25519, [1u8; 32]).unwrap();
        let p2_signer = SignerHandle::from_seed(SignatureAlgorithm::Ed25519, [2u8; 32]).unwrap();

        let mut principals = Vec::new();
        for (name, signer) in [("p1", &p1_signer), ("p2", &p2_signer)] {
            let principal = store
                .register_principal(NewPrincipal {
                    workspace: "ws".into(),
                    name: name.into(),
                    owner: "ops".into(),
                    kind: PrincipalKind::Agent,
                    parent_id: None,
                    metadata: Default::default(),
                    public_key: signer.public_key_hex(),
                    algorithm: signer.algorithm(),
                })
                .await
                .unwrap();
            principals.push(principal.id);
        }

        for id in &principals {
            store
                .put_policy(PolicyDraft {
                    principal_id: id.clone(),
                    resource_patterns: vec!["api:x/*".into()],
                    allowed_actions: vec!["read".into(), "write".into()],
                    max_validity_seconds: 3600,
                    max_delegation_depth: max_depth,
                    effective_from: clock.now(),
                    change_reason: "initial".into(),
                })
                .await
                .unwrap();
        }

        let issuer = MandateIssuer::new(
            store.clone(),
            clock.clone(),
            ValidatorId::new("val:issuer"),
        );
        Fixture {
            p1: principals.remove(0),
            p2: principals.remove(0),
            store,
            clock,
            issuer,
            p1_signer,
            p2_signer,
        }
    }

    fn request(fx: &Fixture) -> IssueMandateRequest {
        IssueMandateRequest {
            issuer_id: fx.p1.clone(),
            subject_id: fx.p1.clone(),
            resource_scope: vec!["api:x/y".into()],
            action_scope: vec!["read".into()],
            valid_from: DateTime::from_timestamp(1000, 0).unwrap(),
            valid_until: DateTime::from_timestamp(1600, 0).unwrap(),
            parent_id: None,
            intent: Default::default(),
        }
    }

    #[tokio::test]
    async fn issues_a_signed_root_mandate() {
        let fx = fixture(2).await;
        let issued = fx.issuer.issue(request(&fx), &fx.p1_signer).await.unwrap();

        assert_eq!(issued.mandate.delegation_depth, 0);
        assert_eq!(issued.mandate.policy_version, 1);
        assert_eq!(issued.event.kind, EventKind::Issued);

        // The persisted row matches and the signature verifies.
        let stored = fx
            .store
            .get_mandate(&issued.mandate.id)
            .await
            .unwrap()
            .unwrap();
        caracal_crypto::verify_signature(
            stored.algorithm,
            &fx.p1_signer.public_key_hex(),
            &stored.to_token().signing_payload().unwrap(),
            &hex::decode(&stored.signature).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn scope_escape_is_rejected() {
        let fx = fixture(2).await;
        let mut req = request(&fx);
        req.resource_scope = vec!["api:y/*".into()];
        let err = fx.issuer.issue(req, &fx.p1_signer).await.unwrap_err();
        assert_eq!(err.code(), "scope_exceeded");

        let mut req = request(&fx);
        req.action_scope = vec!["execute".into()];
        let err = fx.issuer.issue(req, &fx.p1_signer).await.unwrap_err();
        assert_eq!(err.code(), "scope_exceeded");
    }

    #[tokio::test]
    async fn validity_beyond_policy_maximum_is_rejected() {
        let fx = fixture(2).await;
        let mut req = request(&fx);
        req.valid_until = DateTime::from_timestamp(1000 + 3601, 0).unwrap();
        let err = fx.issuer.issue(req, &fx.p1_signer).await.unwrap_err();
        assert_eq!(err.code(), "validity_exceeded");
    }

    #[tokio::test]
    async fn wrong_signing_key_is_unauthorized() {
        let fx = fixture(2).await;
        let err = fx
            .issuer
            .issue(request(&fx), &fx.p2_signer)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unauthorized_issuer");
    }

    #[tokio::test]
    async fn delegation_narrows_scope_and_increments_depth() {
        let fx = fixture(2).await;
        let root = fx.issuer.issue(request(&fx), &fx.p1_signer).await.unwrap();

        let child = fx
            .issuer
            .issue(
                IssueMandateRequest {
                    issuer_id: fx.p1.clone(),
                    subject_id: fx.p2.clone(),
                    resource_scope: vec!["api:x/y".into()],
                    action_scope: vec!["read".into()],
                    valid_from: DateTime::from_timestamp(1100, 0).unwrap(),
                    valid_until: DateTime::from_timestamp(1500, 0).unwrap(),
                    parent_id: Some(root.mandate.id.clone()),
                    intent: Default::default(),
                },
                &fx.p1_signer,
            )
            .await
            .unwrap();

        assert_eq!(child.mandate.delegation_depth, 1);
        assert_eq!(
            child.event.delegation_chain,
            vec![root.mandate.id.clone(), child.mandate.id.clone()]
        );

        // A delegation may not widen the action scope.
        let err = fx
            .issuer
            .issue(
                IssueMandateRequest {
                    issuer_id: fx.p2.clone(),
                    subject_id: fx.p2.clone(),
                    resource_scope: vec!["api:x/y".into()],
                    action_scope: vec!["write".into()],
                    valid_from: DateTime::from_timestamp(1100, 0).unwrap(),
                    valid_until: DateTime::from_timestamp(1400, 0).unwrap(),
                    parent_id: Some(child.mandate.id.clone()),
                    intent: Default::default(),
                },
                &fx.p2_signer,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "scope_exceeded");
    }

    #[tokio::test]
    async fn delegation_depth_limit_is_enforced() {
        let fx = fixture(1).await;
        let root = fx.issuer.issue(request(&fx), &fx.p1_signer).await.unwrap();
        let child = fx
            .issuer
            .issue(
                IssueMandateRequest {
                    issuer_id: fx.p1.clone(),
                    subject_id: fx.p2.clone(),
                    resource_scope: vec!["api:x/y".into()],
                    action_scope: vec!["read".into()],
                    valid_from: DateTime::from_timestamp(1100, 0).unwrap(),
                    valid_until: DateTime::from_timestamp(1500, 0).unwrap(),
                    parent_id: Some(root.mandate.id.clone()),
                    intent: Default::default(),
                },
                &fx.p1_signer,
            )
            .await
            .unwrap();

        let err = fx
            .issuer
            .issue(
                IssueMandateRequest {
                    issuer_id: fx.p2.clone(),
                    subject_id: fx.p2.clone(),
                    resource_scope: vec!["api:x/y".into()],
                    action_scope: vec!["read".into()],
                    valid_from: DateTime::from_timestamp(1150, 0).unwrap(),
                    valid_until: DateTime::from_timestamp(1400, 0).unwrap(),
                    parent_id: Some(child.mandate.id.clone()),
                    intent: Default::default(),
                },
                &fx.p2_signer,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "delegation_too_deep");
    }

    #[tokio::test]
    async fn issuance_under_revoked_parent_fails() {
        let fx = fixture(2).await;
        let root = fx.issuer.issue(request(&fx), &fx.p1_signer).await.unwrap();
        fx.issuer
            .revoke(&root.mandate.id, "rotated away")
            .await
            .unwrap();

        let err = fx
            .issuer
            .issue(
                IssueMandateRequest {
                    issuer_id: fx.p1.clone(),
                    subject_id: fx.p2.clone(),
                    resource_scope: vec!["api:x/y".into()],
                    action_scope: vec!["read".into()],
                    valid_from: DateTime::from_timestamp(1100, 0).unwrap(),
                    valid_until: DateTime::from_timestamp(1500, 0).unwrap(),
                    parent_id: Some(root.mandate.id.clone()),
                    intent: Default::default(),
                },
                &fx.p1_signer,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "parent_revoked");
    }

    #[tokio::test]
    async fn issuance_under_expired_parent_fails() {
        let fx = fixture(2).await;
        let root = fx.issuer.issue(request(&fx), &fx.p1_signer).await.unwrap();
        fx.clock.set_epoch_seconds(1601);

        let err = fx
            .issuer
            .issue(
                IssueMandateRequest {
                    issuer_id: fx.p1.clone(),
                    subject_id: fx.p2.clone(),
                    resource_scope: vec!["api:x/y".into()],
                    action_scope: vec!["read".into()],
                    valid_from: DateTime::from_timestamp(1601, 0).unwrap(),
                    valid_until: DateTime::from_timestamp(1700, 0).unwrap(),
                    parent_id: Some(root.mandate.id.clone()),
                    intent: Default::default(),
                },
                &fx.p1_signer,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "parent_expired");
    }

    #[tokio::test]
    async fn revocation_cascades_to_descendants() {
        let fx = fixture(2).await;
        let root = fx.issuer.issue(request(&fx), &fx.p1_signer).await.unwrap();
        let child = fx
            .issuer
            .issue(
                IssueMandateRequest {
                    issuer_id: fx.p1.clone(),
                    subject_id: fx.p2.clone(),
                    resource_scope: vec!["api:x/y".into()],
                    action_scope: vec!["read".into()],
                    valid_from: DateTime::from_timestamp(1100, 0).unwrap(),
                    valid_until: DateTime::from_timestamp(1500, 0).unwrap(),
                    parent_id: Some(root.mandate.id.clone()),
                    intent: Default::default(),
                },
                &fx.p1_signer,
            )
            .await
            .unwrap();

        let outcome = fx.issuer.revoke(&root.mandate.id, "cleanup").await.unwrap();
        assert_eq!(outcome.revoked.len(), 2);
        assert_eq!(outcome.event.kind, EventKind::Revoked);

        let lookup = fx
            .store
            .lookup_mandate(&child.mandate.id)
            .await
            .unwrap()
            .unwrap();
        assert!(lookup.revoked_in_chain);

        // Revoking again is a no-op, not an error.
        fx.issuer.revoke(&root.mandate.id, "again").await.unwrap();
    }

    #[tokio::test]
    async fn revoking_unknown_mandate_fails() {
        let fx = fixture(2).await;
        let err = fx
            .issuer
            .revoke(&MandateId::new("mnd:ghost"), "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, RevokeError::UnknownMandate(_)));
    }
}
