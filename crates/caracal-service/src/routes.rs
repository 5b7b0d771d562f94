use std::collections::{BTreeMap, HashMap};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use caracal_crypto::{SignatureAlgorithm, SignerHandle};
use caracal_gateway::{gateway_routes, GatewayState};
use caracal_store::{
    EventStore, IssueError, IssueMandateRequest, NewPrincipal, PolicyDraft, PolicyStore,
    PrincipalStore, QueryWindow, RevokeError, StoreError,
};
use caracal_types::{Clock, MandateId, PrincipalId, PrincipalKind};
use caracal_verifier::VerifierError;

use crate::state::ServiceState;

/// The full HTTP surface: gateway validation plus the admin/verifier API.
pub fn build_router(state: ServiceState) -> Router {
    let gateway = gateway_routes(GatewayState {
        validator: state.validator.clone(),
    });

    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/principals", post(register_principal))
        .route("/v1/principals/:id/retire", post(retire_principal))
        .route("/v1/policies", post(put_policy))
        .route("/v1/mandates", post(issue_mandate))
        .route("/v1/mandates/:id/revoke", post(revoke_mandate))
        .route("/v1/mandates/:id/chain", get(chain_trace))
        .route("/v1/events", get(list_events))
        .route("/v1/proofs/:seq", get(inclusion_proof))
        .route("/v1/verify", get(verify_range))
        .route("/v1/statistics", get(statistics))
        .with_state(state)
        .merge(gateway)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: String,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({
                "error": self.code,
                "message": self.message,
            })),
        )
            .into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        let (status, code) = match &error {
            StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            StoreError::DuplicateName(_) => (StatusCode::CONFLICT, "duplicate_name"),
            StoreError::UnknownParent(_) => (StatusCode::BAD_REQUEST, "unknown_parent"),
            StoreError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            StoreError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            StoreError::InvariantViolation(_) => (StatusCode::CONFLICT, "invariant_violation"),
            StoreError::Transient(_) => (StatusCode::SERVICE_UNAVAILABLE, "retryable"),
            StoreError::Serialization(_) | StoreError::Backend(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };
        ApiError::new(status, code, error.to_string())
    }
}

impl From<IssueError> for ApiError {
    fn from(error: IssueError) -> Self {
        let status = match &error {
            IssueError::UnknownPrincipal(_) | IssueError::UnknownMandate(_) => {
                StatusCode::NOT_FOUND
            }
            IssueError::UnauthorizedIssuer(_) => StatusCode::FORBIDDEN,
            IssueError::ScopeExceeded
            | IssueError::ValidityExceeded
            | IssueError::DelegationTooDeep
            | IssueError::ParentRevoked
            | IssueError::ParentExpired => StatusCode::UNPROCESSABLE_ENTITY,
            IssueError::InvalidRequest(_) | IssueError::Scope(_) => StatusCode::BAD_REQUEST,
            IssueError::Store(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            IssueError::Store(_) | IssueError::Crypto(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, error.code(), error.to_string())
    }
}

impl From<RevokeError> for ApiError {
    fn from(error: RevokeError) -> Self {
        match error {
            RevokeError::UnknownMandate(m) => {
                ApiError::new(StatusCode::NOT_FOUND, "unknown_mandate", m)
            }
            RevokeError::Store(e) => e.into(),
        }
    }
}

impl From<VerifierError> for ApiError {
    fn from(error: VerifierError) -> Self {
        let (status, code) = match &error {
            VerifierError::UnknownEvent(_)
            | VerifierError::UnknownMandate(_)
            | VerifierError::UnknownKey(_) => (StatusCode::NOT_FOUND, "not_found"),
            VerifierError::Unbatched(_) => (StatusCode::CONFLICT, "unbatched"),
            VerifierError::Inconsistent(_) => (StatusCode::INTERNAL_SERVER_ERROR, "inconsistent"),
            VerifierError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        ApiError::new(status, code, error.to_string())
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct RegisterPrincipalBody {
    workspace: String,
    name: String,
    owner: String,
    kind: PrincipalKind,
    #[serde(default)]
    parent_id: Option<PrincipalId>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    public_key: String,
    algorithm: SignatureAlgorithm,
}

async fn register_principal(
    State(state): State<ServiceState>,
    Json(body): Json<RegisterPrincipalBody>,
) -> Result<Response, ApiError> {
    let principal = state
        .store
        .register_principal(NewPrincipal {
            workspace: body.workspace,
            name: body.name,
            owner: body.owner,
            kind: body.kind,
            parent_id: body.parent_id,
            metadata: body.metadata,
            public_key: body.public_key,
            algorithm: body.algorithm,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(principal)).into_response())
}

async fn retire_principal(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    state
        .store
        .retire_principal(&PrincipalId::new(id), state.clock.now())
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Deserialize)]
struct PolicyBody {
    principal_id: PrincipalId,
    resource_patterns: Vec<String>,
    allowed_actions: Vec<String>,
    max_validity_seconds: u64,
    max_delegation_depth: u32,
    change_reason: String,
}

async fn put_policy(
    State(state): State<ServiceState>,
    Json(body): Json<PolicyBody>,
) -> Result<Response, ApiError> {
    let policy = state
        .store
        .put_policy(PolicyDraft {
            principal_id: body.principal_id,
            resource_patterns: body.resource_patterns,
            allowed_actions: body.allowed_actions,
            max_validity_seconds: body.max_validity_seconds,
            max_delegation_depth: body.max_delegation_depth,
            effective_from: state.clock.now(),
            change_reason: body.change_reason,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(policy)).into_response())
}

#[derive(Deserialize)]
struct IssueBody {
    issuer_id: PrincipalId,
    subject_id: PrincipalId,
    resource_scope: Vec<String>,
    action_scope: Vec<String>,
    valid_from: i64,
    valid_until: i64,
    #[serde(default)]
    parent_id: Option<MandateId>,
    #[serde(default)]
    intent: BTreeMap<String, String>,
    /// Hex 32-byte seed of the issuer's signing key. Key custody sits
    /// with callers; the store only verifies the public half matches.
    issuer_seed: String,
}

#[derive(Serialize)]
struct IssuedBody {
    mandate: caracal_types::Mandate,
    token: String,
}

async fn issue_mandate(
    State(state): State<ServiceState>,
    Json(body): Json<IssueBody>,
) -> Result<Response, ApiError> {
    let issuer_principal = state
        .store
        .get_principal(&body.issuer_id)
        .await?
        .ok_or_else(|| {
            ApiError::new(StatusCode::NOT_FOUND, "unknown_principal", body.issuer_id.to_string())
        })?;

    let seed: [u8; 32] = hex::decode(&body.issuer_seed)
        .ok()
        .and_then(|bytes| bytes.as_slice().try_into().ok())
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::BAD_REQUEST,
                "invalid_seed",
                "issuer_seed must be 32 hex-encoded bytes",
            )
        })?;
    let signer = SignerHandle::from_seed(issuer_principal.algorithm, seed).map_err(|e| {
        ApiError::new(StatusCode::BAD_REQUEST, "invalid_seed", e.to_string())
    })?;

    let request = IssueMandateRequest {
        issuer_id: body.issuer_id,
        subject_id: body.subject_id,
        resource_scope: body.resource_scope,
        action_scope: body.action_scope,
        valid_from: chrono::DateTime::from_timestamp(body.valid_from, 0).ok_or_else(|| {
            ApiError::new(StatusCode::BAD_REQUEST, "invalid_input", "bad valid_from")
        })?,
        valid_until: chrono::DateTime::from_timestamp(body.valid_until, 0).ok_or_else(|| {
            ApiError::new(StatusCode::BAD_REQUEST, "invalid_input", "bad valid_until")
        })?,
        parent_id: body.parent_id,
        intent: body.intent,
    };

    match state.issuer.issue(request.clone(), &signer).await {
        Ok(issued) => {
            state.publish_event(&issued.event).await;
            let token = issued.token.encode().map_err(|e| {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string())
            })?;
            Ok((
                StatusCode::CREATED,
                Json(IssuedBody {
                    mandate: issued.mandate,
                    token,
                }),
            )
                .into_response())
        }
        Err(error) => {
            // Denied issuance is still an authority decision on the record.
            let event = state.issuer.issuance_denial_event(&request, &error);
            state.publish_event(&event).await;
            Err(error.into())
        }
    }
}

#[derive(Deserialize)]
struct RevokeBody {
    reason: String,
}

async fn revoke_mandate(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    Json(body): Json<RevokeBody>,
) -> Result<Response, ApiError> {
    let outcome = state
        .issuer
        .revoke(&MandateId::new(id), &body.reason)
        .await?;
    state.publish_event(&outcome.event).await;
    Ok(Json(serde_json::json!({ "revoked": outcome.revoked })).into_response())
}

async fn chain_trace(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let links = state.verifier.chain_trace(&MandateId::new(id)).await?;
    Ok(Json(links).into_response())
}

#[derive(Deserialize)]
struct EventsQuery {
    principal: String,
    #[serde(default)]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

async fn list_events(
    State(state): State<ServiceState>,
    Query(query): Query<EventsQuery>,
) -> Result<Response, ApiError> {
    let events = state
        .store
        .events_for_principal(
            &PrincipalId::new(query.principal),
            QueryWindow {
                limit: query.limit,
                offset: query.offset,
            },
        )
        .await?;
    Ok(Json(events).into_response())
}

async fn inclusion_proof(
    State(state): State<ServiceState>,
    Path(seq): Path<u64>,
) -> Result<Response, ApiError> {
    let proof = state.verifier.inclusion_proof(seq).await?;
    Ok(Json(proof).into_response())
}

#[derive(Deserialize)]
struct RangeQuery {
    from: u64,
    to: u64,
}

async fn verify_range(
    State(state): State<ServiceState>,
    Query(query): Query<RangeQuery>,
) -> Result<Response, ApiError> {
    let verification = state.verifier.verify_range(query.from, query.to).await?;
    Ok(Json(verification).into_response())
}

async fn statistics(State(state): State<ServiceState>) -> Result<Response, ApiError> {
    let stats = state.verifier.statistics().await?;
    Ok(Json(stats).into_response())
}
