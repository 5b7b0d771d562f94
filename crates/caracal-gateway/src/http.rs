use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;

use caracal_types::{DenialReason, MandateToken};

use crate::validator::{MalformedRequest, ValidationRequest, Validator, Verdict};

/// Shared state for the gateway routes.
#[derive(Clone)]
pub struct GatewayState {
    pub validator: Arc<Validator>,
}

/// The gateway's HTTP surface.
pub fn gateway_routes(state: GatewayState) -> Router {
    Router::new()
        .route("/v1/gateway/validate", post(validate))
        .with_state(state)
}

#[derive(Serialize)]
struct DecisionBody {
    decision: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
}

fn deny_response(status: StatusCode, reason: &'static str) -> Response {
    (
        status,
        Json(DecisionBody {
            decision: "deny",
            reason: Some(reason),
            correlation_id: None,
        }),
    )
        .into_response()
}

fn status_for(reason: DenialReason) -> StatusCode {
    match reason {
        DenialReason::SignatureInvalid
        | DenialReason::UnknownPrincipal
        | DenialReason::UnknownMandate => StatusCode::UNAUTHORIZED,
        DenialReason::ReplayDetected => StatusCode::TOO_MANY_REQUESTS,
        DenialReason::InternalError => StatusCode::SERVICE_UNAVAILABLE,
        DenialReason::TemporalNotYetValid
        | DenialReason::TemporalExpired
        | DenialReason::ClockSkew
        | DenialReason::Revoked
        | DenialReason::ScopeAction
        | DenialReason::ScopeResource
        | DenialReason::DelegationTooDeep
        | DenialReason::DelegationBroken => StatusCode::FORBIDDEN,
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn validate(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    // `Authorization: Mandate <token>` carries the signed artifact.
    let token = header(&headers, "authorization")
        .and_then(|v| v.strip_prefix("Mandate "))
        .and_then(|raw| MandateToken::decode(raw).ok());
    let nonce = header(&headers, "x-caracal-nonce").map(str::to_string);
    let timestamp = header(&headers, "x-caracal-timestamp").and_then(|v| v.parse::<i64>().ok());
    let action = header(&headers, "x-caracal-action").map(str::to_string);
    let resource = header(&headers, "x-caracal-resource").map(str::to_string);

    // A request that never parses is still a decision on the record:
    // exactly one denial event precedes the error response.
    let (Some(token), Some(nonce), Some(timestamp), Some(action), Some(resource)) = (
        token.clone(),
        nonce.clone(),
        timestamp,
        action.clone(),
        resource.clone(),
    ) else {
        let detail = MalformedRequest {
            principal_id: token.as_ref().map(|t| t.subject_id.clone()),
            mandate_id: token.as_ref().map(|t| t.mandate_id.clone()),
            action,
            resource,
            nonce,
        };
        let (status, reason, code) = if token.is_none() {
            (
                StatusCode::UNAUTHORIZED,
                DenialReason::SignatureInvalid,
                "signature_invalid",
            )
        } else {
            (
                StatusCode::BAD_REQUEST,
                DenialReason::InternalError,
                "malformed_request",
            )
        };
        return match state.validator.reject_malformed(detail, reason).await {
            Ok(_) => deny_response(status, code),
            Err(_) => deny_response(StatusCode::SERVICE_UNAVAILABLE, "internal_error"),
        };
    };

    let request = ValidationRequest {
        token,
        action,
        resource,
        nonce,
        timestamp,
    };

    match state.validator.validate(request).await {
        Ok(outcome) => match outcome.verdict {
            Verdict::Allow => (
                StatusCode::OK,
                Json(DecisionBody {
                    decision: "allow",
                    reason: None,
                    correlation_id: None,
                }),
            )
                .into_response(),
            Verdict::Deny(reason) => (
                status_for(reason),
                Json(DecisionBody {
                    decision: "deny",
                    reason: Some(reason.code()),
                    correlation_id: outcome.correlation_id,
                }),
            )
                .into_response(),
        },
        // No decision may be served without its event.
        Err(_) => deny_response(StatusCode::SERVICE_UNAVAILABLE, "internal_error"),
    }
}
