use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use caracal_crypto::{CryptoError, SignatureAlgorithm};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{MandateId, PrincipalId};

/// Current mandate token format version.
pub const TOKEN_FORMAT_VERSION: u16 = 1;

/// The wire-level mandate artifact carried on every gateway request as
/// `Authorization: Mandate <token>`.
///
/// The canonical serialization is deterministic (sorted keys, no
/// insignificant whitespace); the signature covers every field except
/// itself, so mutating any byte of the token is detectable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MandateToken {
    pub version: u16,
    pub mandate_id: MandateId,
    pub issuer_id: PrincipalId,
    pub subject_id: PrincipalId,
    pub resource_patterns: Vec<String>,
    pub actions: Vec<String>,
    /// Integer seconds since the Unix epoch, UTC.
    pub valid_from: i64,
    pub valid_until: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<MandateId>,
    pub delegation_depth: u32,
    #[serde(default)]
    pub intent: BTreeMap<String, String>,
    pub algorithm: SignatureAlgorithm,
    /// Hex-encoded signature bytes.
    pub signature: String,
}

/// Every token field except the signature, borrowed for signing.
#[derive(Serialize)]
struct SigningPayload<'a> {
    version: u16,
    mandate_id: &'a MandateId,
    issuer_id: &'a PrincipalId,
    subject_id: &'a PrincipalId,
    resource_patterns: &'a [String],
    actions: &'a [String],
    valid_from: i64,
    valid_until: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<&'a MandateId>,
    delegation_depth: u32,
    intent: &'a BTreeMap<String, String>,
    algorithm: SignatureAlgorithm,
}

impl MandateToken {
    /// Canonical bytes the issuer signs and the validator verifies.
    pub fn signing_payload(&self) -> Result<Vec<u8>, CryptoError> {
        caracal_crypto::canonical_bytes(&SigningPayload {
            version: self.version,
            mandate_id: &self.mandate_id,
            issuer_id: &self.issuer_id,
            subject_id: &self.subject_id,
            resource_patterns: &self.resource_patterns,
            actions: &self.actions,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            parent_id: self.parent_id.as_ref(),
            delegation_depth: self.delegation_depth,
            intent: &self.intent,
            algorithm: self.algorithm,
        })
    }

    /// Header-safe encoding: base64 over the canonical serialization.
    pub fn encode(&self) -> Result<String, TokenError> {
        let bytes =
            caracal_crypto::canonical_bytes(self).map_err(|e| TokenError::Encoding(e.to_string()))?;
        Ok(BASE64.encode(bytes))
    }

    pub fn decode(encoded: &str) -> Result<Self, TokenError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        let token: MandateToken =
            serde_json::from_slice(&bytes).map_err(|e| TokenError::Malformed(e.to_string()))?;
        if token.version != TOKEN_FORMAT_VERSION {
            return Err(TokenError::UnsupportedVersion(token.version));
        }
        Ok(token)
    }

    pub fn signature_bytes(&self) -> Result<Vec<u8>, TokenError> {
        hex::decode(&self.signature).map_err(|e| TokenError::Malformed(e.to_string()))
    }
}

/// Token encode/decode failures.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token encoding failed: {0}")]
    Encoding(String),

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("unsupported token format version {0}")]
    UnsupportedVersion(u16),
}
