use caracal_crypto::SignatureAlgorithm;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::KeyId;

/// A registered root-signing key.
///
/// Rotation never deletes: new batches switch to the new key, retired keys
/// stay resolvable so old batch signatures keep verifying.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigningKeyRecord {
    pub id: KeyId,
    pub algorithm: SignatureAlgorithm,
    /// Hex-encoded public key.
    pub public_key: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retired_at: Option<DateTime<Utc>>,
}

impl SigningKeyRecord {
    pub fn is_retired(&self) -> bool {
        self.retired_at.is_some()
    }
}
