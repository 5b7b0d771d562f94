use std::collections::HashMap;

use caracal_crypto::SignatureAlgorithm;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::PrincipalId;

/// What kind of identity a principal is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    Agent,
    User,
    Service,
}

/// The canonical identity record.
///
/// Identity fields are never mutated after registration; retirement is a
/// soft tombstone (`retired_at`), never a physical delete.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub workspace: String,
    /// Human name, unique within the workspace.
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
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retired_at: Option<DateTime<Utc>>,
}

impl Principal {
    pub fn is_retired(&self) -> bool {
        self.retired_at.is_some()
    }
}
