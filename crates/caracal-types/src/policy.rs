use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PolicyId, PrincipalId};

/// One version of a principal's authority policy.
///
/// Policies are the constitution bounding what mandates the target
/// principal may issue or hold. History is append-only: editing produces a
/// new version row and prior versions stay addressable for historical
/// validation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorityPolicy {
    pub id: PolicyId,
    pub principal_id: PrincipalId,
    /// Monotonically increasing, starting at 1.
    pub version: u32,
    /// Stored pattern strings; compiled forms live in the scope engine.
    pub resource_patterns: Vec<String>,
    pub allowed_actions: Vec<String>,
    pub max_validity_seconds: u64,
    pub max_delegation_depth: u32,
    pub effective_from: DateTime<Utc>,
    pub change_reason: String,
}

impl AuthorityPolicy {
    pub fn allows_action(&self, action: &str) -> bool {
        self.allowed_actions.iter().any(|a| a == action)
    }
}
