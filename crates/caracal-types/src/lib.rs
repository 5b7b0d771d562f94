//! Caracal Types - the ONLY authority data model.
//!
//! Every component speaks these records: principals and their policies,
//! mandates and their wire tokens, authority events, and sealed Merkle
//! batches. The store owns the canonical rows; everything else holds ids.

#![deny(unsafe_code)]

mod batch;
mod clock;
mod event;
mod ids;
mod keys;
mod mandate;
mod policy;
mod principal;
mod token;

pub use batch::{BatchCloseReason, MerkleBatch};
pub use clock::{Clock, ManualClock, SystemClock};
pub use event::{AuthorityEvent, Decision, DenialReason, EventKind, IdempotencyKey, LedgerEvent};
pub use ids::{BatchId, KeyId, MandateId, PolicyId, PrincipalId, ValidatorId};
pub use keys::SigningKeyRecord;
pub use mandate::{Mandate, Revocation};
pub use policy::AuthorityPolicy;
pub use principal::{Principal, PrincipalKind};
pub use token::{MandateToken, TokenError, TOKEN_FORMAT_VERSION};
