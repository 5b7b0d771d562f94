//! Caracal identity & policy store.
//!
//! The transactional home of principals, policies, mandates, revocations,
//! the authority-event ledger tables, and the shared operational state the
//! other components lean on: the replay cache, the global sequence
//! allocator, partition leases, and the signing-key registry.
//!
//! Design stance:
//! - traits per concern plus one bundle trait, so components depend on
//!   exactly the surface they use;
//! - a deterministic in-memory reference backend for tests and embedding;
//! - PostgreSQL as the transactional source of truth behind the
//!   `postgres` feature, without changing trait surfaces.

#![deny(unsafe_code)]

mod cache;
mod error;
mod issuance;
mod memory;
mod model;
#[cfg(feature = "postgres")]
pub mod postgres;
mod traits;

pub use cache::PolicyCache;
pub use error::{StoreError, StoreResult};
pub use issuance::{
    IssueError, IssueMandateRequest, IssuedMandate, MandateIssuer, RevocationOutcome, RevokeError,
};
pub use memory::InMemoryStore;
pub use model::{MandateLookup, NewPrincipal, PolicyDraft, QueryWindow};
pub use traits::{
    CaracalStore, EventStore, KeyStore, LeaseStore, MandateStore, PolicyStore, PrincipalStore,
    ReplayStore, SequenceStore,
};
