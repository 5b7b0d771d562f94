//! Caracal verifier and query service.
//!
//! Read-only views over the authority ledger: self-contained inclusion
//! proofs, root reconstruction with tamper localization, mandate chain
//! traces for audit, and summary statistics. Fully parallel — nothing
//! here mutates.

#![deny(unsafe_code)]

mod proof;
mod service;

pub use proof::{verify_inclusion, InclusionProof};
pub use service::{
    ChainLink, LedgerStatistics, QueryService, RangeVerification, VerifierError,
};
