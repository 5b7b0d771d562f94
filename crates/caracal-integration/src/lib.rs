//! Caracal integration - re-exports the core crates for embedding and
//! hosts the cross-component scenario suite.

#![deny(unsafe_code)]

pub use caracal_crypto;
pub use caracal_gateway;
pub use caracal_ledger;
pub use caracal_pipeline;
pub use caracal_scope;
pub use caracal_store;
pub use caracal_types;
pub use caracal_verifier;

#[cfg(test)]
mod scenarios;
