//! Caracal service wiring.
//!
//! Composes the store, pipeline, gateway validator, ledger writers, and
//! verifier into one process, and exposes the versioned HTTP surface the
//! operational binary serves.

#![deny(unsafe_code)]

mod routes;
mod state;

pub use routes::build_router;
pub use state::{ServiceConfig, ServiceError, ServiceState, StorageConfig};
