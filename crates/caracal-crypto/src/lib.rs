//! Caracal foundation crypto.
//!
//! Everything signature-shaped in Caracal flows through this crate: the
//! canonical byte form that signatures and event hashes are computed over,
//! SHA-256 digest helpers, and the deploy-time tagged signer handle
//! (Ed25519 or ECDSA P-256). No runtime polymorphism; callers hold the
//! enum by immutable handle.

#![deny(unsafe_code)]

mod canonical;
mod digest;
mod error;
mod signer;

pub use canonical::canonical_bytes;
pub use digest::{hash_canonical, sha256, sha256_hex};
pub use error::CryptoError;
pub use signer::{verify_signature, SignatureAlgorithm, SignerHandle};
