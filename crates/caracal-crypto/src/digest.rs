use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::canonical::canonical_bytes;
use crate::error::CryptoError;

/// SHA-256 of raw bytes.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Lowercase hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(sha256(bytes))
}

/// SHA-256 over the canonical serialization of a value.
pub fn hash_canonical<T: Serialize>(value: &T) -> Result<[u8; 32], CryptoError> {
    Ok(sha256(&canonical_bytes(value)?))
}
