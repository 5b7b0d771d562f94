use thiserror::Error;

/// Crypto-layer errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}
