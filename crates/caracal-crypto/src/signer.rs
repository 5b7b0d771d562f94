use ed25519_dalek::{Signer as _, Verifier as _};
use p256::ecdsa::signature::{Signer as _, Verifier as _};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

/// Signature algorithm recorded on tokens, batches, and key records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    #[serde(rename = "ed25519")]
    Ed25519,
    #[serde(rename = "ecdsa-p256")]
    EcdsaP256,
}

impl SignatureAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureAlgorithm::Ed25519 => "ed25519",
            SignatureAlgorithm::EcdsaP256 => "ecdsa-p256",
        }
    }
}

impl std::str::FromStr for SignatureAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ed25519" => Ok(SignatureAlgorithm::Ed25519),
            "ecdsa-p256" => Ok(SignatureAlgorithm::EcdsaP256),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl std::fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Private signing handle, tagged by algorithm at construction time.
///
/// The curve is a deploy-time choice; holders pass the handle around
/// immutably and never branch on the variant themselves.
pub enum SignerHandle {
    Ed25519(ed25519_dalek::SigningKey),
    EcdsaP256(p256::ecdsa::SigningKey),
}

impl SignerHandle {
    /// Generate a fresh key for the given algorithm.
    pub fn generate(algorithm: SignatureAlgorithm) -> Self {
        match algorithm {
            SignatureAlgorithm::Ed25519 => {
                SignerHandle::Ed25519(ed25519_dalek::SigningKey::generate(&mut OsRng))
            }
            SignatureAlgorithm::EcdsaP256 => {
                SignerHandle::EcdsaP256(p256::ecdsa::SigningKey::random(&mut OsRng))
            }
        }
    }

    /// Deterministic key from a 32-byte seed. Test and fixture use only.
    pub fn from_seed(algorithm: SignatureAlgorithm, seed: [u8; 32]) -> Result<Self, CryptoError> {
        match algorithm {
            SignatureAlgorithm::Ed25519 => Ok(SignerHandle::Ed25519(
                ed25519_dalek::SigningKey::from_bytes(&seed),
            )),
            SignatureAlgorithm::EcdsaP256 => p256::ecdsa::SigningKey::from_bytes(&seed.into())
                .map(SignerHandle::EcdsaP256)
                .map_err(|e| CryptoError::InvalidKey(e.to_string())),
        }
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            SignerHandle::Ed25519(_) => SignatureAlgorithm::Ed25519,
            SignerHandle::EcdsaP256(_) => SignatureAlgorithm::EcdsaP256,
        }
    }

    /// Hex-encoded public key. Ed25519 keys are 32 raw bytes; P-256 keys
    /// are compressed SEC1 points.
    pub fn public_key_hex(&self) -> String {
        match self {
            SignerHandle::Ed25519(key) => hex::encode(key.verifying_key().as_bytes()),
            SignerHandle::EcdsaP256(key) => {
                hex::encode(key.verifying_key().to_encoded_point(true).as_bytes())
            }
        }
    }

    /// Sign a message, returning raw signature bytes (64 for both curves).
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        match self {
            SignerHandle::Ed25519(key) => key.sign(message).to_bytes().to_vec(),
            SignerHandle::EcdsaP256(key) => {
                let signature: p256::ecdsa::Signature = key.sign(message);
                signature.to_bytes().to_vec()
            }
        }
    }
}

/// Verify a signature against a hex-encoded public key.
pub fn verify_signature(
    algorithm: SignatureAlgorithm,
    public_key_hex: &str,
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let key_bytes =
        hex::decode(public_key_hex).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

    match algorithm {
        SignatureAlgorithm::Ed25519 => {
            let key_bytes: [u8; 32] = key_bytes
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidKey("ed25519 key must be 32 bytes".into()))?;
            let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            let signature = ed25519_dalek::Signature::from_slice(signature)
                .map_err(|_| CryptoError::InvalidSignature)?;
            verifying_key
                .verify(message, &signature)
                .map_err(|_| CryptoError::InvalidSignature)
        }
        SignatureAlgorithm::EcdsaP256 => {
            let verifying_key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&key_bytes)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            let signature = p256::ecdsa::Signature::from_slice(signature)
                .map_err(|_| CryptoError::InvalidSignature)?;
            verifying_key
                .verify(message, &signature)
                .map_err(|_| CryptoError::InvalidSignature)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ed25519_sign_and_verify() {
        let signer = SignerHandle::from_seed(SignatureAlgorithm::Ed25519, [42u8; 32]).unwrap();
        let signature = signer.sign(b"hello");
        verify_signature(
            SignatureAlgorithm::Ed25519,
            &signer.public_key_hex(),
            b"hello",
            &signature,
        )
        .unwrap();
    }

    #[test]
    fn ecdsa_p256_sign_and_verify() {
        let signer = SignerHandle::from_seed(SignatureAlgorithm::EcdsaP256, [42u8; 32]).unwrap();
        let signature = signer.sign(b"hello");
        verify_signature(
            SignatureAlgorithm::EcdsaP256,
            &signer.public_key_hex(),
            b"hello",
            &signature,
        )
        .unwrap();
    }

    #[test]
    fn mutated_message_fails_verification() {
        let signer = SignerHandle::from_seed(SignatureAlgorithm::Ed25519, [7u8; 32]).unwrap();
        let signature = signer.sign(b"hello");
        let result = verify_signature(
            SignatureAlgorithm::Ed25519,
            &signer.public_key_hex(),
            b"hellp",
            &signature,
        );
        assert!(matches!(result, Err(CryptoError::InvalidSignature)));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let signer = SignerHandle::from_seed(SignatureAlgorithm::Ed25519, [7u8; 32]).unwrap();
        let other = SignerHandle::from_seed(SignatureAlgorithm::Ed25519, [8u8; 32]).unwrap();
        let signature = signer.sign(b"hello");
        let result = verify_signature(
            SignatureAlgorithm::Ed25519,
            &other.public_key_hex(),
            b"hello",
            &signature,
        );
        assert!(matches!(result, Err(CryptoError::InvalidSignature)));
    }

    #[test]
    fn algorithm_round_trips_through_str() {
        for algorithm in [SignatureAlgorithm::Ed25519, SignatureAlgorithm::EcdsaP256] {
            let parsed: SignatureAlgorithm = algorithm.as_str().parse().unwrap();
            assert_eq!(parsed, algorithm);
        }
    }
}
