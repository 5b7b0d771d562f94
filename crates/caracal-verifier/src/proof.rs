use serde::{Deserialize, Serialize};

use caracal_crypto::SignatureAlgorithm;
use caracal_ledger::merkle::{verify_proof, ProofStep};
use caracal_types::{BatchId, KeyId};

/// A self-contained inclusion proof.
///
/// A holder of the signing key's public half can verify this without
/// contacting the service: recompute the root from the leaf and sibling
/// path, compare, and check the root signature.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InclusionProof {
    pub seq: u64,
    /// Hex SHA-256 leaf hash of the event.
    pub leaf_hash: String,
    pub steps: Vec<ProofStep>,
    /// Hex root hash the path must reproduce.
    pub expected_root: String,
    pub batch_id: BatchId,
    pub signer_key_id: KeyId,
    pub algorithm: SignatureAlgorithm,
    /// Hex signature over the raw root bytes.
    pub root_signature: String,
}

/// The canonical receiver-side check: sibling walk plus root signature.
pub fn verify_inclusion(proof: &InclusionProof, signer_public_key_hex: &str) -> bool {
    let Ok(leaf) = decode_hash(&proof.leaf_hash) else {
        return false;
    };
    let Ok(root) = decode_hash(&proof.expected_root) else {
        return false;
    };
    if !verify_proof(leaf, &proof.steps, root) {
        return false;
    }

    let Ok(signature) = hex::decode(&proof.root_signature) else {
        return false;
    };
    caracal_crypto::verify_signature(proof.algorithm, signer_public_key_hex, &root, &signature)
        .is_ok()
}

fn decode_hash(hex_hash: &str) -> Result<[u8; 32], ()> {
    let bytes = hex::decode(hex_hash).map_err(|_| ())?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| ())
}
