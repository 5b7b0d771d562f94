//! Binary Merkle tree over event hashes.
//!
//! Leaves are the SHA-256 event hashes in sequence order. Each internal
//! node is `SHA-256(left ∥ right)`; a level of odd width duplicates its
//! last node. A single-leaf tree's root is the leaf itself.

use caracal_crypto::sha256;
use serde::{Deserialize, Serialize};

/// Which side of the running hash a proof sibling sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
}

/// One step of an inclusion proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    /// Hex-encoded sibling hash.
    pub sibling: String,
    pub direction: Direction,
}

fn parent(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut joined = [0u8; 64];
    joined[..32].copy_from_slice(left);
    joined[32..].copy_from_slice(right);
    sha256(&joined)
}

/// Root over ordered leaves. `None` for an empty slice — empty batches
/// do not exist.
pub fn merkle_root(leaves: &[[u8; 32]]) -> Option<[u8; 32]> {
    if leaves.is_empty() {
        return None;
    }

    let mut level: Vec<[u8; 32]> = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            // Odd width: duplicate the last node.
            level.push(level[level.len() - 1]);
        }
        level = level
            .chunks(2)
            .map(|pair| parent(&pair[0], &pair[1]))
            .collect();
    }
    Some(level[0])
}

/// Sibling path from leaf `index` to the root. `None` when out of range.
pub fn merkle_proof(leaves: &[[u8; 32]], index: usize) -> Option<Vec<ProofStep>> {
    if index >= leaves.len() {
        return None;
    }

    let mut steps = Vec::new();
    let mut level: Vec<[u8; 32]> = leaves.to_vec();
    let mut position = index;

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(level[level.len() - 1]);
        }

        let sibling_index = position ^ 1;
        let direction = if position % 2 == 0 {
            Direction::Right
        } else {
            Direction::Left
        };
        steps.push(ProofStep {
            sibling: hex::encode(level[sibling_index]),
            direction,
        });

        level = level
            .chunks(2)
            .map(|pair| parent(&pair[0], &pair[1]))
            .collect();
        position /= 2;
    }

    Some(steps)
}

/// The canonical receiver-side verification walk.
pub fn verify_proof(leaf: [u8; 32], steps: &[ProofStep], expected_root: [u8; 32]) -> bool {
    let mut hash = leaf;
    for step in steps {
        let Ok(sibling_bytes) = hex::decode(&step.sibling) else {
            return false;
        };
        let Ok(sibling) = <[u8; 32]>::try_from(sibling_bytes.as_slice()) else {
            return false;
        };
        hash = match step.direction {
            Direction::Left => parent(&sibling, &hash),
            Direction::Right => parent(&hash, &sibling),
        };
    }
    hash == expected_root
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leaf(byte: u8) -> [u8; 32] {
        [byte; 32]
    }

    #[test]
    fn single_leaf_root_is_the_leaf() {
        let leaves = [leaf(1)];
        assert_eq!(merkle_root(&leaves), Some(leaf(1)));
        let proof = merkle_proof(&leaves, 0).unwrap();
        assert!(proof.is_empty());
        assert!(verify_proof(leaf(1), &proof, leaf(1)));
    }

    #[test]
    fn empty_batches_have_no_root() {
        assert_eq!(merkle_root(&[]), None);
    }

    #[test]
    fn four_leaves_match_the_textbook_shape() {
        let leaves = [leaf(0), leaf(1), leaf(2), leaf(3)];
        let expected = parent(
            &parent(&leaf(0), &leaf(1)),
            &parent(&leaf(2), &leaf(3)),
        );
        assert_eq!(merkle_root(&leaves), Some(expected));
    }

    #[test]
    fn odd_width_duplicates_the_last_node() {
        let leaves = [leaf(0), leaf(1), leaf(2)];
        let expected = parent(
            &parent(&leaf(0), &leaf(1)),
            &parent(&leaf(2), &leaf(2)),
        );
        assert_eq!(merkle_root(&leaves), Some(expected));
    }

    #[test]
    fn tampering_any_leaf_changes_the_root() {
        let leaves = [leaf(0), leaf(1), leaf(2), leaf(3)];
        let root = merkle_root(&leaves).unwrap();
        for i in 0..leaves.len() {
            let mut tampered = leaves;
            tampered[i][0] ^= 0xff;
            assert_ne!(merkle_root(&tampered), Some(root));
        }
    }

    proptest! {
        #[test]
        fn every_proof_verifies_and_binds_its_leaf(
            count in 1usize..40,
            index_seed in 0usize..40,
            tamper_byte in 0u8..=255,
        ) {
            let leaves: Vec<[u8; 32]> =
                (0..count).map(|i| caracal_crypto::sha256(&[i as u8])).collect();
            let index = index_seed % count;
            let root = merkle_root(&leaves).unwrap();
            let proof = merkle_proof(&leaves, index).unwrap();

            prop_assert!(verify_proof(leaves[index], &proof, root));

            let mut wrong_leaf = leaves[index];
            wrong_leaf[0] ^= tamper_byte;
            if wrong_leaf != leaves[index] {
                prop_assert!(!verify_proof(wrong_leaf, &proof, root));
            }
        }
    }
}
