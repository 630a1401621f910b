//! Merkle trees over transaction hashes and over world-state leaves.
//!
//! Rule: at each level, duplicate the last leaf if the level has an odd
//! number of nodes. The root of an empty list is `SHA-256("")`.

use crate::crypto::Hash256;

/// Computes the Merkle root over an ordered list of leaf hashes.
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    if leaves.is_empty() {
        return Hash256::empty();
    }

    let mut level: Vec<Hash256> = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = *level.last().expect("level is non-empty");
            level.push(last);
        }
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            let mut buf = Vec::with_capacity(64);
            buf.extend_from_slice(pair[0].as_bytes());
            buf.extend_from_slice(pair[1].as_bytes());
            next.push(Hash256::compute(&buf));
        }
        level = next;
    }
    level[0]
}

/// Returns the sibling path (bottom-up) and leaf index needed to prove
/// inclusion of `leaves[index]` under `merkle_root(leaves)`.
///
/// Used to serve `get_merkle_proof` / `get_state_proof` RPC calls.
pub fn merkle_proof(leaves: &[Hash256], mut index: usize) -> Vec<Hash256> {
    let mut level: Vec<Hash256> = leaves.to_vec();
    let mut path = Vec::new();

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = *level.last().expect("level is non-empty");
            level.push(last);
        }
        let sibling_index = if index % 2 == 0 { index + 1 } else { index - 1 };
        path.push(level[sibling_index]);

        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            let mut buf = Vec::with_capacity(64);
            buf.extend_from_slice(pair[0].as_bytes());
            buf.extend_from_slice(pair[1].as_bytes());
            next.push(Hash256::compute(&buf));
        }
        level = next;
        index /= 2;
    }

    path
}

/// Recomputes a Merkle root from a leaf, its index, and a sibling path
/// produced by [`merkle_proof`].
pub fn verify_merkle_proof(leaf: Hash256, mut index: usize, path: &[Hash256]) -> Hash256 {
    let mut current = leaf;
    for sibling in path {
        let mut buf = Vec::with_capacity(64);
        if index % 2 == 0 {
            buf.extend_from_slice(current.as_bytes());
            buf.extend_from_slice(sibling.as_bytes());
        } else {
            buf.extend_from_slice(sibling.as_bytes());
            buf.extend_from_slice(current.as_bytes());
        }
        current = Hash256::compute(&buf);
        index /= 2;
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(byte: u8) -> Hash256 {
        Hash256::compute(&[byte])
    }

    #[test]
    fn empty_root_is_sha256_of_empty_string() {
        assert_eq!(merkle_root(&[]), Hash256::empty());
    }

    #[test]
    fn single_leaf_root_is_the_leaf_itself_pairing() {
        let l = leaf(1);
        assert_eq!(merkle_root(&[l]), l);
    }

    #[test]
    fn odd_count_duplicates_last_leaf() {
        let leaves = vec![leaf(1), leaf(2), leaf(3)];
        let dup_leaves = vec![leaf(1), leaf(2), leaf(3), leaf(3)];
        assert_eq!(merkle_root(&leaves), merkle_root(&dup_leaves));
    }

    #[test]
    fn proof_round_trips_for_every_leaf() {
        let leaves = vec![leaf(1), leaf(2), leaf(3), leaf(4), leaf(5)];
        let root = merkle_root(&leaves);
        for (i, l) in leaves.iter().enumerate() {
            let path = merkle_proof(&leaves, i);
            assert_eq!(verify_merkle_proof(*l, i, &path), root);
        }
    }
}
