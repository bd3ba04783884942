//! Merkle roots over ordered transaction hashes.
//!
//! Only the root is ever stored in a block; the intermediate levels are
//! folded away as soon as the next one is built.

use crate::hash::{hash_concat, Hash};

/// Compute the merkle root of a list of hashes.
///
/// Empty input yields [`Hash::ZERO`] and a single leaf is its own root.
/// Adjacent nodes are paired and the SHA-256 of their concatenation becomes
/// the parent; an odd node out is paired with itself.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    let mut level = match leaves {
        [] => return Hash::ZERO,
        [only] => return *only,
        _ => leaves.to_vec(),
    };

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                hash_concat(&[left.as_ref(), right.as_ref()])
            })
            .collect();
    }

    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash;

    fn leaves(n: usize) -> Vec<Hash> {
        (0..n).map(|i| hash(&[i as u8])).collect()
    }

    fn pair(a: &Hash, b: &Hash) -> Hash {
        hash_concat(&[a.as_ref(), b.as_ref()])
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(merkle_root(&[]), Hash::ZERO);
    }

    #[test]
    fn test_single_leaf_is_root() {
        let h = leaves(1);
        assert_eq!(merkle_root(&h), h[0]);
    }

    #[test]
    fn test_two_leaves() {
        let h = leaves(2);
        assert_eq!(merkle_root(&h), pair(&h[0], &h[1]));
    }

    #[test]
    fn test_odd_level_duplicates_last() {
        let h = leaves(3);
        let expected = pair(&pair(&h[0], &h[1]), &pair(&h[2], &h[2]));
        assert_eq!(merkle_root(&h), expected);
    }

    #[test]
    fn test_five_leaves_two_odd_levels() {
        let h = leaves(5);
        let l1 = [pair(&h[0], &h[1]), pair(&h[2], &h[3]), pair(&h[4], &h[4])];
        let l2 = [pair(&l1[0], &l1[1]), pair(&l1[2], &l1[2])];
        assert_eq!(merkle_root(&h), pair(&l2[0], &l2[1]));
    }

    #[test]
    fn test_order_matters() {
        let h = leaves(4);
        let mut reversed = h.clone();
        reversed.reverse();
        assert_ne!(merkle_root(&h), merkle_root(&reversed));
    }
}
