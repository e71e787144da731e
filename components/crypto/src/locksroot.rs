//! The locksroot commits to the set of pending locks of one channel direction.
//!
//! Every pending lock is hashed into a leaf. Leaves are sorted, so the root does not depend
//! on the order in which locks were added. The tree is built bottom up by hashing pairs of
//! nodes, an odd node is moved up unchanged. The root of an empty set is the zero hash.

use proto::crypto::{HashResult, Locksroot};
use proto::transfer::messages::Lock;

use crate::hash::Hasher;

/// Hash of a single pending lock.
pub fn hash_lock_leaf(lock: &Lock) -> HashResult {
    Hasher::new()
        .update(&lock.amount.to_be_bytes())
        .update(&lock.expiration.to_be_bytes())
        .update(&lock.secret_hash)
        .finalize()
}

fn hash_pair(left: &HashResult, right: &HashResult) -> HashResult {
    Hasher::new().update(left).update(right).finalize()
}

/// Compute the merkle root over the given leaves.
pub fn merkle_root(mut leaves: Vec<HashResult>) -> HashResult {
    if leaves.is_empty() {
        return HashResult::default();
    }
    leaves.sort();

    let mut layer = leaves;
    while layer.len() > 1 {
        layer = layer
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => hash_pair(left, right),
                [single] => *single,
                _ => unreachable!(),
            })
            .collect();
    }
    layer[0]
}

/// Compute the locksroot of a set of pending locks.
pub fn compute_locksroot<'a, I>(locks: I) -> Locksroot
where
    I: IntoIterator<Item = &'a Lock>,
{
    merkle_root(locks.into_iter().map(hash_lock_leaf).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::crypto::SecretHash;
    use quickcheck_macros::quickcheck;

    fn dummy_lock(seed: u8, amount: u128) -> Lock {
        Lock {
            amount,
            expiration: 100 + u64::from(seed),
            secret_hash: SecretHash::from(&[seed; SecretHash::len()]),
        }
    }

    #[test]
    fn test_locksroot_empty() {
        let locks: Vec<Lock> = Vec::new();
        assert!(compute_locksroot(&locks).is_zero());
    }

    #[test]
    fn test_locksroot_single() {
        let lock = dummy_lock(1, 10);
        assert_eq!(compute_locksroot(&[lock.clone()]), hash_lock_leaf(&lock));
    }

    #[test]
    fn test_locksroot_changes_with_amount() {
        let locks1 = vec![dummy_lock(1, 10), dummy_lock(2, 20)];
        let locks2 = vec![dummy_lock(1, 10), dummy_lock(2, 21)];
        assert_ne!(compute_locksroot(&locks1), compute_locksroot(&locks2));

        let locks3 = vec![dummy_lock(1, 10)];
        assert_ne!(compute_locksroot(&locks1), compute_locksroot(&locks3));
    }

    #[quickcheck]
    fn qc_locksroot_order_independent(seeds: Vec<u8>) -> bool {
        let locks: Vec<Lock> = seeds
            .iter()
            .map(|seed| dummy_lock(*seed, u128::from(*seed) * 3))
            .collect();
        let mut reversed = locks.clone();
        reversed.reverse();
        compute_locksroot(&locks) == compute_locksroot(&reversed)
    }
}
