use proto::crypto::{Secret, SecretHash};

use crate::hash::hash_buffer;

pub trait HashLock {
    /// Compute the hash that locks a transfer on this secret.
    fn hash_lock(&self) -> SecretHash;
}

impl HashLock for Secret {
    fn hash_lock(&self) -> SecretHash {
        SecretHash::from(hash_buffer(self.as_ref()).as_array_ref())
    }
}

/// Does `secret` open a lock on `secret_hash`?
pub fn verify_secret(secret: &Secret, secret_hash: &SecretHash) -> bool {
    &secret.hash_lock() == secret_hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_lock_basic() {
        let secret = Secret::from(&[1u8; Secret::len()]);
        let secret_hash1 = secret.hash_lock();
        let secret_hash2 = secret.hash_lock();
        assert_eq!(secret_hash1, secret_hash2);
        assert!(verify_secret(&secret, &secret_hash1));

        let other_secret = Secret::from(&[2u8; Secret::len()]);
        assert_ne!(other_secret.hash_lock(), secret_hash1);
        assert!(!verify_secret(&other_secret, &secret_hash1));
    }
}
