use proto::crypto::HashResult;
use sha2::{Digest, Sha512Trunc256};

pub struct Hasher {
    inner: Sha512Trunc256,
}

impl Hasher {
    pub fn new() -> Self {
        Self {
            inner: Sha512Trunc256::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update(data);
        self
    }

    pub fn finalize(&self) -> HashResult {
        let digest_res = self.inner.clone().finalize();

        let mut inner = [0x00; HashResult::len()];
        inner.copy_from_slice(digest_res.as_ref());

        HashResult::from(&inner)
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Hasher::new()
    }
}

/// Calculate SHA512/256 over the given data.
pub fn hash_buffer(data: &[u8]) -> HashResult {
    Hasher::new().update(data).finalize()
}
