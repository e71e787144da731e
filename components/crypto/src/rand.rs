use rand::{rngs::OsRng, CryptoRng, RngCore};
use rand_core::impls;

use proto::crypto::Secret;

use crate::error::CryptoError;

pub trait CryptoRandom: RngCore + CryptoRng {
    fn fill(&mut self, dest: &mut [u8]) -> Result<(), CryptoError>;
}

#[derive(Debug, Clone)]
pub struct SystemRandom {
    inner: OsRng,
}

impl SystemRandom {
    pub fn new() -> Self {
        SystemRandom { inner: OsRng }
    }
}

impl Default for SystemRandom {
    fn default() -> Self {
        SystemRandom::new()
    }
}

impl RngCore for SystemRandom {
    fn next_u32(&mut self) -> u32 {
        impls::next_u32_via_fill(self)
    }

    fn next_u64(&mut self) -> u64 {
        impls::next_u64_via_fill(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.inner.fill_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.inner.try_fill_bytes(dest)
    }
}

impl CryptoRng for SystemRandom {}

impl CryptoRandom for SystemRandom {
    fn fill(&mut self, dest: &mut [u8]) -> Result<(), CryptoError> {
        Ok(self.inner.try_fill_bytes(dest)?)
    }
}

/// Returns a secure cryptographic random generator
pub fn system_random() -> SystemRandom {
    SystemRandom::new()
}

pub trait RandGen: Sized {
    fn rand_gen(crypt_rng: &mut impl CryptoRandom) -> Result<Self, CryptoError>;
}

impl RandGen for Secret {
    fn rand_gen(crypt_rng: &mut impl CryptoRandom) -> Result<Self, CryptoError> {
        let mut inner = [0u8; Secret::len()];
        crypt_rng.fill(&mut inner)?;
        Ok(Secret::from(&inner))
    }
}
