use rand::{self, rngs::StdRng, CryptoRng, RngCore};
use rand_core::impls;

use crate::error::CryptoError;
use crate::rand::CryptoRandom;

/// A deterministic random generator, for tests.
#[derive(Debug, Clone)]
pub struct DummyRandom {
    inner: StdRng,
}

impl DummyRandom {
    pub fn new(seed: &[u8]) -> Self {
        let mut rng_seed: [u8; 32] = [0; 32];
        // Seeds longer than 32 bytes are truncated:
        let len = std::cmp::min(seed.len(), rng_seed.len());
        rng_seed[..len].clone_from_slice(&seed[..len]);
        let rng = rand::SeedableRng::from_seed(rng_seed);

        DummyRandom { inner: rng }
    }
}

impl RngCore for DummyRandom {
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
        self.fill_bytes(dest);
        Ok(())
    }
}

impl CryptoRng for DummyRandom {}

impl CryptoRandom for DummyRandom {
    fn fill(&mut self, dest: &mut [u8]) -> Result<(), CryptoError> {
        self.inner.fill_bytes(dest);
        Ok(())
    }
}
