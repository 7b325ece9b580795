//! Seeding for live generation.
//!
//! Every example of a run gets its own `ChaCha8Rng`, derived from the run seed
//! and the example index. Two examples never share a generator, so examples
//! can be explored on different threads and still be reproduced one by one.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seed of a whole test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSeed(u64);

impl RunSeed {
    /// Use a fixed seed.
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    /// Use the configured seed, or draw one from system entropy.
    pub fn from_config(seed: Option<u64>) -> Self {
        Self(seed.unwrap_or_else(fresh_seed))
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// Generator for the `example`-th example of the run.
    pub fn example_rng(self, example: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(splitmix64(self.0 ^ splitmix64(example)))
    }
}

/// A seed taken from system entropy.
pub fn fresh_seed() -> u64 {
    ChaCha8Rng::from_entropy().next_u64()
}

/// The SplitMix64 finalizer, used to spread neighbouring indices apart.
pub fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}
