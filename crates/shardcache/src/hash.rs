//! Key hashing
//!
//! Every entry carries the 32-bit hash computed here once at insertion.
//! Shard selection uses the high bits, bucket selection the low bits.

use std::hash::BuildHasher;

use ahash::RandomState;

/// Seeded 32-bit hasher for byte-string keys
#[derive(Clone)]
pub struct KeyHasher {
    state: RandomState,
    seed: u64,
}

impl KeyHasher {
    /// Create a hasher whose output depends only on `seed` and the key
    pub fn new(seed: u64) -> Self {
        Self {
            state: RandomState::with_seeds(
                seed,
                seed ^ 0x9e37_79b9_7f4a_7c15,
                seed.rotate_left(17) ^ 0xbf58_476d_1ce4_e5b9,
                seed.rotate_left(41) ^ 0x94d0_49bb_1331_11eb,
            ),
            seed,
        }
    }

    /// Seed this hasher was built from
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Hash a key down to 32 bits
    pub fn hash(&self, key: &[u8]) -> u32 {
        let h = BuildHasher::hash_one(&self.state, key);
        (h ^ (h >> 32)) as u32
    }
}

impl Default for KeyHasher {
    fn default() -> Self {
        Self::new(0)
    }
}

impl std::fmt::Debug for KeyHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyHasher").field("seed", &self.seed).finish()
    }
}
