//! Cache configuration

use crate::error::{Error, Result};

/// Default capacity: 8 MiB worth of charge
pub const DEFAULT_CAPACITY: usize = 8 << 20;

/// Default shard count is `1 << DEFAULT_SHARD_BITS`
pub const DEFAULT_SHARD_BITS: u8 = 4;

/// Upper bound on `shard_bits`
pub const MAX_SHARD_BITS: u8 = 16;

/// Settings for a [`crate::ShardedCache`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Total capacity in charge units, split evenly across shards
    pub capacity: usize,

    /// log2 of the shard count
    pub shard_bits: u8,

    /// Seed for key hashing
    pub hash_seed: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            shard_bits: DEFAULT_SHARD_BITS,
            hash_seed: 0,
        }
    }
}

impl CacheConfig {
    /// Default config with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Set the total capacity
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set log2 of the shard count
    pub fn with_shard_bits(mut self, shard_bits: u8) -> Self {
        self.shard_bits = shard_bits;
        self
    }

    /// Set the hash seed
    pub fn with_hash_seed(mut self, hash_seed: u64) -> Self {
        self.hash_seed = hash_seed;
        self
    }

    /// Number of shards this config produces
    pub fn shard_count(&self) -> usize {
        1 << self.shard_bits
    }

    /// Capacity each shard gets (rounded up)
    pub fn per_shard_capacity(&self) -> usize {
        self.capacity.div_ceil(self.shard_count())
    }

    /// Reject settings the cache cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.shard_bits > MAX_SHARD_BITS {
            return Err(Error::invalid(format!(
                "shard_bits {} exceeds maximum of {}",
                self.shard_bits, MAX_SHARD_BITS
            )));
        }
        Ok(())
    }
}
