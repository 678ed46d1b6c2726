//! Sharded cache: independent LRU shards, one lock each
//!
//! The top `shard_bits` bits of a key's hash pick its shard; the low bits
//! pick its bucket inside that shard's table. Every operation holds exactly
//! one shard lock for its whole duration, so operations on different shards
//! never wait on each other.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::CacheConfig;
use crate::error::Result;
use crate::hash::KeyHasher;
use crate::lru::{Deleter, Handle, LruCache};
use crate::stats::CacheStats;

/// Thread-safe cache built from `1 << shard_bits` [`LruCache`] shards
pub struct ShardedCache<V> {
    shards: Box<[Mutex<LruCache<V>>]>,
    shard_bits: u8,
    hasher: KeyHasher,
    config: CacheConfig,
    stats: Arc<CacheStats>,
    last_id: AtomicU64,
}

impl<V> ShardedCache<V> {
    /// Create a cache from a validated config
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Create a cache whose destroyed entries are passed to `deleter`
    pub fn with_deleter<F>(config: CacheConfig, deleter: F) -> Result<Self>
    where
        F: Fn(&[u8], V) + Send + Sync + 'static,
    {
        Self::build(config, Some(Arc::new(deleter)))
    }

    fn build(config: CacheConfig, deleter: Option<Deleter<V>>) -> Result<Self> {
        config.validate()?;

        let hasher = KeyHasher::new(config.hash_seed);
        let stats = Arc::new(CacheStats::new());
        let per_shard = config.per_shard_capacity();
        let shards = (0..config.shard_count())
            .map(|_| {
                Mutex::new(LruCache::with_parts(
                    per_shard,
                    hasher.clone(),
                    deleter.clone(),
                    Arc::clone(&stats),
                ))
            })
            .collect();

        debug!(
            shards = config.shard_count(),
            per_shard,
            capacity = config.capacity,
            "sharded cache created"
        );

        Ok(Self {
            shards,
            shard_bits: config.shard_bits,
            hasher,
            config,
            stats,
            last_id: AtomicU64::new(0),
        })
    }

    fn shard(&self, hash: u32) -> &Mutex<LruCache<V>> {
        let index = if self.shard_bits == 0 {
            0
        } else {
            (hash >> (32 - u32::from(self.shard_bits))) as usize
        };
        &self.shards[index]
    }

    /// Insert `value` under `key`; the handle pins the new entry
    pub fn insert(&self, key: &[u8], value: V, charge: usize) -> Result<Handle> {
        let hash = self.hasher.hash(key);
        self.shard(hash).lock().insert_with_hash(key, hash, value, charge)
    }

    /// Look up `key`, pinning the entry on a hit
    pub fn lookup(&self, key: &[u8]) -> Option<Handle> {
        let hash = self.hasher.hash(key);
        self.shard(hash).lock().lookup_with_hash(key, hash)
    }

    /// Give a handle back to the shard that issued it
    pub fn release(&self, handle: Handle) -> Result<()> {
        self.shard(handle.hash()).lock().release(handle)
    }

    /// Run `f` on the value behind a live handle, under its shard lock
    pub fn with_value<R>(&self, handle: &Handle, f: impl FnOnce(&V) -> R) -> Result<R> {
        let shard = self.shard(handle.hash()).lock();
        shard.value(handle).map(f)
    }

    /// Drop `key` from the index; outstanding handles stay valid
    pub fn erase(&self, key: &[u8]) -> bool {
        let hash = self.hasher.hash(key);
        self.shard(hash).lock().erase_with_hash(key, hash)
    }

    /// Erase every unpinned entry in every shard
    pub fn prune(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().prune()).sum()
    }

    /// Total charge across shards
    pub fn total_charge(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().usage()).sum()
    }

    /// Indexed entries across shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// Check if no shard indexes anything
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.lock().is_empty())
    }

    /// Pinned entries across shards
    pub fn pinned_len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().pinned_len()).sum()
    }

    /// Fresh numeric id, for clients that share one cache and prefix
    /// their keys to keep them apart
    pub fn new_id(&self) -> u64 {
        self.last_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Config the cache was built from
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Counters aggregated over every shard
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

impl<V: Clone> ShardedCache<V> {
    /// Copy out the value for `key`, without leaving it pinned
    pub fn get(&self, key: &[u8]) -> Option<V> {
        let hash = self.hasher.hash(key);
        let mut shard = self.shard(hash).lock();
        let handle = shard.lookup_with_hash(key, hash)?;
        let value = shard.value(&handle).ok().cloned();
        // A handle just issued by this shard always resolves
        let _ = shard.release(handle);
        value
    }

    /// Insert without keeping the entry pinned
    pub fn put(&self, key: &[u8], value: V, charge: usize) -> Result<()> {
        let hash = self.hasher.hash(key);
        let mut shard = self.shard(hash).lock();
        let handle = shard.insert_with_hash(key, hash, value, charge)?;
        shard.release(handle)
    }
}

impl<V> std::fmt::Debug for ShardedCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedCache")
            .field("shards", &self.shards.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
