//! # shardcache
//!
//! In-memory key-value cache with least-recently-used eviction.
//!
//! ## Architecture
//! - **Handle table**: open-chaining hash table over byte-string keys,
//!   doubling its bucket array at load factor 1.0
//! - **LRU shard**: entries threaded through an `in_use` list (pinned by a
//!   caller) or an `lru` list (evictable), bounded by caller-defined charge
//! - **Sharded cache**: independent shards behind one mutex each, picked by
//!   the high bits of the key hash
//!
//! ## Example
//!
//! ```
//! use shardcache::{CacheConfig, ShardedCache};
//!
//! let cache = ShardedCache::new(CacheConfig::new(1024)).unwrap();
//!
//! let handle = cache.insert(b"user:1", String::from("alice"), 5).unwrap();
//! assert_eq!(cache.with_value(&handle, |v| v.len()).unwrap(), 5);
//! cache.release(handle).unwrap();
//!
//! assert_eq!(cache.get(b"user:1").as_deref(), Some("alice"));
//! ```

#![warn(missing_docs)]

mod config;
mod error;
mod hash;
mod lru;
mod sharded;
mod stats;
mod table;

pub use config::{CacheConfig, DEFAULT_CAPACITY, DEFAULT_SHARD_BITS, MAX_SHARD_BITS};
pub use error::{Error, Result};
pub use hash::KeyHasher;
pub use lru::{Deleter, Handle, LruCache};
pub use sharded::ShardedCache;
pub use stats::CacheStats;
