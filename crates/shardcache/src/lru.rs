//! LRU (Least Recently Used) cache with pinned handles
//!
//! Entries live in an arena. Slots 0 and 1 are sentinel heads of two
//! circular doubly-linked lists:
//! - `LRU`: entries referenced only by the cache, oldest right after the head
//! - `IN_USE`: entries at least one caller holds a [`Handle`] to
//!
//! An entry that was erased, evicted or overwritten while a caller still
//! holds it sits in neither list and is destroyed on its last release.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::hash::KeyHasher;
use crate::stats::CacheStats;
use crate::table::{ChainStore, HandleTable};

/// Sentinel of the evictable list
const LRU: usize = 0;

/// Sentinel of the pinned list
const IN_USE: usize = 1;

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

/// Cleanup run exactly once per entry when it is destroyed
pub type Deleter<V> = Arc<dyn Fn(&[u8], V) + Send + Sync>;

/// Lease on a cache entry.
///
/// While a handle is outstanding its entry is never destroyed and, if still
/// indexed, never evicted. Give it back with `release`; a dropped handle
/// keeps its entry pinned for the life of the cache.
#[must_use = "a handle pins its entry until it is released"]
#[derive(Debug, PartialEq, Eq)]
pub struct Handle {
    cache: u64,
    slot: usize,
    generation: u64,
    hash: u32,
}

impl Handle {
    /// Hash of the key this handle refers to
    pub fn hash(&self) -> u32 {
        self.hash
    }
}

struct Entry<V> {
    key: Box<[u8]>,
    hash: u32,
    value: V,
    charge: usize,
    /// Holders, counting the cache itself while `in_cache`
    refs: u32,
    in_cache: bool,
    generation: u64,
    next_hash: Option<usize>,
}

/// Arena slot. Unlinked slots point at themselves.
struct Node<V> {
    prev: usize,
    next: usize,
    entry: Option<Entry<V>>,
}

impl<V> Node<V> {
    fn detached(id: usize, entry: Option<Entry<V>>) -> Self {
        Self {
            prev: id,
            next: id,
            entry,
        }
    }
}

struct Arena<V> {
    nodes: Vec<Node<V>>,
    free_list: Vec<usize>,
}

impl<V> Arena<V> {
    fn new() -> Self {
        Self {
            nodes: vec![Node::detached(LRU, None), Node::detached(IN_USE, None)],
            free_list: Vec::new(),
        }
    }

    fn alloc(&mut self, entry: Entry<V>) -> usize {
        if let Some(id) = self.free_list.pop() {
            self.nodes[id] = Node::detached(id, Some(entry));
            id
        } else {
            let id = self.nodes.len();
            self.nodes.push(Node::detached(id, Some(entry)));
            id
        }
    }

    /// Take the entry out of an unlinked slot and recycle the slot
    fn free(&mut self, id: usize) -> Option<Entry<V>> {
        let entry = self.nodes[id].entry.take()?;
        self.free_list.push(id);
        Some(entry)
    }

    fn get(&self, id: usize) -> Option<&Entry<V>> {
        self.nodes.get(id).and_then(|node| node.entry.as_ref())
    }

    fn entry(&self, id: usize) -> &Entry<V> {
        match &self.nodes[id].entry {
            Some(entry) => entry,
            None => panic!("cache slot {} is vacant", id),
        }
    }

    fn entry_mut(&mut self, id: usize) -> &mut Entry<V> {
        match &mut self.nodes[id].entry {
            Some(entry) => entry,
            None => panic!("cache slot {} is vacant", id),
        }
    }

    /// Link `id` at the newest end of the list headed by `head`
    fn append(&mut self, head: usize, id: usize) {
        let newest = self.nodes[head].prev;
        self.nodes[id].prev = newest;
        self.nodes[id].next = head;
        self.nodes[newest].next = id;
        self.nodes[head].prev = id;
    }

    fn unlink(&mut self, id: usize) {
        let Node { prev, next, .. } = self.nodes[id];
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
        self.nodes[id].prev = id;
        self.nodes[id].next = id;
    }

    fn oldest(&self, head: usize) -> Option<usize> {
        let first = self.nodes[head].next;
        (first != head).then_some(first)
    }

    fn list_len(&self, head: usize) -> usize {
        let mut count = 0;
        let mut cur = self.nodes[head].next;
        while cur != head {
            count += 1;
            cur = self.nodes[cur].next;
        }
        count
    }

    fn drain(&mut self) -> impl Iterator<Item = Entry<V>> + '_ {
        self.free_list.clear();
        self.nodes.drain(..).filter_map(|node| node.entry)
    }
}

impl<V> ChainStore for Arena<V> {
    fn chain_hash(&self, id: usize) -> u32 {
        self.entry(id).hash
    }

    fn chain_key(&self, id: usize) -> &[u8] {
        &self.entry(id).key
    }

    fn next_hash(&self, id: usize) -> Option<usize> {
        self.entry(id).next_hash
    }

    fn set_next_hash(&mut self, id: usize, next: Option<usize>) {
        self.entry_mut(id).next_hash = next;
    }
}

fn destroy<V>(deleter: &Option<Deleter<V>>, entry: Entry<V>) {
    match deleter {
        Some(deleter) => (**deleter)(&entry.key[..], entry.value),
        None => drop(entry),
    }
}

/// Charge-bounded LRU cache shard.
///
/// Not internally synchronized; see [`crate::ShardedCache`] for the locked,
/// sharded form.
pub struct LruCache<V> {
    id: u64,
    capacity: usize,
    usage: usize,
    table: HandleTable,
    arena: Arena<V>,
    hasher: KeyHasher,
    deleter: Option<Deleter<V>>,
    stats: Arc<CacheStats>,
    next_generation: u64,
}

impl<V> LruCache<V> {
    /// Create a cache holding up to `capacity` units of charge.
    ///
    /// With a capacity of 0 an entry only stays indexed while something
    /// pins it or until the next insert evicts it.
    pub fn new(capacity: usize) -> Self {
        Self::with_parts(capacity, KeyHasher::default(), None, Arc::new(CacheStats::new()))
    }

    /// Create a cache that passes every destroyed entry to `deleter`
    pub fn with_deleter<F>(capacity: usize, deleter: F) -> Self
    where
        F: Fn(&[u8], V) + Send + Sync + 'static,
    {
        Self::with_parts(
            capacity,
            KeyHasher::default(),
            Some(Arc::new(deleter)),
            Arc::new(CacheStats::new()),
        )
    }

    pub(crate) fn with_parts(
        capacity: usize,
        hasher: KeyHasher,
        deleter: Option<Deleter<V>>,
        stats: Arc<CacheStats>,
    ) -> Self {
        Self {
            id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            capacity,
            usage: 0,
            table: HandleTable::new(),
            arena: Arena::new(),
            hasher,
            deleter,
            stats,
            next_generation: 1,
        }
    }

    /// Insert `value` under `key`, replacing any existing entry.
    ///
    /// The returned handle pins the new entry. Eviction runs afterwards and
    /// stops if only pinned entries are left.
    ///
    /// Fails without touching the cache if `charge` would push total usage
    /// past `usize::MAX`.
    pub fn insert(&mut self, key: &[u8], value: V, charge: usize) -> Result<Handle> {
        let hash = self.hasher.hash(key);
        self.insert_with_hash(key, hash, value, charge)
    }

    /// [`insert`](Self::insert) with a caller-computed hash
    pub fn insert_with_hash(
        &mut self,
        key: &[u8],
        hash: u32,
        value: V,
        charge: usize,
    ) -> Result<Handle> {
        let Some(usage) = self.usage.checked_add(charge) else {
            return Err(Error::invalid(format!(
                "charge {} overflows cache usage {}",
                charge, self.usage
            )));
        };

        let generation = self.next_generation;
        self.next_generation += 1;

        let id = self.arena.alloc(Entry {
            key: key.into(),
            hash,
            value,
            charge,
            refs: 1,
            in_cache: false,
            generation,
            next_hash: None,
        });
        self.stats.record_insert();

        let entry = self.arena.entry_mut(id);
        entry.refs += 1;
        entry.in_cache = true;
        self.arena.append(IN_USE, id);
        self.usage = usage;

        if let Some(old) = self.table.insert(&mut self.arena, id) {
            self.finish_erase(old);
        }

        self.evict();

        Ok(Handle {
            cache: self.id,
            slot: id,
            generation,
            hash,
        })
    }

    /// Look up `key`, pinning the entry on a hit
    pub fn lookup(&mut self, key: &[u8]) -> Option<Handle> {
        let hash = self.hasher.hash(key);
        self.lookup_with_hash(key, hash)
    }

    /// [`lookup`](Self::lookup) with a caller-computed hash
    pub fn lookup_with_hash(&mut self, key: &[u8], hash: u32) -> Option<Handle> {
        let Some(id) = self.table.lookup(&self.arena, key, hash) else {
            self.stats.record_miss();
            return None;
        };

        self.stats.record_hit();
        self.ref_entry(id);

        let entry = self.arena.entry(id);
        Some(Handle {
            cache: self.id,
            slot: id,
            generation: entry.generation,
            hash: entry.hash,
        })
    }

    /// Give a handle back
    pub fn release(&mut self, handle: Handle) -> Result<()> {
        let id = self.resolve(&handle)?;
        self.unref(id);
        Ok(())
    }

    /// Value behind a live handle
    pub fn value(&self, handle: &Handle) -> Result<&V> {
        let id = self.resolve(handle)?;
        Ok(&self.arena.entry(id).value)
    }

    /// Key behind a live handle
    pub fn key(&self, handle: &Handle) -> Result<&[u8]> {
        let id = self.resolve(handle)?;
        Ok(&*self.arena.entry(id).key)
    }

    /// Charge of the entry behind a live handle
    pub fn charge(&self, handle: &Handle) -> Result<usize> {
        let id = self.resolve(handle)?;
        Ok(self.arena.entry(id).charge)
    }

    /// Drop `key` from the index.
    ///
    /// Outstanding handles stay valid; the entry is destroyed on the last
    /// release. Returns whether the key was present.
    pub fn erase(&mut self, key: &[u8]) -> bool {
        let hash = self.hasher.hash(key);
        self.erase_with_hash(key, hash)
    }

    /// [`erase`](Self::erase) with a caller-computed hash
    pub fn erase_with_hash(&mut self, key: &[u8], hash: u32) -> bool {
        match self.table.remove(&mut self.arena, key, hash) {
            Some(id) => {
                self.finish_erase(id);
                self.stats.record_erase();
                true
            }
            None => false,
        }
    }

    /// Erase every entry nobody holds. Returns how many were removed.
    pub fn prune(&mut self) -> usize {
        let mut pruned = 0;
        while let Some(id) = self.arena.oldest(LRU) {
            self.remove_indexed(id);
            pruned += 1;
        }
        pruned
    }

    /// Erase every entry.
    ///
    /// Fails without touching anything if a caller still holds a handle to
    /// an indexed entry.
    pub fn clear(&mut self) -> Result<()> {
        let pinned = self.pinned_len();
        if pinned > 0 {
            return Err(Error::invalid(format!(
                "cannot clear cache: {} entries still pinned",
                pinned
            )));
        }
        self.prune();
        Ok(())
    }

    /// Number of indexed entries
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Check if nothing is indexed
    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }

    /// Total charge of indexed entries
    pub fn usage(&self) -> usize {
        self.usage
    }

    /// Configured capacity in charge units
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Indexed entries with at least one outstanding handle
    pub fn pinned_len(&self) -> usize {
        self.arena.list_len(IN_USE)
    }

    /// Hit/miss/eviction counters
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn resolve(&self, handle: &Handle) -> Result<usize> {
        if handle.cache != self.id {
            return Err(Error::invalid("handle was issued by a different cache"));
        }
        match self.arena.get(handle.slot) {
            Some(entry) if entry.generation == handle.generation => Ok(handle.slot),
            _ => Err(Error::invalid("handle refers to a destroyed entry")),
        }
    }

    fn ref_entry(&mut self, id: usize) {
        let entry = self.arena.entry_mut(id);
        let first_hold = entry.in_cache && entry.refs == 1;
        entry.refs += 1;
        if first_hold {
            self.arena.unlink(id);
            self.arena.append(IN_USE, id);
        }
    }

    fn unref(&mut self, id: usize) {
        let entry = self.arena.entry_mut(id);
        entry.refs -= 1;
        let (refs, in_cache) = (entry.refs, entry.in_cache);

        if refs == 0 {
            debug_assert!(!in_cache, "indexed entry lost the cache's own reference");
            self.arena.unlink(id);
            if let Some(entry) = self.arena.free(id) {
                destroy(&self.deleter, entry);
            }
        } else if refs == 1 && in_cache {
            self.arena.unlink(id);
            self.arena.append(LRU, id);
        }
    }

    /// Settle an entry that has just left the index
    fn finish_erase(&mut self, id: usize) {
        let entry = self.arena.entry_mut(id);
        debug_assert!(entry.in_cache);
        entry.in_cache = false;
        self.usage -= entry.charge;
        self.arena.unlink(id);
        self.unref(id);
    }

    fn remove_indexed(&mut self, id: usize) {
        let removed = self.table.remove_id(&mut self.arena, id);
        debug_assert_eq!(removed, Some(id));
        self.finish_erase(id);
    }

    fn evict(&mut self) {
        let mut evicted = 0usize;
        while self.usage > self.capacity {
            let Some(id) = self.arena.oldest(LRU) else {
                break;
            };
            self.remove_indexed(id);
            self.stats.record_eviction();
            evicted += 1;
        }

        if evicted > 0 {
            debug!(evicted, usage = self.usage, capacity = self.capacity, "evicted entries");
        }
        if self.usage > self.capacity {
            warn!(
                usage = self.usage,
                capacity = self.capacity,
                "over capacity with every entry pinned"
            );
        }
    }
}

impl<V> Drop for LruCache<V> {
    fn drop(&mut self) {
        let pinned = self.pinned_len();
        if pinned > 0 {
            warn!(pinned, "cache dropped while entries are still pinned");
        }
        let deleter = self.deleter.take();
        for entry in self.arena.drain() {
            destroy(&deleter, entry);
        }
    }
}

impl<V> std::fmt::Debug for LruCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("len", &self.len())
            .field("usage", &self.usage)
            .field("capacity", &self.capacity)
            .field("buckets", &self.table.bucket_count())
            .finish_non_exhaustive()
    }
}
