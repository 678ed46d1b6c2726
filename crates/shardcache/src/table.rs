//! Chained hash table mapping `(key, hash)` to entry ids
//!
//! The table never owns entries. It threads them through singly linked
//! chains stored on the entries themselves (`next_hash`), so growing the
//! bucket array only rewires ids and never moves an entry.

use tracing::trace;

/// Smallest bucket array the table will use
const MIN_BUCKETS: usize = 4;

/// Storage the table chains through.
///
/// Implemented by the entry arena; ids are arena slots.
pub(crate) trait ChainStore {
    /// Cached hash of the entry
    fn chain_hash(&self, id: usize) -> u32;

    /// Key of the entry
    fn chain_key(&self, id: usize) -> &[u8];

    /// Next entry in the same bucket
    fn next_hash(&self, id: usize) -> Option<usize>;

    /// Rewire the bucket chain after `id`
    fn set_next_hash(&mut self, id: usize, next: Option<usize>);
}

/// Position holding a chain pointer: a bucket head or an entry's `next_hash`
#[derive(Debug, Clone, Copy)]
enum Link {
    Bucket(usize),
    Node(usize),
}

/// Open-chaining index with power-of-two bucket array
#[derive(Debug)]
pub(crate) struct HandleTable {
    buckets: Vec<Option<usize>>,
    elems: usize,
}

impl HandleTable {
    /// Create an empty table with the minimum bucket array
    pub fn new() -> Self {
        Self {
            buckets: vec![None; MIN_BUCKETS],
            elems: 0,
        }
    }

    /// Number of indexed entries
    pub fn len(&self) -> usize {
        self.elems
    }

    /// Current length of the bucket array
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Find the entry for `key`
    pub fn lookup<S: ChainStore>(&self, store: &S, key: &[u8], hash: u32) -> Option<usize> {
        self.find_link(store, key, hash).1
    }

    /// Index `id`, replacing any entry with an equal key.
    ///
    /// The replaced entry is unlinked and handed back; disposing of it is
    /// the caller's job.
    pub fn insert<S: ChainStore>(&mut self, store: &mut S, id: usize) -> Option<usize> {
        let hash = store.chain_hash(id);
        let (link, old) = self.find_link(&*store, store.chain_key(id), hash);

        let next = old.and_then(|old_id| store.next_hash(old_id));
        store.set_next_hash(id, next);
        self.set_link(store, link, Some(id));

        match old {
            Some(old_id) => store.set_next_hash(old_id, None),
            None => {
                self.elems += 1;
                if self.elems >= self.buckets.len() {
                    self.resize(store);
                }
            }
        }
        old
    }

    /// Unlink and return the entry for `key`
    pub fn remove<S: ChainStore>(&mut self, store: &mut S, key: &[u8], hash: u32) -> Option<usize> {
        let (link, found) = self.find_link(&*store, key, hash);
        let id = found?;

        let next = store.next_hash(id);
        self.set_link(store, link, next);
        store.set_next_hash(id, None);
        self.elems -= 1;
        Some(id)
    }

    /// Unlink entry `id` itself, using its own key and hash
    pub fn remove_id<S: ChainStore>(&mut self, store: &mut S, id: usize) -> Option<usize> {
        let (link, found) = self.find_link(&*store, store.chain_key(id), store.chain_hash(id));
        let found = found?;

        let next = store.next_hash(found);
        self.set_link(store, link, next);
        store.set_next_hash(found, None);
        self.elems -= 1;
        Some(found)
    }

    /// Walk the chain for `hash` until the link that holds `key` (or the
    /// empty link at the end of the chain).
    fn find_link<S: ChainStore>(&self, store: &S, key: &[u8], hash: u32) -> (Link, Option<usize>) {
        let mut link = Link::Bucket(hash as usize & (self.buckets.len() - 1));
        loop {
            match self.get_link(store, link) {
                Some(id) if store.chain_hash(id) != hash || store.chain_key(id) != key => {
                    link = Link::Node(id);
                }
                found => return (link, found),
            }
        }
    }

    fn get_link<S: ChainStore>(&self, store: &S, link: Link) -> Option<usize> {
        match link {
            Link::Bucket(b) => self.buckets[b],
            Link::Node(id) => store.next_hash(id),
        }
    }

    fn set_link<S: ChainStore>(&mut self, store: &mut S, link: Link, target: Option<usize>) {
        match link {
            Link::Bucket(b) => self.buckets[b] = target,
            Link::Node(id) => store.set_next_hash(id, target),
        }
    }

    /// Grow the bucket array and rehash every chain into it.
    ///
    /// Nodes are pushed onto the head of their new chain, so no chain is
    /// walked twice.
    fn resize<S: ChainStore>(&mut self, store: &mut S) {
        let mut new_len = MIN_BUCKETS;
        while new_len <= self.buckets.len() || new_len <= self.elems {
            new_len *= 2;
        }

        let mut new_buckets = vec![None; new_len];
        let mut count = 0;
        for head in std::mem::take(&mut self.buckets) {
            let mut cur = head;
            while let Some(id) = cur {
                cur = store.next_hash(id);
                let slot = store.chain_hash(id) as usize & (new_len - 1);
                store.set_next_hash(id, new_buckets[slot]);
                new_buckets[slot] = Some(id);
                count += 1;
            }
        }

        // A mismatch means a chain was corrupted; continuing would drop entries
        assert_eq!(
            count, self.elems,
            "handle table resize found {} entries, expected {}",
            count, self.elems
        );

        self.buckets = new_buckets;
        trace!(buckets = new_len, elems = self.elems, "handle table resized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    /// Minimal chain store: (key, hash, next_hash) per id
    #[derive(Default)]
    struct TestStore {
        nodes: Vec<(Vec<u8>, u32, Option<usize>)>,
    }

    impl TestStore {
        fn add(&mut self, key: &[u8], hash: u32) -> usize {
            self.nodes.push((key.to_vec(), hash, None));
            self.nodes.len() - 1
        }
    }

    impl ChainStore for TestStore {
        fn chain_hash(&self, id: usize) -> u32 {
            self.nodes[id].1
        }

        fn chain_key(&self, id: usize) -> &[u8] {
            &self.nodes[id].0
        }

        fn next_hash(&self, id: usize) -> Option<usize> {
            self.nodes[id].2
        }

        fn set_next_hash(&mut self, id: usize, next: Option<usize>) {
            self.nodes[id].2 = next;
        }
    }

    #[test]
    fn test_table_lookup_miss() {
        let store = TestStore::default();
        let table = HandleTable::new();
        assert_eq!(table.lookup(&store, b"nope", 1), None);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_table_insert_lookup() {
        let mut store = TestStore::default();
        let mut table = HandleTable::new();

        let a = store.add(b"a", 10);
        let b = store.add(b"b", 11);
        assert_eq!(table.insert(&mut store, a), None);
        assert_eq!(table.insert(&mut store, b), None);

        assert_eq!(table.lookup(&store, b"a", 10), Some(a));
        assert_eq!(table.lookup(&store, b"b", 11), Some(b));
        // Right key, wrong hash is a miss
        assert_eq!(table.lookup(&store, b"a", 11), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_table_collisions() {
        let mut store = TestStore::default();
        let mut table = HandleTable::new();

        // Same hash forces one chain
        let ids: Vec<_> = (0..3u8).map(|i| store.add(&[i], 42)).collect();
        for &id in &ids {
            table.insert(&mut store, id);
        }

        for (i, &id) in ids.iter().enumerate() {
            assert_eq!(table.lookup(&store, &[i as u8], 42), Some(id));
        }

        assert_eq!(table.remove(&mut store, &[1], 42), Some(ids[1]));
        assert_eq!(table.lookup(&store, &[0], 42), Some(ids[0]));
        assert_eq!(table.lookup(&store, &[1], 42), None);
        assert_eq!(table.lookup(&store, &[2], 42), Some(ids[2]));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_table_replace_keeps_chain() {
        let mut store = TestStore::default();
        let mut table = HandleTable::new();

        let first = store.add(b"x", 5);
        let behind = store.add(b"y", 5);
        table.insert(&mut store, first);
        table.insert(&mut store, behind);

        let replacement = store.add(b"x", 5);
        assert_eq!(table.insert(&mut store, replacement), Some(first));
        assert_eq!(table.len(), 2);
        assert_eq!(store.next_hash(first), None);

        assert_eq!(table.lookup(&store, b"x", 5), Some(replacement));
        assert_eq!(table.lookup(&store, b"y", 5), Some(behind));
    }

    #[test]
    fn test_table_remove_by_id() {
        let mut store = TestStore::default();
        let mut table = HandleTable::new();
        let ids: Vec<_> = (0..3u8).map(|i| store.add(&[i], 9)).collect();
        for &id in &ids {
            table.insert(&mut store, id);
        }

        assert_eq!(table.remove_id(&mut store, ids[2]), Some(ids[2]));
        assert_eq!(table.remove_id(&mut store, ids[2]), None);
        assert_eq!(table.lookup(&store, &[0], 9), Some(ids[0]));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_table_remove_missing() {
        let mut store = TestStore::default();
        let mut table = HandleTable::new();
        let a = store.add(b"a", 1);
        table.insert(&mut store, a);

        assert_eq!(table.remove(&mut store, b"b", 1), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_table_grows_at_load_factor_one() {
        let mut store = TestStore::default();
        let mut table = HandleTable::new();
        assert_eq!(table.bucket_count(), 4);

        for i in 0..3u32 {
            let id = store.add(&i.to_le_bytes(), i);
            table.insert(&mut store, id);
        }
        assert_eq!(table.bucket_count(), 4);

        let id = store.add(&3u32.to_le_bytes(), 3);
        table.insert(&mut store, id);
        assert_eq!(table.bucket_count(), 8);

        for i in 4..100u32 {
            let id = store.add(&i.to_le_bytes(), i.wrapping_mul(2_654_435_761));
            table.insert(&mut store, id);
            assert!(table.len() < table.bucket_count());
        }
        assert_eq!(table.len(), 100);
        assert_eq!(table.bucket_count(), 128);
    }

    #[test]
    fn test_table_never_shrinks() {
        let mut store = TestStore::default();
        let mut table = HandleTable::new();
        for i in 0..32u32 {
            let id = store.add(&i.to_le_bytes(), i);
            table.insert(&mut store, id);
        }
        let grown = table.bucket_count();
        for i in 0..32u32 {
            assert!(table.remove(&mut store, &i.to_le_bytes(), i).is_some());
        }
        assert_eq!(table.len(), 0);
        assert_eq!(table.bucket_count(), grown);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u8),
        Remove(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => any::<u8>().prop_map(Op::Insert),
            1 => any::<u8>().prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn prop_table_matches_model(ops in prop::collection::vec(op_strategy(), 1..400)) {
            let mut store = TestStore::default();
            let mut table = HandleTable::new();
            let mut model: HashMap<u8, usize> = HashMap::new();

            for op in ops {
                match op {
                    Op::Insert(k) => {
                        // Low-entropy hash keeps chains long
                        let hash = u32::from(k % 16);
                        let id = store.add(&[k], hash);
                        let old = table.insert(&mut store, id);
                        prop_assert_eq!(old, model.insert(k, id));
                    }
                    Op::Remove(k) => {
                        let removed = table.remove(&mut store, &[k], u32::from(k % 16));
                        prop_assert_eq!(removed, model.remove(&k));
                    }
                }
                prop_assert_eq!(table.len(), model.len());
            }

            for (k, id) in &model {
                prop_assert_eq!(table.lookup(&store, &[*k], u32::from(k % 16)), Some(*id));
            }
        }
    }
}
