/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A volatile, in-memory implementation of [`OrderedStore`] over an ordered
//! map. Selected with `storage.backend = memory`; intended for tests only.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use super::kv_store::{OrderedGet, OrderedIter, OrderedStore, StoreError};
use super::write_batch::WriteBatch;

/// An in-memory [`OrderedStore`]. `BTreeMap` compares `Bytes` keys
/// lexicographically as unsigned bytes, which is exactly the comparator the
/// blockchain layer requires.
#[derive(Clone, Default)]
pub struct MemoryStore(Arc<Mutex<BTreeMap<Bytes, Bytes>>>);

impl MemoryStore {
    /// Create a new, empty `MemoryStore`.
    pub fn new() -> MemoryStore {
        MemoryStore(Arc::new(Mutex::new(BTreeMap::new())))
    }
}

impl OrderedGet for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        Ok(self.0.lock().unwrap().get(key).cloned())
    }
}

impl OrderedStore for MemoryStore {
    type WriteBatch = MemoryWriteBatch;
    type Iter = MemoryIter;

    fn write(&mut self, wb: Self::WriteBatch) -> Result<(), StoreError> {
        let mut map = self.0.lock().unwrap();
        for (key, value) in wb.insertions {
            map.insert(Bytes::from(key), Bytes::from(value));
        }
        for key in wb.deletions {
            map.remove(key.as_slice());
        }
        Ok(())
    }

    fn iter(&self) -> MemoryIter {
        // Iterators see the rows committed at creation time. Cloning the map
        // clones `Bytes` handles, not the payloads.
        let rows: Vec<(Bytes, Bytes)> = self
            .0
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        MemoryIter { rows, pos: 0 }
    }
}

/// A simple implementation of [`WriteBatch`]. A `set` cancels an earlier
/// `delete` of the same key and vice versa, so batches behave like their
/// operations applied in order.
pub struct MemoryWriteBatch {
    insertions: HashMap<Vec<u8>, Vec<u8>>,
    deletions: HashSet<Vec<u8>>,
}

impl WriteBatch for MemoryWriteBatch {
    fn new() -> Self {
        MemoryWriteBatch {
            insertions: HashMap::new(),
            deletions: HashSet::new(),
        }
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        let _ = self.deletions.remove(key);
        self.insertions.insert(key.to_vec(), value.to_vec());
    }

    fn delete(&mut self, key: &[u8]) {
        let _ = self.insertions.remove(key);
        self.deletions.insert(key.to_vec());
    }
}

/// Iterator over a point-in-time snapshot of the map. The position ranges
/// over `0..=rows.len()`, where `rows.len()` is the end position.
pub struct MemoryIter {
    rows: Vec<(Bytes, Bytes)>,
    pos: usize,
}

impl OrderedIter for MemoryIter {
    fn first(&mut self) -> Option<(Bytes, Bytes)> {
        self.pos = 0;
        self.current()
    }

    fn seek_at_least(&mut self, key: &[u8]) -> Option<(Bytes, Bytes)> {
        self.pos = self.rows.partition_point(|(k, _)| k.as_ref() < key);
        self.current()
    }

    fn next(&mut self) -> Option<(Bytes, Bytes)> {
        if self.pos < self.rows.len() {
            self.pos += 1;
        }
        self.current()
    }

    fn prev(&mut self) -> Option<(Bytes, Bytes)> {
        if self.pos == 0 {
            return None;
        }
        self.pos -= 1;
        self.current()
    }

    fn current(&self) -> Option<(Bytes, Bytes)> {
        self.rows.get(self.pos).cloned()
    }

    fn is_end(&self) -> bool {
        self.pos >= self.rows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(rows: &[(&[u8], &[u8])]) -> MemoryStore {
        let mut store = MemoryStore::new();
        let mut wb = MemoryWriteBatch::new();
        for (k, v) in rows {
            wb.set(k, v);
        }
        store.write(wb).unwrap();
        store
    }

    #[test]
    fn iteration_is_ordered_bytewise() {
        let store = store_with(&[(b"b", b"2"), (b"a", b"1"), (b"\xff", b"3"), (b"ab", b"4")]);
        let mut iter = store.iter();
        let mut keys = Vec::new();
        let mut row = iter.first();
        while let Some((k, _)) = row {
            keys.push(k);
            row = iter.next();
        }
        assert_eq!(keys, vec![&b"a"[..], b"ab", b"b", b"\xff"]);
    }

    #[test]
    fn seek_at_least_and_prev() {
        let store = store_with(&[(b"a", b"1"), (b"c", b"2"), (b"e", b"3")]);
        let mut iter = store.iter();

        let (k, _) = iter.seek_at_least(b"b").unwrap();
        assert_eq!(k.as_ref(), b"c");

        // Seeking past the last row lands at the end position; prev steps
        // back onto the last row.
        assert!(iter.seek_at_least(b"f").is_none());
        assert!(iter.is_end());
        let (k, _) = iter.prev().unwrap();
        assert_eq!(k.as_ref(), b"e");

        // prev at the first row stays put.
        iter.first();
        assert!(iter.prev().is_none());
    }

    #[test]
    fn batch_applies_atomically_in_order() {
        let mut store = store_with(&[(b"k", b"old")]);
        let mut wb = MemoryWriteBatch::new();
        wb.set(b"k", b"new");
        wb.delete(b"k");
        wb.set(b"l", b"1");
        store.write(wb).unwrap();
        assert!(store.get(b"k").unwrap().is_none());
        assert_eq!(store.get(b"l").unwrap().unwrap().as_ref(), b"1");
    }
}
