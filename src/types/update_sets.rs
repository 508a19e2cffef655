/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`UpdateSet`] type, which carries the key-value writes produced by one
//! command execution from the commands handler into block storage.

use bytes::Bytes;
use indexmap::IndexMap;

/// Set of key-value updates destined for a single block.
///
/// Inserting a key that is already present replaces its value in place.
/// Iteration yields pairs in insertion order; that order is what the block
/// codec serializes, which makes it authoritative for digest reproducibility.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct UpdateSet(IndexMap<Bytes, Bytes>);

impl UpdateSet {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn insert(&mut self, key: Bytes, value: Bytes) {
        self.0.insert(key, value);
    }

    pub fn get(&self, key: &[u8]) -> Option<&Bytes> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &Bytes)> {
        self.0.iter()
    }
}

impl FromIterator<(Bytes, Bytes)> for UpdateSet {
    fn from_iter<I: IntoIterator<Item = (Bytes, Bytes)>>(iter: I) -> Self {
        Self(IndexMap::from_iter(iter))
    }
}

impl IntoIterator for UpdateSet {
    type Item = (Bytes, Bytes);
    type IntoIter = indexmap::map::IntoIter<Bytes, Bytes>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a UpdateSet {
    type Item = (&'a Bytes, &'a Bytes);
    type IntoIter = indexmap::map::Iter<'a, Bytes, Bytes>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
