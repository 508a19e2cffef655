/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Consistent snapshot iteration at a fixed read version.
//!
//! A [`VersionedIterator`] walks the physically multi-version data key space
//! and surfaces each distinct application key exactly once, paired with its
//! latest version at or below the iterator's `read_version`. Application keys
//! with no version at or below the read version are suppressed. The result is
//! the world as it looked right after `read_version` was appended.
//!
//! `None` from a positioning method means end of iteration, nothing else;
//! lookups that can fail to find a key live on
//! [`BlockchainStore`](super::blockchain::BlockchainStore).

use bytes::Bytes;

use crate::types::BlockId;

use super::kv_store::OrderedIter;
use super::paths::{self, TypeTag};

pub struct VersionedIterator<I: OrderedIter> {
    iter: I,
    read_version: BlockId,
    current: Option<CurrentRow>,
}

struct CurrentRow {
    app_key: Bytes,
    value: Bytes,
    version: BlockId,
}

impl<I: OrderedIter> VersionedIterator<I> {
    pub(crate) fn new(iter: I, read_version: BlockId) -> VersionedIterator<I> {
        VersionedIterator {
            iter,
            read_version,
            current: None,
        }
    }

    /// Position at the first application key visible at the read version.
    pub fn first(&mut self) -> Option<(Bytes, Bytes)> {
        let start = self.iter.seek_at_least(&paths::DATA);
        self.advance_over(start)
    }

    /// Position at the first visible application key that is greater than or
    /// equal to `app_key`.
    pub fn seek_at_least(&mut self, app_key: &[u8]) -> Option<(Bytes, Bytes)> {
        let start = self
            .iter
            .seek_at_least(&paths::compose_data_key(app_key, BlockId::new(0)));
        self.advance_over(start)
    }

    /// Advance to the next distinct visible application key.
    pub fn next(&mut self) -> Option<(Bytes, Bytes)> {
        let app_key = match &self.current {
            Some(row) => row.app_key.clone(),
            None => return None,
        };
        let start = self.seek_past_app_key(&app_key);
        self.advance_over(start)
    }

    /// The `(app_key, value)` pair at the current position.
    pub fn current(&self) -> Option<(Bytes, Bytes)> {
        self.current
            .as_ref()
            .map(|row| (row.app_key.clone(), row.value.clone()))
    }

    /// The block id that wrote the value at the current position.
    pub fn current_version(&self) -> Option<BlockId> {
        self.current.as_ref().map(|row| row.version)
    }

    pub fn is_end(&self) -> bool {
        self.current.is_none()
    }

    /// Starting from `pos` (a physical row in the data key space), find the
    /// first application key with a version at or below the read version and
    /// make it current. Keys whose versions all exceed the read version are
    /// stepped over.
    fn advance_over(&mut self, mut pos: Option<(Bytes, Bytes)>) -> Option<(Bytes, Bytes)> {
        loop {
            let key = match pos {
                Some((key, _)) if matches!(paths::extract_type_tag(&key), Ok(TypeTag::Data)) => key,
                _ => {
                    self.current = None;
                    return None;
                }
            };
            let app_key = match paths::strip_block_id_suffix(&key) {
                Ok(app_key) => app_key,
                Err(_) => {
                    self.current = None;
                    return None;
                }
            };

            // The latest version of this application key at or below the
            // read version, if any.
            let target = paths::compose_data_key(&app_key, self.read_version);
            let prefix = paths::combine(&paths::DATA, &app_key);
            let hit = match self.iter.seek_at_least(&target) {
                Some((key, value)) if key == target => Some((key, value)),
                _ => self.iter.prev(),
            };
            if let Some((hit_key, hit_value)) = hit {
                if paths::is_version_of(&hit_key, &prefix) {
                    let version = match paths::extract_block_id_suffix(&hit_key) {
                        Ok(version) => version,
                        Err(_) => {
                            self.current = None;
                            return None;
                        }
                    };
                    self.current = Some(CurrentRow {
                        app_key: app_key.clone(),
                        value: hit_value.clone(),
                        version,
                    });
                    return Some((app_key, hit_value));
                }
            }

            pos = self.seek_past_app_key(&app_key);
        }
    }

    /// Position at the first row after every version of `app_key`.
    fn seek_past_app_key(&mut self, app_key: &[u8]) -> Option<(Bytes, Bytes)> {
        let max_key = paths::compose_data_key(app_key, BlockId::new(u64::MAX));
        match self.iter.seek_at_least(&max_key) {
            Some((key, _)) if key == max_key => self.iter.next(),
            pos => pos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::blockchain::BlockchainStore;
    use crate::store::memory::MemoryStore;
    use crate::types::UpdateSet;

    fn chain_with_history() -> BlockchainStore<MemoryStore> {
        let chain = BlockchainStore::open(MemoryStore::new()).unwrap();
        let block = |pairs: &[(&str, &str)]| -> UpdateSet {
            pairs
                .iter()
                .map(|(k, v)| {
                    (
                        Bytes::copy_from_slice(k.as_bytes()),
                        Bytes::copy_from_slice(v.as_bytes()),
                    )
                })
                .collect()
        };
        // Block 1: a=1, c=1. Block 2: a=2, b=2. Block 3: d=3.
        chain.append_block(&block(&[("a", "1"), ("c", "1")])).unwrap();
        chain.append_block(&block(&[("a", "2"), ("b", "2")])).unwrap();
        chain.append_block(&block(&[("d", "3")])).unwrap();
        chain
    }

    fn drain<I: OrderedIter>(iter: &mut VersionedIterator<I>) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let mut row = iter.first();
        while let Some((key, value)) = row {
            out.push((
                String::from_utf8(key.to_vec()).unwrap(),
                String::from_utf8(value.to_vec()).unwrap(),
            ));
            row = iter.next();
        }
        out
    }

    #[test]
    fn snapshot_at_latest_version_sees_newest_values() {
        let chain = chain_with_history();
        let mut iter = chain.iterator_at(BlockId::new(3));
        assert_eq!(
            drain(&mut iter),
            vec![
                ("a".into(), "2".into()),
                ("b".into(), "2".into()),
                ("c".into(), "1".into()),
                ("d".into(), "3".into()),
            ]
        );
        assert!(iter.is_end());
    }

    #[test]
    fn snapshot_at_old_version_suppresses_later_keys() {
        let chain = chain_with_history();
        let mut iter = chain.iterator_at(BlockId::new(1));
        // b and d did not exist at version 1; a shows its version-1 value.
        assert_eq!(
            drain(&mut iter),
            vec![("a".into(), "1".into()), ("c".into(), "1".into())]
        );
    }

    #[test]
    fn seek_at_least_skips_to_the_requested_key() {
        let chain = chain_with_history();
        let mut iter = chain.iterator_at(BlockId::new(3));
        let (key, value) = iter.seek_at_least(b"b").unwrap();
        assert_eq!(key.as_ref(), b"b");
        assert_eq!(value.as_ref(), b"2");
        assert_eq!(iter.current_version(), Some(BlockId::new(2)));

        let (key, _) = iter.next().unwrap();
        assert_eq!(key.as_ref(), b"c");
    }

    #[test]
    fn fresh_chain_iterates_nothing() {
        let chain = BlockchainStore::open(MemoryStore::new()).unwrap();
        let mut iter = chain.iterator_at(BlockId::new(0));
        assert!(iter.first().is_none());
        assert!(iter.is_end());
    }
}
