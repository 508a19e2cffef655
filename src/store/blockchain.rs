/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The versioned, hash-linked block store built over an [`OrderedStore`].
//!
//! [`BlockchainStore`] multiplexes two kinds of rows onto the backend through
//! the key grammar in [`paths`](super::paths): one `BLOCK` row per block
//! holding its serialized bytes, and one `DATA` row per update per block
//! holding that version of the application key. Appending a block writes the
//! block row and all of its data rows in a single atomic batch.
//!
//! ## Counters
//!
//! The store caches two counters. `last_block` is the highest block id
//! present. `last_reachable_block` is the top of the contiguous, chain-valid
//! prefix starting at block 1. Under normal append-only operation the two are
//! equal; they diverge while state transfer fetches blocks out of order, and
//! converge again as [`put_block_raw`](BlockchainStore::put_block_raw) closes
//! the gaps.
//!
//! ## Writers
//!
//! The append path and the raw-put path are mutually exclusive. Both take a
//! non-blocking writer lock; losing the race is reported as
//! [`BlockStoreError::IllegalState`] rather than blocking, since the
//! environment guarantees normal execution and state transfer are never
//! active at the same time. Reads are safe concurrently with the writer; the
//! backend provides read consistency for committed rows.
//!
//! A missing block inside the reachable prefix means the chain is corrupt.
//! Such reads panic so that external supervision can restart the process and
//! run replica state sync again.

use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::types::{BlockId, UpdateSet};

use super::block_codec::{self, BlockDigest, CodecError, GENESIS_PARENT_DIGEST};
use super::iterator::VersionedIterator;
use super::kv_store::{OrderedIter, OrderedStore, StoreError};
use super::paths::{self, KeyError, TypeTag};
use super::write_batch::WriteBatch;

pub struct BlockchainStore<S: OrderedStore> {
    store: S,
    last_block: Arc<AtomicU64>,
    last_reachable: Arc<AtomicU64>,
    write_lock: Arc<Mutex<()>>,
}

impl<S: OrderedStore> Clone for BlockchainStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            last_block: self.last_block.clone(),
            last_reachable: self.last_reachable.clone(),
            write_lock: self.write_lock.clone(),
        }
    }
}

impl<S: OrderedStore> BlockchainStore<S> {
    /// Open the blockchain store over a backend, recovering both counters
    /// from the persisted rows.
    pub fn open(store: S) -> Result<BlockchainStore<S>, BlockStoreError> {
        let mut iter = store.iter();

        // The last block row is the greatest key below the data key space.
        iter.seek_at_least(&paths::DATA);
        let last_block = match iter.prev() {
            Some((key, _)) if matches!(paths::extract_type_tag(&key), Ok(TypeTag::Block)) => {
                paths::extract_block_id_suffix(&key)?
            }
            _ => BlockId::new(0),
        };

        // The reachable prefix ends at the first gap in the block rows.
        let mut last_reachable = 0u64;
        let mut row = iter.seek_at_least(&paths::BLOCK);
        while let Some((key, _)) = row {
            if !matches!(paths::extract_type_tag(&key), Ok(TypeTag::Block)) {
                break;
            }
            let id = paths::extract_block_id_suffix(&key)?;
            if id.int() != last_reachable + 1 {
                break;
            }
            last_reachable = id.int();
            row = iter.next();
        }

        log::info!(
            "opened blockchain store: last block {}, last reachable block {}",
            last_block,
            last_reachable
        );

        Ok(BlockchainStore {
            store,
            last_block: Arc::new(AtomicU64::new(last_block.int())),
            last_reachable: Arc::new(AtomicU64::new(last_reachable)),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// The highest block id present, reachable or not.
    pub fn last_block(&self) -> BlockId {
        BlockId::new(self.last_block.load(Ordering::SeqCst))
    }

    /// The top of the contiguous prefix `[1, last_reachable_block]`.
    pub fn last_reachable_block(&self) -> BlockId {
        BlockId::new(self.last_reachable.load(Ordering::SeqCst))
    }

    /// Append a block holding `updates` at id `last_block + 1`.
    ///
    /// Reads the parent block to compute the parent digest, then commits the
    /// block row and every per-update data row in one atomic batch. On
    /// backend failure the counters are untouched and the error is
    /// retryable.
    ///
    /// Panics if the parent block is missing or empty: the chain is corrupt
    /// and crash-restart must intervene.
    pub fn append_block(&self, updates: &UpdateSet) -> Result<BlockId, BlockStoreError> {
        let _guard = self
            .write_lock
            .try_lock()
            .map_err(|_| BlockStoreError::IllegalState)?;

        let block_id = self.last_block() + 1;

        let parent_digest: BlockDigest = if block_id.int() > 1 {
            match self.get_block_raw(block_id - 1)? {
                Some(parent) if !parent.is_empty() => block_codec::digest_of(&parent),
                _ => panic!(
                    "blockchain corrupted: no block or empty block data for id {}",
                    block_id - 1
                ),
            }
        } else {
            GENESIS_PARENT_DIGEST
        };

        let block_bytes = block_codec::encode(&parent_digest, updates);

        let mut wb = S::WriteBatch::new();
        wb.set(&paths::compose_block_key(block_id), &block_bytes);
        for (key, value) in updates.iter() {
            wb.set(&paths::compose_data_key(key, block_id), value);
        }
        let mut store = self.store.clone();
        store.write(wb)?;

        self.last_block.store(block_id.int(), Ordering::SeqCst);
        self.last_reachable.store(block_id.int(), Ordering::SeqCst);

        log::debug!("appended block {} with {} updates", block_id, updates.len());
        Ok(block_id)
    }

    /// Versioned point read: the value of `app_key` visible at `version`,
    /// together with the block id that wrote it. `None` if the key is absent
    /// at that version.
    pub fn get_at(
        &self,
        version: BlockId,
        app_key: &[u8],
    ) -> Result<Option<(Bytes, BlockId)>, BlockStoreError> {
        let target = paths::compose_data_key(app_key, version);
        let prefix = paths::combine(&paths::DATA, app_key);

        let mut iter = self.store.iter();
        let hit = match iter.seek_at_least(&target) {
            Some((key, value)) if key == target => Some((key, value)),
            // Landed past the requested version (or at the end): the answer,
            // if any, is the row just before.
            _ => iter.prev(),
        };

        match hit {
            Some((key, value)) if paths::is_version_of(&key, &prefix) => {
                let found_version = paths::extract_block_id_suffix(&key)?;
                Ok(Some((value, found_version)))
            }
            _ => Ok(None),
        }
    }

    /// Read at the latest version.
    pub fn get_latest(&self, app_key: &[u8]) -> Result<Option<(Bytes, BlockId)>, BlockStoreError> {
        self.get_at(self.last_block(), app_key)
    }

    /// The update set of block `block_id`, decoded from its stored bytes.
    /// Pair order is the producer's insertion order.
    pub fn get_block_data(&self, block_id: BlockId) -> Result<UpdateSet, BlockStoreError> {
        let raw = self
            .get_block_raw(block_id)?
            .ok_or(BlockStoreError::NotFound)?;
        let decoded = block_codec::decode(&raw)?;
        Ok(decoded.updates.into_iter().collect())
    }

    /// The raw stored bytes of block `block_id`.
    pub fn get_block_raw(&self, block_id: BlockId) -> Result<Option<Bytes>, BlockStoreError> {
        Ok(self.store.get(&paths::compose_block_key(block_id))?)
    }

    /// Insert a block fetched by state transfer, possibly out of order.
    ///
    /// If a block with this id already exists with different bytes, the
    /// existing block is reverted (its block row and every one of its data
    /// rows deleted) before the new bytes are written. Identical bytes leave
    /// the store unchanged. `last_block` rises to at least `block_id`;
    /// `last_reachable_block` advances only when this put closes the gap at
    /// `last_reachable_block + 1`, in which case it keeps advancing over
    /// previously-fetched higher blocks.
    pub fn put_block_raw(&self, block_id: BlockId, block: Bytes) -> Result<(), BlockStoreError> {
        let _guard = self
            .write_lock
            .try_lock()
            .map_err(|_| BlockStoreError::IllegalState)?;

        match self.get_block_raw(block_id)? {
            Some(existing) if existing == block => {
                self.advance_counters_over(block_id);
                return Ok(());
            }
            Some(existing) => {
                log::error!(
                    "conflicting bytes for block {}: stored {} bytes, inserted {} bytes; reverting stored block",
                    block_id,
                    existing.len(),
                    block.len()
                );
                self.delete_block_rows(block_id, &existing)?;
            }
            None => {}
        }

        // A decode failure here aborts this fetch; the engine will re-fetch.
        let decoded = block_codec::decode(&block)?;

        let mut wb = S::WriteBatch::new();
        wb.set(&paths::compose_block_key(block_id), &block);
        for (key, value) in &decoded.updates {
            wb.set(&paths::compose_data_key(key, block_id), value);
        }
        let mut store = self.store.clone();
        store.write(wb)?;

        self.advance_counters_over(block_id);
        log::debug!(
            "stored sync block {}; last reachable block now {}",
            block_id,
            self.last_reachable_block()
        );
        Ok(())
    }

    /// Delete block `block_id` and all of its per-update data rows. Used by
    /// replica state sync to truncate blocks past the engine's last executed
    /// sequence number.
    pub fn delete_block(&self, block_id: BlockId) -> Result<(), BlockStoreError> {
        let _guard = self
            .write_lock
            .try_lock()
            .map_err(|_| BlockStoreError::IllegalState)?;

        let existing = self
            .get_block_raw(block_id)?
            .ok_or(BlockStoreError::NotFound)?;
        self.delete_block_rows(block_id, &existing)?;

        if block_id.int() == self.last_block.load(Ordering::SeqCst) {
            self.last_block.store(block_id.int() - 1, Ordering::SeqCst);
        }
        if block_id.int() <= self.last_reachable.load(Ordering::SeqCst) {
            self.last_reachable
                .store(block_id.int() - 1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Conservative conflict probe: could `app_key` have been written in
    /// `(from, to]`? `false` only when the latest version at `to` is known to
    /// precede `from`.
    pub fn may_have_conflict_between(
        &self,
        app_key: &[u8],
        from: BlockId,
        to: BlockId,
    ) -> Result<bool, BlockStoreError> {
        match self.get_at(to, app_key)? {
            Some((_, written_at)) if written_at < from => Ok(false),
            _ => Ok(true),
        }
    }

    /// Iterate distinct application keys as visible at `read_version`.
    pub fn iterator_at(&self, read_version: BlockId) -> VersionedIterator<S::Iter> {
        VersionedIterator::new(self.store.iter(), read_version)
    }

    /// Delete the block row of `block_id` and every data row it produced, in
    /// one batch. Panics if the stored block bytes do not decode: rows this
    /// replica persisted must frame correctly, anything else is corruption.
    fn delete_block_rows(&self, block_id: BlockId, block: &Bytes) -> Result<(), BlockStoreError> {
        let decoded = match block_codec::decode(block) {
            Ok(decoded) => decoded,
            Err(err) => panic!(
                "blockchain corrupted: stored block {} does not decode: {}",
                block_id, err
            ),
        };

        let mut wb = S::WriteBatch::new();
        wb.delete(&paths::compose_block_key(block_id));
        for (key, _) in &decoded.updates {
            wb.delete(&paths::compose_data_key(key, block_id));
        }
        let mut store = self.store.clone();
        store.write(wb)?;
        Ok(())
    }

    /// Raise `last_block` to at least `block_id`, and close the reachability
    /// gap if `block_id` extends the reachable prefix.
    fn advance_counters_over(&self, block_id: BlockId) {
        self.last_block.fetch_max(block_id.int(), Ordering::SeqCst);

        if block_id.int() == self.last_reachable.load(Ordering::SeqCst) + 1 {
            let mut reachable = block_id;
            while let Ok(Some(_)) = self.get_block_raw(reachable + 1) {
                reachable += 1;
            }
            self.last_reachable.store(reachable.int(), Ordering::SeqCst);
        }
    }
}

#[derive(Debug)]
pub enum BlockStoreError {
    /// The requested block or key does not exist.
    NotFound,
    /// The operation is illegal in the current state, e.g. two writers
    /// racing for the append path.
    IllegalState,
    /// Retryable backend I/O failure; counters and rows are untouched.
    Backend { source: StoreError },
    /// A block buffer failed to frame or decode.
    Codec { source: CodecError },
    /// A composed key failed to parse.
    Key { source: KeyError },
    /// A stored value failed to deserialize.
    Deserialize { source: std::io::Error },
}

impl Display for BlockStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BlockStoreError::NotFound => write!(f, "not found"),
            BlockStoreError::IllegalState => write!(f, "operation illegal in the current state"),
            BlockStoreError::Backend { source } => write!(f, "{}", source),
            BlockStoreError::Codec { source } => write!(f, "{}", source),
            BlockStoreError::Key { source } => write!(f, "{}", source),
            BlockStoreError::Deserialize { source } => {
                write!(f, "stored value failed to deserialize: {}", source)
            }
        }
    }
}

impl From<StoreError> for BlockStoreError {
    fn from(source: StoreError) -> Self {
        BlockStoreError::Backend { source }
    }
}

impl From<CodecError> for BlockStoreError {
    fn from(source: CodecError) -> Self {
        BlockStoreError::Codec { source }
    }
}

impl From<KeyError> for BlockStoreError {
    fn from(source: KeyError) -> Self {
        BlockStoreError::Key { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn updates(pairs: &[(&str, &str)]) -> UpdateSet {
        pairs
            .iter()
            .map(|(k, v)| {
                (
                    Bytes::copy_from_slice(k.as_bytes()),
                    Bytes::copy_from_slice(v.as_bytes()),
                )
            })
            .collect()
    }

    #[test]
    fn counters_recover_on_reopen() {
        let backend = MemoryStore::new();
        {
            let chain = BlockchainStore::open(backend.clone()).unwrap();
            chain.append_block(&updates(&[("a", "1")])).unwrap();
            chain.append_block(&updates(&[("a", "2")])).unwrap();
        }
        let reopened = BlockchainStore::open(backend).unwrap();
        assert_eq!(reopened.last_block(), BlockId::new(2));
        assert_eq!(reopened.last_reachable_block(), BlockId::new(2));
        assert_eq!(
            reopened.get_at(BlockId::new(2), b"a").unwrap().unwrap().0,
            Bytes::from_static(b"2")
        );
    }

    #[test]
    fn reopen_with_gap_stops_reachable_at_the_gap() {
        let backend = MemoryStore::new();
        let chain = BlockchainStore::open(backend.clone()).unwrap();
        let b1 = chain.append_block(&updates(&[("a", "1")])).unwrap();
        let b2 = chain.append_block(&updates(&[("a", "2")])).unwrap();
        chain.append_block(&updates(&[("a", "3")])).unwrap();

        // Fabricate a gap: copy blocks 1 and 3 (renumbered 4) into a fresh
        // backend via raw puts.
        let raw1 = chain.get_block_raw(b1).unwrap().unwrap();
        let raw2 = chain.get_block_raw(b2).unwrap().unwrap();
        let target = BlockchainStore::open(MemoryStore::new()).unwrap();
        target.put_block_raw(BlockId::new(1), raw1).unwrap();
        target.put_block_raw(BlockId::new(4), raw2).unwrap();

        assert_eq!(target.last_block(), BlockId::new(4));
        assert_eq!(target.last_reachable_block(), BlockId::new(1));
    }

    #[test]
    fn get_at_does_not_bleed_across_longer_keys() {
        let chain = BlockchainStore::open(MemoryStore::new()).unwrap();
        chain.append_block(&updates(&[("ab", "long")])).unwrap();
        // "a" was never written; its data-key prefix is a prefix of "ab"'s.
        assert!(chain.get_at(BlockId::new(1), b"a").unwrap().is_none());
    }

    #[test]
    fn deleting_the_top_block_rolls_counters_back() {
        let chain = BlockchainStore::open(MemoryStore::new()).unwrap();
        chain.append_block(&updates(&[("a", "1")])).unwrap();
        let b2 = chain.append_block(&updates(&[("b", "2")])).unwrap();

        chain.delete_block(b2).unwrap();
        assert_eq!(chain.last_block(), BlockId::new(1));
        assert_eq!(chain.last_reachable_block(), BlockId::new(1));
        assert!(chain.get_at(BlockId::new(1), b"b").unwrap().is_none());
        assert!(matches!(
            chain.get_block_data(b2),
            Err(BlockStoreError::NotFound)
        ));
    }
}
