/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The bridge between the state transfer module and block storage.
//!
//! State transfer rebuilds a lagging replica by fetching blocks from its
//! peers, typically in reverse batches from the head of the chain downward.
//! Out-of-order arrival is expected: `last_block` races ahead of
//! `last_reachable_block` while gaps remain, and a single
//! [`put_block`](AppState::put_block) that lands at `last_reachable_block
//! + 1` may advance the reachable prefix over many previously-fetched
//! blocks at once.
//!
//! [`AppState`] is a standalone value that shares the blockchain store
//! handle. The state transfer module owns it; nothing here points back at
//! the replica.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use bytes::Bytes;

use crate::events::{Event, PutSyncBlockEvent};
use crate::store::block_codec::{self, BlockDigest};
use crate::store::blockchain::{BlockStoreError, BlockchainStore};
use crate::store::kv_store::OrderedStore;
use crate::types::BlockId;

/// The state transfer module, as seen by the replica. Provided by the
/// environment; drives [`AppState`] to completion when the replica detects
/// it has fallen behind.
pub trait StateTransfer<S: OrderedStore>: Send + 'static {
    fn fetch(&mut self, app_state: &AppState<S>) -> Result<(), BlockStoreError>;
}

/// Block-level view of storage handed to the state transfer module.
pub struct AppState<S: OrderedStore> {
    storage: BlockchainStore<S>,
    event_publisher: Option<Sender<Event>>,
}

impl<S: OrderedStore> AppState<S> {
    pub fn new(
        storage: BlockchainStore<S>,
        event_publisher: Option<Sender<Event>>,
    ) -> AppState<S> {
        AppState {
            storage,
            event_publisher,
        }
    }

    pub fn last_reachable_block(&self) -> BlockId {
        self.storage.last_reachable_block()
    }

    pub fn last_block(&self) -> BlockId {
        self.storage.last_block()
    }

    pub fn has_block(&self, block_id: BlockId) -> Result<bool, BlockStoreError> {
        Ok(self.storage.get_block_raw(block_id)?.is_some())
    }

    /// Copy the raw bytes of `block_id` into `out`, returning the number of
    /// bytes written. The caller supplies a buffer large enough for any
    /// block it requests.
    ///
    /// Panics if the block is missing: state transfer only asks for blocks
    /// this replica advertised, so absence means the data is corrupted.
    pub fn get_block(&self, block_id: BlockId, out: &mut [u8]) -> Result<usize, BlockStoreError> {
        let block = match self.storage.get_block_raw(block_id)? {
            Some(block) if !block.is_empty() => block,
            _ => panic!("block not found, id: {}", block_id),
        };
        out[..block.len()].copy_from_slice(&block);
        Ok(block.len())
    }

    /// The parent digest stored in the header of block `block_id`, used to
    /// validate the predecessor before requesting it.
    ///
    /// Panics if the block is missing, as for [`get_block`](Self::get_block).
    pub fn get_prev_digest_from_block(
        &self,
        block_id: BlockId,
    ) -> Result<BlockDigest, BlockStoreError> {
        assert!(block_id.int() > 0);
        let block = match self.storage.get_block_raw(block_id)? {
            Some(block) => block,
            None => panic!("block not found for parent digest, id: {}", block_id),
        };
        Ok(block_codec::parent_digest_of(&block)?)
    }

    /// Store a fetched block, closing reachability gaps as they fill. See
    /// [`BlockchainStore::put_block_raw`].
    pub fn put_block(&self, block_id: BlockId, block: Bytes) -> Result<(), BlockStoreError> {
        self.storage.put_block_raw(block_id, block)?;
        Event::PutSyncBlock(PutSyncBlockEvent {
            timestamp: SystemTime::now(),
            block_id,
            last_reachable_block: self.storage.last_reachable_block(),
        })
        .publish(&self.event_publisher);
        Ok(())
    }
}
