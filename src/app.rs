/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The ports through which the application plugs into the replica: the
//! [`CommandsHandler`] that interprets client requests, and the
//! [`ReadOnlyStorage`] view it executes against.
//!
//! Besides implementing the functions specified in the trait, implementors of
//! `CommandsHandler` are additionally expected to be *deterministic*: every
//! replica executes the same ordered requests, and their update sets must
//! match byte for byte or the replicas' chains diverge.

use bytes::Bytes;

use crate::store::blockchain::{BlockStoreError, BlockchainStore};
use crate::store::kv_store::OrderedStore;
use crate::types::{BlockId, ClientId, SeqNum, UpdateSet};

/// One consensus-delivered request, as handed to
/// [`Replica::execute`](crate::replica::Replica::execute).
pub struct ExecuteRequest {
    pub client_id: ClientId,
    pub sequence_number: SeqNum,
    pub read_only: bool,
    pub request: Bytes,
    /// Upper bound on the reply the transport can carry back. Replies larger
    /// than this are replaced with an error reply.
    pub max_reply_size: usize,
}

/// What a handler produces for one request: the reply bytes for the client,
/// and the key-value updates to commit. Read-only requests must leave
/// `updates` empty.
pub struct ExecuteOutput {
    pub reply: Bytes,
    pub updates: UpdateSet,
}

/// Why a handler refused a request.
#[derive(Debug)]
pub enum ExecuteError {
    /// The request bytes could not be parsed. Resending the same request
    /// would not help; the replica reports this with status code 1.
    MalformedRequest { detail: String },
}

/// Interprets request bytes against a storage view. One implementation per
/// application (a VM, a ledger validator, a chaincode shim); the replica
/// drives it for every request the consensus engine delivers.
pub trait CommandsHandler: Send + 'static {
    fn execute(
        &mut self,
        request: &ExecuteRequest,
        storage: &dyn ReadOnlyStorage,
    ) -> Result<ExecuteOutput, ExecuteError>;
}

/// Read-only, versioned view of the blockchain store. This is the entire
/// storage surface handlers may touch during execution.
pub trait ReadOnlyStorage {
    /// The value of `app_key` visible at `version`, with the block id that
    /// wrote it.
    fn get_at(
        &self,
        version: BlockId,
        app_key: &[u8],
    ) -> Result<Option<(Bytes, BlockId)>, BlockStoreError>;

    /// The value of `app_key` at the latest version.
    fn get_latest(&self, app_key: &[u8]) -> Result<Option<(Bytes, BlockId)>, BlockStoreError>;

    /// The update set of a stored block.
    fn get_block_data(&self, block_id: BlockId) -> Result<UpdateSet, BlockStoreError>;

    /// The highest block id present.
    fn last_block(&self) -> BlockId;

    /// Conservative conflict probe over the half-open range `(from, to]`.
    fn may_have_conflict_between(
        &self,
        app_key: &[u8],
        from: BlockId,
        to: BlockId,
    ) -> Result<bool, BlockStoreError>;
}

impl<S: OrderedStore> ReadOnlyStorage for BlockchainStore<S> {
    fn get_at(
        &self,
        version: BlockId,
        app_key: &[u8],
    ) -> Result<Option<(Bytes, BlockId)>, BlockStoreError> {
        BlockchainStore::get_at(self, version, app_key)
    }

    fn get_latest(&self, app_key: &[u8]) -> Result<Option<(Bytes, BlockId)>, BlockStoreError> {
        BlockchainStore::get_latest(self, app_key)
    }

    fn get_block_data(&self, block_id: BlockId) -> Result<UpdateSet, BlockStoreError> {
        BlockchainStore::get_block_data(self, block_id)
    }

    fn last_block(&self) -> BlockId {
        BlockchainStore::last_block(self)
    }

    fn may_have_conflict_between(
        &self,
        app_key: &[u8],
        from: BlockId,
        to: BlockId,
    ) -> Result<bool, BlockStoreError> {
        BlockchainStore::may_have_conflict_between(self, app_key, from, to)
    }
}
