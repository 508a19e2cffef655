/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The versioned blockchain store and the layers underneath it.
//!
//! From the bottom up:
//! 1. [`kv_store`] and [`write_batch`] define the ordered key-value store
//!    port that the environment provides. Any store with unsigned-bytewise
//!    key ordering, prefix seeks and atomic write batches will do;
//!    [`memory`] is the bundled in-memory implementation used by tests.
//! 2. [`paths`] defines the composite-key grammar that multiplexes blocks,
//!    versioned data rows and metadata slots onto the flat key space.
//! 3. [`block_codec`] frames a block's update set into its on-disk bytes and
//!    computes the digests that link blocks to their parents.
//! 4. [`blockchain`] combines the three into the versioned, hash-linked
//!    [`BlockchainStore`](blockchain::BlockchainStore); [`iterator`] provides
//!    consistent snapshot iteration over it at a fixed read version.

pub mod kv_store;

pub mod write_batch;

pub mod memory;

pub mod paths;

pub mod block_codec;

pub mod blockchain;

pub mod iterator;

pub use blockchain::{BlockStoreError, BlockchainStore};
pub use kv_store::{OrderedGet, OrderedIter, OrderedStore, StoreError};
pub use memory::MemoryStore;
pub use write_batch::WriteBatch;
