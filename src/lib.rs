/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A key-value blockchain core for BFT-replicated state machines.
//!
//! This crate is the storage and state-machine substrate that sits between a
//! consensus engine (which orders client commands across replicas) and an
//! application commands handler (which interprets them). It appends ordered,
//! hash-linked blocks of key-value updates to a versioned store, serves
//! versioned point reads and snapshot range iteration, rebuilds lagging
//! replicas through a state transfer bridge, truncates uncommitted blocks at
//! startup, and streams prefix-filtered updates to thin-replica subscribers
//! with gap-free ordering.
//!
//! The consensus engine, the commands handler, the state transfer module,
//! and the ordered key-value backend are all ports: the environment supplies
//! them, and this crate only ever sees their interfaces.
//!
//! Orientation, bottom-up:
//! - [`store`] — the ordered-store port, the composite-key grammar, the
//!   block codec, and the versioned [`BlockchainStore`](store::BlockchainStore).
//! - [`app`] — the commands handler port and the storage view it executes
//!   against.
//! - [`replica`] — the lifecycle shell that drives the handler and appends
//!   blocks.
//! - [`state_sync`] — startup truncation of blocks consensus never durably
//!   committed.
//! - [`state_transfer`] — the block-level bridge the state transfer module
//!   drives.
//! - [`stream`] — the thin-replica subsystem: subscriber rings, filtering,
//!   and the gap-free catch-up protocol.
//! - [`metadata`] — numbered opaque slots for the consensus engine.
//! - [`time_contract`] — the time sub-module riding inside the block stream.
//! - [`client`] — the client-side port and connection pool.
//! - [`events`], [`event_bus`], [`logging`] — storage event notifications
//!   and their default log handlers.

pub mod app;

pub mod client;

pub mod config;

pub mod event_bus;

pub mod events;

pub mod logging;

pub mod metadata;

pub mod replica;

pub mod state_sync;

pub mod state_transfer;

pub mod store;

pub mod stream;

pub mod time_contract;

pub mod types;

// Re-exports
pub use app::{CommandsHandler, ExecuteOutput, ExecuteRequest, ReadOnlyStorage};
pub use replica::{Replica, ReplicaStatus};
pub use store::{BlockchainStore, MemoryStore, OrderedStore};
pub use types::{BlockId, SeqNum, UpdateSet};
