/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Notifications that are emitted when significant things happen in the
//! local replica's storage.
//!
//! Significant occurrences include appending a block, storing a block fetched
//! by state transfer, truncating a block during startup state sync, and
//! subscriber churn on the filtered stream. Each corresponds to a variant of
//! the [event enum](Event), whose inner struct carries a timestamp taken when
//! the occurrence completed plus the values that summarize it.
//!
//! Events are always emitted **after** the corresponding occurrence is
//! durable: the append-block event fires only once the block's atomic batch
//! has been committed to the backing store.
//!
//! Library users can register event handler closures, which are called by
//! the [event bus](crate::event_bus) thread. Default handlers that log
//! events line-per-event are defined in [logging](crate::logging).

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use bytes::Bytes;

use crate::types::{BlockId, SeqNum};

/// Enumerates all events emitted by the replica core.
pub enum Event {
    // Events that change persistent state.
    AppendBlock(AppendBlockEvent),
    PutSyncBlock(PutSyncBlockEvent),
    TruncateBlock(TruncateBlockEvent),
    StateSync(StateSyncEvent),

    // Filtered stream events.
    Subscribe(SubscribeEvent),
    CancelSubscription(CancelSubscriptionEvent),
}

impl Event {
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            // A send failure means the event bus has shut down; the event is
            // dropped.
            let _ = event_publisher.send(self);
        }
    }
}

/// A block was appended through the normal execution path.
pub struct AppendBlockEvent {
    pub timestamp: SystemTime,
    pub block_id: BlockId,
    pub num_updates: usize,
    pub bft_sequence_number: SeqNum,
}

/// State transfer stored a block through the raw-put path.
pub struct PutSyncBlockEvent {
    pub timestamp: SystemTime,
    pub block_id: BlockId,
    pub last_reachable_block: BlockId,
}

/// Replica state sync deleted a block whose consensus sequence number was
/// never durably committed.
pub struct TruncateBlockEvent {
    pub timestamp: SystemTime,
    pub block_id: BlockId,
    pub bft_sequence_number: SeqNum,
}

/// Replica state sync finished.
pub struct StateSyncEvent {
    pub timestamp: SystemTime,
    pub removed_blocks: u64,
    pub last_reachable_block: BlockId,
}

/// A filtered stream subscriber registered.
pub struct SubscribeEvent {
    pub timestamp: SystemTime,
    pub start_block_id: BlockId,
    pub key_prefix: Bytes,
}

/// A filtered stream subscriber went away and its ring was unregistered.
pub struct CancelSubscriptionEvent {
    pub timestamp: SystemTime,
    pub start_block_id: BlockId,
}
