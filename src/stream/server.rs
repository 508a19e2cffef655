/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Serves the four filtered stream operations to thin-replica clients.
//!
//! Historical blocks are read from the blockchain store; live blocks arrive
//! through the subscriber's ring. Because those are two different channels, a
//! subscription must splice them without gaps or duplicates:
//!
//! 1. **Historical pass.** Stream filtered blocks `[start, end]`, where
//!    `end` is the last block at subscribe time.
//! 2. **Wait for live.** Block until the ring holds at least one entry.
//! 3. **Alignment check.** If the ring is not full and its oldest entry is
//!    `end + 1`, the ring follows on seamlessly. If the ring filled up (and
//!    overwrote) or its oldest entry is past `end + 1`, re-read the gap
//!    `[end + 1, ring.newest]` from the store.
//! 4. **Live forwarding.** Pop from the ring, dropping entries at or below
//!    the last block already sent (the overlap), filter, and send until the
//!    client disconnects.
//!
//! One subscription occupies one thread (the transport's); the only blocking
//! points are the ring pop and the sink writes.

use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;

use crate::events::{CancelSubscriptionEvent, Event, SubscribeEvent};
use crate::store::blockchain::BlockchainStore;
use crate::store::kv_store::OrderedStore;
use crate::types::BlockId;

use super::buffer::{SubscriberBuffer, SubscriberList};
use super::filter::{AppFilter, FilteredUpdate, UpdateHash};

/// The transport half of a server stream. `write` returns `false` once the
/// transport has detected that the client disconnected; the server treats
/// that as cancellation.
pub trait StreamSink<T> {
    fn write(&mut self, item: T) -> bool;
}

pub struct FilteredStreamServer<S: OrderedStore> {
    storage: BlockchainStore<S>,
    subscribers: SubscriberList,
    ring_capacity: usize,
    app_tag: u8,
    stop: Arc<AtomicBool>,
    event_publisher: Option<Sender<Event>>,
}

// One clone per subscription thread; clones share the stop flag and the
// subscriber registry.
impl<S: OrderedStore> Clone for FilteredStreamServer<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            subscribers: self.subscribers.clone(),
            ring_capacity: self.ring_capacity,
            app_tag: self.app_tag,
            stop: self.stop.clone(),
            event_publisher: self.event_publisher.clone(),
        }
    }
}

impl<S: OrderedStore> FilteredStreamServer<S> {
    pub fn new(
        storage: BlockchainStore<S>,
        subscribers: SubscriberList,
        ring_capacity: usize,
        app_tag: u8,
        event_publisher: Option<Sender<Event>>,
    ) -> FilteredStreamServer<S> {
        FilteredStreamServer {
            storage,
            subscribers,
            ring_capacity,
            app_tag,
            stop: Arc::new(AtomicBool::new(false)),
            event_publisher,
        }
    }

    /// Raise the stop flag. Catch-up reads poll it between blocks and wind
    /// down; in-flight backend reads complete.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Linear history scan: every filtered block from 1 to the current last
    /// block, then end of stream.
    pub fn read_state(
        &self,
        key_prefix: Bytes,
        sink: &mut impl StreamSink<FilteredUpdate>,
    ) -> Result<(), StreamError> {
        let filter = AppFilter::new(self.app_tag, key_prefix);
        let end = self.storage.last_block();
        if end.int() == 0 {
            return Ok(());
        }

        let mut closed = false;
        filter
            .read_block_range(&self.storage, BlockId::new(1), end, &self.stop, |update| {
                if sink.write(update) {
                    true
                } else {
                    closed = true;
                    false
                }
            })
            .map_err(|err| StreamError::Unknown {
                detail: format!("failed to read and send state: {}", err),
            })?;
        if closed {
            return Err(StreamError::Unknown {
                detail: "state stream closed by client".to_string(),
            });
        }
        Ok(())
    }

    /// XOR-fold over the filtered updates of blocks `1..=block_id`.
    pub fn read_state_hash(
        &self,
        block_id: BlockId,
        key_prefix: Bytes,
    ) -> Result<UpdateHash, StreamError> {
        let filter = AppFilter::new(self.app_tag, key_prefix);
        filter
            .read_block_range_hash(&self.storage, BlockId::new(1), block_id)
            .map_err(|err| StreamError::Unknown {
                detail: format!("reading state hash for block {} failed: {}", block_id, err),
            })
    }

    /// Live tail of filtered updates starting at `start_block_id`. Returns
    /// once the client disconnects.
    pub fn subscribe(
        &self,
        start_block_id: BlockId,
        key_prefix: Bytes,
        sink: &mut impl StreamSink<FilteredUpdate>,
    ) -> Result<(), StreamError> {
        self.subscribe_mapped(start_block_id, key_prefix, sink, &|update| update)
    }

    /// Like [`subscribe`](Self::subscribe), but emits only per-block hashes.
    pub fn subscribe_hashes(
        &self,
        start_block_id: BlockId,
        key_prefix: Bytes,
        sink: &mut impl StreamSink<(BlockId, UpdateHash)>,
    ) -> Result<(), StreamError> {
        self.subscribe_mapped(start_block_id, key_prefix, sink, &|update| {
            (update.block_id, AppFilter::hash_update(&update))
        })
    }

    fn subscribe_mapped<T>(
        &self,
        start_block_id: BlockId,
        key_prefix: Bytes,
        sink: &mut impl StreamSink<T>,
        map: &impl Fn(FilteredUpdate) -> T,
    ) -> Result<(), StreamError> {
        let filter = AppFilter::new(self.app_tag, key_prefix.clone());

        // Register the ring before snapshotting `end`, so no append can fall
        // between the historical pass and the live feed.
        let ring = Arc::new(SubscriberBuffer::new(self.ring_capacity));
        self.subscribers.add(ring.clone());

        if start_block_id.int() == 0 || start_block_id > self.storage.last_block() {
            self.subscribers.remove(&ring);
            ring.clear();
            return Err(StreamError::FailedPrecondition {
                detail: format!("block {} doesn't exist yet", start_block_id),
            });
        }

        Event::Subscribe(SubscribeEvent {
            timestamp: SystemTime::now(),
            start_block_id,
            key_prefix,
        })
        .publish(&self.event_publisher);

        let teardown = |reason: Option<StreamError>| {
            self.subscribers.remove(&ring);
            ring.clear();
            Event::CancelSubscription(CancelSubscriptionEvent {
                timestamp: SystemTime::now(),
                start_block_id,
            })
            .publish(&self.event_publisher);
            match reason {
                Some(err) => Err(err),
                None => Ok(()),
            }
        };

        let mut next_expected = match self.sync_and_send(start_block_id, &filter, &ring, sink, map)
        {
            Ok(next_expected) => next_expected,
            Err(err) => {
                log::error!(
                    "couldn't transition from block id {} to new blocks: {}",
                    start_block_id,
                    err
                );
                return teardown(Some(err));
            }
        };

        // Live forwarding: ring entries at or below the last sent block are
        // the overlap left by the gap fill; drop them.
        loop {
            let update = ring.pop();
            if update.block_id < next_expected {
                log::debug!("subscription dropping overlap block {}", update.block_id);
                continue;
            }
            let filtered = filter.filter_update(update.block_id, update.pairs);
            if !sink.write(map(filtered)) {
                log::info!("subscription stream closed at block {}", update.block_id);
                break;
            }
            next_expected = update.block_id + 1;
        }

        teardown(None)
    }

    /// Read from the store until the subscriber is in sync with its live
    /// ring. Returns the id of the first block the live loop should deliver;
    /// everything below it has been sent already.
    fn sync_and_send<T>(
        &self,
        start_block_id: BlockId,
        filter: &AppFilter,
        ring: &SubscriberBuffer,
        sink: &mut impl StreamSink<T>,
        map: &impl Fn(FilteredUpdate) -> T,
    ) -> Result<BlockId, StreamError> {
        let mut end = self.storage.last_block();

        // Historical pass. Don't wait for a live update yet; there might be
        // lots of history to catch up with first.
        log::debug!("subscription sync reading [{}, {}]", start_block_id, end);
        self.send_range(start_block_id, end, filter, sink, map)?;

        ring.wait_until_nonempty();

        let oldest = ring
            .oldest_block_id()
            .expect("ring is nonempty after wait_until_nonempty");

        // In sync already: the ring follows on directly from the history.
        if !ring.is_full() && oldest == end + 1 {
            return Ok(end + 1);
        }

        // Gap: the ring filled up and overwrote old updates, or its oldest
        // entry is not the follow-up to the last block read from the store.
        // Re-read from the store up to what the ring holds now, creating an
        // overlap for the live loop to drop.
        if ring.is_full() || oldest > end + 1 {
            let fill_start = end + 1;
            let fill_end = ring
                .newest_block_id()
                .expect("ring is nonempty after wait_until_nonempty");
            if fill_start <= fill_end {
                log::debug!("subscription sync filling gap [{}, {}]", fill_start, fill_end);
                self.send_range(fill_start, fill_end, filter, sink, map)?;
                end = fill_end;
            }
        }

        Ok(end + 1)
    }

    fn send_range<T>(
        &self,
        start: BlockId,
        end: BlockId,
        filter: &AppFilter,
        sink: &mut impl StreamSink<T>,
        map: &impl Fn(FilteredUpdate) -> T,
    ) -> Result<(), StreamError> {
        let mut closed = false;
        filter
            .read_block_range(&self.storage, start, end, &self.stop, |update| {
                if sink.write(map(update)) {
                    true
                } else {
                    closed = true;
                    false
                }
            })
            .map_err(|err| StreamError::Unknown {
                detail: err.to_string(),
            })?;
        if closed {
            return Err(StreamError::Unknown {
                detail: "stream closed by client during catch-up".to_string(),
            });
        }
        if self.stop.load(Ordering::Relaxed) {
            return Err(StreamError::Unknown {
                detail: "subscription stopped".to_string(),
            });
        }
        Ok(())
    }
}

/// Stream-level failures, mirrored onto transport status codes by the RPC
/// layer.
#[derive(Debug)]
pub enum StreamError {
    /// The requested start block does not exist yet.
    FailedPrecondition { detail: String },
    /// The stream failed mid-flight; the client should reconnect and resume
    /// from its last acknowledged block id.
    Unknown { detail: String },
}

impl Display for StreamError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::FailedPrecondition { detail } => {
                write!(f, "failed precondition: {}", detail)
            }
            StreamError::Unknown { detail } => write!(f, "{}", detail),
        }
    }
}
