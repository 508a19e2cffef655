/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The per-subscriber live-update ring and the subscriber registry.
//!
//! Every subscription owns one [`SubscriberBuffer`]: a bounded ring the
//! replica pushes every appended block into. Pushes never block the append
//! path; a full ring drops its oldest entry. The subscriber's stream thread
//! pops from the other end, blocking while the ring is empty. The catch-up
//! protocol in [`server`](super::server) uses the ring's oldest/newest ids
//! to detect and fill the gap between historical reads and live updates.
//!
//! The [`SubscriberList`] is read once per append (to broadcast) and mutated
//! only on subscribe/unsubscribe, so it sits behind a read-write lock.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, RwLock};

use bytes::Bytes;

use crate::types::{BlockId, UpdateSet};

/// One block's worth of live updates, as broadcast to subscriber rings:
/// unfiltered, in the producer's insertion order.
#[derive(Clone)]
pub struct BlockUpdate {
    pub block_id: BlockId,
    pub pairs: Vec<(Bytes, Bytes)>,
}

/// Bounded single-producer single-consumer ring with overwrite-on-full
/// pushes and blocking pops.
pub struct SubscriberBuffer {
    capacity: usize,
    updates: Mutex<VecDeque<BlockUpdate>>,
    nonempty: Condvar,
}

impl SubscriberBuffer {
    pub fn new(capacity: usize) -> SubscriberBuffer {
        assert!(capacity > 0, "ring capacity must be positive");
        SubscriberBuffer {
            capacity,
            updates: Mutex::new(VecDeque::with_capacity(capacity)),
            nonempty: Condvar::new(),
        }
    }

    /// Push without blocking. A full ring drops its oldest entry first.
    pub fn push(&self, update: BlockUpdate) {
        let mut updates = self.updates.lock().unwrap();
        if updates.len() == self.capacity {
            updates.pop_front();
        }
        updates.push_back(update);
        self.nonempty.notify_one();
    }

    /// Pop the oldest entry, blocking while the ring is empty.
    pub fn pop(&self) -> BlockUpdate {
        let mut updates = self.updates.lock().unwrap();
        loop {
            match updates.pop_front() {
                Some(update) => return update,
                None => updates = self.nonempty.wait(updates).unwrap(),
            }
        }
    }

    /// Block until the ring has at least one entry.
    pub fn wait_until_nonempty(&self) {
        let mut updates = self.updates.lock().unwrap();
        while updates.is_empty() {
            updates = self.nonempty.wait(updates).unwrap();
        }
    }

    pub fn oldest_block_id(&self) -> Option<BlockId> {
        self.updates
            .lock()
            .unwrap()
            .front()
            .map(|update| update.block_id)
    }

    pub fn newest_block_id(&self) -> Option<BlockId> {
        self.updates
            .lock()
            .unwrap()
            .back()
            .map(|update| update.block_id)
    }

    pub fn is_empty(&self) -> bool {
        self.updates.lock().unwrap().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.updates.lock().unwrap().len() == self.capacity
    }

    /// Drop everything buffered. Called when a subscription is torn down.
    pub fn clear(&self) {
        self.updates.lock().unwrap().clear();
    }
}

/// Registry of the rings of all live subscribers.
#[derive(Clone, Default)]
pub struct SubscriberList(Arc<RwLock<Vec<Arc<SubscriberBuffer>>>>);

impl SubscriberList {
    pub fn new() -> SubscriberList {
        SubscriberList(Arc::new(RwLock::new(Vec::new())))
    }

    pub fn add(&self, buffer: Arc<SubscriberBuffer>) {
        self.0.write().unwrap().push(buffer);
    }

    pub fn remove(&self, buffer: &Arc<SubscriberBuffer>) {
        self.0
            .write()
            .unwrap()
            .retain(|registered| !Arc::ptr_eq(registered, buffer));
    }

    /// Broadcast one appended block to every registered ring. Non-blocking.
    pub fn push_to_all(&self, block_id: BlockId, updates: &UpdateSet) {
        let subscribers = self.0.read().unwrap();
        if subscribers.is_empty() {
            return;
        }
        let pairs: Vec<(Bytes, Bytes)> = updates
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        for buffer in subscribers.iter() {
            buffer.push(BlockUpdate {
                block_id,
                pairs: pairs.clone(),
            });
        }
    }

    pub fn len(&self) -> usize {
        self.0.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().unwrap().is_empty()
    }
}
