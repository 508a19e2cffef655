/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The thin-replica subsystem: a per-client subscription to the block
//! stream, filtered by application tag and key prefix, with gap-free
//! ordering and resumable cursors.
//!
//! [`buffer`] holds the per-subscriber live-update ring and the registry the
//! replica broadcasts into on every append. [`filter`] applies the
//! application filter and computes update hashes. [`server`] splices
//! historical reads with the live ring to serve the four stream operations
//! without gaps or duplicates.
//!
//! An `Unsubscribe` operation is reserved in the protocol but not
//! implemented: tearing a subscription down from a separate call would
//! require tying rings to client identities.

pub mod buffer;

pub mod filter;

pub mod server;

pub use buffer::{BlockUpdate, SubscriberBuffer, SubscriberList};
pub use filter::{AppFilter, FilteredUpdate, UpdateHash};
pub use server::{FilteredStreamServer, StreamError, StreamSink};
