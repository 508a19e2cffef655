/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The crate logs using the [log](https://docs.rs/log/latest/log/) crate. To
//! get these messages printed onto a terminal or into a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values.
//! The first two values are always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this
//!    module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix
//!    Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example:
//!
//! ```text
//! AppendBlock, 1701329264, 42, 7, 120
//! ```
//!
//! is an append of block 42 carrying 7 updates at consensus sequence number
//! 120. Byte-string values such as key prefixes are rendered as the first
//! seven characters of their Base64 encoding.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const APPEND_BLOCK: &str = "AppendBlock";
pub const PUT_SYNC_BLOCK: &str = "PutSyncBlock";
pub const TRUNCATE_BLOCK: &str = "TruncateBlock";
pub const STATE_SYNC: &str = "StateSync";
pub const SUBSCRIBE: &str = "Subscribe";
pub const CANCEL_SUBSCRIPTION: &str = "CancelSubscription";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event
    /// type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for AppendBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &AppendBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                APPEND_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                event.block_id,
                event.num_updates,
                event.bft_sequence_number,
            )
        })
    }
}

impl Logger for PutSyncBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &PutSyncBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                PUT_SYNC_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                event.block_id,
                event.last_reachable_block,
            )
        })
    }
}

impl Logger for TruncateBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &TruncateBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                TRUNCATE_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                event.block_id,
                event.bft_sequence_number,
            )
        })
    }
}

impl Logger for StateSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &StateSyncEvent| {
            log::info!(
                "{}, {}, {}, {}",
                STATE_SYNC,
                secs_since_unix_epoch(event.timestamp),
                event.removed_blocks,
                event.last_reachable_block,
            )
        })
    }
}

impl Logger for SubscribeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &SubscribeEvent| {
            log::info!(
                "{}, {}, {}, {}",
                SUBSCRIBE,
                secs_since_unix_epoch(event.timestamp),
                event.start_block_id,
                first_seven_base64_chars(&event.key_prefix),
            )
        })
    }
}

impl Logger for CancelSubscriptionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &CancelSubscriptionEvent| {
            log::info!(
                "{}, {}, {}",
                CANCEL_SUBSCRIPTION,
                secs_since_unix_epoch(event.timestamp),
                event.start_block_id,
            )
        })
    }
}

/// Get a more readable representation of a bytesequence by base64-encoding it
/// and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Event occurred before the Unix Epoch.")
        .as_secs()
}
