/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Replica state sync: startup reconciliation between persisted blocks and
//! the consensus engine's execution state.
//!
//! A crash can leave blocks on disk whose consensus commit never became
//! durable. Run once after opening the store and before starting the engine,
//! state sync walks back from the last reachable block and deletes every
//! block whose recorded consensus sequence number exceeds the engine's
//! `last_executed_seq`, restoring the invariant that storage never runs
//! ahead of consensus.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use borsh::BorshDeserialize;

use crate::events::{Event, TruncateBlockEvent};
use crate::store::blockchain::{BlockStoreError, BlockchainStore};
use crate::store::kv_store::OrderedStore;
use crate::store::paths;
use crate::types::{BlockId, BlockMetadata, SeqNum};

/// Truncate blocks past `last_executed_seq`. Returns the number of blocks
/// removed. Afterwards, both store counters sit at the highest surviving
/// block.
pub fn run<S: OrderedStore>(
    storage: &BlockchainStore<S>,
    last_executed_seq: SeqNum,
    event_publisher: &Option<Sender<Event>>,
) -> Result<u64, BlockStoreError> {
    let mut block_id = storage.last_reachable_block();
    let mut removed = 0u64;

    while block_id.int() > 0 {
        let block_seq = read_block_metadata(storage, block_id)?;
        log::debug!(
            "state sync inspecting block {} with sequence number {}",
            block_id,
            block_seq
        );
        if block_seq <= last_executed_seq {
            break;
        }

        // Storage ran ahead of consensus; this block's commit never became
        // durable.
        storage.delete_block(block_id)?;
        Event::TruncateBlock(TruncateBlockEvent {
            timestamp: SystemTime::now(),
            block_id,
            bft_sequence_number: block_seq,
        })
        .publish(event_publisher);

        block_id -= 1;
        removed += 1;
    }

    log::info!(
        "replica state is in sync; removed {} blocks, last reachable block {}",
        removed,
        storage.last_reachable_block()
    );
    Ok(removed)
}

/// The consensus sequence number recorded in block `block_id`'s injected
/// metadata row. Blocks without the row (e.g. blocks appended while idle)
/// report sequence number 0, which never outruns the engine.
pub fn read_block_metadata<S: OrderedStore>(
    storage: &BlockchainStore<S>,
    block_id: BlockId,
) -> Result<SeqNum, BlockStoreError> {
    match storage.get_at(block_id, &paths::BLOCK_METADATA_KEY)? {
        Some((value, written_at)) if written_at == block_id => {
            let metadata = BlockMetadata::deserialize(&mut &*value)
                .map_err(|source| BlockStoreError::Deserialize { source })?;
            Ok(metadata.bft_sequence_number)
        }
        // The latest metadata row predates this block: the block itself
        // carries no sequence number.
        _ => Ok(SeqNum::new(0)),
    }
}
