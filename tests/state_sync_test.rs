//! Startup reconciliation: blocks whose consensus sequence number exceeds
//! the engine's last executed sequence number are truncated before the
//! engine restarts.

mod common;

use kvbc::event_bus::EventHandlers;
use kvbc::replica::Replica;
use kvbc::state_sync;
use kvbc::store::{BlockchainStore, MemoryStore};
use kvbc::stream::SubscriberList;
use kvbc::types::{BlockId, SeqNum};

use common::kv_app::{execute_request, put_request, KvCommandsHandler, StubEngine};
use common::logging::setup_logger;
use log::LevelFilter;

/// Run a replica session that appends three blocks at consensus sequence
/// numbers 10, 20 and 30, then return the backing store.
fn session_with_three_blocks() -> MemoryStore {
    let backend = MemoryStore::new();
    let storage = BlockchainStore::open(backend.clone()).unwrap();
    let mut replica = Replica::new(
        storage,
        KvCommandsHandler,
        SubscriberList::new(),
        EventHandlers::logging_only(),
    );
    let mut engine = StubEngine {
        last_executed: SeqNum::new(0),
    };
    replica.start(&mut engine).unwrap();

    for (seq, key) in [(10, "k1"), (20, "k2"), (30, "k3")] {
        let request = execute_request(seq, false, put_request(&[(key, "v")]));
        replica.execute(&request).unwrap();
    }
    replica.stop(&mut engine).unwrap();
    backend
}

#[test]
fn truncates_blocks_past_the_last_executed_sequence_number() {
    setup_logger(LevelFilter::Debug);
    let backend = session_with_three_blocks();

    // Restart against an engine whose durable execution stopped at 15:
    // blocks 2 (seq 20) and 3 (seq 30) were never committed.
    let storage = BlockchainStore::open(backend).unwrap();
    assert_eq!(storage.last_reachable_block(), BlockId::new(3));

    let mut replica = Replica::new(
        storage.clone(),
        KvCommandsHandler,
        SubscriberList::new(),
        EventHandlers::logging_only(),
    );
    let mut engine = StubEngine {
        last_executed: SeqNum::new(15),
    };
    let removed = replica.start(&mut engine).unwrap();

    assert_eq!(removed, 2);
    assert_eq!(storage.last_block(), BlockId::new(1));
    assert_eq!(storage.last_reachable_block(), BlockId::new(1));

    // The surviving block still reads; the truncated ones are gone.
    let tagged_k1 = common::kv_app::tagged(b"k1");
    assert!(storage
        .get_at(BlockId::new(1), &tagged_k1)
        .unwrap()
        .is_some());
    let tagged_k3 = common::kv_app::tagged(b"k3");
    assert!(storage
        .get_at(BlockId::new(3), &tagged_k3)
        .unwrap()
        .is_none());
}

#[test]
fn in_sync_replica_removes_nothing() {
    let backend = session_with_three_blocks();
    let storage = BlockchainStore::open(backend).unwrap();

    let removed = state_sync::run(&storage, SeqNum::new(30), &None).unwrap();
    assert_eq!(removed, 0);
    assert_eq!(storage.last_reachable_block(), BlockId::new(3));
}

#[test]
fn block_metadata_records_the_sequence_number() {
    let backend = session_with_three_blocks();
    let storage = BlockchainStore::open(backend).unwrap();

    assert_eq!(
        state_sync::read_block_metadata(&storage, BlockId::new(1)).unwrap(),
        SeqNum::new(10)
    );
    assert_eq!(
        state_sync::read_block_metadata(&storage, BlockId::new(3)).unwrap(),
        SeqNum::new(30)
    );
}

#[test]
fn blocks_without_metadata_report_sequence_number_zero() {
    let storage = BlockchainStore::open(MemoryStore::new()).unwrap();
    let mut updates = kvbc::types::UpdateSet::new();
    updates.insert(
        bytes::Bytes::from_static(b"\x10genesis"),
        bytes::Bytes::from_static(b"seed"),
    );
    storage.append_block(&updates).unwrap();

    assert_eq!(
        state_sync::read_block_metadata(&storage, BlockId::new(1)).unwrap(),
        SeqNum::new(0)
    );
    // And such blocks always survive state sync.
    let removed = state_sync::run(&storage, SeqNum::new(0), &None).unwrap();
    assert_eq!(removed, 0);
}
