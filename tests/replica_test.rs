//! The replica execute path: lifecycle gating, reply handling, metadata
//! injection, and the idle append used for genesis seeding.

mod common;

use borsh::BorshDeserialize;
use bytes::Bytes;

use kvbc::event_bus::EventHandlers;
use kvbc::replica::{ExecuteCode, Replica, ReplicaError};
use kvbc::state_sync;
use kvbc::store::paths;
use kvbc::store::{BlockchainStore, MemoryStore};
use kvbc::stream::SubscriberList;
use kvbc::types::{BlockId, SeqNum, UpdateSet};

use common::kv_app::{
    execute_request, get_request, put_request, KvCommandsHandler, KvReply, StubEngine,
};
use common::logging::setup_logger;
use log::LevelFilter;

fn replica_over(
    storage: BlockchainStore<MemoryStore>,
) -> (Replica<MemoryStore, KvCommandsHandler>, StubEngine) {
    (
        Replica::new(
            storage,
            KvCommandsHandler,
            SubscriberList::new(),
            EventHandlers::logging_only(),
        ),
        StubEngine {
            last_executed: SeqNum::new(0),
        },
    )
}

#[test]
fn put_then_get_round_trips_through_execute() {
    setup_logger(LevelFilter::Debug);
    let storage = BlockchainStore::open(MemoryStore::new()).unwrap();
    let (mut replica, mut engine) = replica_over(storage.clone());
    replica.start(&mut engine).unwrap();

    let put = replica
        .execute(&execute_request(1, false, put_request(&[("k", "hello")])))
        .unwrap();
    assert_eq!(put.code, ExecuteCode::Success);
    assert_eq!(
        KvReply::deserialize(&mut &put.reply[..]).unwrap(),
        KvReply::Ok
    );
    assert_eq!(storage.last_block(), BlockId::new(1));

    let get = replica
        .execute(&execute_request(2, true, get_request("k")))
        .unwrap();
    assert_eq!(
        KvReply::deserialize(&mut &get.reply[..]).unwrap(),
        KvReply::Value(Some(b"hello".to_vec()))
    );
    // Read-only: no block appended.
    assert_eq!(storage.last_block(), BlockId::new(1));
}

#[test]
fn appended_blocks_carry_the_injected_metadata_row() {
    let storage = BlockchainStore::open(MemoryStore::new()).unwrap();
    let (mut replica, mut engine) = replica_over(storage.clone());
    replica.start(&mut engine).unwrap();

    replica
        .execute(&execute_request(7, false, put_request(&[("k", "v")])))
        .unwrap();

    let block_data = storage.get_block_data(BlockId::new(1)).unwrap();
    assert!(block_data.contains_key(&paths::BLOCK_METADATA_KEY));
    assert_eq!(
        state_sync::read_block_metadata(&storage, BlockId::new(1)).unwrap(),
        SeqNum::new(7)
    );
}

#[test]
fn oversized_replies_are_replaced_with_a_bounded_error_reply() {
    let storage = BlockchainStore::open(MemoryStore::new()).unwrap();
    let (mut replica, mut engine) = replica_over(storage);
    replica.start(&mut engine).unwrap();

    let long_value = "x".repeat(600);
    replica
        .execute(&execute_request(1, false, put_request(&[("k", &long_value)])))
        .unwrap();

    let mut request = execute_request(2, true, get_request("k"));
    request.max_reply_size = 16;
    let result = replica.execute(&request).unwrap();

    // The handler's reply was discarded for a bounded error description,
    // itself truncated to the cap.
    assert_eq!(result.code, ExecuteCode::Success);
    assert_eq!(result.reply.as_ref(), &b"reply is too large"[..16]);
}

#[test]
fn unparseable_requests_report_status_one() {
    let storage = BlockchainStore::open(MemoryStore::new()).unwrap();
    let (mut replica, mut engine) = replica_over(storage.clone());
    replica.start(&mut engine).unwrap();

    let result = replica
        .execute(&execute_request(1, false, Bytes::from_static(b"\xff\xff")))
        .unwrap();
    assert_eq!(result.code, ExecuteCode::UnparseableRequest);
    assert_eq!(result.code.int(), 1);
    // Nothing was appended.
    assert_eq!(storage.last_block(), BlockId::new(0));
}

#[test]
fn lifecycle_gates_operations() {
    let storage = BlockchainStore::open(MemoryStore::new()).unwrap();
    let (mut replica, mut engine) = replica_over(storage.clone());

    // Execute before start: illegal.
    let result = replica.execute(&execute_request(1, false, put_request(&[("k", "v")])));
    assert!(matches!(result, Err(ReplicaError::IllegalState { .. })));

    // Idle append is legal before start, and carries no metadata row.
    let mut genesis = UpdateSet::new();
    genesis.insert(Bytes::from_static(b"\x10seed"), Bytes::from_static(b"1"));
    let block_id = replica.append_to_idle(&genesis).unwrap();
    assert_eq!(block_id, BlockId::new(1));
    assert_eq!(
        state_sync::read_block_metadata(&storage, block_id).unwrap(),
        SeqNum::new(0)
    );

    replica.start(&mut engine).unwrap();

    // Starting twice and appending while running are illegal.
    assert!(matches!(
        replica.start(&mut engine),
        Err(ReplicaError::IllegalState { .. })
    ));
    assert!(matches!(
        replica.append_to_idle(&genesis),
        Err(ReplicaError::IllegalState { .. })
    ));

    replica.stop(&mut engine).unwrap();
    assert!(matches!(
        replica.stop(&mut engine),
        Err(ReplicaError::IllegalState { .. })
    ));
}
