//! Append-path and read-path behavior of the versioned block store: point
//! reads at fixed versions, shadowing across versions, block data
//! round-trips, and the parent digest chain.

mod common;

use bytes::Bytes;

use kvbc::store::block_codec;
use kvbc::store::{BlockchainStore, MemoryStore};
use kvbc::types::{BlockId, UpdateSet};

use common::logging::setup_logger;
use log::LevelFilter;

fn updates(pairs: &[(&str, &str)]) -> UpdateSet {
    pairs
        .iter()
        .map(|(k, v)| {
            (
                Bytes::copy_from_slice(k.as_bytes()),
                Bytes::copy_from_slice(v.as_bytes()),
            )
        })
        .collect()
}

fn value_at(
    chain: &BlockchainStore<MemoryStore>,
    version: u64,
    key: &str,
) -> Option<(String, u64)> {
    chain
        .get_at(BlockId::new(version), key.as_bytes())
        .unwrap()
        .map(|(value, block)| (String::from_utf8(value.to_vec()).unwrap(), block.int()))
}

#[test]
fn append_and_point_read() {
    setup_logger(LevelFilter::Debug);
    let chain = BlockchainStore::open(MemoryStore::new()).unwrap();

    let block_id = chain
        .append_block(&updates(&[("alpha", "1"), ("beta", "2")]))
        .unwrap();
    assert_eq!(block_id, BlockId::new(1));
    assert_eq!(chain.last_block(), BlockId::new(1));
    assert_eq!(chain.last_reachable_block(), BlockId::new(1));

    assert_eq!(value_at(&chain, 1, "alpha"), Some(("1".to_string(), 1)));
    assert_eq!(value_at(&chain, 1, "beta"), Some(("2".to_string(), 1)));
    assert_eq!(value_at(&chain, 1, "gamma"), None);
}

#[test]
fn versioned_shadowing() {
    setup_logger(LevelFilter::Debug);
    let chain = BlockchainStore::open(MemoryStore::new()).unwrap();
    chain
        .append_block(&updates(&[("alpha", "1"), ("beta", "2")]))
        .unwrap();
    chain.append_block(&updates(&[("alpha", "3")])).unwrap();

    // The new version shadows at 2; the old version is still visible at 1;
    // keys not updated in block 2 keep their version-1 row.
    assert_eq!(value_at(&chain, 2, "alpha"), Some(("3".to_string(), 2)));
    assert_eq!(value_at(&chain, 1, "alpha"), Some(("1".to_string(), 1)));
    assert_eq!(value_at(&chain, 2, "beta"), Some(("2".to_string(), 1)));
}

#[test]
fn reads_above_the_requested_version_do_not_leak() {
    let chain = BlockchainStore::open(MemoryStore::new()).unwrap();
    chain.append_block(&updates(&[("other", "x")])).unwrap();
    chain.append_block(&updates(&[("alpha", "1")])).unwrap();

    // alpha first appears in block 2; at version 1 it must be absent.
    assert_eq!(value_at(&chain, 1, "alpha"), None);
}

#[test]
fn parent_digest_chain() {
    let chain = BlockchainStore::open(MemoryStore::new()).unwrap();
    chain
        .append_block(&updates(&[("alpha", "1"), ("beta", "2")]))
        .unwrap();
    chain.append_block(&updates(&[("alpha", "3")])).unwrap();

    let raw_1 = chain.get_block_raw(BlockId::new(1)).unwrap().unwrap();
    let raw_2 = chain.get_block_raw(BlockId::new(2)).unwrap().unwrap();

    assert_eq!(
        block_codec::parent_digest_of(&raw_1).unwrap(),
        block_codec::GENESIS_PARENT_DIGEST
    );
    assert_eq!(
        block_codec::parent_digest_of(&raw_2).unwrap(),
        block_codec::digest_of(&raw_1)
    );
}

#[test]
fn every_appended_update_reads_back_at_its_block() {
    let chain = BlockchainStore::open(MemoryStore::new()).unwrap();
    let blocks: Vec<Vec<(&str, &str)>> = vec![
        vec![("a", "a1"), ("b", "b1")],
        vec![("a", "a2"), ("c", "c2")],
        vec![("d", "d3")],
    ];
    for pairs in &blocks {
        chain.append_block(&updates(pairs)).unwrap();
    }

    for (index, pairs) in blocks.iter().enumerate() {
        let block_id = index as u64 + 1;
        for (key, value) in pairs {
            assert_eq!(
                value_at(&chain, block_id, key),
                Some((value.to_string(), block_id))
            );
        }
    }
}

#[test]
fn block_data_round_trips() {
    let chain = BlockchainStore::open(MemoryStore::new()).unwrap();
    let appended = updates(&[("alpha", "1"), ("beta", "2"), ("gamma", "3")]);
    let block_id = chain.append_block(&appended).unwrap();

    let read_back = chain.get_block_data(block_id).unwrap();
    assert_eq!(read_back, appended);
}

#[test]
fn later_blocks_do_not_disturb_snapshot_iteration() {
    let chain = BlockchainStore::open(MemoryStore::new()).unwrap();
    chain.append_block(&updates(&[("a", "1"), ("b", "1")])).unwrap();
    chain.append_block(&updates(&[("b", "2"), ("c", "2")])).unwrap();

    let mut iter = chain.iterator_at(BlockId::new(1));
    let mut seen = Vec::new();
    let mut row = iter.first();
    while let Some((key, value)) = row {
        seen.push((
            String::from_utf8(key.to_vec()).unwrap(),
            String::from_utf8(value.to_vec()).unwrap(),
        ));
        row = iter.next();
    }
    assert_eq!(
        seen,
        vec![("a".to_string(), "1".to_string()), ("b".to_string(), "1".to_string())]
    );
}
