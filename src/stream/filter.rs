/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Filtered access to the block stream.
//!
//! An [`AppFilter`] restricts a block's key-value pairs to those whose keys
//! carry the configured application tag byte and match a caller-supplied
//! prefix, stripping the tag byte from delivered keys. It also computes the
//! per-update hashes that let thin replicas compare state across servers
//! without transferring it.

use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use sha2::{Digest as _, Sha256};

use crate::app::ReadOnlyStorage;
use crate::store::block_codec::DIGEST_SIZE;
use crate::store::blockchain::BlockStoreError;
use crate::types::BlockId;

/// Hash of one filtered update, and of XOR-folds of ranges of them.
pub type UpdateHash = [u8; DIGEST_SIZE];

/// One block's worth of filtered updates. A block with zero matching pairs
/// still appears in streams as an empty update carrying its block id, which
/// preserves the sequence for clients that hash every block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilteredUpdate {
    pub block_id: BlockId,
    pub pairs: Vec<(Bytes, Bytes)>,
}

#[derive(Clone)]
pub struct AppFilter {
    app_tag: u8,
    key_prefix: Bytes,
}

impl AppFilter {
    pub fn new(app_tag: u8, key_prefix: Bytes) -> AppFilter {
        AppFilter {
            app_tag,
            key_prefix,
        }
    }

    /// Restrict `pairs` to keys carrying the application tag and prefix. The
    /// tag byte is stripped from delivered keys; relative order is
    /// preserved.
    pub fn filter_pairs<'a>(
        &self,
        pairs: impl IntoIterator<Item = (&'a Bytes, &'a Bytes)>,
    ) -> Vec<(Bytes, Bytes)> {
        pairs
            .into_iter()
            .filter(|(key, _)| {
                key.first() == Some(&self.app_tag) && key[1..].starts_with(&self.key_prefix)
            })
            .map(|(key, value)| (key.slice(1..), value.clone()))
            .collect()
    }

    pub fn filter_update(
        &self,
        block_id: BlockId,
        pairs: impl IntoIterator<Item = (Bytes, Bytes)>,
    ) -> FilteredUpdate {
        let owned: Vec<(Bytes, Bytes)> = pairs.into_iter().collect();
        FilteredUpdate {
            block_id,
            pairs: self.filter_pairs(owned.iter().map(|(k, v)| (k, v))),
        }
    }

    /// Hash of one filtered update:
    /// `H(be64(block_id)) XOR (H(k1) XOR H(v1)) XOR (H(k2) XOR H(v2)) ...`
    ///
    /// XOR makes the hash commutative across key order within a block on
    /// purpose: two replicas may deliver a block's pairs in different orders
    /// and must still agree on the hash.
    pub fn hash_update(update: &FilteredUpdate) -> UpdateHash {
        let mut hash = sha256(&update.block_id.int().to_be_bytes());
        for (key, value) in &update.pairs {
            let mut pair_hash = sha256(key);
            xor_into(&mut pair_hash, &sha256(value));
            xor_into(&mut hash, &pair_hash);
        }
        hash
    }

    /// Read blocks `[start, end]` from storage, filter each, and hand it to
    /// `emit`. Stops early when `stop` is raised (polled between blocks) or
    /// when `emit` returns `false`.
    pub fn read_block_range(
        &self,
        storage: &dyn ReadOnlyStorage,
        start: BlockId,
        end: BlockId,
        stop: &AtomicBool,
        mut emit: impl FnMut(FilteredUpdate) -> bool,
    ) -> Result<(), FilterError> {
        let mut block_id = start;
        while block_id <= end {
            if stop.load(Ordering::Relaxed) {
                log::warn!("block range read [{}, {}] was stopped", start, end);
                return Ok(());
            }
            let update = self.read_block(storage, block_id)?;
            if !emit(update) {
                return Ok(());
            }
            block_id += 1;
        }
        Ok(())
    }

    /// One block, filtered.
    pub fn read_block(
        &self,
        storage: &dyn ReadOnlyStorage,
        block_id: BlockId,
    ) -> Result<FilteredUpdate, FilterError> {
        let data = storage
            .get_block_data(block_id)
            .map_err(|source| FilterError::Read { block_id, source })?;
        Ok(FilteredUpdate {
            block_id,
            pairs: self.filter_pairs(data.iter()),
        })
    }

    /// XOR-fold of the per-update hashes of blocks `[start, end]`.
    pub fn read_block_range_hash(
        &self,
        storage: &dyn ReadOnlyStorage,
        start: BlockId,
        end: BlockId,
    ) -> Result<UpdateHash, FilterError> {
        let mut range_hash = [0u8; DIGEST_SIZE];
        let mut block_id = start;
        while block_id <= end {
            let update = self.read_block(storage, block_id)?;
            xor_into(&mut range_hash, &Self::hash_update(&update));
            block_id += 1;
        }
        Ok(range_hash)
    }
}

fn sha256(bytes: &[u8]) -> UpdateHash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

fn xor_into(acc: &mut UpdateHash, other: &UpdateHash) {
    for (acc_byte, other_byte) in acc.iter_mut().zip(other.iter()) {
        *acc_byte ^= other_byte;
    }
}

#[derive(Debug)]
pub enum FilterError {
    /// A block could not be retrieved during a range read.
    Read {
        block_id: BlockId,
        source: BlockStoreError,
    },
}

impl Display for FilterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::Read { block_id, source } => {
                write!(
                    f,
                    "couldn't retrieve block data for block id {}: {}",
                    block_id, source
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAG: u8 = 0x10;

    fn tagged(key: &str) -> Bytes {
        let mut bytes = vec![TAG];
        bytes.extend_from_slice(key.as_bytes());
        Bytes::from(bytes)
    }

    #[test]
    fn filters_by_tag_and_prefix_and_strips_the_tag() {
        let filter = AppFilter::new(TAG, Bytes::from_static(b"ab"));
        let pairs = vec![
            (tagged("abc"), Bytes::from_static(b"1")),
            (tagged("abd"), Bytes::from_static(b"2")),
            (tagged("zzz"), Bytes::from_static(b"3")),
            // Right prefix, wrong tag.
            (Bytes::from_static(b"\x11abc"), Bytes::from_static(b"4")),
        ];
        let filtered = filter.filter_pairs(pairs.iter().map(|(k, v)| (k, v)));
        assert_eq!(
            filtered,
            vec![
                (Bytes::from_static(b"abc"), Bytes::from_static(b"1")),
                (Bytes::from_static(b"abd"), Bytes::from_static(b"2")),
            ]
        );
    }

    #[test]
    fn update_hash_is_order_independent() {
        let forward = FilteredUpdate {
            block_id: BlockId::new(7),
            pairs: vec![
                (Bytes::from_static(b"a"), Bytes::from_static(b"1")),
                (Bytes::from_static(b"b"), Bytes::from_static(b"2")),
            ],
        };
        let reversed = FilteredUpdate {
            block_id: BlockId::new(7),
            pairs: forward.pairs.iter().rev().cloned().collect(),
        };
        assert_eq!(
            AppFilter::hash_update(&forward),
            AppFilter::hash_update(&reversed)
        );
    }

    #[test]
    fn update_hash_depends_on_block_id_and_contents() {
        let base = FilteredUpdate {
            block_id: BlockId::new(7),
            pairs: vec![(Bytes::from_static(b"a"), Bytes::from_static(b"1"))],
        };
        let other_block = FilteredUpdate {
            block_id: BlockId::new(8),
            ..base.clone()
        };
        let other_value = FilteredUpdate {
            block_id: BlockId::new(7),
            pairs: vec![(Bytes::from_static(b"a"), Bytes::from_static(b"2"))],
        };
        let base_hash = AppFilter::hash_update(&base);
        assert_ne!(base_hash, AppFilter::hash_update(&other_block));
        assert_ne!(base_hash, AppFilter::hash_update(&other_value));
    }
}
