/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The composite-key grammar laid over the flat ordered key space.
//!
//! Every key written to the underlying store begins with a one-byte type tag.
//! The remaining bytes are type-specific:
//!
//! - [`BLOCK`] keys are `tag ‖ big-endian block id`, so blocks iterate in
//!   chain order.
//! - [`DATA`] keys are `tag ‖ application key ‖ big-endian block id`, so all
//!   versions of one application key sit contiguously, oldest first, and
//!   distinct application keys sort by their natural byte order.
//! - [`METADATA`] keys are `tag ‖ big-endian object id`: flat numbered slots.
//! - [`APP_STATE`] and [`TIME`] are reserved for sub-module state. Rows
//!   carrying such state ride *inside* blocks: they are injected into the
//!   update set with the tag value as a one-byte application key (see
//!   [`BLOCK_METADATA_KEY`], [`TIME_SAMPLES_KEY`]), which keeps them clear of
//!   application key prefixes while still reaching every stream subscriber.
//!
//! The big-endian id suffix is load-bearing: the store compares keys as
//! unsigned byte sequences, and big-endian encoding is what makes versions of
//! a fixed application key sort ascending by block id.

use std::fmt::{self, Display, Formatter};

use bytes::Bytes;

use crate::types::{BlockId, ObjectId};

// Key-space type tags.
pub const BLOCK: [u8; 1] = [1];
pub const DATA: [u8; 1] = [2];
pub const METADATA: [u8; 1] = [3];
pub const APP_STATE: [u8; 1] = [4];
pub const TIME: [u8; 1] = [5];

/// Application key of the injected block-metadata row (a borsh-serialized
/// [`BlockMetadata`](crate::types::BlockMetadata)).
pub const BLOCK_METADATA_KEY: [u8; 1] = METADATA;

/// Application key of the injected time-contract state row.
pub const TIME_SAMPLES_KEY: [u8; 1] = TIME;

const BLOCK_ID_SUFFIX_LEN: usize = 8;

/// The type tag at the head of a composed key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeTag {
    Block,
    Data,
    Metadata,
    AppState,
    Time,
}

/// Concatenate two byteslices into one vector.
pub fn combine(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}

/// `BLOCK ‖ be64(block_id)`: the key of a block's raw bytes.
pub fn compose_block_key(block_id: BlockId) -> Bytes {
    Bytes::from(combine(&BLOCK, &block_id.to_be_bytes()))
}

/// `DATA ‖ app_key ‖ be64(block_id)`: the key of one version of an
/// application key.
pub fn compose_data_key(app_key: &[u8], block_id: BlockId) -> Bytes {
    let mut res = Vec::with_capacity(DATA.len() + app_key.len() + BLOCK_ID_SUFFIX_LEN);
    res.extend_from_slice(&DATA);
    res.extend_from_slice(app_key);
    res.extend_from_slice(&block_id.to_be_bytes());
    Bytes::from(res)
}

/// `METADATA ‖ be32(object_id)`: the key of a numbered metadata slot.
pub fn compose_metadata_key(object_id: ObjectId) -> Bytes {
    Bytes::from(combine(&METADATA, &object_id.to_be_bytes()))
}

/// Read the type tag off the first byte of a composed key.
pub fn extract_type_tag(key: &[u8]) -> Result<TypeTag, KeyError> {
    match key.first() {
        Some(1) => Ok(TypeTag::Block),
        Some(2) => Ok(TypeTag::Data),
        Some(3) => Ok(TypeTag::Metadata),
        Some(4) => Ok(TypeTag::AppState),
        Some(5) => Ok(TypeTag::Time),
        _ => Err(KeyError::MalformedKey { key: key.to_vec() }),
    }
}

/// Read the block id off the last 8 bytes of a composed key.
pub fn extract_block_id_suffix(key: &[u8]) -> Result<BlockId, KeyError> {
    if key.len() < DATA.len() + BLOCK_ID_SUFFIX_LEN {
        return Err(KeyError::MalformedKey { key: key.to_vec() });
    }
    let mut suffix = [0u8; BLOCK_ID_SUFFIX_LEN];
    suffix.copy_from_slice(&key[key.len() - BLOCK_ID_SUFFIX_LEN..]);
    Ok(BlockId::from_be_bytes(suffix))
}

/// Recover the application key from a composed data key: the slice between
/// the type tag and the block id suffix. Zero-copy.
pub fn strip_block_id_suffix(composed_data_key: &Bytes) -> Result<Bytes, KeyError> {
    if composed_data_key.len() < DATA.len() + BLOCK_ID_SUFFIX_LEN {
        return Err(KeyError::MalformedKey {
            key: composed_data_key.to_vec(),
        });
    }
    Ok(composed_data_key.slice(DATA.len()..composed_data_key.len() - BLOCK_ID_SUFFIX_LEN))
}

/// Whether `key` is a data row of exactly the application key behind
/// `prefix` (`DATA ‖ app_key`), rather than of some longer application key
/// that merely extends it.
pub(crate) fn is_version_of(key: &[u8], prefix: &[u8]) -> bool {
    key.len() == prefix.len() + BLOCK_ID_SUFFIX_LEN && key.starts_with(prefix)
}

#[derive(Debug)]
pub enum KeyError {
    MalformedKey { key: Vec<u8> },
}

impl Display for KeyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::MalformedKey { key } => write!(f, "malformed storage key: {:02x?}", key),
        }
    }
}
