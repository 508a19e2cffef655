/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Block framing: the on-disk layout of a block's bytes, and the digest that
//! chains each block to its parent.
//!
//! ```text
//! header:
//!   u32  num_entries            (little-endian)
//!   u32  parent_digest_length   (little-endian, always DIGEST_SIZE)
//!   u8[DIGEST_SIZE] parent_digest
//! entries[num_entries]:
//!   u32 key_offset, u32 key_size, u32 val_offset, u32 val_size
//! payload: key and value bytes, referenced by the offsets above
//! ```
//!
//! Offsets are absolute from the start of the block. Decoding yields
//! zero-copy views into the block buffer. Entries may overlap in the payload;
//! producers are free to share bytes.
//!
//! The block digest is Sha256 over the entire serialized block; a block's
//! `parent_digest` field holds the digest of its predecessor's bytes, with
//! block 1 carrying all zeroes.

use std::fmt::{self, Display, Formatter};

use bytes::Bytes;
use sha2::{Digest as _, Sha256};

use crate::types::update_sets::UpdateSet;

pub const DIGEST_SIZE: usize = 32;

pub type BlockDigest = [u8; DIGEST_SIZE];

/// The parent digest of block 1.
pub const GENESIS_PARENT_DIGEST: BlockDigest = [0u8; DIGEST_SIZE];

const HEADER_LEN: usize = 4 + 4 + DIGEST_SIZE;
const ENTRY_LEN: usize = 16;

/// A decoded block: the parent digest and zero-copy views of each update.
/// Pair order is the order the producer inserted them in, which is also the
/// serialized order.
pub struct DecodedBlock {
    pub parent_digest: BlockDigest,
    pub updates: Vec<(Bytes, Bytes)>,
}

/// Serialize `updates` into block bytes, chaining to `parent_digest`.
/// Iterates the update set in insertion order; once encoded, that order is
/// authoritative for digest reproducibility.
pub fn encode(parent_digest: &BlockDigest, updates: &UpdateSet) -> Bytes {
    let num_entries = updates.len();
    let header_and_table_len = HEADER_LEN + ENTRY_LEN * num_entries;
    let payload_len: usize = updates.iter().map(|(k, v)| k.len() + v.len()).sum();

    let mut buf = Vec::with_capacity(header_and_table_len + payload_len);
    buf.extend_from_slice(&(num_entries as u32).to_le_bytes());
    buf.extend_from_slice(&(DIGEST_SIZE as u32).to_le_bytes());
    buf.extend_from_slice(parent_digest);

    let mut offset = header_and_table_len as u32;
    for (key, value) in updates.iter() {
        buf.extend_from_slice(&offset.to_le_bytes());
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        offset += key.len() as u32;
        buf.extend_from_slice(&offset.to_le_bytes());
        buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
        offset += value.len() as u32;
    }
    for (key, value) in updates.iter() {
        buf.extend_from_slice(key);
        buf.extend_from_slice(value);
    }

    Bytes::from(buf)
}

/// Deserialize a block. Fails with [`CodecError::TruncatedBlock`] if any
/// declared offset or size exits the buffer.
pub fn decode(block: &Bytes) -> Result<DecodedBlock, CodecError> {
    if block.len() < HEADER_LEN {
        return Err(CodecError::TruncatedBlock {
            declared: HEADER_LEN,
            actual: block.len(),
        });
    }
    let num_entries = read_u32(block, 0) as usize;
    let parent_digest_len = read_u32(block, 4) as usize;
    if parent_digest_len != DIGEST_SIZE {
        return Err(CodecError::BadDigestLength {
            declared: parent_digest_len,
        });
    }
    let mut parent_digest = [0u8; DIGEST_SIZE];
    parent_digest.copy_from_slice(&block[8..8 + DIGEST_SIZE]);

    let table_end = HEADER_LEN
        .checked_add(ENTRY_LEN.checked_mul(num_entries).unwrap_or(usize::MAX))
        .unwrap_or(usize::MAX);
    if table_end > block.len() {
        return Err(CodecError::TruncatedBlock {
            declared: table_end,
            actual: block.len(),
        });
    }

    let mut updates = Vec::with_capacity(num_entries);
    for i in 0..num_entries {
        let entry = HEADER_LEN + i * ENTRY_LEN;
        let key = view(block, read_u32(block, entry), read_u32(block, entry + 4))?;
        let value = view(block, read_u32(block, entry + 8), read_u32(block, entry + 12))?;
        updates.push((key, value));
    }

    Ok(DecodedBlock {
        parent_digest,
        updates,
    })
}

/// Read only the parent digest field off a serialized block.
pub fn parent_digest_of(block: &[u8]) -> Result<BlockDigest, CodecError> {
    if block.len() < HEADER_LEN {
        return Err(CodecError::TruncatedBlock {
            declared: HEADER_LEN,
            actual: block.len(),
        });
    }
    let parent_digest_len = read_u32(block, 4) as usize;
    if parent_digest_len != DIGEST_SIZE {
        return Err(CodecError::BadDigestLength {
            declared: parent_digest_len,
        });
    }
    let mut digest = [0u8; DIGEST_SIZE];
    digest.copy_from_slice(&block[8..8 + DIGEST_SIZE]);
    Ok(digest)
}

/// Sha256 over the serialized block bytes.
pub fn digest_of(block: &[u8]) -> BlockDigest {
    let mut hasher = Sha256::new();
    hasher.update(block);
    hasher.finalize().into()
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

fn view(block: &Bytes, offset: u32, size: u32) -> Result<Bytes, CodecError> {
    let start = offset as usize;
    let end = start.checked_add(size as usize).unwrap_or(usize::MAX);
    if end > block.len() {
        return Err(CodecError::TruncatedBlock {
            declared: end,
            actual: block.len(),
        });
    }
    Ok(block.slice(start..end))
}

#[derive(Debug)]
pub enum CodecError {
    /// A declared offset or size exits the block buffer.
    TruncatedBlock { declared: usize, actual: usize },
    /// The header declares a parent digest of a different hash.
    BadDigestLength { declared: usize },
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::TruncatedBlock { declared, actual } => write!(
                f,
                "truncated block: layout requires {} bytes, buffer holds {}",
                declared, actual
            ),
            CodecError::BadDigestLength { declared } => {
                write!(f, "unexpected parent digest length: {}", declared)
            }
        }
    }
}
