/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store values, and do not have any major "active"
//! behavior. These follow the newtype pattern; the API for using them is
//! defined in this module.

use std::fmt::{self, Display, Formatter};
use std::ops::{Add, AddAssign, Sub, SubAssign};

use borsh::{BorshDeserialize, BorshSerialize};

/// Position of a block in the chain.
///
/// Block ids form the strictly monotonic sequence `1, 2, 3, ...`. The value 0
/// is reserved to mean "before genesis" and is never the id of a stored
/// block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct BlockId(u64);

impl BlockId {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Get the big-endian representation of the inner `u64` value of this
    /// `BlockId`. Big-endian, so that composed storage keys sort by block id.
    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for BlockId {
    type Output = BlockId;
    fn add(self, rhs: u64) -> Self::Output {
        BlockId::new(self.0 + rhs)
    }
}

impl AddAssign<u64> for BlockId {
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs
    }
}

impl Sub<u64> for BlockId {
    type Output = BlockId;
    fn sub(self, rhs: u64) -> Self::Output {
        BlockId::new(self.0 - rhs)
    }
}

impl SubAssign<u64> for BlockId {
    fn sub_assign(&mut self, rhs: u64) {
        self.0 -= rhs
    }
}

/// Sequence number assigned by the consensus engine to a delivered request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct SeqNum(u64);

impl SeqNum {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for SeqNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Id of a numbered metadata slot persisted on behalf of the consensus
/// engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct ObjectId(u32);

impl ObjectId {
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }

    /// Big-endian representation, used as the suffix of metadata storage keys.
    pub fn to_be_bytes(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Id of the client proxy that submitted a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct ClientId(u16);

impl ClientId {
    pub const fn new(int: u16) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u16 {
        self.0
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Value of the block-metadata row that the replica injects into every
/// appended block. Records the consensus sequence number that produced the
/// block, so that startup state sync can truncate blocks the engine never
/// durably committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct BlockMetadata {
    pub bft_sequence_number: SeqNum,
}

impl BlockMetadata {
    pub fn new(bft_sequence_number: SeqNum) -> Self {
        Self {
            bft_sequence_number,
        }
    }
}
