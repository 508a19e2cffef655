/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Defines the [`OrderedStore`] trait, which specifies the required interface
//! for the ordered key-value store provided by the user.
//!
//! The store must compare keys as unsigned byte sequences. Everything the
//! blockchain layer does -- contiguous block iteration, versioned point
//! reads, prefix-bounded range scans -- relies on that comparator together
//! with the key grammar in [`paths`](super::paths).
//!
//! Committed rows must be readable concurrently with the single writer;
//! the backend is responsible for its own internal consistency. An LSM
//! engine is the typical production choice. [`MemoryStore`](super::memory)
//! implements the trait over an ordered map for tests.

use std::fmt::{self, Display, Formatter};

use bytes::Bytes;

use super::write_batch::WriteBatch;

pub trait OrderedStore: OrderedGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;
    type Iter: OrderedIter;

    /// Atomically apply a write batch. Either every operation in the batch
    /// becomes visible, or none does.
    fn write(&mut self, wb: Self::WriteBatch) -> Result<(), StoreError>;

    /// Create an iterator over a consistent view of the committed rows.
    fn iter(&self) -> Self::Iter;
}

pub trait OrderedGet {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError>;
}

/// Positional iterator over the store's rows in ascending key order.
///
/// Every positioning method returns the row the iterator lands on, or `None`
/// when it lands past the last row. "Past the last row" is a real position:
/// [`prev`](OrderedIter::prev) from there steps back onto the last row.
/// Returning `None` signals end of iteration, never a failed lookup; absent
/// keys are a concern of the layers above.
pub trait OrderedIter {
    /// Position at the first row.
    fn first(&mut self) -> Option<(Bytes, Bytes)>;

    /// Position at the first row whose key is greater than or equal to
    /// `key`.
    fn seek_at_least(&mut self, key: &[u8]) -> Option<(Bytes, Bytes)>;

    /// Advance to the following row.
    fn next(&mut self) -> Option<(Bytes, Bytes)>;

    /// Step back to the preceding row. Returns `None` if the iterator is
    /// already at the first row.
    fn prev(&mut self) -> Option<(Bytes, Bytes)>;

    /// The row at the current position.
    fn current(&self) -> Option<(Bytes, Bytes)>;

    fn is_end(&self) -> bool;
}

/// A backend I/O failure. Retryable: the caller decides whether to retry the
/// surrounding operation.
#[derive(Debug)]
pub enum StoreError {
    Backend { source: std::io::Error },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend { source } => write!(f, "backend I/O error: {}", source),
        }
    }
}
