/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`WriteBatch`] trait, implemented by the backend's atomic batch type.

pub trait WriteBatch {
    fn new() -> Self;

    /// Record a put of `value` at `key`.
    fn set(&mut self, key: &[u8], value: &[u8]);

    /// Record a deletion of `key`.
    fn delete(&mut self, key: &[u8]);
}
