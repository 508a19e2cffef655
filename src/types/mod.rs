/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Inert types shared across the crate: identifier newtypes and the update
//! set carried from command execution into block storage.

pub mod data_types;

pub mod update_sets;

pub use data_types::{BlockId, BlockMetadata, ClientId, ObjectId, SeqNum};
pub use update_sets::UpdateSet;
