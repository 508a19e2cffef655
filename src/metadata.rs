/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Numbered opaque storage slots persisted on behalf of the consensus
//! engine (checkpoints, view state).
//!
//! Slots live under the `METADATA` key-space tag, outside the block stream:
//! they are not versioned, not hash-linked, and invisible to thin replicas.
//! Writes go to declared slots only, singly or grouped into one atomic
//! transaction. At most one transaction may be open at a time; the engine
//! owns the write flow and violations are flow errors, not races to
//! arbitrate.
//!
//! Slot 1 is reserved as the initialization header. Its absence is how a
//! fresh data directory is recognized ([`is_new_storage`]
//! (MetadataStore::is_new_storage)), which the engine uses to decide between
//! bootstrapping and recovering.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::sync::Mutex;

use crate::store::kv_store::{OrderedGet, OrderedStore, StoreError};
use crate::store::paths;
use crate::store::write_batch::WriteBatch;
use crate::types::ObjectId;

/// The reserved initialization header slot.
const OBJECTS_NUM_SLOT: ObjectId = ObjectId::new(1);

pub struct MetadataStore<S: OrderedStore> {
    store: S,
    max_sizes: HashMap<u32, u32>,
    transaction: Mutex<Option<Vec<(ObjectId, Vec<u8>)>>>,
}

impl<S: OrderedStore> MetadataStore<S> {
    pub fn new(store: S) -> MetadataStore<S> {
        let mut max_sizes = HashMap::new();
        max_sizes.insert(OBJECTS_NUM_SLOT.int(), 4);
        MetadataStore {
            store,
            max_sizes,
            transaction: Mutex::new(None),
        }
    }

    /// Declare the legal slots and their size caps. Writes to undeclared
    /// slots fail with [`MetadataError::UnknownObject`]. On first-ever
    /// initialization (no header slot yet), writes the header and returns
    /// `true`.
    pub fn init_max_sizes(
        &mut self,
        objects: &[(ObjectId, u32)],
    ) -> Result<bool, MetadataError> {
        for (object_id, max_size) in objects {
            self.max_sizes.insert(object_id.int(), *max_size);
        }
        let is_new = self.is_new_storage()?;
        if is_new {
            let objects_num = (objects.len() as u32).to_be_bytes();
            self.atomic_write(OBJECTS_NUM_SLOT, &objects_num)?;
        }
        Ok(is_new)
    }

    /// Whether this storage has never been initialized: true while the
    /// reserved header slot is absent.
    pub fn is_new_storage(&self) -> Result<bool, MetadataError> {
        let header = self
            .store
            .get(&paths::compose_metadata_key(OBJECTS_NUM_SLOT))?;
        Ok(header.is_none())
    }

    /// Size-check then write one slot in its own atomic batch.
    pub fn atomic_write(&self, object_id: ObjectId, data: &[u8]) -> Result<(), MetadataError> {
        self.verify_write(object_id, data)?;
        let mut wb = S::WriteBatch::new();
        wb.set(&paths::compose_metadata_key(object_id), data);
        let mut store = self.store.clone();
        store.write(wb)?;
        Ok(())
    }

    /// Open a write-only transaction. Fails with
    /// [`MetadataError::WrongFlow`] if one is already open.
    pub fn begin_transaction(&self) -> Result<(), MetadataError> {
        let mut transaction = self.transaction.lock().unwrap();
        if transaction.is_some() {
            return Err(MetadataError::WrongFlow {
                detail: "a transaction is already open".to_string(),
            });
        }
        *transaction = Some(Vec::new());
        Ok(())
    }

    /// Add one slot write to the open transaction.
    pub fn write_in_transaction(
        &self,
        object_id: ObjectId,
        data: &[u8],
    ) -> Result<(), MetadataError> {
        self.verify_write(object_id, data)?;
        let mut transaction = self.transaction.lock().unwrap();
        match transaction.as_mut() {
            Some(writes) => {
                writes.push((object_id, data.to_vec()));
                Ok(())
            }
            None => Err(MetadataError::WrongFlow {
                detail: "begin_transaction should be launched first".to_string(),
            }),
        }
    }

    /// Commit the open transaction as one atomic batch.
    pub fn commit_transaction(&self) -> Result<(), MetadataError> {
        let writes = {
            let mut transaction = self.transaction.lock().unwrap();
            transaction
                .take()
                .ok_or_else(|| MetadataError::WrongFlow {
                    detail: "begin_transaction should be launched first".to_string(),
                })?
        };
        let mut wb = S::WriteBatch::new();
        for (object_id, data) in &writes {
            wb.set(&paths::compose_metadata_key(*object_id), data);
        }
        let mut store = self.store.clone();
        store.write(wb)?;
        Ok(())
    }

    /// Copy a slot's contents into `out`, returning the actual length.
    /// An empty (never-written) declared slot reads as length 0.
    pub fn read(&self, object_id: ObjectId, out: &mut [u8]) -> Result<usize, MetadataError> {
        if !self.max_sizes.contains_key(&object_id.int()) {
            return Err(MetadataError::UnknownObject { object_id });
        }
        match self.store.get(&paths::compose_metadata_key(object_id))? {
            Some(value) => {
                if value.len() > out.len() {
                    return Err(MetadataError::InvalidArgument {
                        detail: format!(
                            "buffer of {} bytes cannot hold object {} of {} bytes",
                            out.len(),
                            object_id,
                            value.len()
                        ),
                    });
                }
                out[..value.len()].copy_from_slice(&value);
                Ok(value.len())
            }
            None => Ok(0),
        }
    }

    /// Delete several slots in one atomic batch.
    pub fn multi_delete(&self, object_ids: &[ObjectId]) -> Result<(), MetadataError> {
        let mut wb = S::WriteBatch::new();
        for object_id in object_ids {
            wb.delete(&paths::compose_metadata_key(*object_id));
        }
        let mut store = self.store.clone();
        store.write(wb)?;
        Ok(())
    }

    fn verify_write(&self, object_id: ObjectId, data: &[u8]) -> Result<(), MetadataError> {
        match self.max_sizes.get(&object_id.int()) {
            None => Err(MetadataError::UnknownObject { object_id }),
            Some(max_size) if data.len() > *max_size as usize => {
                Err(MetadataError::InvalidArgument {
                    detail: format!(
                        "object {} is {} bytes, cap is {}",
                        object_id,
                        data.len(),
                        max_size
                    ),
                })
            }
            Some(_) => Ok(()),
        }
    }
}

#[derive(Debug)]
pub enum MetadataError {
    /// Write or read of a slot that was never declared.
    UnknownObject { object_id: ObjectId },
    /// Transaction discipline violated.
    WrongFlow { detail: String },
    /// A parameter is out of bounds for the declared slot.
    InvalidArgument { detail: String },
    Backend { source: StoreError },
}

impl Display for MetadataError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MetadataError::UnknownObject { object_id } => {
                write!(f, "unknown metadata object {}", object_id)
            }
            MetadataError::WrongFlow { detail } => write!(f, "wrong flow: {}", detail),
            MetadataError::InvalidArgument { detail } => {
                write!(f, "invalid argument: {}", detail)
            }
            MetadataError::Backend { source } => write!(f, "{}", source),
        }
    }
}

impl From<StoreError> for MetadataError {
    fn from(source: StoreError) -> Self {
        MetadataError::Backend { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn initialized_store() -> MetadataStore<MemoryStore> {
        let mut metadata = MetadataStore::new(MemoryStore::new());
        let is_new = metadata
            .init_max_sizes(&[(ObjectId::new(2), 16), (ObjectId::new(3), 4)])
            .unwrap();
        assert!(is_new);
        metadata
    }

    #[test]
    fn second_initialization_is_not_new() {
        let mut metadata = initialized_store();
        assert!(!metadata.init_max_sizes(&[(ObjectId::new(2), 16)]).unwrap());
        assert!(!metadata.is_new_storage().unwrap());
    }

    #[test]
    fn atomic_write_and_read_round_trip() {
        let metadata = initialized_store();
        metadata.atomic_write(ObjectId::new(2), b"checkpoint").unwrap();

        let mut out = [0u8; 16];
        let len = metadata.read(ObjectId::new(2), &mut out).unwrap();
        assert_eq!(&out[..len], b"checkpoint");

        // A declared but never-written slot reads as empty.
        assert_eq!(metadata.read(ObjectId::new(3), &mut out).unwrap(), 0);
    }

    #[test]
    fn undeclared_slots_and_oversized_writes_are_rejected() {
        let metadata = initialized_store();
        assert!(matches!(
            metadata.atomic_write(ObjectId::new(9), b"x"),
            Err(MetadataError::UnknownObject { .. })
        ));
        assert!(matches!(
            metadata.atomic_write(ObjectId::new(3), b"five!"),
            Err(MetadataError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn transaction_discipline() {
        let metadata = initialized_store();

        assert!(matches!(
            metadata.write_in_transaction(ObjectId::new(2), b"x"),
            Err(MetadataError::WrongFlow { .. })
        ));
        assert!(matches!(
            metadata.commit_transaction(),
            Err(MetadataError::WrongFlow { .. })
        ));

        metadata.begin_transaction().unwrap();
        assert!(matches!(
            metadata.begin_transaction(),
            Err(MetadataError::WrongFlow { .. })
        ));
        metadata.write_in_transaction(ObjectId::new(2), b"a").unwrap();
        metadata.write_in_transaction(ObjectId::new(3), b"b").unwrap();
        metadata.commit_transaction().unwrap();

        let mut out = [0u8; 16];
        assert_eq!(metadata.read(ObjectId::new(2), &mut out).unwrap(), 1);
        assert_eq!(out[0], b'a');

        // The transaction is closed again.
        assert!(matches!(
            metadata.commit_transaction(),
            Err(MetadataError::WrongFlow { .. })
        ));
    }

    #[test]
    fn multi_delete_clears_slots() {
        let metadata = initialized_store();
        metadata.atomic_write(ObjectId::new(2), b"a").unwrap();
        metadata.atomic_write(ObjectId::new(3), b"b").unwrap();
        metadata
            .multi_delete(&[ObjectId::new(2), ObjectId::new(3)])
            .unwrap();

        let mut out = [0u8; 16];
        assert_eq!(metadata.read(ObjectId::new(2), &mut out).unwrap(), 0);
        assert_eq!(metadata.read(ObjectId::new(3), &mut out).unwrap(), 0);
    }
}
