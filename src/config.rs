/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Configuration as specified by the operator. This is split up into
//! smaller, subsystem-specific config structs before being passed to
//! components. The replica section is forwarded verbatim to the consensus
//! engine and is opaque to this crate.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Configuration {
    pub storage: StorageConfig,
    pub replica: ReplicaConfig,
    pub thin_replica: ThinReplicaConfig,
    pub app: AppConfig,
}

/// Which ordered key-value backend to open, and where.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    /// In-memory ordered map. Test-only: nothing survives the process.
    Memory,
    /// A persistent ordered key-value store supplied by the environment.
    OrderedKv,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Filesystem path for the backend. Ignored by the memory backend.
    pub path: String,
}

/// Consensus engine parameters, forwarded untouched.
#[derive(Clone, Debug)]
pub struct ReplicaConfig {
    /// Maximum tolerated Byzantine replicas.
    pub f: u16,
    /// Maximum tolerated slow/crashed (but honest) replicas.
    pub c: u16,
    /// This replica's id.
    pub id: u16,
    pub view_change_timeout: Duration,
    pub status_report_interval: Duration,
}

#[derive(Clone, Debug)]
pub struct ThinReplicaConfig {
    /// Capacity of each subscriber's live-update ring.
    pub ring_capacity: usize,
}

impl Default for ThinReplicaConfig {
    fn default() -> ThinReplicaConfig {
        ThinReplicaConfig { ring_capacity: 100 }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// The key-type tag byte the thin replica filters on: only keys whose
    /// first byte matches reach subscribers.
    pub tag_byte: u8,
}
