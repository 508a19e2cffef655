/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The replica lifecycle shell: owns the blockchain store and the commands
//! handler, executes consensus-delivered requests, and reconciles storage
//! with the consensus engine at startup.
//!
//! ## Lifecycle
//!
//! A replica moves through `Idle → Starting → Running → Stopping → Idle`.
//! Transitions are linear; operations illegal for the current state fail
//! with [`ReplicaError::IllegalState`]. [`Replica::start`] runs replica
//! state sync against the engine's last executed sequence number before the
//! engine begins delivering requests.
//!
//! ## The execute path
//!
//! The consensus engine serializes delivery: [`Replica::execute`] is called
//! by at most one worker at a time, so the append path has a single writer.
//! For each request the replica drives the handler, appends the resulting
//! update set (unless the request was read-only), and returns the reply,
//! bounded by the request's reply-size cap.
//!
//! Appended blocks pass through a wrapping appender that injects a metadata
//! row recording the consensus sequence number, plus the state of any
//! registered sub-modules (e.g. the time contract), before delegating to
//! the store. The handler never sees these rows.

use std::fmt::{self, Display, Formatter};
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use std::time::SystemTime;

use borsh::BorshSerialize;
use bytes::Bytes;

use crate::app::{CommandsHandler, ExecuteError, ExecuteRequest};
use crate::event_bus::{start_event_bus, EventHandlers};
use crate::events::{AppendBlockEvent, Event, StateSyncEvent};
use crate::state_sync;
use crate::store::blockchain::{BlockStoreError, BlockchainStore};
use crate::store::kv_store::OrderedStore;
use crate::store::paths;
use crate::stream::buffer::SubscriberList;
use crate::types::{BlockId, BlockMetadata, SeqNum, UpdateSet};

/// Lifecycle state of a [`Replica`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicaStatus {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// The consensus engine, as seen by the replica. The engine orders client
/// requests across replicas and invokes [`Replica::execute`] for each one it
/// delivers; everything else about it (threshold signatures, view change,
/// wire protocol) is its own business.
pub trait ConsensusEngine {
    fn start(&mut self) -> Result<(), EngineError>;

    fn stop(&mut self);

    /// The highest consensus sequence number whose execution the engine has
    /// made durable.
    fn last_executed_sequence_number(&self) -> SeqNum;
}

#[derive(Debug)]
pub struct EngineError {
    pub detail: String,
}

/// A sub-module whose state rides inside the block stream. Registered with
/// the replica; when a block is appended and the module's state changed
/// since the last block, the serialized state is injected into the block's
/// update set under the module's reserved key.
pub trait BlockStateProvider: Send + 'static {
    /// The application key the state is stored under. Reserved single-byte
    /// keys keep sub-module rows clear of application prefixes.
    fn state_key(&self) -> Bytes;

    /// The serialized state, if it changed since the last take. Clears the
    /// changed flag.
    fn take_state_if_changed(&mut self) -> Option<Bytes>;
}

/// Outcome of executing one consensus-delivered request.
pub struct ExecuteResult {
    pub reply: Bytes,
    pub code: ExecuteCode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecuteCode {
    /// The request executed; resend-worthy failures surface as engine-level
    /// errors instead.
    Success,
    /// The request bytes could not be parsed; resending would not help.
    UnparseableRequest,
}

impl ExecuteCode {
    /// The numeric return code the consensus engine's ABI expects.
    pub fn int(&self) -> u8 {
        match self {
            ExecuteCode::Success => 0,
            ExecuteCode::UnparseableRequest => 1,
        }
    }
}

pub struct Replica<S: OrderedStore, H: CommandsHandler> {
    status: ReplicaStatus,
    storage: BlockchainStore<S>,
    handler: H,
    appender: MetadataAppender<S>,
    event_publisher: Option<Sender<Event>>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<S: OrderedStore, H: CommandsHandler> Replica<S, H> {
    /// Assemble a replica over an opened store. `subscribers` is the same
    /// registry the filtered stream server reads; every appended block is
    /// broadcast into it.
    ///
    /// If `event_handlers` defines any handler, the event bus thread is
    /// started and owns them until the replica is dropped.
    pub fn new(
        storage: BlockchainStore<S>,
        handler: H,
        subscribers: SubscriberList,
        event_handlers: EventHandlers,
    ) -> Replica<S, H> {
        let (event_publisher, event_bus, event_bus_shutdown) = if event_handlers.is_empty() {
            (None, None, None)
        } else {
            let (event_publisher, event_subscriber) = mpsc::channel();
            let (shutdown_sender, shutdown_receiver) = mpsc::channel();
            let event_bus = start_event_bus(event_handlers, event_subscriber, shutdown_receiver);
            (Some(event_publisher), Some(event_bus), Some(shutdown_sender))
        };

        let appender = MetadataAppender {
            storage: storage.clone(),
            subscribers,
            state_providers: Vec::new(),
            event_publisher: event_publisher.clone(),
        };

        Replica {
            status: ReplicaStatus::Idle,
            storage,
            handler,
            appender,
            event_publisher,
            event_bus,
            event_bus_shutdown,
        }
    }

    /// Register a sub-module whose state should ride inside appended blocks.
    pub fn register_state_provider(&mut self, provider: Box<dyn BlockStateProvider>) {
        self.appender.state_providers.push(provider);
    }

    pub fn status(&self) -> ReplicaStatus {
        self.status
    }

    /// A clone of the event publisher, for wiring other components (the
    /// filtered stream server, the state transfer bridge) into the same
    /// event bus.
    pub fn event_publisher(&self) -> Option<Sender<Event>> {
        self.event_publisher.clone()
    }

    /// Read-only access to the underlying store.
    pub fn storage(&self) -> &BlockchainStore<S> {
        &self.storage
    }

    /// Run replica state sync against the engine's last executed sequence
    /// number, then start the engine. Legal only while idle. Returns the
    /// number of blocks state sync removed.
    pub fn start<E: ConsensusEngine>(&mut self, engine: &mut E) -> Result<u64, ReplicaError> {
        if self.status != ReplicaStatus::Idle {
            return Err(ReplicaError::IllegalState {
                status: self.status,
            });
        }
        self.status = ReplicaStatus::Starting;

        let removed = match state_sync::run(
            &self.storage,
            engine.last_executed_sequence_number(),
            &self.event_publisher,
        ) {
            Ok(removed) => removed,
            Err(source) => {
                self.status = ReplicaStatus::Idle;
                return Err(ReplicaError::Store { source });
            }
        };
        Event::StateSync(StateSyncEvent {
            timestamp: SystemTime::now(),
            removed_blocks: removed,
            last_reachable_block: self.storage.last_reachable_block(),
        })
        .publish(&self.event_publisher);

        engine.start().map_err(|source| {
            self.status = ReplicaStatus::Idle;
            ReplicaError::Engine { source }
        })?;

        self.status = ReplicaStatus::Running;
        Ok(removed)
    }

    /// Stop the engine and return to idle. Legal only while running.
    pub fn stop<E: ConsensusEngine>(&mut self, engine: &mut E) -> Result<(), ReplicaError> {
        if self.status != ReplicaStatus::Running {
            return Err(ReplicaError::IllegalState {
                status: self.status,
            });
        }
        self.status = ReplicaStatus::Stopping;
        engine.stop();
        self.status = ReplicaStatus::Idle;
        Ok(())
    }

    /// Execute one consensus-delivered request. Legal only while running,
    /// and called by at most one consensus worker at a time.
    pub fn execute(&mut self, request: &ExecuteRequest) -> Result<ExecuteResult, ReplicaError> {
        if self.status != ReplicaStatus::Running {
            return Err(ReplicaError::IllegalState {
                status: self.status,
            });
        }

        let output = match self.handler.execute(request, &self.storage) {
            Ok(output) => output,
            Err(ExecuteError::MalformedRequest { detail }) => {
                log::warn!(
                    "unable to parse request from client {}: {}",
                    request.client_id,
                    detail
                );
                return Ok(ExecuteResult {
                    reply: bounded_error_reply(&detail, request.max_reply_size),
                    code: ExecuteCode::UnparseableRequest,
                });
            }
        };

        if request.read_only {
            if !output.updates.is_empty() {
                log::warn!(
                    "read-only request from client {} produced {} updates; dropping them",
                    request.client_id,
                    output.updates.len()
                );
            }
        } else {
            self.appender
                .append(output.updates, request.sequence_number)
                .map_err(|source| ReplicaError::Store { source })?;
        }

        let reply = if output.reply.len() > request.max_reply_size {
            let detail = format!(
                "reply is too large (size of this reply: {}, maximum size allowed for this reply: {})",
                output.reply.len(),
                request.max_reply_size
            );
            log::error!("cannot send reply to client {}: {}", request.client_id, detail);
            bounded_error_reply(&detail, request.max_reply_size)
        } else {
            output.reply
        };

        Ok(ExecuteResult {
            reply,
            code: ExecuteCode::Success,
        })
    }

    /// Append a block while the replica is idle. Used to seed genesis state
    /// before the consensus engine ever runs. No metadata row is injected;
    /// such blocks report consensus sequence number 0.
    pub fn append_to_idle(&self, updates: &UpdateSet) -> Result<BlockId, ReplicaError> {
        if self.status != ReplicaStatus::Idle {
            return Err(ReplicaError::IllegalState {
                status: self.status,
            });
        }
        self.storage
            .append_block(updates)
            .map_err(|source| ReplicaError::Store { source })
    }
}

impl<S: OrderedStore, H: CommandsHandler> Drop for Replica<S, H> {
    fn drop(&mut self) {
        if let (Some(shutdown), Some(event_bus)) =
            (self.event_bus_shutdown.take(), self.event_bus.take())
        {
            shutdown
                .send(())
                .expect("event_bus thread dropped its shutdown channel prematurely");
            event_bus.join().expect("event_bus thread panicked");
        }
    }
}

/// UTF-8 error reply fabricated by the replica when the handler's reply
/// cannot be used, truncated to the transport's cap.
fn bounded_error_reply(detail: &str, max_reply_size: usize) -> Bytes {
    let mut reply = detail.as_bytes().to_vec();
    reply.truncate(max_reply_size);
    Bytes::from(reply)
}

/// The wrapping block appender: amends the update set with the consensus
/// sequence number row and any registered sub-module state, appends through
/// the store, then broadcasts the block to subscriber rings.
struct MetadataAppender<S: OrderedStore> {
    storage: BlockchainStore<S>,
    subscribers: SubscriberList,
    state_providers: Vec<Box<dyn BlockStateProvider>>,
    event_publisher: Option<Sender<Event>>,
}

impl<S: OrderedStore> MetadataAppender<S> {
    fn append(
        &mut self,
        updates: UpdateSet,
        sequence_number: SeqNum,
    ) -> Result<BlockId, BlockStoreError> {
        let mut amended = updates;

        for provider in self.state_providers.iter_mut() {
            if let Some(state) = provider.take_state_if_changed() {
                amended.insert(provider.state_key(), state);
            }
        }

        let metadata = BlockMetadata::new(sequence_number)
            .try_to_vec()
            .expect("BlockMetadata serialization cannot fail");
        amended.insert(
            Bytes::from_static(&paths::BLOCK_METADATA_KEY),
            Bytes::from(metadata),
        );

        let block_id = self.storage.append_block(&amended)?;
        self.subscribers.push_to_all(block_id, &amended);

        Event::AppendBlock(AppendBlockEvent {
            timestamp: SystemTime::now(),
            block_id,
            num_updates: amended.len(),
            bft_sequence_number: sequence_number,
        })
        .publish(&self.event_publisher);

        Ok(block_id)
    }
}

#[derive(Debug)]
pub enum ReplicaError {
    /// The operation is illegal for the replica's current lifecycle state.
    IllegalState { status: ReplicaStatus },
    /// Block storage failed.
    Store { source: BlockStoreError },
    /// The consensus engine refused to start.
    Engine { source: EngineError },
}

impl Display for ReplicaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaError::IllegalState { status } => {
                write!(f, "operation illegal while replica is {:?}", status)
            }
            ReplicaError::Store { source } => write!(f, "{}", source),
            ReplicaError::Engine { source } => {
                write!(f, "consensus engine error: {}", source.detail)
            }
        }
    }
}
