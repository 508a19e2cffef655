/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The client-side port: how applications submit requests to the replicated
//! state machine, and a pool that multiplexes many callers over a fixed set
//! of client connections.
//!
//! A [`CommandService`] is one client connection to the consensus engine
//! (the engine's client library sits behind it). A [`ClientPool`] wraps N
//! such connections behind a checkout-return discipline: blocking callers
//! spin a non-blocking pop with a yield while all connections are busy,
//! while [`submit`](ClientPool::submit) hands the request to a worker thread
//! and reports `Overloaded` instead of waiting.

use std::collections::VecDeque;
use std::fmt::{self, Display, Formatter};
use std::sync::{Arc, Mutex};
use std::thread;

use bytes::Bytes;
use threadpool::ThreadPool;

/// One synchronous client connection to the consensus engine.
pub trait CommandService: Send + 'static {
    /// Submit `request` and wait for the reply, which is at most
    /// `max_reply_size` bytes.
    fn invoke_command_sync(
        &mut self,
        request: &[u8],
        read_only: bool,
        max_reply_size: usize,
    ) -> Result<Bytes, ClientError>;
}

/// Why a request failed at the client port.
#[derive(Debug)]
pub enum ClientError {
    /// No quorum of replies arrived in time; the request may or may not have
    /// executed.
    Timeout,
    /// The client is not in a state to send requests.
    IllegalState,
    /// Something else went wrong; detail is for logs, not for retry logic.
    Internal { detail: String },
}

impl Display for ClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Timeout => write!(f, "timed out waiting for replies"),
            ClientError::IllegalState => write!(f, "client is not running"),
            ClientError::Internal { detail } => write!(f, "internal client error: {}", detail),
        }
    }
}

/// The answer an application gets when handing a request to
/// [`ClientPool::submit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitResult {
    /// The request has been queued for submission.
    Acknowledged,
    /// Every pooled client is busy; try again later.
    Overloaded,
    /// An internal error occurred; the reason is in the logs.
    InternalError,
}

/// A pool of [`CommandService`] connections plus the worker threads that
/// drive them.
pub struct ClientPool<C: CommandService> {
    available: Arc<Mutex<VecDeque<C>>>,
    workers: ThreadPool,
}

impl<C: CommandService> ClientPool<C> {
    pub fn new(clients: Vec<C>) -> ClientPool<C> {
        assert!(!clients.is_empty(), "a client pool needs at least one client");
        let workers = ThreadPool::new(clients.len());
        ClientPool {
            available: Arc::new(Mutex::new(VecDeque::from_iter(clients))),
            workers,
        }
    }

    /// Submit asynchronously: if a client is free, the request runs on a
    /// worker thread and `on_reply` is called with the outcome; otherwise
    /// the caller is told the pool is overloaded and nothing is queued.
    pub fn submit(
        &self,
        request: Bytes,
        read_only: bool,
        max_reply_size: usize,
        on_reply: impl FnOnce(Result<Bytes, ClientError>) + Send + 'static,
    ) -> SubmitResult {
        let mut client = match self.available.lock().unwrap().pop_front() {
            Some(client) => client,
            None => return SubmitResult::Overloaded,
        };

        let available = self.available.clone();
        self.workers.execute(move || {
            let result = client.invoke_command_sync(&request, read_only, max_reply_size);
            available.lock().unwrap().push_back(client);
            on_reply(result);
        });
        SubmitResult::Acknowledged
    }

    /// Submit synchronously on the calling thread, waiting for a free client
    /// if necessary.
    pub fn invoke_command_sync(
        &self,
        request: &[u8],
        read_only: bool,
        max_reply_size: usize,
    ) -> Result<Bytes, ClientError> {
        let mut client = self.checkout();
        let result = client.invoke_command_sync(request, read_only, max_reply_size);
        self.available.lock().unwrap().push_back(client);
        result
    }

    /// How many clients are free right now.
    pub fn available_clients(&self) -> usize {
        self.available.lock().unwrap().len()
    }

    /// Non-blocking pop, yielding while the pool is empty.
    fn checkout(&self) -> C {
        loop {
            if let Some(client) = self.available.lock().unwrap().pop_front() {
                return client;
            }
            thread::yield_now();
        }
    }
}

impl<C: CommandService> Drop for ClientPool<C> {
    fn drop(&mut self) {
        self.workers.join();
    }
}
