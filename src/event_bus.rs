/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Thread that receives events emitted by the replica and the filtered
//! stream and passes them to event handlers.
//!
//! When the thread receives a message containing an
//! [event](crate::events::Event), it triggers the execution of all handlers
//! defined for the contained event type, where the handlers for each event
//! type are stored in [`EventHandlers`].
//!
//! When no handlers are present in a replica's instance of `EventHandlers`
//! this thread is not started.

use std::sync::mpsc::{Receiver, TryRecvError};
use std::thread::{self, JoinHandle};

use crate::events::*;
use crate::logging::Logger;

/// Pointer to a handler closure, parametrised by the argument (for our use
/// case, event) type.
pub type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// Stores the two optional handlers enabled for an event type: one logging
/// handler, defined in [`logging`](crate::logging), and one user-defined
/// handler.
pub(crate) struct HandlerPair<T: Logger> {
    pub(crate) user_defined_handler: Option<HandlerPtr<T>>,
    pub(crate) logging_handler: Option<HandlerPtr<T>>,
}

impl<T: Logger> HandlerPair<T> {
    // Checks if no event handlers are defined for this event.
    pub(crate) fn is_empty(&self) -> bool {
        self.user_defined_handler.is_none() && self.logging_handler.is_none()
    }

    /// Creates a new `HandlerPair` with the user-defined handler, and the
    /// default logging handler if logging is enabled.
    pub(crate) fn new(log: bool, user_defined_handler: Option<HandlerPtr<T>>) -> HandlerPair<T> {
        HandlerPair {
            user_defined_handler,
            logging_handler: if log { Some(T::get_logger()) } else { None },
        }
    }

    fn fire(&self, event: &T) {
        self.user_defined_handler
            .iter()
            .for_each(|handler| handler(event));
        self.logging_handler
            .iter()
            .for_each(|handler| handler(event));
    }
}

/// Stores the `HandlerPair` of user-defined and optional logging handlers
/// for each pre-defined event type from [events](crate::events).
pub struct EventHandlers {
    pub(crate) append_block_handlers: HandlerPair<AppendBlockEvent>,
    pub(crate) put_sync_block_handlers: HandlerPair<PutSyncBlockEvent>,
    pub(crate) truncate_block_handlers: HandlerPair<TruncateBlockEvent>,
    pub(crate) state_sync_handlers: HandlerPair<StateSyncEvent>,
    pub(crate) subscribe_handlers: HandlerPair<SubscribeEvent>,
    pub(crate) cancel_subscription_handlers: HandlerPair<CancelSubscriptionEvent>,
}

impl EventHandlers {
    /// Creates the handler pairs for all pre-defined event types given the
    /// user-defined handlers, and information on whether logging is enabled.
    pub fn new(
        log: bool,
        append_block_handler: Option<HandlerPtr<AppendBlockEvent>>,
        put_sync_block_handler: Option<HandlerPtr<PutSyncBlockEvent>>,
        truncate_block_handler: Option<HandlerPtr<TruncateBlockEvent>>,
        state_sync_handler: Option<HandlerPtr<StateSyncEvent>>,
        subscribe_handler: Option<HandlerPtr<SubscribeEvent>>,
        cancel_subscription_handler: Option<HandlerPtr<CancelSubscriptionEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            append_block_handlers: HandlerPair::new(log, append_block_handler),
            put_sync_block_handlers: HandlerPair::new(log, put_sync_block_handler),
            truncate_block_handlers: HandlerPair::new(log, truncate_block_handler),
            state_sync_handlers: HandlerPair::new(log, state_sync_handler),
            subscribe_handlers: HandlerPair::new(log, subscribe_handler),
            cancel_subscription_handlers: HandlerPair::new(log, cancel_subscription_handler),
        }
    }

    /// The default set: logging handlers only.
    pub fn logging_only() -> EventHandlers {
        EventHandlers::new(true, None, None, None, None, None, None)
    }

    /// Checks if no handlers are defined, i.e., neither user-defined
    /// handlers were given nor logging is enabled.
    pub fn is_empty(&self) -> bool {
        self.append_block_handlers.is_empty()
            && self.put_sync_block_handlers.is_empty()
            && self.truncate_block_handlers.is_empty()
            && self.state_sync_handlers.is_empty()
            && self.subscribe_handlers.is_empty()
            && self.cancel_subscription_handlers.is_empty()
    }

    /// Triggers the execution of the handlers defined for a given event.
    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::AppendBlock(append_block_event) => {
                self.append_block_handlers.fire(&append_block_event)
            }
            Event::PutSyncBlock(put_sync_block_event) => {
                self.put_sync_block_handlers.fire(&put_sync_block_event)
            }
            Event::TruncateBlock(truncate_block_event) => {
                self.truncate_block_handlers.fire(&truncate_block_event)
            }
            Event::StateSync(state_sync_event) => self.state_sync_handlers.fire(&state_sync_event),
            Event::Subscribe(subscribe_event) => self.subscribe_handlers.fire(&subscribe_event),
            Event::CancelSubscription(cancel_subscription_event) => self
                .cancel_subscription_handlers
                .fire(&cancel_subscription_event),
        }
    }
}

/// Starts the event bus thread, which runs an infinite loop until a shutdown
/// signal is received from the parent thread. In each iteration of the loop,
/// the thread checks if it received any event notifications, and if so,
/// triggers the execution of the handlers defined for the event.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.try_recv() {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(TryRecvError::Empty) => thread::yield_now(),
            Err(TryRecvError::Disconnected) => {
                // All publishers are gone; drain nothing further and wait for
                // the shutdown signal.
                thread::yield_now()
            }
        }
    })
}
