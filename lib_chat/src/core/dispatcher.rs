//! # Event Dispatcher
//!
//! Typed publish/subscribe hub for inbound events. Handlers register per
//! [`EventKind`] and are addressed afterwards by the [`HandlerId`] they were
//! given, so removal never depends on closure identity.
//!
//! ## Guarantees:
//!
//! 1.  **Receipt order**: handlers run synchronously inside [`EventDispatcher::dispatch`],
//!     so events reach every handler in the order frames arrived.
//! 2.  **Isolation**: a handler that panics is caught and counted; the remaining
//!     handlers for the same event still run, and later events are unaffected.
//! 3.  **Tolerant decoding**: a frame that fails to decode is logged and dropped
//!     ([`EventDispatcher::decode`]); it never reaches a handler.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::models::{decode_frame, EventKind, InboundEvent};

/// Stable identity of a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

/// A boxed event callback.
pub type EventHandler = Box<dyn FnMut(&InboundEvent) + Send + 'static>;

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that ran to completion.
    pub invoked: usize,
    /// Handlers that panicked.
    pub failed: usize,
}

impl DispatchReport {
    /// Total handlers attempted.
    pub fn total(&self) -> usize {
        self.invoked + self.failed
    }
}

/// # Event Dispatcher
///
/// Handlers are kept per kind in registration order.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<EventKind, BTreeMap<HandlerId, EventHandler>>,
    next_id: u64,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: BTreeMap<EventKind, usize> =
            self.handlers.iter().map(|(kind, set)| (*kind, set.len())).collect();
        f.debug_struct("EventDispatcher").field("handlers", &counts).finish()
    }
}

impl EventDispatcher {
    /// An empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler and allocate its id.
    pub fn add_handler<F>(&mut self, kind: EventKind, handler: F) -> HandlerId
    where
        F: FnMut(&InboundEvent) + Send + 'static,
    {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        self.insert_handler(kind, id, Box::new(handler));
        id
    }

    /// Register a handler under an id allocated elsewhere (the session handle
    /// hands ids out before the command reaches the event loop).
    pub fn insert_handler(&mut self, kind: EventKind, id: HandlerId, handler: EventHandler) {
        self.next_id = self.next_id.max(id.0);
        self.handlers.entry(kind).or_default().insert(id, handler);
        log::debug!("{} registered for '{}'", id, kind);
    }

    /// # Remove Handler
    ///
    /// Idempotent. The per-kind entry is dropped once its last handler goes.
    ///
    /// # Returns
    /// Whether a handler was actually removed.
    pub fn remove_handler(&mut self, kind: EventKind, id: HandlerId) -> bool {
        let Some(set) = self.handlers.get_mut(&kind) else {
            return false;
        };
        let removed = set.remove(&id).is_some();
        if set.is_empty() {
            self.handlers.remove(&kind);
        }
        if removed {
            log::debug!("{} removed from '{}'", id, kind);
        }
        removed
    }

    /// Handlers registered for a kind.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, BTreeMap::len)
    }

    /// Whether any kind has a handler.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Kinds with at least one handler.
    pub fn registered_kinds(&self) -> Vec<EventKind> {
        let mut kinds: Vec<EventKind> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Decode a text frame, logging and dropping anything malformed.
    pub fn decode(&self, text: &str) -> Option<InboundEvent> {
        match decode_frame(text) {
            Ok(event) => Some(event),
            Err(e) => {
                log::warn!("Dropping inbound frame: {}", e);
                log::trace!("Dropped frame body: {}", text);
                None
            }
        }
    }

    /// # Dispatch
    ///
    /// Invoke every handler registered for the event's kind.
    pub fn dispatch(&mut self, event: &InboundEvent) -> DispatchReport {
        let kind = event.kind();
        let mut report = DispatchReport::default();
        let Some(set) = self.handlers.get_mut(&kind) else {
            return report;
        };

        for (id, handler) in set.iter_mut() {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => report.invoked += 1,
                Err(panic) => {
                    report.failed += 1;
                    log::error!("{} panicked while handling '{}': {}", id, kind, panic_message(&panic));
                }
            }
        }
        report
    }

    /// Drop every registration (session teardown).
    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
