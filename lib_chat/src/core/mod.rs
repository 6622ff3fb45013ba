//! # Core Engine Module
//!
//! The state machines behind a chat session. Nothing in here performs I/O or
//! spawns tasks: each component is a plain owned value whose methods are called
//! from one event loop (the session task in [`crate::transport`], or a test).
//!
//! ## Core Components:
//!
//! - **`connection`**: the connect / open / close state machine with exponential
//!   backoff and terminal auth failures ([`ConnectionManager`]).
//! - **`registry`**: desired channel subscriptions, replayed after every reconnect
//!   ([`SubscriptionRegistry`]).
//! - **`dispatcher`**: typed handler registration and isolated fan-out
//!   ([`EventDispatcher`]).
//! - **`reconciler`**: the paginated message cache and the push / poll delivery
//!   mode switch ([`MessageCacheReconciler`]).
//! - **`typing`**: per-channel typing indicators ([`TypingAggregator`]).
//! - **`debounce`**: a clock-driven debouncer and the local typing notifier.

/// Token issuance seam.
pub mod auth;
/// Reconnect delay policy.
pub mod backoff;
/// Connection lifecycle state machine.
pub mod connection;
/// Debounce utility and local typing notifier.
pub mod debounce;
/// Typed event handler registry and fan-out.
pub mod dispatcher;
/// Paginated cache and delivery mode switch.
pub mod reconciler;
/// Desired-subscription bookkeeping.
pub mod registry;
/// Typing indicator aggregation.
pub mod typing;

pub use auth::{TokenError, TokenProvider};
pub use backoff::{Backoff, BackoffPolicy};
pub use connection::{
    AttemptFailure, CloseKind, ConnectionManager, ConnectionState, ConnectionStatus, NextStep,
    DEFAULT_AUTH_CLOSE_CODES,
};
pub use debounce::{Clock, Debouncer, ManualClock, SystemClock, TypingNotifier, TypingSignal};
pub use dispatcher::{DispatchReport, EventDispatcher, EventHandler, HandlerId};
pub use reconciler::{DeliveryMode, FetchError, MessageCache, MessageCacheReconciler, PageFetcher};
pub use registry::{Presence, Subscription, SubscriptionRegistry};
pub use typing::TypingAggregator;
