//! # lib_chat
//!
//! The real-time delivery core of the chat client. It keeps one authenticated
//! WebSocket connection to the delivery endpoint alive, tracks which channels the
//! client cares about, decodes inbound frames into typed events, and reconciles
//! those events with a paginated message cache. While the socket is down the
//! cache is kept fresh by polling instead.
//!
//! The state machines in [`core`] are plain synchronous types with no I/O, so
//! they can be driven and tested deterministically. The [`transport`] module
//! (feature `transport`) wraps them in a tokio task that owns the socket.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Connection, subscription, dispatch, cache and typing state machines.
pub mod core;
/// Crate-level error type.
pub mod errors;
/// Wire and domain types shared by every component.
pub mod models;

/// Endpoint and timing configuration.
#[cfg(feature = "configs")]
pub mod configs;
/// Console and file logging setup.
#[cfg(feature = "loggers")]
pub mod loggers;
/// HTTP collaborators (token issuance, paginated history).
#[cfg(feature = "retrieve")]
pub mod retrieve;
/// The tokio session driver that owns the WebSocket.
#[cfg(feature = "transport")]
pub mod transport;

pub use crate::core::{
    Backoff, BackoffPolicy, ConnectionManager, ConnectionState, ConnectionStatus, DeliveryMode,
    EventDispatcher, HandlerId, MessageCacheReconciler, PageFetcher, Presence, Subscription,
    SubscriptionRegistry, TokenError, TokenProvider, TypingAggregator,
};
pub use errors::{ChatLinkError, Result};
pub use models::{
    CacheKey, ChatEvent, ChatMessage, ClientFrame, EventKind, InboundEvent, Page, PageRequest,
    TypingUser,
};

#[cfg(feature = "configs")]
pub use configs::{ConfigError, LinkConfig};
#[cfg(feature = "transport")]
pub use transport::ChatSession;
