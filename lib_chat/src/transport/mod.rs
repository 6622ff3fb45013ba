//! # Transport Module
//!
//! The tokio side of a chat session. [`ChatSession`] is a cheap handle; the
//! state lives in a single background task that owns the WebSocket, runs the
//! core state machines sequentially, and spawns the slow work (liveness probe,
//! token fetch, handshake, history fetches) so that commands keep flowing while
//! it is in flight.

/// TCP liveness probe.
pub mod probe;
/// The session handle and its event loop.
pub mod session;
/// Handshake: probe, token, WebSocket upgrade.
pub mod socket;

pub use probe::probe_endpoint;
pub use session::ChatSession;
pub use socket::handshake_url;
