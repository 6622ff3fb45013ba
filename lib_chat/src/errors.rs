//! # Chat Link Errors
//!
//! Errors that can cross the public boundary of the crate. Steady-state failures
//! (dropped sockets, rejected tokens, failed history fetches) are reported
//! through [`ConnectionStatus`](crate::core::ConnectionStatus) instead; these
//! variants cover an unusable configuration and requests made against a
//! session that is no longer running.

use thiserror::Error;

/// Result type for chat link operations.
pub type Result<T> = std::result::Result<T, ChatLinkError>;

/// Errors produced by the chat link.
#[derive(Debug, Error)]
pub enum ChatLinkError {
    /// The session task has shut down and can no longer accept commands.
    #[error("Chat session is not running")]
    SessionClosed,

    /// The session configuration is unusable.
    #[cfg(feature = "configs")]
    #[error("Configuration error: {0}")]
    Config(#[from] crate::configs::ConfigError),
}
