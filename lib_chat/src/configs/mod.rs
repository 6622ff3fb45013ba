//! # Configuration Modules
//!
//! Endpoint and timing settings for a chat session, loaded from code, from the
//! process environment (after `.env`), or from any key/value lookup.

/// Session configuration and its environment loader.
pub mod link_config;

pub use link_config::{ConfigError, LinkConfig};
