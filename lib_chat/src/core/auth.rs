//! # Token Issuance Seam
//!
//! Every handshake carries a fresh short-lived token from the session's token
//! issuer. How the token is obtained (cookie-authenticated HTTP call, test stub)
//! is the provider's business; the connection manager only cares whether a
//! failure is worth retrying.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

/// Why a token could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The issuer could not be reached (DNS, refused, timeout, reset).
    #[error("Token endpoint unreachable: {0}")]
    Network(String),

    /// The issuer answered with a server-side failure (HTTP 5xx).
    #[error("Token endpoint unavailable (HTTP {0})")]
    Unavailable(u16),

    /// The issuer refused to issue a token for this session.
    #[error("Token request rejected: {0}")]
    Rejected(String),
}

impl TokenError {
    /// Network-class failures go through backoff; refusals end the session.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TokenError::Network(_) | TokenError::Unavailable(_))
    }
}

/// Source of short-lived connection tokens.
pub trait TokenProvider: Send + Sync + 'static {
    /// Obtain a fresh token for the next handshake.
    fn fetch_token(&self) -> impl Future<Output = Result<String, TokenError>> + Send;
}

impl<T: TokenProvider> TokenProvider for Arc<T> {
    fn fetch_token(&self) -> impl Future<Output = Result<String, TokenError>> + Send {
        self.as_ref().fetch_token()
    }
}
