//! # Retrieve Module
//!
//! HTTP collaborators of a chat session: the token issuer consulted before every
//! handshake, and the paginated history API behind the message cache. Both sit
//! on [`ky_http::ApiClient`], a `reqwest` client with retry middleware.

/// Paginated history over HTTP.
pub mod history;
/// Generic JSON API client with retries.
pub mod ky_http;
/// Short-lived token issuance over HTTP.
pub mod token;

pub use history::HttpPageFetcher;
pub use ky_http::{ApiClient, ApiResponse};
pub use token::HttpTokenProvider;
