//! # HTTP Token Provider
//!
//! Fetches a short-lived connection token from the token issuer. The issuer is
//! authenticated with the user's session (bearer or cookie) and answers
//! `{"token": "<signed token>"}`.

use serde::Deserialize;

use super::ky_http::{is_decode_error, ApiClient, ApiResponse};
use crate::core::{TokenError, TokenProvider};

#[derive(Debug, Deserialize)]
struct TokenBody {
    #[serde(default)]
    token: String,
}

/// A [`TokenProvider`] backed by an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpTokenProvider {
    client: ApiClient,
}

impl HttpTokenProvider {
    /// Wrap a client whose base URL is the token endpoint.
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Convenience constructor from a URL and optional session bearer.
    pub fn from_url(token_url: &str, session_token: Option<String>) -> anyhow::Result<Self> {
        Ok(Self::new(ApiClient::new(token_url, session_token)?))
    }
}

impl TokenProvider for HttpTokenProvider {
    async fn fetch_token(&self) -> Result<String, TokenError> {
        match self.client.get::<TokenBody>("", &[]).await {
            Ok(response) => classify_response(response),
            Err(e) if is_decode_error(&e) => Err(TokenError::Rejected(format!("malformed token response: {}", e))),
            Err(e) => Err(TokenError::Network(e.to_string())),
        }
    }
}

/// Map an issuer response to a token or a classified failure.
///
/// 5xx, 408 and 429 are treated as the issuer being temporarily unavailable;
/// every other non-2xx answer, and an empty token, is a refusal.
fn classify_response(response: ApiResponse<TokenBody>) -> Result<String, TokenError> {
    let status = response.status;
    if response.success {
        return match response.data {
            Some(body) if !body.token.is_empty() => Ok(body.token),
            _ => Err(TokenError::Rejected("token endpoint returned no token".to_string())),
        };
    }

    if status >= 500 || status == 408 || status == 429 {
        return Err(TokenError::Unavailable(status));
    }

    let detail = response
        .error_body
        .filter(|body| !body.trim().is_empty())
        .map(|body| format!("HTTP {}: {}", status, body.trim()))
        .unwrap_or_else(|| format!("HTTP {}", status));
    Err(TokenError::Rejected(detail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;

    fn response(status: u16, token: Option<&str>, error_body: Option<&str>) -> ApiResponse<TokenBody> {
        ApiResponse {
            data: token.map(|t| TokenBody { token: t.to_string() }),
            error_body: error_body.map(str::to_string),
            status,
            success: (200..300).contains(&status),
            headers: HeaderMap::new(),
        }
    }

    #[test]
    fn success_yields_the_token() {
        assert_eq!(classify_response(response(200, Some("abc"), None)), Ok("abc".to_string()));
    }

    #[test]
    fn empty_token_is_a_refusal() {
        assert!(matches!(
            classify_response(response(200, Some(""), None)),
            Err(TokenError::Rejected(_))
        ));
    }

    #[test]
    fn server_errors_are_retryable() {
        for status in [500, 502, 503, 408, 429] {
            let err = classify_response(response(status, None, Some("oops"))).unwrap_err();
            assert_eq!(err, TokenError::Unavailable(status));
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn client_errors_are_refusals() {
        let err = classify_response(response(401, None, Some("Unauthorized"))).unwrap_err();
        assert_eq!(err, TokenError::Rejected("HTTP 401: Unauthorized".to_string()));
        assert!(!err.is_retryable());

        let err = classify_response(response(403, None, None)).unwrap_err();
        assert_eq!(err, TokenError::Rejected("HTTP 403".to_string()));
    }
}
