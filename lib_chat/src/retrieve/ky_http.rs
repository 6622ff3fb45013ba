//! # HTTP Retrieval Utilities
//!
//! An asynchronous JSON API client around `reqwest`, with exponential-backoff
//! retries of transient failures via `reqwest-retry` and a uniform
//! [`ApiResponse`] for success and failure alike.

use std::fmt;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, COOKIE};
use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};

/// A standardized container for API responses.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The deserialized body of a 2xx response.
    pub data: Option<T>,
    /// The raw body of a non-2xx response.
    pub error_body: Option<String>,
    /// HTTP status code.
    pub status: u16,
    /// Whether the status was 2xx.
    pub success: bool,
    /// Response headers.
    pub headers: HeaderMap,
}

/// A JSON API client with a base URL, optional credentials and retries.
#[derive(Clone)]
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
    auth_token: Option<String>,
    cookie: Option<String>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("cookie", &self.cookie.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ApiClient {
    /// Build a client retrying transient failures up to 3 times.
    ///
    /// # Errors
    /// Fails if `base_url` is not an absolute URL.
    pub fn new(base_url: &str, auth_token: Option<String>) -> anyhow::Result<Self> {
        Self::with_max_retries(base_url, auth_token, 3)
    }

    /// Build a client with an explicit retry budget (`0` disables retries).
    pub fn with_max_retries(base_url: &str, auth_token: Option<String>, max_retries: u32) -> anyhow::Result<Self> {
        let url = Url::parse(base_url)?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let client = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner: client,
            base_url: url,
            auth_token,
            cookie: None,
        })
    }

    /// Send a `Cookie` header with every request (session-cookie auth).
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    /// The base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// # Request
    ///
    /// Join `path` onto the base URL, attach query pairs, credentials, extra
    /// headers and an optional JSON body, then execute.
    ///
    /// # Errors
    /// Network failures and undecodable 2xx bodies. Non-2xx statuses are not
    /// errors; they come back with `success == false`.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        headers: Option<HeaderMap>,
        body: Option<B>,
    ) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let mut full_url = self.base_url.join(path)?;
        if !query.is_empty() {
            let mut pairs = full_url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        let mut req = self.inner.request(method, full_url);
        if let Some(h) = headers {
            req = req.headers(h);
        }
        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(cookie) = &self.cookie {
            req = req.header(COOKIE, HeaderValue::from_str(cookie)?);
        }
        if let Some(b) = body {
            let json_body = serde_json::to_string(&b)?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        let response: reqwest::Response = req.send().await?;
        let status = response.status();
        let resp_headers = response.headers().clone();

        if status.is_success() {
            let text = response.text().await?;
            let data = serde_json::from_str::<T>(&text)?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers: resp_headers,
            })
        } else {
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
                headers: resp_headers,
            })
        }
    }

    /// `GET` with query pairs and no body.
    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> anyhow::Result<ApiResponse<T>> {
        self.request::<T, ()>(Method::GET, path, query, None, None).await
    }
}

/// Whether an error from [`ApiClient::request`] was a body that did not
/// decode, as opposed to a transport failure.
pub fn is_decode_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<serde_json::Error>().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_relative_base_urls() {
        assert!(ApiClient::new("/api/socket/token", None).is_err());
        let client = ApiClient::new("https://chat.example.com/api/messages", None).unwrap();
        assert_eq!(client.base_url().path(), "/api/messages");
    }

    #[test]
    fn decode_errors_are_told_apart() {
        let decode: anyhow::Error = serde_json::from_str::<u8>("nope").unwrap_err().into();
        assert!(is_decode_error(&decode));
        assert!(!is_decode_error(&anyhow::anyhow!("connection reset")));
    }
}
