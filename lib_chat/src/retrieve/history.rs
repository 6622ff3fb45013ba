//! # HTTP Page Fetcher
//!
//! Reads message history from the persistence API:
//! `GET <history_url>?<id_param>=<id>&limit=<n>[&cursor=<cursor>]` answering
//! `{"items": [...], "nextCursor": "..."}`, newest first.

use super::ky_http::{is_decode_error, ApiClient};
use crate::core::{FetchError, PageFetcher};
use crate::models::{Page, PageRequest};

/// A [`PageFetcher`] backed by an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: ApiClient,
    id_param: String,
}

impl HttpPageFetcher {
    /// Wrap a client whose base URL is the history endpoint. Conversations are
    /// addressed with the `channelId` query parameter.
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            id_param: "channelId".to_string(),
        }
    }

    /// Convenience constructor from a URL and optional session bearer.
    pub fn from_url(history_url: &str, session_token: Option<String>) -> anyhow::Result<Self> {
        Ok(Self::new(ApiClient::new(history_url, session_token)?))
    }

    /// Use a different id parameter (e.g. `conversationId` for direct messages).
    pub fn with_id_param(mut self, id_param: impl Into<String>) -> Self {
        self.id_param = id_param.into();
        self
    }

    fn query(&self, request: &PageRequest) -> Vec<(&str, String)> {
        let mut query = vec![
            (self.id_param.as_str(), request.conversation_id.clone()),
            ("limit", request.limit.to_string()),
        ];
        if let Some(cursor) = &request.cursor {
            query.push(("cursor", cursor.clone()));
        }
        query
    }
}

impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, request: PageRequest) -> Result<Page, FetchError> {
        let query = self.query(&request);
        log::trace!("Fetching history page {:?}", query);

        match self.client.get::<Page>("", &query).await {
            Ok(response) if response.success => Ok(response.data.unwrap_or_default()),
            Ok(response) => Err(FetchError::Status(response.status)),
            Err(e) if is_decode_error(&e) => Err(FetchError::Decode(e.to_string())),
            Err(e) => Err(FetchError::Network(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_carries_id_limit_and_cursor() {
        let fetcher = HttpPageFetcher::from_url("https://chat.example.com/api/messages", None).unwrap();

        let query = fetcher.query(&PageRequest::newest("42"));
        assert_eq!(query, vec![("channelId", "42".to_string()), ("limit", "10".to_string())]);

        let fetcher = fetcher.with_id_param("conversationId");
        let query = fetcher.query(&PageRequest::after("7", "m31"));
        assert_eq!(query[0], ("conversationId", "7".to_string()));
        assert_eq!(query[2], ("cursor", "m31".to_string()));
    }
}
