use std::fmt;

use serde::{Deserialize, Serialize};

use super::message::ChatMessage;

/// Number of messages the history API returns per page.
pub const MESSAGES_BATCH: usize = 10;

/// Identifies one conversation's cached history (e.g. `channel:42`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap a key string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// # Page
///
/// One page of history, newest message first, plus the cursor for the next
/// (older) page. A page with no items and no cursor means "nothing more right
/// now".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// Messages, newest first.
    #[serde(default)]
    pub items: Vec<ChatMessage>,
    /// Opaque cursor for the next older page.
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl Page {
    /// An empty page with no cursor.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the page carries no messages.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A history request handed to the [`PageFetcher`](crate::core::PageFetcher).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Channel or conversation id the history belongs to.
    pub conversation_id: String,
    /// `None` asks for the newest page.
    pub cursor: Option<String>,
    /// Page size.
    pub limit: usize,
}

impl PageRequest {
    /// Request the newest page of a conversation.
    pub fn newest(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            cursor: None,
            limit: MESSAGES_BATCH,
        }
    }

    /// Request the page that follows `cursor`.
    pub fn after(conversation_id: impl Into<String>, cursor: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            cursor: Some(cursor.into()),
            limit: MESSAGES_BATCH,
        }
    }
}
