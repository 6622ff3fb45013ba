//! # Message Cache Reconciler
//!
//! Keeps a paginated, newest-first message cache per conversation and merges
//! three sources into it:
//!
//! - real-time `new-message` / `message-update` / `message-delete` events;
//! - history pages loaded on demand through a [`PageFetcher`];
//! - the newest page, re-fetched on an interval while the transport is down.
//!
//! The reconciler also owns the [`DeliveryMode`] switch. While the connection is
//! open the cache is fed by push events (`Streaming`); as soon as it drops, the
//! session polls every bound conversation (`FailoverPolling`) until it reopens.
//!
//! ## Cache invariants:
//!
//! 1.  A message id appears at most once across all pages of a cache key.
//! 2.  Live creates land at the front of the first page; older pages are never
//!     reordered.
//! 3.  Applying the same create or update twice equals applying it once.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{CacheKey, ChatEvent, ChatMessage, InboundEvent, Page, PageRequest, MESSAGES_BATCH};

/// Where cache updates come from right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryMode {
    /// The transport is open; events are pushed.
    Streaming,
    /// The transport is down; the newest page is polled on an interval.
    FailoverPolling,
}

/// Why a history page could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The history service could not be reached.
    #[error("History service unreachable: {0}")]
    Network(String),

    /// The history service answered with a non-success status.
    #[error("History service returned HTTP {0}")]
    Status(u16),

    /// The response body was not a page.
    #[error("Invalid history page: {0}")]
    Decode(String),
}

/// Source of history pages.
pub trait PageFetcher: Send + Sync + 'static {
    /// Fetch one page, newest first.
    fn fetch_page(&self, request: PageRequest) -> impl Future<Output = Result<Page, FetchError>> + Send;
}

impl<T: PageFetcher> PageFetcher for Arc<T> {
    fn fetch_page(&self, request: PageRequest) -> impl Future<Output = Result<Page, FetchError>> + Send {
        self.as_ref().fetch_page(request)
    }
}

/// # Message Cache
///
/// The pages of one cache key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageCache {
    pages: Vec<Page>,
}

impl MessageCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache seeded with a first page.
    pub fn with_first_page(page: Page) -> Self {
        Self { pages: vec![page] }
    }

    /// Pages, newest first.
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Every cached message, newest first.
    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.pages.iter().flat_map(|page| page.items.iter())
    }

    /// Total cached messages.
    pub fn len(&self) -> usize {
        self.pages.iter().map(|page| page.items.len()).sum()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a message id is cached on any page.
    pub fn contains(&self, id: &str) -> bool {
        self.messages().any(|message| message.id == id)
    }

    /// Cursor of the oldest loaded page.
    pub fn next_cursor(&self) -> Option<&str> {
        self.pages.last().and_then(|page| page.next_cursor.as_deref())
    }

    /// Prepend a new message to the first page. Returns `false` if the id is
    /// already cached.
    pub fn apply_create(&mut self, message: ChatMessage) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        match self.pages.first_mut() {
            Some(first) => first.items.insert(0, message),
            None => self.pages.push(Page {
                items: vec![message],
                next_cursor: None,
            }),
        }
        true
    }

    /// Replace the message with the same id, wherever it sits. Returns `false`
    /// if the id is not cached.
    pub fn apply_update(&mut self, message: ChatMessage) -> bool {
        for page in &mut self.pages {
            if let Some(slot) = page.items.iter_mut().find(|item| item.id == message.id) {
                *slot = message;
                return true;
            }
        }
        false
    }

    /// Append an older page, skipping ids that are already cached (live
    /// creates shift page boundaries).
    pub fn append_page(&mut self, page: Page) {
        let mut items = Vec::with_capacity(page.items.len());
        for message in page.items {
            if !self.contains(&message.id) && !items.iter().any(|m: &ChatMessage| m.id == message.id) {
                items.push(message);
            }
        }
        self.pages.push(Page {
            items,
            next_cursor: page.next_cursor,
        });
    }

    /// Merge a freshly fetched newest page: known ids are replaced in place;
    /// unseen ids go into the first page ahead of the first older message, so
    /// a page that lands after a live create does not jump in front of it.
    pub fn merge_newest(&mut self, page: Page) {
        if self.pages.is_empty() {
            self.pages.push(page);
            return;
        }

        for message in page.items {
            if self.contains(&message.id) {
                self.apply_update(message);
                continue;
            }
            let first = &mut self.pages[0];
            let at = first
                .items
                .iter()
                .position(|cached| cached.timestamp < message.timestamp)
                .unwrap_or(first.items.len());
            first.items.insert(at, message);
        }
    }
}

/// # Message Cache Reconciler
///
/// All caches of a session, the channel → cache key routing table, and the
/// delivery mode.
#[derive(Debug)]
pub struct MessageCacheReconciler {
    caches: HashMap<CacheKey, MessageCache>,
    routes: HashMap<String, CacheKey>,
    conversations: HashMap<CacheKey, String>,
    fetch_errors: HashMap<CacheKey, FetchError>,
    mode: DeliveryMode,
    page_size: usize,
}

impl Default for MessageCacheReconciler {
    fn default() -> Self {
        Self::new(MESSAGES_BATCH)
    }
}

impl MessageCacheReconciler {
    /// Start in `FailoverPolling`: nothing is pushed until a connection opens.
    pub fn new(page_size: usize) -> Self {
        Self {
            caches: HashMap::new(),
            routes: HashMap::new(),
            conversations: HashMap::new(),
            fetch_errors: HashMap::new(),
            mode: DeliveryMode::FailoverPolling,
            page_size: page_size.max(1),
        }
    }

    /// Current delivery mode.
    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// # Set Transport Open
    ///
    /// Flip the delivery mode to follow the transport.
    ///
    /// # Returns
    /// `(old, new)` when the mode actually changed.
    pub fn set_transport_open(&mut self, open: bool) -> Option<(DeliveryMode, DeliveryMode)> {
        let next = if open {
            DeliveryMode::Streaming
        } else {
            DeliveryMode::FailoverPolling
        };
        if self.mode == next {
            return None;
        }
        let previous = self.mode;
        log::info!("Transitioning mode: {:?} -> {:?}", previous, next);
        self.mode = next;
        Some((previous, next))
    }

    /// Whether the session should be polling right now.
    pub fn should_poll(&self) -> bool {
        self.mode == DeliveryMode::FailoverPolling && !self.conversations.is_empty()
    }

    /// Route a channel's message events into a cache key and mark the key for
    /// polling.
    pub fn bind(&mut self, channel_name: impl Into<String>, key: CacheKey, conversation_id: impl Into<String>) {
        let channel_name = channel_name.into();
        log::debug!("Routing {} into cache '{}'", channel_name, key);
        self.routes.insert(channel_name, key.clone());
        self.conversations.insert(key, conversation_id.into());
    }

    /// Stop routing into and polling a cache key. The cached pages stay.
    pub fn unbind(&mut self, key: &CacheKey) {
        self.routes.retain(|_, bound| bound != key);
        self.conversations.remove(key);
    }

    /// Stop routing a channel. The key it fed stops being polled once no
    /// other channel routes into it.
    ///
    /// # Returns
    /// The key the channel was routed into, if any.
    pub fn unbind_channel(&mut self, channel_name: &str) -> Option<CacheKey> {
        let key = self.routes.remove(channel_name)?;
        if !self.routes.values().any(|bound| *bound == key) {
            self.conversations.remove(&key);
        }
        log::debug!("Stopped routing {} into cache '{}'", channel_name, key);
        Some(key)
    }

    /// Channel names currently routed into a cache key.
    pub fn channels_for(&self, key: &CacheKey) -> Vec<String> {
        let mut names: Vec<String> = self
            .routes
            .iter()
            .filter(|(_, bound)| *bound == key)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// The conversation id history requests use for a key. Unbound keys are
    /// treated as their own conversation id.
    pub fn conversation_for(&self, key: &CacheKey) -> String {
        self.conversations
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.as_str().to_string())
    }

    /// A history request for a key.
    pub fn request_for(&self, key: &CacheKey, cursor: Option<String>) -> PageRequest {
        PageRequest {
            conversation_id: self.conversation_for(key),
            cursor,
            limit: self.page_size,
        }
    }

    /// Newest-page requests for every bound key, for one polling round.
    pub fn polling_requests(&self) -> Vec<(CacheKey, PageRequest)> {
        let mut keys: Vec<&CacheKey> = self.conversations.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|key| (key.clone(), self.request_for(key, None)))
            .collect()
    }

    /// Prepend a created message to a key's cache.
    pub fn apply_create(&mut self, key: &CacheKey, message: ChatMessage) -> bool {
        self.caches.entry(key.clone()).or_default().apply_create(message)
    }

    /// Replace an edited message in a key's cache.
    pub fn apply_update(&mut self, key: &CacheKey, message: ChatMessage) -> bool {
        self.caches
            .get_mut(key)
            .is_some_and(|cache| cache.apply_update(message))
    }

    /// Apply a delete tombstone. Deletes are soft, so the entry keeps its slot.
    pub fn apply_delete(&mut self, key: &CacheKey, tombstone: ChatMessage) -> bool {
        self.apply_update(key, tombstone)
    }

    /// # Apply Event
    ///
    /// Route a message event into the cache bound to its channel. Events that
    /// carry no channel apply to every bound cache. Non-message events are
    /// ignored.
    ///
    /// # Returns
    /// Number of caches that changed.
    pub fn apply_event(&mut self, event: &InboundEvent) -> usize {
        if !event.kind().is_message_event() {
            return 0;
        }
        let keys: Vec<CacheKey> = match &event.channel {
            Some(channel) => self.routes.get(channel).cloned().into_iter().collect(),
            None => self.conversations.keys().cloned().collect(),
        };
        if keys.is_empty() {
            log::trace!("No cache bound for {:?}; '{}' not cached", event.channel, event.kind());
        }

        let mut changed = 0;
        for key in keys {
            let applied = match &event.event {
                ChatEvent::NewMessage(message) => self.apply_create(&key, message.clone()),
                ChatEvent::MessageUpdate(message) => self.apply_update(&key, message.clone()),
                ChatEvent::MessageDelete(message) => self.apply_delete(&key, message.clone()),
                _ => false,
            };
            if applied {
                changed += 1;
            }
        }
        changed
    }

    /// # Apply Page
    ///
    /// Fold a history fetch result into a key's cache. A `None` cursor means the
    /// newest page (initial load or poll); otherwise the page is appended as
    /// older history.
    ///
    /// # Returns
    /// The fetched page, or an empty page with no cursor when the fetch failed.
    /// The failure is kept for [`last_fetch_error`](Self::last_fetch_error).
    pub fn apply_page(&mut self, key: &CacheKey, cursor: Option<&str>, result: Result<Page, FetchError>) -> Page {
        let page = match result {
            Ok(page) => page,
            Err(e) => {
                log::warn!("History fetch for '{}' failed: {}", key, e);
                self.fetch_errors.insert(key.clone(), e);
                return Page::empty();
            }
        };
        self.fetch_errors.remove(key);

        let cache = self.caches.entry(key.clone()).or_default();
        match cursor {
            None => cache.merge_newest(page.clone()),
            Some(_) => cache.append_page(page.clone()),
        }
        page
    }

    /// The cache for a key.
    pub fn cache(&self, key: &CacheKey) -> Option<&MessageCache> {
        self.caches.get(key)
    }

    /// A copy of a key's pages, newest first.
    pub fn pages(&self, key: &CacheKey) -> Vec<Page> {
        self.caches
            .get(key)
            .map(|cache| cache.pages().to_vec())
            .unwrap_or_default()
    }

    /// The most recent fetch failure for a key, cleared by the next success.
    pub fn last_fetch_error(&self, key: &CacheKey) -> Option<&FetchError> {
        self.fetch_errors.get(key)
    }

    /// Drop every cache and binding (session teardown).
    pub fn clear(&mut self) {
        self.caches.clear();
        self.routes.clear();
        self.conversations.clear();
        self.fetch_errors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    /// `mN` is stamped N minutes after a fixed origin, so ids order by time.
    fn message(id: &str, content: &str) -> ChatMessage {
        let minutes: i64 = id.trim_start_matches('m').parse().unwrap_or(0);
        ChatMessage {
            id: id.to_string(),
            content: content.to_string(),
            file_url: None,
            file_type: None,
            file_name: None,
            member_id: None,
            user_id: "u1".to_string(),
            username: "ada".to_string(),
            user_image: None,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap() + Duration::minutes(minutes),
            deleted: false,
            edited: false,
            member: None,
        }
    }

    fn page(ids: &[&str], cursor: Option<&str>) -> Page {
        Page {
            items: ids.iter().map(|id| message(id, "body")).collect(),
            next_cursor: cursor.map(str::to_string),
        }
    }

    fn ids(cache: &MessageCache) -> Vec<String> {
        cache.messages().map(|m| m.id.clone()).collect()
    }

    #[test]
    fn live_create_is_prepended_to_the_newest_page() {
        let mut reconciler = MessageCacheReconciler::default();
        let key = CacheKey::from("channel:1");
        let newest: Vec<String> = (1..=10).rev().map(|n| format!("m{}", n)).collect();
        let newest: Vec<&str> = newest.iter().map(String::as_str).collect();
        reconciler.apply_page(&key, None, Ok(page(&newest, Some("c1"))));

        assert!(reconciler.apply_create(&key, message("m11", "hi")));

        let cache = reconciler.cache(&key).unwrap();
        assert_eq!(cache.pages().len(), 1);
        assert_eq!(cache.pages()[0].items.len(), 11);
        assert_eq!(cache.pages()[0].items[0].id, "m11");
        assert_eq!(cache.pages()[0].items[10].id, "m1");
        assert_eq!(cache.next_cursor(), Some("c1"));
    }

    #[test]
    fn create_is_idempotent_across_pages() {
        let mut cache = MessageCache::with_first_page(page(&["m3", "m2"], Some("c")));
        cache.append_page(page(&["m1"], None));
        assert!(!cache.apply_create(message("m1", "dup")));
        assert!(cache.apply_create(message("m4", "new")));
        assert!(!cache.apply_create(message("m4", "new")));
        assert_eq!(ids(&cache), vec!["m4", "m3", "m2", "m1"]);
    }

    #[test]
    fn update_replaces_in_place_and_ignores_unknown_ids() {
        let mut cache = MessageCache::with_first_page(page(&["m3", "m2"], Some("c")));
        cache.append_page(page(&["m1"], None));

        let mut edited = message("m1", "edited");
        edited.edited = true;
        assert!(cache.apply_update(edited.clone()));
        assert!(cache.apply_update(edited));
        assert_eq!(cache.pages()[1].items[0].content, "edited");
        assert_eq!(ids(&cache), vec!["m3", "m2", "m1"]);

        assert!(!cache.apply_update(message("m9", "ghost")));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn delete_tombstone_keeps_position() {
        let mut reconciler = MessageCacheReconciler::default();
        let key = CacheKey::from("conv:1");
        reconciler.apply_page(&key, None, Ok(page(&["m3", "m2", "m1"], None)));

        let mut tombstone = message("m2", "This message has been deleted.");
        tombstone.deleted = true;
        assert!(reconciler.apply_delete(&key, tombstone));

        let pages = reconciler.pages(&key);
        assert_eq!(pages[0].items[1].id, "m2");
        assert!(pages[0].items[1].deleted);
    }

    #[test]
    fn older_pages_skip_ids_shifted_by_live_creates() {
        let mut reconciler = MessageCacheReconciler::default();
        let key = CacheKey::from("channel:1");
        reconciler.apply_page(&key, None, Ok(page(&["m5", "m4", "m3"], Some("c1"))));
        reconciler.apply_create(&key, message("m6", "live"));

        let older = reconciler.apply_page(&key, Some("c1"), Ok(page(&["m3", "m2", "m1"], None)));
        assert_eq!(older.items.len(), 3);

        let cache = reconciler.cache(&key).unwrap();
        assert_eq!(cache.pages().len(), 2);
        assert_eq!(ids(cache), vec!["m6", "m5", "m4", "m3", "m2", "m1"]);
        assert_eq!(cache.next_cursor(), None);
    }

    #[test]
    fn polled_page_merges_without_reordering() {
        let mut cache = MessageCache::with_first_page(page(&["m3", "m2", "m1"], None));
        let mut polled = page(&["m5", "m4", "m3"], Some("c"));
        polled.items[2].content = "edited while offline".to_string();

        cache.merge_newest(polled.clone());
        cache.merge_newest(polled);

        assert_eq!(ids(&cache), vec!["m5", "m4", "m3", "m2", "m1"]);
        assert_eq!(cache.pages()[0].items[2].content, "edited while offline");
    }

    #[test]
    fn initial_page_landing_after_a_live_create_stays_behind_it() {
        let mut reconciler = MessageCacheReconciler::default();
        let key = CacheKey::from("channel:1");
        reconciler.apply_create(&key, message("m11", "live"));
        reconciler.apply_page(&key, None, Ok(page(&["m10", "m9", "m8"], Some("c1"))));

        let cache = reconciler.cache(&key).unwrap();
        assert_eq!(ids(cache), vec!["m11", "m10", "m9", "m8"]);
        assert_eq!(cache.pages().len(), 1);
    }

    #[test]
    fn failed_fetch_yields_empty_page_and_is_remembered() {
        let mut reconciler = MessageCacheReconciler::default();
        let key = CacheKey::from("channel:1");

        let page = reconciler.apply_page(&key, Some("c1"), Err(FetchError::Status(502)));
        assert!(page.is_empty());
        assert_eq!(page.next_cursor, None);
        assert_eq!(reconciler.last_fetch_error(&key), Some(&FetchError::Status(502)));

        reconciler.apply_page(&key, None, Ok(Page::empty()));
        assert_eq!(reconciler.last_fetch_error(&key), None);
    }

    #[test]
    fn events_follow_channel_bindings() {
        let mut reconciler = MessageCacheReconciler::default();
        let key_a = CacheKey::from("channel:a");
        let key_b = CacheKey::from("channel:b");
        reconciler.bind("chat:a", key_a.clone(), "a");
        reconciler.bind("chat:b", key_b.clone(), "b");

        let event = InboundEvent::on_channel("chat:a", ChatEvent::NewMessage(message("m1", "x")));
        assert_eq!(reconciler.apply_event(&event), 1);
        assert_eq!(reconciler.apply_event(&event), 0);
        assert!(reconciler.cache(&key_a).unwrap().contains("m1"));
        assert!(reconciler.cache(&key_b).is_none());

        let unrouted = InboundEvent::on_channel("chat:z", ChatEvent::NewMessage(message("m2", "x")));
        assert_eq!(reconciler.apply_event(&unrouted), 0);

        let broadcast = InboundEvent {
            channel: None,
            event: ChatEvent::NewMessage(message("m3", "x")),
        };
        assert_eq!(reconciler.apply_event(&broadcast), 2);
    }

    #[test]
    fn mode_follows_transport_and_gates_polling() {
        let mut reconciler = MessageCacheReconciler::new(25);
        assert_eq!(reconciler.mode(), DeliveryMode::FailoverPolling);
        assert!(!reconciler.should_poll());

        reconciler.bind("chat:a", CacheKey::from("channel:a"), "a");
        assert!(reconciler.should_poll());
        let requests = reconciler.polling_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1, PageRequest { conversation_id: "a".into(), cursor: None, limit: 25 });

        assert_eq!(
            reconciler.set_transport_open(true),
            Some((DeliveryMode::FailoverPolling, DeliveryMode::Streaming))
        );
        assert_eq!(reconciler.set_transport_open(true), None);
        assert!(!reconciler.should_poll());

        reconciler.set_transport_open(false);
        reconciler.unbind(&CacheKey::from("channel:a"));
        assert!(!reconciler.should_poll());
        assert!(reconciler.channels_for(&CacheKey::from("channel:a")).is_empty());
    }

    #[test]
    fn dropping_a_channel_stops_polling_its_key() {
        let mut reconciler = MessageCacheReconciler::new(25);
        let key = CacheKey::from("channel:a");
        reconciler.bind("chat:a", key.clone(), "a");
        reconciler.bind("chat:a-mirror", key.clone(), "a");
        reconciler.bind("chat:b", CacheKey::from("channel:b"), "b");

        assert_eq!(reconciler.unbind_channel("chat:a"), Some(key.clone()));
        assert_eq!(reconciler.polling_requests().len(), 2);

        assert_eq!(reconciler.unbind_channel("chat:a-mirror"), Some(key.clone()));
        let requests = reconciler.polling_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, CacheKey::from("channel:b"));
        assert!(reconciler.channels_for(&key).is_empty());

        assert_eq!(reconciler.unbind_channel("chat:b"), Some(CacheKey::from("channel:b")));
        assert!(!reconciler.should_poll());
        assert_eq!(reconciler.unbind_channel("chat:unknown"), None);
    }

    #[test]
    fn unbound_keys_use_the_key_as_conversation_id() {
        let reconciler = MessageCacheReconciler::default();
        let request = reconciler.request_for(&CacheKey::from("42"), Some("c9".into()));
        assert_eq!(request.conversation_id, "42");
        assert_eq!(request.cursor.as_deref(), Some("c9"));
        assert_eq!(request.limit, MESSAGES_BATCH);
    }
}
