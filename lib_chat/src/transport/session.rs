//! # Chat Session
//!
//! [`ChatSession`] is the handle consumers hold. Every call turns into a
//! command sent to the session task, which is the only place the core state
//! machines are mutated. The task multiplexes, in one `select!` loop:
//!
//! - commands from the handle;
//! - results of spawned work (connection attempts, history fetches);
//! - inbound WebSocket frames, in receipt order;
//! - the reconnect timer scheduled by the connection manager;
//! - the polling ticker, armed only while the transport is down.
//!
//! Dropping the handle (or calling [`ChatSession::shutdown`]) cancels the task:
//! the reconnect timer is cleared, the socket is closed with code 1000, and
//! subscriptions, handlers, typing state and caches are released.

use std::collections::HashSet;
use std::future::pending;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use super::socket::{attempt_connection, WsStream};
use crate::configs::LinkConfig;
use crate::core::{
    AttemptFailure, ConnectionManager, ConnectionStatus, EventDispatcher, EventHandler, FetchError, HandlerId,
    MessageCacheReconciler, NextStep, PageFetcher, Presence, Subscription, SubscriptionRegistry, TokenProvider,
    TypingAggregator,
};
use crate::errors::{ChatLinkError, Result};
use crate::models::{channel_name, CacheKey, ClientFrame, EventKind, InboundEvent, Page, PageRequest, TypingUser};

const ABNORMAL_CLOSURE: u16 = 1006;
const CLOSE_GRACE: Duration = Duration::from_secs(1);

type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

enum Command {
    Subscribe(Subscription),
    Unsubscribe(String),
    Watch {
        channel_name: String,
        key: CacheKey,
        conversation_id: String,
        presence: Option<Presence>,
    },
    Unwatch(CacheKey),
    AddHandler {
        kind: EventKind,
        id: HandlerId,
        handler: EventHandler,
    },
    RemoveHandler {
        kind: EventKind,
        id: HandlerId,
    },
    LoadPage {
        key: CacheKey,
        cursor: Option<String>,
        reply: oneshot::Sender<Page>,
    },
    Pages {
        key: CacheKey,
        reply: oneshot::Sender<Vec<Page>>,
    },
    TypingUsers {
        channel_name: String,
        reply: oneshot::Sender<Vec<TypingUser>>,
    },
    LastFetchError {
        key: CacheKey,
        reply: oneshot::Sender<Option<FetchError>>,
    },
    Subscriptions {
        reply: oneshot::Sender<Vec<String>>,
    },
}

enum Internal {
    Attempt(std::result::Result<Box<WsStream>, AttemptFailure>),
    PageLoaded {
        key: CacheKey,
        cursor: Option<String>,
        result: std::result::Result<Page, FetchError>,
        reply: Option<oneshot::Sender<Page>>,
    },
}

/// # Chat Session
///
/// Handle to a running session. Commands are fire-and-forget unless they
/// return data; all of them fail with [`ChatLinkError::SessionClosed`] once the
/// session task has stopped.
#[derive(Debug)]
pub struct ChatSession {
    cmd_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<ConnectionStatus>,
    next_handler_id: AtomicU64,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ChatSession {
    /// # Start
    ///
    /// Validate the configuration and spawn the session task, which begins
    /// connecting immediately. Must be called inside a tokio runtime.
    pub fn start<T, P>(config: LinkConfig, tokens: T, pages: P) -> Result<Self>
    where
        T: TokenProvider,
        P: PageFetcher,
    {
        config.validate()?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let manager = ConnectionManager::new(config.backoff).with_auth_close_codes(config.auth_close_codes.clone());
        let reconciler = MessageCacheReconciler::new(config.page_size);
        let (status_tx, status_rx) = watch::channel(manager.status(reconciler.mode()));

        let mut poll_ticker = tokio::time::interval(config.poll_interval);
        poll_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!("Starting chat session against {}", config.realtime_url);
        let actor = SessionActor {
            config,
            tokens: Arc::new(tokens),
            pages: Arc::new(pages),
            manager,
            registry: SubscriptionRegistry::new(),
            dispatcher: EventDispatcher::new(),
            reconciler,
            typing: TypingAggregator::new(),
            status_tx,
            internal_tx,
            shutdown: shutdown.clone(),
            writer: None,
            reader: None,
            retry_at: None,
            poll_ticker,
            polls_in_flight: HashSet::new(),
        };
        let task = tokio::spawn(actor.run(cmd_rx, internal_rx));

        Ok(Self {
            cmd_tx,
            status_rx,
            next_handler_id: AtomicU64::new(1),
            shutdown,
            task: Some(task),
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.cmd_tx.send(command).map_err(|_| ChatLinkError::SessionClosed)
    }

    async fn ask<R>(&self, command: Command, reply: oneshot::Receiver<R>) -> Result<R> {
        self.send(command)?;
        reply.await.map_err(|_| ChatLinkError::SessionClosed)
    }

    /// Add a channel to the desired set. Sent now if connected, and on every
    /// reconnect.
    pub fn subscribe(&self, channel_name: impl Into<String>, presence: Option<Presence>) -> Result<()> {
        let subscription = Subscription {
            channel_name: channel_name.into(),
            presence,
        };
        self.send(Command::Subscribe(subscription))
    }

    /// Remove a channel from the desired set. A watched channel also stops
    /// feeding its cache key, and the key is no longer polled once nothing
    /// else routes into it.
    pub fn unsubscribe(&self, channel_name: impl Into<String>) -> Result<()> {
        self.send(Command::Unsubscribe(channel_name.into()))
    }

    /// # Watch Conversation
    ///
    /// Subscribe to `chat:<conversation_id>`, route its message events into
    /// `key`, poll `key` while disconnected, and load the newest page if the
    /// cache is empty.
    ///
    /// # Returns
    /// The channel name.
    pub fn watch_conversation(
        &self,
        conversation_id: &str,
        key: impl Into<CacheKey>,
        presence: Option<Presence>,
    ) -> Result<String> {
        let channel = channel_name(conversation_id);
        self.send(Command::Watch {
            channel_name: channel.clone(),
            key: key.into(),
            conversation_id: conversation_id.to_string(),
            presence,
        })?;
        Ok(channel)
    }

    /// Reverse [`watch_conversation`](Self::watch_conversation). Cached pages stay.
    pub fn unwatch_conversation(&self, key: impl Into<CacheKey>) -> Result<()> {
        self.send(Command::Unwatch(key.into()))
    }

    /// Register a handler for one event kind.
    pub fn add_handler<F>(&self, kind: EventKind, handler: F) -> Result<HandlerId>
    where
        F: FnMut(&InboundEvent) + Send + 'static,
    {
        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed));
        self.send(Command::AddHandler {
            kind,
            id,
            handler: Box::new(handler),
        })?;
        Ok(id)
    }

    /// Unregister a handler. Unknown ids are ignored.
    pub fn remove_handler(&self, kind: EventKind, id: HandlerId) -> Result<()> {
        self.send(Command::RemoveHandler { kind, id })
    }

    /// # Load Next Page
    ///
    /// Fetch a page of history into the cache. `None` loads the newest page;
    /// a cursor loads the page after it.
    ///
    /// # Returns
    /// The fetched page, or an empty page with no cursor if the fetch failed.
    pub async fn load_next_page(&self, key: impl Into<CacheKey>, cursor: Option<String>) -> Result<Page> {
        let (reply, rx) = oneshot::channel();
        self.ask(
            Command::LoadPage {
                key: key.into(),
                cursor,
                reply,
            },
            rx,
        )
        .await
    }

    /// A snapshot of a key's cached pages, newest first.
    pub async fn pages(&self, key: impl Into<CacheKey>) -> Result<Vec<Page>> {
        let (reply, rx) = oneshot::channel();
        self.ask(Command::Pages { key: key.into(), reply }, rx).await
    }

    /// Users currently typing on a channel.
    pub async fn typing_users(&self, channel_name: impl Into<String>) -> Result<Vec<TypingUser>> {
        let (reply, rx) = oneshot::channel();
        self.ask(
            Command::TypingUsers {
                channel_name: channel_name.into(),
                reply,
            },
            rx,
        )
        .await
    }

    /// The last history failure for a key, if the most recent fetch failed.
    pub async fn last_fetch_error(&self, key: impl Into<CacheKey>) -> Result<Option<FetchError>> {
        let (reply, rx) = oneshot::channel();
        self.ask(Command::LastFetchError { key: key.into(), reply }, rx).await
    }

    /// The desired channel set, sorted.
    pub async fn subscriptions(&self) -> Result<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.ask(Command::Subscriptions { reply }, rx).await
    }

    /// The latest status.
    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    /// Whether the transport is open.
    pub fn is_connected(&self) -> bool {
        self.status_rx.borrow().is_connected
    }

    /// A receiver that is notified on every status change.
    pub fn status_updates(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Wait until the status satisfies `predicate`.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<ConnectionStatus>
    where
        F: FnMut(&ConnectionStatus) -> bool,
    {
        let mut rx = self.status_rx.clone();
        let status = rx
            .wait_for(|status| predicate(status))
            .await
            .map_err(|_| ChatLinkError::SessionClosed)?;
        Ok((*status).clone())
    }

    /// Stop the session and wait for its task to finish tearing down.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("Chat session task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct SessionActor<T, P> {
    config: LinkConfig,
    tokens: Arc<T>,
    pages: Arc<P>,
    manager: ConnectionManager,
    registry: SubscriptionRegistry,
    dispatcher: EventDispatcher,
    reconciler: MessageCacheReconciler,
    typing: TypingAggregator,
    status_tx: watch::Sender<ConnectionStatus>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    shutdown: CancellationToken,
    writer: Option<WsWriter>,
    reader: Option<WsReader>,
    retry_at: Option<Instant>,
    poll_ticker: Interval,
    polls_in_flight: HashSet<CacheKey>,
}

impl<T: TokenProvider, P: PageFetcher> SessionActor<T, P> {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>, mut internal_rx: mpsc::UnboundedReceiver<Internal>) {
        self.start_attempt();
        self.publish_status();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                command = cmd_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(internal) = internal_rx.recv() => self.handle_internal(internal).await,
                frame = next_frame(&mut self.reader) => self.handle_frame(frame).await,
                _ = sleep_until_opt(self.retry_at) => {
                    self.retry_at = None;
                    self.start_attempt();
                }
                _ = self.poll_ticker.tick(), if self.reconciler.should_poll() => self.poll_newest(),
            }
            self.publish_status();
        }

        self.teardown().await;
    }

    fn publish_status(&self) {
        let next = self.manager.status(self.reconciler.mode());
        self.status_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    // --- Connection lifecycle ---

    fn start_attempt(&mut self) {
        if !self.manager.begin_attempt() {
            return;
        }
        let config = self.config.clone();
        let tokens = Arc::clone(&self.tokens);
        let tx = self.internal_tx.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                outcome = attempt_connection(&config, tokens.as_ref()) => {
                    let _ = tx.send(Internal::Attempt(outcome.map(Box::new)));
                }
            }
        });
    }

    fn schedule(&mut self, step: NextStep) {
        self.retry_at = match step {
            NextStep::Reconnect(delay) => Some(Instant::now() + delay),
            NextStep::Halt => None,
        };
    }

    async fn on_open(&mut self, stream: WsStream) {
        if !self.manager.on_open() {
            log::debug!("Discarding connection that opened during teardown");
            return;
        }
        let (writer, reader) = stream.split();
        self.writer = Some(writer);
        self.reader = Some(reader);
        self.retry_at = None;

        let frames = self.registry.replay();
        log::info!("Replaying {} subscription(s)", frames.len());
        for frame in frames {
            self.send_frame(&frame).await;
        }
        self.reconciler.set_transport_open(true);
    }

    async fn on_transport_closed(&mut self, code: Option<u16>, reason: &str) {
        self.reader = None;
        self.writer = None;

        let step = self.manager.on_closed(Some(code.unwrap_or(ABNORMAL_CLOSURE)), reason);
        if self.reconciler.set_transport_open(false).is_some() {
            self.poll_newest();
            self.poll_ticker.reset();
        }
        self.schedule(step);
    }

    async fn send_frame(&mut self, frame: &ClientFrame) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to encode {:?}: {}", frame, e);
                return;
            }
        };
        log::debug!("-> {}", text);
        if let Err(e) = writer.send(Message::text(text)).await {
            log::warn!("Failed to send frame for {}: {}", frame.channel_name(), e);
        }
    }

    // --- Inbound frames ---

    async fn handle_frame(&mut self, frame: Option<std::result::Result<Message, WsError>>) {
        match frame {
            Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()),
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => self.handle_text(text),
                Err(_) => log::debug!("Ignoring non-UTF-8 binary frame ({} bytes)", bytes.len()),
            },
            Some(Ok(Message::Close(close))) => {
                let (code, reason) = match close {
                    Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                    None => (None, "closed without a close frame".to_string()),
                };
                self.on_transport_closed(code, &reason).await;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                log::warn!("WebSocket read error: {}", e);
                self.on_transport_closed(None, &e.to_string()).await;
            }
            None => self.on_transport_closed(None, "stream ended").await,
        }
    }

    fn handle_text(&mut self, text: &str) {
        let Some(event) = self.dispatcher.decode(text) else {
            return;
        };
        let kind = event.kind();
        log::trace!("<- {} on {:?}", kind, event.channel);

        if kind.is_message_event() {
            self.reconciler.apply_event(&event);
        } else if kind.is_typing_event() {
            let channels = self.registry.channels();
            self.typing.apply_event(&event, &channels);
        }

        let report = self.dispatcher.dispatch(&event);
        if report.failed > 0 {
            log::warn!("{} of {} '{}' handler(s) failed", report.failed, report.total(), kind);
        }
    }

    // --- Commands ---

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Subscribe(subscription) => self.subscribe(subscription).await,
            Command::Unsubscribe(channel_name) => self.unsubscribe(&channel_name).await,
            Command::Watch {
                channel_name,
                key,
                conversation_id,
                presence,
            } => {
                self.reconciler.bind(channel_name.clone(), key.clone(), conversation_id);
                self.subscribe(Subscription { channel_name, presence }).await;
                if self.reconciler.cache(&key).is_none() && self.polls_in_flight.insert(key.clone()) {
                    let request = self.reconciler.request_for(&key, None);
                    self.spawn_fetch(key, request, None);
                }
            }
            Command::Unwatch(key) => {
                for channel_name in self.reconciler.channels_for(&key) {
                    self.unsubscribe(&channel_name).await;
                }
                self.reconciler.unbind(&key);
            }
            Command::AddHandler { kind, id, handler } => self.dispatcher.insert_handler(kind, id, handler),
            Command::RemoveHandler { kind, id } => {
                self.dispatcher.remove_handler(kind, id);
            }
            Command::LoadPage { key, cursor, reply } => {
                let request = self.reconciler.request_for(&key, cursor);
                self.spawn_fetch(key, request, Some(reply));
            }
            Command::Pages { key, reply } => {
                let _ = reply.send(self.reconciler.pages(&key));
            }
            Command::TypingUsers { channel_name, reply } => {
                let _ = reply.send(self.typing.typing_users(&channel_name));
            }
            Command::LastFetchError { key, reply } => {
                let _ = reply.send(self.reconciler.last_fetch_error(&key).cloned());
            }
            Command::Subscriptions { reply } => {
                let _ = reply.send(self.registry.channels());
            }
        }
    }

    async fn subscribe(&mut self, subscription: Subscription) {
        let open = self.manager.is_connected();
        if let Some(frame) = self.registry.subscribe(subscription, open) {
            self.send_frame(&frame).await;
        }
    }

    async fn unsubscribe(&mut self, channel_name: &str) {
        let open = self.manager.is_connected();
        if let Some(frame) = self.registry.unsubscribe(channel_name, open) {
            self.send_frame(&frame).await;
        }
        self.typing.clear_channel(channel_name);
        self.reconciler.unbind_channel(channel_name);
    }

    // --- History ---

    async fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Attempt(Ok(stream)) => self.on_open(*stream).await,
            Internal::Attempt(Err(failure)) => {
                let step = self.manager.on_attempt_failed(failure);
                self.schedule(step);
            }
            Internal::PageLoaded {
                key,
                cursor,
                result,
                reply,
            } => {
                let page = self.reconciler.apply_page(&key, cursor.as_deref(), result);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(page);
                    }
                    None => {
                        self.polls_in_flight.remove(&key);
                    }
                }
            }
        }
    }

    fn poll_newest(&mut self) {
        for (key, request) in self.reconciler.polling_requests() {
            if self.polls_in_flight.insert(key.clone()) {
                self.spawn_fetch(key, request, None);
            }
        }
    }

    fn spawn_fetch(&self, key: CacheKey, request: PageRequest, reply: Option<oneshot::Sender<Page>>) {
        let pages = Arc::clone(&self.pages);
        let tx = self.internal_tx.clone();
        let shutdown = self.shutdown.clone();
        let cursor = request.cursor.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                result = pages.fetch_page(request) => {
                    let _ = tx.send(Internal::PageLoaded { key, cursor, result, reply });
                }
            }
        });
    }

    // --- Teardown ---

    async fn teardown(mut self) {
        self.retry_at = None;
        self.manager.begin_close();
        self.reader = None;

        if let Some(mut writer) = self.writer.take() {
            let close = Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "session closed".into(),
            }));
            let closed = tokio::time::timeout(CLOSE_GRACE, async {
                writer.send(close).await?;
                writer.close().await
            })
            .await;
            if !matches!(closed, Ok(Ok(()))) {
                log::debug!("Socket did not close cleanly within {:?}", CLOSE_GRACE);
            }
        }

        self.manager.finish_close();
        self.registry.clear();
        self.dispatcher.clear();
        self.typing.clear();
        self.reconciler.clear();
        self.polls_in_flight.clear();
        self.publish_status();
        log::info!("Chat session closed");
    }
}

async fn next_frame(reader: &mut Option<WsReader>) -> Option<std::result::Result<Message, WsError>> {
    match reader {
        Some(reader) => reader.next().await,
        None => pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}
