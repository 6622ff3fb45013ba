//! # Connection Manager
//!
//! The lifecycle of the single transport session:
//!
//! ```text
//! disconnected --begin_attempt--> connecting --on_open--> open
//!      ^                              |                     |
//!      +------ on_attempt_failed -----+                     |
//!      +-------------------- on_closed ---------------------+
//! ```
//!
//! Every failure is classified. Transient ones (probe failure, unreachable or
//! 5xx token issuer, refused handshake, abnormal or normal closure) schedule a
//! reconnect at the current backoff delay. Authentication refusals (token
//! rejected, handshake 401/403, an auth close code) expire the session: no more
//! attempts are made until a new session is created.
//!
//! The manager does no I/O. The caller performs the probe, the token fetch and
//! the handshake, then reports the outcome here and acts on the returned
//! [`NextStep`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::auth::TokenError;
use super::backoff::{Backoff, BackoffPolicy};
use super::reconciler::DeliveryMode;

/// Close codes the delivery endpoint uses to refuse a session's credentials.
pub const DEFAULT_AUTH_CLOSE_CODES: [u16; 2] = [4001, 4003];

const NORMAL_CLOSURE: u16 = 1000;

/// Transport session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No transport exists.
    Disconnected,
    /// Probe, token fetch or handshake in flight.
    Connecting,
    /// Handshake complete; frames flow.
    Open,
    /// Local teardown in progress.
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// How a transport closure is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Close code 1000.
    Normal,
    /// Anything else that is not an auth refusal, including a missing code.
    Abnormal,
    /// The endpoint refused the session's credentials.
    AuthRejected,
}

impl CloseKind {
    /// Classify a close code against the configured auth-refusal codes.
    pub fn classify(code: Option<u16>, auth_close_codes: &[u16]) -> Self {
        match code {
            Some(code) if auth_close_codes.contains(&code) => CloseKind::AuthRejected,
            Some(NORMAL_CLOSURE) => CloseKind::Normal,
            _ => CloseKind::Abnormal,
        }
    }
}

/// Why a connection attempt did not reach `open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// The liveness probe did not answer in time; no handshake was tried.
    ProbeFailed,
    /// The token issuer was unreachable or failed server-side.
    TokenUnavailable(String),
    /// The token issuer refused this session.
    TokenRejected(String),
    /// The handshake failed for a non-auth reason.
    HandshakeFailed(String),
    /// The endpoint refused the token during the handshake.
    HandshakeRejected(String),
}

impl AttemptFailure {
    /// Whether this failure ends the session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptFailure::TokenRejected(_) | AttemptFailure::HandshakeRejected(_)
        )
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::ProbeFailed => write!(f, "Delivery endpoint did not answer the liveness probe"),
            AttemptFailure::TokenUnavailable(msg) => write!(f, "Token unavailable: {}", msg),
            AttemptFailure::TokenRejected(msg) => write!(f, "Token rejected: {}", msg),
            AttemptFailure::HandshakeFailed(msg) => write!(f, "Handshake failed: {}", msg),
            AttemptFailure::HandshakeRejected(msg) => write!(f, "Handshake rejected: {}", msg),
        }
    }
}

impl From<TokenError> for AttemptFailure {
    fn from(err: TokenError) -> Self {
        if err.is_retryable() {
            AttemptFailure::TokenUnavailable(err.to_string())
        } else {
            AttemptFailure::TokenRejected(err.to_string())
        }
    }
}

/// What the caller must do after a failure or closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Start a new attempt after this delay.
    Reconnect(Duration),
    /// Stop; the session is expired or being torn down.
    Halt,
}

/// # Connection Status
///
/// Snapshot of everything a UI needs to render connection state: whether frames
/// are flowing, whether a reconnect is pending, and whether the session needs
/// outside intervention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    /// Transport state.
    pub state: ConnectionState,
    /// `state == Open`.
    pub is_connected: bool,
    /// Successful opens so far (diagnostic, never decreases).
    pub connection_count: u64,
    /// Failed attempts since the last successful open.
    pub reconnect_attempts: u32,
    /// Delay the next failure will be retried after, in milliseconds.
    pub backoff_delay_ms: u64,
    /// Most recent failure description; cleared on open.
    pub last_error: Option<String>,
    /// Set once credentials were refused. Terminal.
    pub session_expired: bool,
    /// Whether the cache is fed by push events or by polling.
    pub delivery_mode: DeliveryMode,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        ConnectionManager::new(BackoffPolicy::default()).status(DeliveryMode::FailoverPolling)
    }
}

/// # Connection Manager
///
/// Owns the connection state, the backoff curve and the diagnostic counters.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    state: ConnectionState,
    backoff: Backoff,
    connection_count: u64,
    last_error: Option<String>,
    session_expired: bool,
    auth_close_codes: Vec<u16>,
}

impl ConnectionManager {
    /// A disconnected manager using the default auth close codes.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            backoff: Backoff::new(policy),
            connection_count: 0,
            last_error: None,
            session_expired: false,
            auth_close_codes: DEFAULT_AUTH_CLOSE_CODES.to_vec(),
        }
    }

    /// Replace the close codes treated as auth refusals.
    pub fn with_auth_close_codes(mut self, codes: impl Into<Vec<u16>>) -> Self {
        self.auth_close_codes = codes.into();
        self
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the transport is open.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Successful opens so far.
    pub fn connection_count(&self) -> u64 {
        self.connection_count
    }

    /// Failed attempts since the last open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.backoff.attempts()
    }

    /// Delay the next failure will be scheduled with.
    pub fn backoff_delay(&self) -> Duration {
        self.backoff.current()
    }

    /// Most recent failure, if any since the last open.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Whether credentials were refused.
    pub fn session_expired(&self) -> bool {
        self.session_expired
    }

    /// Whether a new attempt may start now.
    pub fn can_attempt(&self) -> bool {
        !self.session_expired && self.state == ConnectionState::Disconnected
    }

    /// Enter `connecting`. Returns `false` (and changes nothing) when a transport
    /// is already open or opening, or the session has expired.
    pub fn begin_attempt(&mut self) -> bool {
        if !self.can_attempt() {
            return false;
        }
        self.transition(ConnectionState::Connecting);
        true
    }

    /// The handshake completed. Returns `false` if no attempt was in flight
    /// (e.g. the session started closing meanwhile), in which case the caller
    /// should drop the new transport.
    pub fn on_open(&mut self) -> bool {
        if self.state != ConnectionState::Connecting {
            return false;
        }
        self.transition(ConnectionState::Open);
        self.backoff.reset();
        self.connection_count += 1;
        self.last_error = None;
        log::info!("Connection open (successful connections: {})", self.connection_count);
        true
    }

    /// The attempt failed before reaching `open`.
    pub fn on_attempt_failed(&mut self, failure: AttemptFailure) -> NextStep {
        if self.state == ConnectionState::Closing {
            return NextStep::Halt;
        }
        self.transition(ConnectionState::Disconnected);
        if failure.is_terminal() {
            self.expire(failure.to_string())
        } else {
            self.schedule_retry(failure.to_string())
        }
    }

    /// The transport closed (remote close frame, error, or end of stream).
    pub fn on_closed(&mut self, code: Option<u16>, reason: &str) -> NextStep {
        if self.state == ConnectionState::Closing {
            self.transition(ConnectionState::Disconnected);
            return NextStep::Halt;
        }
        self.transition(ConnectionState::Disconnected);

        let code_text = code.map_or_else(|| "none".to_string(), |c| c.to_string());
        match CloseKind::classify(code, &self.auth_close_codes) {
            CloseKind::AuthRejected => {
                self.expire(format!("Authentication failed (close code {}): {}", code_text, reason))
            }
            CloseKind::Normal | CloseKind::Abnormal => {
                self.schedule_retry(format!("Connection closed (code {}): {}", code_text, reason))
            }
        }
    }

    /// Local teardown started.
    pub fn begin_close(&mut self) {
        if self.state != ConnectionState::Disconnected {
            self.transition(ConnectionState::Closing);
        }
    }

    /// Local teardown finished.
    pub fn finish_close(&mut self) {
        self.transition(ConnectionState::Disconnected);
    }

    /// Snapshot for observers.
    pub fn status(&self, delivery_mode: DeliveryMode) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            is_connected: self.is_connected(),
            connection_count: self.connection_count,
            reconnect_attempts: self.reconnect_attempts(),
            backoff_delay_ms: self.backoff.current().as_millis() as u64,
            last_error: self.last_error.clone(),
            session_expired: self.session_expired,
            delivery_mode,
        }
    }

    fn schedule_retry(&mut self, error: String) -> NextStep {
        let delay = self.backoff.next_delay();
        log::warn!(
            "{}. Reconnecting in {} ms (attempt {}).",
            error,
            delay.as_millis(),
            self.backoff.attempts()
        );
        self.last_error = Some(error);
        NextStep::Reconnect(delay)
    }

    fn expire(&mut self, error: String) -> NextStep {
        log::error!("Session expired: {}. Automatic reconnection stopped.", error);
        self.session_expired = true;
        self.last_error = Some(format!("Session expired: {}", error));
        NextStep::Halt
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            log::debug!("Transitioning connection: {} -> {}", self.state, next);
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConnectionManager {
        ConnectionManager::new(BackoffPolicy::from_millis(100, 800, 2.0))
    }

    fn fail(manager: &mut ConnectionManager, failure: AttemptFailure) -> NextStep {
        assert!(manager.begin_attempt());
        manager.on_attempt_failed(failure)
    }

    #[test]
    fn only_one_attempt_at_a_time() {
        let mut manager = manager();
        assert!(manager.begin_attempt());
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(!manager.begin_attempt());
        assert!(manager.on_open());
        assert!(!manager.begin_attempt());
    }

    #[test]
    fn consecutive_failures_grow_to_the_cap_then_reset_after_open() {
        let mut manager = manager();
        let mut delays = Vec::new();
        for _ in 0..6 {
            match fail(&mut manager, AttemptFailure::ProbeFailed) {
                NextStep::Reconnect(delay) => delays.push(delay.as_millis() as u64),
                NextStep::Halt => panic!("probe failure must not halt"),
            }
        }
        assert_eq!(delays, vec![100, 200, 400, 800, 800, 800]);
        assert_eq!(manager.reconnect_attempts(), 6);

        assert!(manager.begin_attempt());
        assert!(manager.on_open());
        assert_eq!(manager.reconnect_attempts(), 0);
        assert_eq!(manager.last_error(), None);

        let step = manager.on_closed(Some(1006), "abnormal closure");
        assert_eq!(step, NextStep::Reconnect(Duration::from_millis(100)));
    }

    #[test]
    fn abnormal_and_normal_closures_reconnect() {
        let mut manager = manager();
        manager.begin_attempt();
        manager.on_open();
        assert!(matches!(manager.on_closed(Some(1006), "gone"), NextStep::Reconnect(_)));
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.begin_attempt();
        manager.on_open();
        assert!(matches!(manager.on_closed(Some(1000), "bye"), NextStep::Reconnect(_)));
        assert!(matches!(manager.on_closed(None, "eof"), NextStep::Reconnect(_)));
        assert!(!manager.session_expired());
        assert_eq!(manager.connection_count(), 2);
    }

    #[test]
    fn auth_close_code_is_terminal() {
        let mut manager = manager();
        manager.begin_attempt();
        manager.on_open();
        assert_eq!(manager.on_closed(Some(4001), "token expired"), NextStep::Halt);
        assert!(manager.session_expired());
        assert!(manager.last_error().unwrap().starts_with("Session expired"));
        assert!(!manager.begin_attempt());
    }

    #[test]
    fn custom_auth_close_codes() {
        let mut manager = manager().with_auth_close_codes(vec![1008]);
        manager.begin_attempt();
        manager.on_open();
        assert_eq!(manager.on_closed(Some(1008), "policy"), NextStep::Halt);
    }

    #[test]
    fn token_server_error_retries_but_refusal_expires() {
        let mut manager = manager();
        let step = fail(&mut manager, TokenError::Unavailable(500).into());
        assert!(matches!(step, NextStep::Reconnect(_)));
        assert!(!manager.session_expired());

        let step = fail(&mut manager, TokenError::Network("connection reset".into()).into());
        assert!(matches!(step, NextStep::Reconnect(_)));

        let step = fail(&mut manager, TokenError::Rejected("HTTP 401".into()).into());
        assert_eq!(step, NextStep::Halt);
        assert!(manager.session_expired());
    }

    #[test]
    fn handshake_rejection_is_terminal() {
        let mut manager = manager();
        let step = fail(&mut manager, AttemptFailure::HandshakeRejected("HTTP 403".into()));
        assert_eq!(step, NextStep::Halt);
        assert!(manager.session_expired());
    }

    #[test]
    fn teardown_halts_instead_of_reconnecting() {
        let mut manager = manager();
        manager.begin_attempt();
        manager.on_open();
        manager.begin_close();
        assert_eq!(manager.state(), ConnectionState::Closing);
        assert_eq!(manager.on_closed(Some(1000), "local"), NextStep::Halt);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn open_after_teardown_started_is_refused() {
        let mut manager = manager();
        manager.begin_attempt();
        manager.begin_close();
        assert!(!manager.on_open());
        assert_eq!(manager.on_attempt_failed(AttemptFailure::ProbeFailed), NextStep::Halt);
    }

    #[test]
    fn status_snapshot_reflects_state() {
        let mut manager = manager();
        fail(&mut manager, AttemptFailure::HandshakeFailed("refused".into()));
        let status = manager.status(DeliveryMode::FailoverPolling);
        assert!(!status.is_connected);
        assert_eq!(status.reconnect_attempts, 1);
        assert_eq!(status.backoff_delay_ms, 200);
        assert!(status.last_error.is_some());
        assert_eq!(status.delivery_mode, DeliveryMode::FailoverPolling);
    }
}
