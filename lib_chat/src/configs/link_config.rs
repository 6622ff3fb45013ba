//! # Link Configuration
//!
//! Everything a [`ChatSession`](crate::transport::ChatSession) needs to know
//! about its endpoints and timings. Values are resolved in three layers:
//! built-in defaults, then environment variables (a `.env` file in the working
//! directory is loaded first via `dotenvy`), then whatever the caller sets
//! explicitly. Bad values fail fast with a [`ConfigError`].
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `CHAT_REALTIME_URL` | delivery endpoint (`ws`, `wss`, `http` or `https`) | `ws://localhost:3001` |
//! | `CHAT_TOKEN_URL` | token issuer | none |
//! | `CHAT_HISTORY_URL` | paginated history API | none |
//! | `CHAT_RECONNECT_BASE_DELAY_MS` | first reconnect delay | `1000` |
//! | `CHAT_RECONNECT_MAX_DELAY_MS` | reconnect delay ceiling | `60000` |
//! | `CHAT_RECONNECT_FACTOR` | backoff multiplier | `2.0` |
//! | `CHAT_POLL_INTERVAL_MS` | polling interval while disconnected | `1000` |
//! | `CHAT_PROBE_TIMEOUT_MS` | liveness probe timeout | `2000` |
//! | `CHAT_HANDSHAKE_TIMEOUT_MS` | WebSocket handshake timeout | `10000` |
//! | `CHAT_PAGE_SIZE` | history page size | `10` |
//! | `CHAT_AUTH_CLOSE_CODES` | comma-separated close codes meaning "credentials refused" | `4001,4003` |

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::core::{BackoffPolicy, DEFAULT_AUTH_CLOSE_CODES};
use crate::models::MESSAGES_BATCH;

const DEFAULT_REALTIME_URL: &str = "ws://localhost:3001";

/// Errors raised while building a [`LinkConfig`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A URL did not parse or uses an unsupported scheme.
    #[error("Invalid URL in {var} ('{value}'): {reason}")]
    InvalidUrl {
        /// Setting name.
        var: String,
        /// Offending value.
        value: String,
        /// Parser or scheme complaint.
        reason: String,
    },

    /// A numeric setting did not parse.
    #[error("Invalid number in {var}: '{value}'")]
    InvalidNumber {
        /// Setting name.
        var: String,
        /// Offending value.
        value: String,
    },

    /// The settings parse but do not make sense together.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// # Link Configuration
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    /// Delivery endpoint, always `ws` or `wss`.
    pub realtime_url: Url,
    /// Token issuer endpoint.
    pub token_url: Option<Url>,
    /// History API endpoint.
    pub history_url: Option<Url>,
    /// Reconnect backoff curve.
    pub backoff: BackoffPolicy,
    /// Bound on the TCP liveness probe.
    pub probe_timeout: Duration,
    /// Bound on the WebSocket handshake.
    pub handshake_timeout: Duration,
    /// Interval between newest-page polls while disconnected.
    pub poll_interval: Duration,
    /// History page size.
    pub page_size: usize,
    /// Close codes treated as an authentication refusal.
    pub auth_close_codes: Vec<u16>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            realtime_url: Url::parse(DEFAULT_REALTIME_URL).unwrap_or_else(|_| unreachable!("static URL")),
            token_url: None,
            history_url: None,
            backoff: BackoffPolicy::default(),
            probe_timeout: Duration::from_millis(2000),
            handshake_timeout: Duration::from_millis(10_000),
            poll_interval: Duration::from_millis(1000),
            page_size: MESSAGES_BATCH,
            auth_close_codes: DEFAULT_AUTH_CLOSE_CODES.to_vec(),
        }
    }
}

impl LinkConfig {
    /// Defaults with an explicit delivery endpoint.
    pub fn new(realtime_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            realtime_url: realtime_url_from("realtime_url", realtime_url)?,
            ..Self::default()
        })
    }

    /// # From Environment
    ///
    /// Load `.env` if present, then read the `CHAT_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => log::debug!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => log::warn!("Ignoring unreadable .env file: {}", e),
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(value) = get("CHAT_REALTIME_URL") {
            config.realtime_url = realtime_url_from("CHAT_REALTIME_URL", &value)?;
        }
        if let Some(value) = get("CHAT_TOKEN_URL") {
            config.token_url = Some(http_url_from("CHAT_TOKEN_URL", &value)?);
        }
        if let Some(value) = get("CHAT_HISTORY_URL") {
            config.history_url = Some(http_url_from("CHAT_HISTORY_URL", &value)?);
        }
        if let Some(value) = get("CHAT_RECONNECT_BASE_DELAY_MS") {
            config.backoff.initial = Duration::from_millis(number("CHAT_RECONNECT_BASE_DELAY_MS", &value)?);
        }
        if let Some(value) = get("CHAT_RECONNECT_MAX_DELAY_MS") {
            config.backoff.max = Duration::from_millis(number("CHAT_RECONNECT_MAX_DELAY_MS", &value)?);
        }
        if let Some(value) = get("CHAT_RECONNECT_FACTOR") {
            config.backoff.factor = number("CHAT_RECONNECT_FACTOR", &value)?;
        }
        if let Some(value) = get("CHAT_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(number("CHAT_POLL_INTERVAL_MS", &value)?);
        }
        if let Some(value) = get("CHAT_PROBE_TIMEOUT_MS") {
            config.probe_timeout = Duration::from_millis(number("CHAT_PROBE_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = get("CHAT_HANDSHAKE_TIMEOUT_MS") {
            config.handshake_timeout = Duration::from_millis(number("CHAT_HANDSHAKE_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = get("CHAT_PAGE_SIZE") {
            config.page_size = number("CHAT_PAGE_SIZE", &value)?;
        }
        if let Some(value) = get("CHAT_AUTH_CLOSE_CODES") {
            config.auth_close_codes = value
                .split(',')
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(|code| number("CHAT_AUTH_CLOSE_CODES", code))
                .collect::<Result<Vec<u16>, _>>()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Override the token issuer.
    pub fn with_token_url(mut self, url: &str) -> Result<Self, ConfigError> {
        self.token_url = Some(http_url_from("token_url", url)?);
        Ok(self)
    }

    /// Override the history API.
    pub fn with_history_url(mut self, url: &str) -> Result<Self, ConfigError> {
        self.history_url = Some(http_url_from("history_url", url)?);
        Ok(self)
    }

    /// Override the backoff curve.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Override the polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the probe timeout.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.backoff.is_valid() {
            return Err(ConfigError::Invalid(format!(
                "backoff must start above zero, grow by a factor > 1 and stay under its cap (got {:?})",
                self.backoff
            )));
        }
        if self.poll_interval.is_zero() || self.probe_timeout.is_zero() || self.handshake_timeout.is_zero() {
            return Err(ConfigError::Invalid("timeouts and intervals must be non-zero".to_string()));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page size must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Parse a delivery endpoint, mapping `http(s)` to `ws(s)`.
fn realtime_url_from(var: &str, value: &str) -> Result<Url, ConfigError> {
    let mut url = parse_url(var, value)?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(ConfigError::InvalidUrl {
                var: var.to_string(),
                value: value.to_string(),
                reason: format!("unsupported scheme '{}'", other),
            })
        }
    };
    if url.scheme() != scheme && url.set_scheme(scheme).is_err() {
        return Err(ConfigError::InvalidUrl {
            var: var.to_string(),
            value: value.to_string(),
            reason: format!("cannot switch scheme to '{}'", scheme),
        });
    }
    Ok(url)
}

fn http_url_from(var: &str, value: &str) -> Result<Url, ConfigError> {
    let url = parse_url(var, value)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::InvalidUrl {
            var: var.to_string(),
            value: value.to_string(),
            reason: format!("expected http or https, got '{}'", other),
        }),
    }
}

fn parse_url(var: &str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        var: var.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl {
            var: var.to_string(),
            value: value.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(url)
}

fn number<T: FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidNumber {
        var: var.to_string(),
        value: value.to_string(),
    })
}
