use clap::Parser;
use lib_chat::{ConfigError, LinkConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Tail chat channels over the real-time delivery endpoint", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long = "channel", env = "CHAT_CHANNELS", value_delimiter = ',', help = "Channel or conversation id to watch (repeatable, or comma separated).")]
    pub channels: Option<Vec<String>>,

    #[clap(long, env = "CHAT_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "CHAT_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "CHAT_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "CHAT_REALTIME_URL", help = "Real-time delivery endpoint (ws:// or wss://).")]
    pub realtime_url: Option<String>,

    #[clap(long, env = "CHAT_TOKEN_URL", help = "Token issuer endpoint.")]
    pub token_url: Option<String>,

    #[clap(long, env = "CHAT_HISTORY_URL", help = "Message history endpoint.")]
    pub history_url: Option<String>,

    #[clap(long, env = "CHAT_SESSION_TOKEN", help = "Bearer token for the token issuer and history API.")]
    pub session_token: Option<String>,

    #[clap(long, env = "CHAT_SESSION_COOKIE", help = "Cookie header for the token issuer and history API.")]
    pub session_cookie: Option<String>,

    #[clap(long, env = "CHAT_USER_ID", help = "User id announced as presence on subscribe.")]
    pub user_id: Option<String>,

    #[clap(long, env = "CHAT_USERNAME", help = "Display name announced with the presence.")]
    pub username: Option<String>,

    #[clap(long, env = "CHAT_RECONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds for reconnect attempts.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "CHAT_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds for reconnect attempts.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[clap(long, env = "CHAT_POLL_INTERVAL_MS", help = "Newest-page polling interval in milliseconds while disconnected.")]
    pub poll_interval_ms: Option<u64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            channels: other.channels.or(self.channels),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            realtime_url: other.realtime_url.or(self.realtime_url),
            token_url: other.token_url.or(self.token_url),
            history_url: other.history_url.or(self.history_url),
            session_token: other.session_token.or(self.session_token),
            session_cookie: other.session_cookie.or(self.session_cookie),
            user_id: other.user_id.or(self.user_id),
            username: other.username.or(self.username),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            poll_interval_ms: other.poll_interval_ms.or(self.poll_interval_ms),
        }
    }

    fn defaults() -> Config {
        Config {
            log_dir: Some(
                dirs::data_local_dir()
                    .map(|dir| dir.join("chat-tail").join("logs"))
                    .unwrap_or_else(|| PathBuf::from("./logs")),
            ),
            log_level: Some("info".to_string()),
            realtime_url: Some("ws://localhost:3001".to_string()),
            token_url: Some("http://localhost:3000/api/socket/token".to_string()),
            history_url: Some("http://localhost:3000/api/messages".to_string()),
            reconnect_base_delay_ms: Some(1000),
            reconnect_max_delay_ms: Some(60000),
            poll_interval_ms: Some(1000),
            ..Default::default()
        }
    }

    /// Channels to watch, trimmed, without blanks or repeats.
    pub fn channel_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for id in self.channels.iter().flatten().map(|id| id.trim()) {
            if !id.is_empty() && !ids.iter().any(|seen| seen == id) {
                ids.push(id.to_string());
            }
        }
        ids
    }

    /// Build the session configuration. Values set here win; the remaining
    /// `CHAT_*` variables are read from the environment.
    pub fn to_link_config(&self) -> Result<LinkConfig, ConfigError> {
        self.to_link_config_with(|key| std::env::var(key).ok())
    }

    fn to_link_config_with<F>(&self, fallback: F) -> Result<LinkConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut overrides: HashMap<&str, String> = HashMap::new();
        let mut set = |key: &'static str, value: Option<String>| {
            if let Some(value) = value {
                overrides.insert(key, value);
            }
        };
        set("CHAT_REALTIME_URL", self.realtime_url.clone());
        set("CHAT_TOKEN_URL", self.token_url.clone());
        set("CHAT_HISTORY_URL", self.history_url.clone());
        set("CHAT_RECONNECT_BASE_DELAY_MS", self.reconnect_base_delay_ms.map(|v| v.to_string()));
        set("CHAT_RECONNECT_MAX_DELAY_MS", self.reconnect_max_delay_ms.map(|v| v.to_string()));
        set("CHAT_POLL_INTERVAL_MS", self.poll_interval_ms.map(|v| v.to_string()));

        LinkConfig::from_lookup(|key| overrides.get(key).cloned().or_else(|| fallback(key)))
    }
}

pub fn load_config() -> Config {
    resolve(Config::parse())
}

// Defaults, then the JSON file (chat_tail.conf unless overridden), then
// environment and CLI values, which clap has already folded together.
fn resolve(cli_args: Config) -> Config {
    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("chat_tail.conf"));

    let mut current_config = Config::defaults();

    if config_file_path.exists() {
        match fs::read_to_string(&config_file_path) {
            Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
                Ok(file_config) => current_config = current_config.merge(file_config),
                Err(e) => log::warn!(
                    "Failed to parse config file {}: {}. Falling back to other sources.",
                    config_file_path.display(),
                    e
                ),
            },
            Err(e) => log::warn!(
                "Failed to read config file {}: {}. Falling back to other sources.",
                config_file_path.display(),
                e
            ),
        }
    } else {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    current_config.merge(cli_args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn file_values_sit_between_defaults_and_cli() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"channels": ["42", "7"], "logLevel": "debug", "realtimeUrl": "wss://chat.example.com/socket"}}"#
        )
        .unwrap();

        let cli = Config {
            config_path: Some(file.path().to_path_buf()),
            log_level: Some("trace".to_string()),
            ..Default::default()
        };
        let config = resolve(cli);

        assert_eq!(config.channel_ids(), vec!["42", "7"]);
        assert_eq!(config.log_level.as_deref(), Some("trace"));
        assert_eq!(config.realtime_url.as_deref(), Some("wss://chat.example.com/socket"));
        assert_eq!(config.poll_interval_ms, Some(1000));
    }

    #[test]
    fn unreadable_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let config = resolve(Config {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        });
        assert_eq!(config.realtime_url.as_deref(), Some("ws://localhost:3001"));
        assert!(config.channel_ids().is_empty());
    }

    #[test]
    fn channel_ids_are_trimmed_and_deduplicated() {
        let config = Config {
            channels: Some(vec![" 42".into(), "".into(), "42".into(), "7 ".into()]),
            ..Default::default()
        };
        assert_eq!(config.channel_ids(), vec!["42", "7"]);
    }

    #[test]
    fn link_config_prefers_explicit_values_over_the_fallback() {
        let config = Config {
            realtime_url: Some("https://chat.example.com/socket".into()),
            poll_interval_ms: Some(250),
            ..Default::default()
        };
        let link = config
            .to_link_config_with(|key| match key {
                "CHAT_POLL_INTERVAL_MS" => Some("9999".into()),
                "CHAT_PAGE_SIZE" => Some("25".into()),
                _ => None,
            })
            .unwrap();

        assert_eq!(link.realtime_url.as_str(), "wss://chat.example.com/socket");
        assert_eq!(link.poll_interval, Duration::from_millis(250));
        assert_eq!(link.page_size, 25);
    }

    #[test]
    fn invalid_urls_are_reported() {
        let config = Config {
            token_url: Some("not a url".into()),
            ..Default::default()
        };
        assert!(config.to_link_config_with(|_| None).is_err());
    }
}
