// Configuration loading and parsing (config/client.toml, env overrides).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_SOCKET_URL: &str = "ws://127.0.0.1:3001/ws";
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3001";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RENDER_INTERVAL_MS: u64 = 1000;

/// Environment variables that override the configured endpoints.
pub const ENV_SOCKET_URL: &str = "AUCTION_SOCKET_URL";
pub const ENV_API_URL: &str = "AUCTION_API_URL";

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub reconnect: ReconnectPolicy,
    pub ui: UiConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// WebSocket endpoint of the live event channel.
    pub socket_url: String,
    /// Base URL for the HTTP API (initial item load).
    pub api_url: String,
}

/// Bounded reconnect policy for the live channel: a fixed delay between
/// attempts and a cap on consecutive failed attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub delay_ms: u64,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UiConfig {
    /// How often the terminal board is redrawn.
    pub render_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                socket_url: DEFAULT_SOCKET_URL.to_string(),
                api_url: DEFAULT_API_URL.to_string(),
            },
            reconnect: ReconnectPolicy::default(),
            ui: UiConfig {
                render_interval_ms: DEFAULT_RENDER_INTERVAL_MS,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// client.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for client.toml. Every field is optional;
/// missing values fall back to the built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
struct ClientFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    reconnect: ReconnectSection,
    #[serde(default)]
    ui: UiSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ServerSection {
    socket_url: Option<String>,
    api_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ReconnectSection {
    delay_ms: Option<u64>,
    max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct UiSection {
    render_interval_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load configuration from `config/client.toml` under the current working
/// directory, then apply environment overrides. A missing file is not an
/// error; the built-in defaults are used.
pub fn load_config() -> Result<Config, ConfigError> {
    let base_dir = std::env::current_dir().map_err(|e| ConfigError::ReadError {
        path: PathBuf::from("."),
        source: e,
    })?;
    let mut config = load_config_from(&base_dir)?;
    apply_env_overrides(
        &mut config,
        std::env::var(ENV_SOCKET_URL).ok(),
        std::env::var(ENV_API_URL).ok(),
    );
    validate(&config)?;
    Ok(config)
}

/// Load configuration from `config/client.toml` relative to `base_dir`.
///
/// This is the lower-level loading primitive: it does not read the
/// environment and does not validate, so callers can layer overrides first.
pub(crate) fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join("client.toml");
    if !path.exists() {
        return Ok(Config::default());
    }

    let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
        path: path.clone(),
        source: e,
    })?;
    parse_config(&text, &path)
}

/// Parse a client.toml document into an assembled [`Config`].
fn parse_config(text: &str, path: &Path) -> Result<Config, ConfigError> {
    let file: ClientFile = toml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let defaults = Config::default();
    Ok(Config {
        server: ServerConfig {
            socket_url: file.server.socket_url.unwrap_or(defaults.server.socket_url),
            api_url: file.server.api_url.unwrap_or(defaults.server.api_url),
        },
        reconnect: ReconnectPolicy {
            delay_ms: file
                .reconnect
                .delay_ms
                .unwrap_or(defaults.reconnect.delay_ms),
            max_attempts: file
                .reconnect
                .max_attempts
                .unwrap_or(defaults.reconnect.max_attempts),
        },
        ui: UiConfig {
            render_interval_ms: file
                .ui
                .render_interval_ms
                .unwrap_or(defaults.ui.render_interval_ms),
        },
    })
}

/// Apply endpoint overrides from the environment (when set and non-empty).
fn apply_env_overrides(config: &mut Config, socket_url: Option<String>, api_url: Option<String>) {
    if let Some(url) = socket_url.filter(|u| !u.is_empty()) {
        config.server.socket_url = url;
    }
    if let Some(url) = api_url.filter(|u| !u.is_empty()) {
        config.server.api_url = url;
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let socket = &config.server.socket_url;
    if !socket.starts_with("ws://") && !socket.starts_with("wss://") {
        return Err(ConfigError::ValidationError {
            field: "server.socket_url".into(),
            message: format!("expected a ws:// or wss:// URL, got `{socket}`"),
        });
    }

    let api = &config.server.api_url;
    if !api.starts_with("http://") && !api.starts_with("https://") {
        return Err(ConfigError::ValidationError {
            field: "server.api_url".into(),
            message: format!("expected an http:// or https:// URL, got `{api}`"),
        });
    }

    if config.reconnect.max_attempts == 0 {
        return Err(ConfigError::ValidationError {
            field: "reconnect.max_attempts".into(),
            message: "must be at least 1".into(),
        });
    }

    if config.ui.render_interval_ms == 0 {
        return Err(ConfigError::ValidationError {
            field: "ui.render_interval_ms".into(),
            message: "must be at least 1".into(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Config {
        parse_config(text, Path::new("client.toml")).unwrap()
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = parse("");
        assert_eq!(config.server.socket_url, DEFAULT_SOCKET_URL);
        assert_eq!(config.server.api_url, DEFAULT_API_URL);
        assert_eq!(config.reconnect.delay_ms, DEFAULT_RECONNECT_DELAY_MS);
        assert_eq!(config.reconnect.max_attempts, DEFAULT_RECONNECT_ATTEMPTS);
    }

    #[test]
    fn file_values_override_defaults() {
        let config = parse(
            r#"
            [server]
            socket_url = "wss://auction.example.com/ws"
            api_url = "https://auction.example.com"

            [reconnect]
            delay_ms = 250
            max_attempts = 10

            [ui]
            render_interval_ms = 500
            "#,
        );
        assert_eq!(config.server.socket_url, "wss://auction.example.com/ws");
        assert_eq!(config.server.api_url, "https://auction.example.com");
        assert_eq!(config.reconnect.delay_ms, 250);
        assert_eq!(config.reconnect.max_attempts, 10);
        assert_eq!(config.ui.render_interval_ms, 500);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = parse("[reconnect]\nmax_attempts = 3\n");
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.delay_ms, DEFAULT_RECONNECT_DELAY_MS);
        assert_eq!(config.server.socket_url, DEFAULT_SOCKET_URL);
    }

    #[test]
    fn env_overrides_beat_file_values() {
        let mut config = parse("[server]\nsocket_url = \"ws://from-file:1/ws\"\n");
        apply_env_overrides(
            &mut config,
            Some("ws://from-env:2/ws".into()),
            Some("http://from-env:2".into()),
        );
        assert_eq!(config.server.socket_url, "ws://from-env:2/ws");
        assert_eq!(config.server.api_url, "http://from-env:2");
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, Some(String::new()), None);
        assert_eq!(config.server.socket_url, DEFAULT_SOCKET_URL);
    }

    #[test]
    fn invalid_scheme_fails_validation() {
        let mut config = Config::default();
        config.server.socket_url = "http://not-a-websocket".into();
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { field, .. } if field == "server.socket_url"));
    }

    #[test]
    fn zero_attempts_fails_validation() {
        let mut config = Config::default();
        config.reconnect.max_attempts = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = parse_config("[server\n", Path::new("client.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
