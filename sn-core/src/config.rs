//! Application configuration management.
//!
//! Handles loading, saving, and accessing application configuration including
//! the backend address, the session cookie and the tuning knobs of the
//! realtime connection. Configuration is persisted as TOML on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{SnError, SnResult};
use crate::platform::Platform;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backend connection settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Realtime connection tuning.
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Backend URL (e.g., "http://localhost:3000").
    #[serde(default)]
    pub address: String,

    /// Value of the session cookie obtained at login.
    #[serde(default)]
    pub session_token: String,

    /// API request timeout in milliseconds.
    #[serde(default = "default_api_timeout")]
    pub api_timeout_ms: u64,

    /// Whether to accept invalid TLS certificates from the backend.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

/// Realtime connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Base reconnection delay in milliseconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Maximum reconnection delay in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Automatic reconnection attempts before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Jitter factor (0.0 to 1.0) applied to each delay.
    #[serde(default)]
    pub jitter_factor: f64,

    /// Number of recently seen message ids remembered per topic.
    #[serde(default = "default_seen_window")]
    pub seen_window_capacity: usize,

    /// Outbound queue size before non-critical frames get evicted.
    #[serde(default = "default_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Close code that marks a deliberate logout (no reconnect).
    #[serde(default = "default_logout_code")]
    pub logout_close_code: u16,

    /// Timeout for establishing the WebSocket connection in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_api_timeout() -> u64 {
    constants::DEFAULT_API_TIMEOUT_MS
}

fn default_base_delay() -> u64 {
    constants::DEFAULT_RECONNECT_BASE_DELAY_MS
}

fn default_max_delay() -> u64 {
    constants::DEFAULT_RECONNECT_MAX_DELAY_MS
}

fn default_max_attempts() -> u32 {
    constants::DEFAULT_MAX_RECONNECT_ATTEMPTS
}

fn default_seen_window() -> usize {
    constants::SEEN_WINDOW_CAPACITY
}

fn default_queue_capacity() -> usize {
    constants::OUTBOUND_QUEUE_CAPACITY
}

fn default_logout_code() -> u16 {
    constants::LOGOUT_CLOSE_CODE
}

fn default_connect_timeout() -> u64 {
    constants::DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            session_token: String::new(),
            api_timeout_ms: default_api_timeout(),
            accept_invalid_certs: false,
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            max_attempts: default_max_attempts(),
            jitter_factor: 0.0,
            seen_window_capacity: default_seen_window(),
            outbound_queue_capacity: default_queue_capacity(),
            logout_close_code: default_logout_code(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl ServerConfig {
    /// Origin of the backend (scheme + host + port, no trailing slash).
    pub fn origin(&self) -> String {
        AppConfig::sanitize_server_address(&self.address)
    }

    /// Streaming endpoint derived from the HTTP address.
    ///
    /// `http://` becomes `ws://` and `https://` becomes `wss://`.
    pub fn websocket_url(&self) -> SnResult<String> {
        let origin = self.origin();
        if origin.is_empty() {
            return Err(SnError::MissingConfig("server address".into()));
        }
        let ws_origin = if let Some(rest) = origin.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = origin.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            origin
        };
        Ok(format!("{ws_origin}{}", constants::WS_PATH))
    }

    /// `Cookie` header value carrying the session token.
    pub fn session_cookie(&self) -> Option<String> {
        if self.session_token.is_empty() {
            None
        } else {
            Some(format!(
                "{}={}",
                constants::SESSION_COOKIE_NAME,
                self.session_token
            ))
        }
    }
}

impl RealtimeConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reject settings the connection manager cannot work with.
    pub fn validate(&self) -> SnResult<()> {
        if self.base_delay_ms == 0 {
            return Err(SnError::Config("realtime.base_delay_ms must be > 0".into()));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(SnError::Config(
                "realtime.max_delay_ms must be >= base_delay_ms".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(SnError::Config(
                "realtime.jitter_factor must be within 0.0..=1.0".into(),
            ));
        }
        if self.seen_window_capacity == 0 || self.outbound_queue_capacity == 0 {
            return Err(SnError::Config(
                "realtime capacities must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from the default config file path.
    pub fn load_default() -> SnResult<Self> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> SnResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.realtime.validate()?;
        Ok(config)
    }

    /// Save configuration to the default config file path.
    pub fn save_default(&self) -> SnResult<()> {
        let path = Self::default_config_path()?;
        self.save_to_file(&path)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> SnResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| SnError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> SnResult<PathBuf> {
        let config_dir = Platform::config_dir()?;
        Ok(config_dir.join("config.toml"))
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> SnResult<PathBuf> {
        if self.logging.directory.is_empty() {
            Platform::log_dir()
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Check whether the backend connection is configured.
    pub fn is_server_configured(&self) -> bool {
        !self.server.address.is_empty() && !self.server.session_token.is_empty()
    }

    /// Sanitize and normalize a server address.
    ///
    /// Ensures the address has a scheme and strips trailing slashes.
    /// Addresses given as `ws://`/`wss://` are mapped back to their HTTP form.
    pub fn sanitize_server_address(address: &str) -> String {
        let trimmed = address.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else if let Some(rest) = trimmed.strip_prefix("wss://") {
            format!("https://{rest}")
        } else if let Some(rest) = trimmed.strip_prefix("ws://") {
            format!("http://{rest}")
        } else {
            format!("http://{trimmed}")
        };

        let without_slash = with_scheme.trim_end_matches('/');
        without_slash
            .strip_suffix(constants::WS_PATH)
            .unwrap_or(without_slash)
            .to_string()
    }
}

/// Thread-safe configuration holder for shared access across components.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, AppConfig> {
        self.inner.write().await
    }

    /// Save the current configuration to disk.
    pub async fn save(&self) -> SnResult<()> {
        let config = self.inner.read().await;
        config.save_default()
    }
}
