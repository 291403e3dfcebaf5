//! Application-wide constants.

/// Application name.
pub const APP_NAME: &str = "SocialNetwork";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Path of the streaming endpoint on the backend.
pub const WS_PATH: &str = "/ws";

/// Prefix of the REST API.
pub const API_PREFIX: &str = "/api";

/// Name of the session cookie issued by the backend at login.
pub const SESSION_COOKIE_NAME: &str = "social-network-session";

/// Default server API timeout in milliseconds.
pub const DEFAULT_API_TIMEOUT_MS: u64 = 30_000;

/// Base delay for the first reconnection backoff step.
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1_000;

/// Upper bound for a single reconnection delay.
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// Automatic reconnection attempts before surfacing a hard failure.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Close code the backend uses when the user logged out.
pub const LOGOUT_CLOSE_CODE: u16 = 4001;

/// Per-topic capacity of the seen-id window used for deduplication.
pub const SEEN_WINDOW_CAPACITY: usize = 200;

/// Soft cap of the outbound queue before non-critical frames are evicted.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 500;

/// Timeout for establishing the streaming connection.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Inbound frame type tags.
pub mod frame_types {
    pub const NEW_MESSAGE: &str = "new_message";
    pub const NOTIFICATION: &str = "notification";
    pub const JOIN_CHAT: &str = "join_chat";
    pub const MESSAGE: &str = "message";
    pub const TYPING: &str = "typing";
}
