//! Social network core - shared foundation of the client crates.
//!
//! Configuration (backend address, session cookie, realtime tuning), the
//! unified [`SnError`] type, tracing setup, per-user directories and the
//! protocol constants both the socket and HTTP crates agree on.

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod platform;

pub use config::{AppConfig, ConfigHandle};
pub use error::{SnError, SnResult};
pub use logging::{init_logging, LogGuard};
pub use platform::Platform;
