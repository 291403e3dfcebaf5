//! Structured logging setup using the `tracing` ecosystem.
//!
//! Console output goes to stderr so it never mixes with command output on
//! stdout. A second layer writes a daily rolling file, either human-readable
//! or JSON. `RUST_LOG` takes precedence over the configured level.

use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{SnError, SnResult};

/// File name prefix of the rolling log files.
pub const LOG_FILE_PREFIX: &str = "social-network.log";

/// Noisy dependencies capped at `warn` unless the filter names them.
const QUIET_TARGETS: &[&str] = &["tungstenite", "tokio_tungstenite", "hyper_util", "rustls"];

/// Guard that keeps the non-blocking log writer alive.
/// Drop this to flush and close the log file.
pub struct LogGuard {
    _guard: WorkerGuard,
}

/// Expand a bare level ("debug") into a directive that keeps transport
/// internals quiet. Full directives are used as given.
fn filter_directive(level: &str) -> String {
    let level = level.trim();
    if level.contains('=') || level.contains(',') {
        return level.to_string();
    }
    let mut directive = if level.is_empty() { "info".to_string() } else { level.to_string() };
    for target in QUIET_TARGETS {
        directive.push_str(&format!(",{target}=warn"));
    }
    directive
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directive(level)))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global tracing subscriber.
///
/// # Arguments
/// * `level` - Log level or filter directive, e.g. "info" or "sn_socket=debug"
/// * `log_dir` - Directory for log files, created if missing
/// * `json_output` - Write the file layer as JSON lines
pub fn init_logging(level: &str, log_dir: &Path, json_output: bool) -> SnResult<LogGuard> {
    std::fs::create_dir_all(log_dir)?;

    let (writer, guard): (NonBlocking, WorkerGuard) =
        tracing_appender::non_blocking(rolling::daily(log_dir, LOG_FILE_PREFIX));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    let json_layer = json_output.then(|| {
        fmt::layer()
            .with_writer(writer.clone())
            .json()
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
    });
    let text_layer = (!json_output).then(|| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_file(true)
            .with_line_number(true)
    });

    tracing_subscriber::registry()
        .with(build_filter(level))
        .with(console_layer)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| SnError::Internal(format!("logging already initialized: {e}")))?;

    tracing::info!("logging initialized at level={level}, dir={}", log_dir.display());

    Ok(LogGuard { _guard: guard })
}

/// Initialize logging from a [`LoggingConfig`], overriding the level when given.
pub fn init_from_config(
    config: &LoggingConfig,
    log_dir: &Path,
    level_override: Option<&str>,
) -> SnResult<LogGuard> {
    let level = level_override.unwrap_or(&config.level);
    init_logging(level, log_dir, config.json_output)
}

/// Console-only logger for tests and short-lived tools. Repeated calls are no-ops.
pub fn init_console_logging(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(build_filter(level))
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
