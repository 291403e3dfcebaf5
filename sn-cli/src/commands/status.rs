//! Status command - show the effective configuration and reconnect schedule.

use console::style;

use sn_core::config::ConfigHandle;
use sn_core::error::SnResult;
use sn_socket::{BackoffPolicy, ReconnectConfig};

use crate::OutputFormat;

/// Attempts listed when reconnection is unlimited.
const UNLIMITED_PREVIEW: u32 = 8;

/// Run the status command.
pub async fn run(config: ConfigHandle, format: OutputFormat) -> SnResult<()> {
    let cfg = config.read().await;

    let ws_url = cfg.server.websocket_url().ok();
    let policy = BackoffPolicy::new(ReconnectConfig::from(&cfg.realtime));
    let schedule_len = match cfg.realtime.max_attempts {
        0 => UNLIMITED_PREVIEW,
        n => n,
    };
    let schedule: Vec<u64> = (1..=schedule_len)
        .map(|attempt| policy.base_delay_for(attempt).as_millis() as u64)
        .collect();

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "server_address": cfg.server.address,
                "websocket_url": ws_url,
                "authenticated": !cfg.server.session_token.is_empty(),
                "realtime": cfg.realtime,
                "reconnect_schedule_ms": schedule,
                "unlimited_attempts": cfg.realtime.max_attempts == 0,
                "log_level": cfg.logging.level,
            });
            println!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
        }
        OutputFormat::Text => {
            println!("{}", style("Server").bold().underlined());
            println!(
                "  Address:   {}",
                if cfg.server.address.is_empty() {
                    style("not configured").red().to_string()
                } else {
                    cfg.server.address.clone()
                }
            );
            println!("  WebSocket: {}", ws_url.as_deref().unwrap_or("-"));
            println!(
                "  Session:   {}",
                if cfg.server.session_token.is_empty() {
                    style("missing").yellow().to_string()
                } else {
                    style("present").green().to_string()
                }
            );

            println!();
            println!("{}", style("Realtime").bold().underlined());
            println!("  Connect timeout: {}ms", cfg.realtime.connect_timeout_ms);
            println!("  Seen window:     {} ids/topic", cfg.realtime.seen_window_capacity);
            println!("  Outbound queue:  {} frames", cfg.realtime.outbound_queue_capacity);
            println!("  Logout code:     {}", cfg.realtime.logout_close_code);
            if cfg.realtime.jitter_factor > 0.0 {
                println!("  Jitter:          up to {:.0}%", cfg.realtime.jitter_factor * 100.0);
            }

            println!();
            println!("{}", style("Reconnect schedule").bold().underlined());
            for (i, delay_ms) in schedule.iter().enumerate() {
                println!("  Attempt {:>2}: {:.1}s", i + 1, *delay_ms as f64 / 1000.0);
            }
            if cfg.realtime.max_attempts == 0 {
                println!("  ... unlimited");
            } else {
                println!(
                    "  Then: {} (manual retry)",
                    style("failed").red()
                );
            }
        }
    }

    Ok(())
}
