//! Listen command - hold a realtime session open and print what arrives.

use std::time::Duration;

use console::style;
use dialoguer::{Confirm, Input, Password};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

use sn_core::config::{AppConfig, ConfigHandle};
use sn_core::error::{SnError, SnResult};
use sn_socket::{ConnectionState, Topic};

use crate::OutputFormat;

/// Run the listen command.
pub async fn run(
    config: ConfigHandle,
    chats: Vec<String>,
    address: Option<String>,
    token: Option<String>,
    save_config: bool,
    format: OutputFormat,
) -> SnResult<()> {
    // Determine address: arg > config > interactive prompt
    let addr = match address {
        Some(a) => a,
        None => {
            let current = config.read().await.server.address.clone();
            if current.is_empty() {
                Input::new()
                    .with_prompt("Server address")
                    .interact_text()
                    .map_err(|e| SnError::Internal(e.to_string()))?
            } else {
                current
            }
        }
    };

    // Determine token: arg > config > interactive prompt
    let session = match token {
        Some(t) => t,
        None => {
            let current = config.read().await.server.session_token.clone();
            if current.is_empty() {
                Password::new()
                    .with_prompt("Session token")
                    .interact()
                    .map_err(|e| SnError::Internal(e.to_string()))?
            } else {
                current
            }
        }
    };

    {
        let mut cfg = config.write().await;
        cfg.server.address = AppConfig::sanitize_server_address(&addr);
        cfg.server.session_token = session.clone();
    }

    if config.read().await.server.address.is_empty() {
        error!("no server address configured. Use --address or set it in config.");
        return Err(SnError::MissingConfig("server address".into()));
    }

    if save_config {
        config.save().await?;
        if let Ok(path) = AppConfig::default_config_path() {
            println!("  {} Config saved to {}", style("OK").green(), path.display());
        }
    }

    let manager = super::create_manager(&config).await?;

    let mut handles = Vec::with_capacity(chats.len() + 1);
    handles.push(manager.subscribe(Topic::Global, move |frame| {
        super::print_frame(frame, format)
    }));
    for chat_id in &chats {
        handles.push(manager.subscribe(Topic::chat(chat_id.as_str()), move |frame| {
            super::print_frame(frame, format)
        }));
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {spinner} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    let pb_clone = pb.clone();
    let progress_listener = manager.on_state_change(move |snapshot| {
        pb_clone.set_message(format!("{} ({})", snapshot.state, snapshot.reconnect));
    });

    manager.open(&session).await?;

    let mut state_rx = manager.state_receiver();
    let first = tokio::select! {
        result = state_rx.wait_for(|s| s.state == ConnectionState::Open || s.is_failed()) => {
            result.map(|s| (*s).clone()).ok()
        }
        _ = tokio::signal::ctrl_c() => None,
    };
    pb.finish_and_clear();
    manager.remove_state_listener(progress_listener);

    match first {
        Some(snapshot) if snapshot.state == ConnectionState::Open => {
            if matches!(format, OutputFormat::Text) {
                println!(
                    "  {} Connected to {}. Listening for events... (Ctrl+C to stop)",
                    style("OK").green().bold(),
                    config.read().await.server.address
                );
                if !chats.is_empty() {
                    println!("  Joined chats: {}", chats.join(", "));
                }
                println!();
            }
        }
        // Failed before the first open; the loop below offers a reconnect.
        Some(snapshot) => super::print_state(&snapshot, format),
        None => {
            manager.close().await;
            return Ok(());
        }
    }

    manager.on_state_change(move |snapshot| super::print_state(snapshot, format));

    loop {
        let failed = tokio::select! {
            result = state_rx.wait_for(|s| s.is_failed()) => result.is_ok(),
            _ = tokio::signal::ctrl_c() => false,
        };
        if !failed {
            break;
        }
        if !confirm_reconnect(format).await? {
            let reason = manager
                .snapshot()
                .last_error
                .unwrap_or_else(|| "connection failed".into());
            manager.close().await;
            return Err(SnError::Transport(reason));
        }
        super::reconnect(&manager, format).await?;
    }

    if matches!(format, OutputFormat::Text) {
        println!("\n  Disconnecting...");
    }
    manager.close().await;
    drop(handles);
    info!("listen session closed");

    Ok(())
}

/// Ask whether to reconnect after automatic reconnection gave up.
///
/// Only asks on an attended terminal in text mode; anything else ends the
/// session.
async fn confirm_reconnect(format: OutputFormat) -> SnResult<bool> {
    if !matches!(format, OutputFormat::Text) || !console::user_attended() {
        return Ok(false);
    }
    tokio::task::spawn_blocking(|| {
        Confirm::new()
            .with_prompt("Connection lost. Reconnect now?")
            .default(true)
            .interact()
            .map_err(|e| SnError::Internal(e.to_string()))
    })
    .await
    .map_err(|e| SnError::Internal(format!("reconnect prompt failed: {e}")))?
}
