//! Chat command - interactive chat over the realtime connection.

use console::style;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use sn_api::ApiClient;
use sn_core::config::ConfigHandle;
use sn_core::error::{SnError, SnResult};
use sn_socket::{ConnectionManager, DispatchOutcome, Topic};

use crate::OutputFormat;

/// Run the chat command.
pub async fn run(
    config: ConfigHandle,
    chat_id: String,
    http: bool,
    format: OutputFormat,
) -> SnResult<()> {
    let token = super::session_token(&config).await?;
    let manager = super::create_manager(&config).await?;
    let api = if http {
        Some(super::create_api_client(&config).await?)
    } else {
        None
    };

    let _subscription = manager.subscribe(Topic::chat(chat_id.as_str()), move |frame| {
        super::print_frame(frame, format)
    });
    manager.on_state_change(move |snapshot| {
        super::print_state(snapshot, format);
        if snapshot.is_failed() && matches!(format, OutputFormat::Text) {
            println!("  Type /retry to reconnect.");
        }
    });

    manager.open(&token).await?;

    if matches!(format, OutputFormat::Text) {
        println!(
            "  {} Chatting in {} via {}. Type a message and press Enter (Ctrl+D to quit).",
            style("OK").green().bold(),
            chat_id,
            if http { "HTTP" } else { "socket" }
        );
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("stdin read failed: {e}");
                        break;
                    }
                };
                let content = match parse_input(&line) {
                    ChatInput::Empty => continue,
                    ChatInput::Retry => {
                        if let Err(e) = super::reconnect(&manager, format).await {
                            eprintln!("  {} {e}", style("FAIL").red().bold());
                        }
                        continue;
                    }
                    ChatInput::Message(content) => content,
                };
                let result = match &api {
                    Some(api) => send_via_http(api, &manager, &chat_id, content).await,
                    None => manager
                        .send_chat_message(&chat_id, content)
                        .map(|receipt| {
                            debug!("queued seq={} client_id={}", receipt.seq, receipt.client_id);
                        }),
                };
                if let Err(e) = result {
                    eprintln!("  {} {e}", style("FAIL").red().bold());
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    manager.close().await;
    Ok(())
}

/// A line typed at the chat prompt.
#[derive(Debug, PartialEq, Eq)]
enum ChatInput<'a> {
    Empty,
    /// `/retry`: reconnect after automatic reconnection gave up.
    Retry,
    Message(&'a str),
}

fn parse_input(line: &str) -> ChatInput<'_> {
    match line.trim() {
        "" => ChatInput::Empty,
        "/retry" => ChatInput::Retry,
        content => ChatInput::Message(content),
    }
}

/// Post the message over HTTP and dispatch the stored copy locally.
///
/// The local dispatch prints the message right away and marks its id as
/// seen, so the push the backend sends for the same message is dropped.
async fn send_via_http(
    api: &ApiClient,
    manager: &ConnectionManager,
    chat_id: &str,
    content: &str,
) -> SnResult<()> {
    let stored = api.send_message(chat_id, content).await?;
    match manager.router().dispatch(&stored.to_echo_frame()) {
        // Duplicate: the push won the race and was already printed.
        DispatchOutcome::Delivered(_) | DispatchOutcome::Duplicate => Ok(()),
        DispatchOutcome::Diagnostic => Err(SnError::Protocol(format!(
            "echo of message {} could not be routed",
            stored.id
        ))),
    }
}
