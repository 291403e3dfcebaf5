//! CLI command implementations.

pub mod chat;
pub mod chats;
pub mod listen;
pub mod notifications;
pub mod status;

use std::sync::Arc;

use console::style;

use sn_api::ApiClient;
use sn_core::config::ConfigHandle;
use sn_core::error::{SnError, SnResult};
use sn_socket::{ConnectionManager, ConnectionSnapshot, Frame, FrameType};

use crate::OutputFormat;

/// Helper to create an API client from config.
pub async fn create_api_client(config: &ConfigHandle) -> SnResult<ApiClient> {
    let server_config = config.read().await.server.clone();
    ApiClient::new(&server_config)
}

/// Helper to create a connection manager from config.
pub async fn create_manager(config: &ConfigHandle) -> SnResult<Arc<ConnectionManager>> {
    let cfg = config.read().await;
    Ok(Arc::new(ConnectionManager::from_config(&cfg)?))
}

/// Session token from config, or an error telling the user how to set one.
pub async fn session_token(config: &ConfigHandle) -> SnResult<String> {
    let token = config.read().await.server.session_token.clone();
    if token.is_empty() {
        return Err(SnError::MissingConfig(
            "server.session_token (log in through the web client and copy the cookie)".into(),
        ));
    }
    Ok(token)
}

/// Print a routed frame.
pub fn print_frame(frame: &Frame, format: OutputFormat) {
    match format {
        OutputFormat::Json => match frame.to_wire() {
            Ok(line) => println!("{line}"),
            Err(e) => eprintln!("unprintable frame: {e}"),
        },
        OutputFormat::Text => match frame.frame_type() {
            FrameType::NewMessage => match frame.as_chat_message() {
                Some(msg) => {
                    let sender = msg
                        .sender
                        .as_ref()
                        .map(|s| format!("{} {}", s.first_name, s.last_name).trim().to_string())
                        .filter(|name| !name.is_empty())
                        .unwrap_or_else(|| msg.sender_id.clone());
                    println!(
                        "  {} {}: {}",
                        style(format!("[chat {}]", msg.chat_id)).cyan(),
                        style(sender).bold(),
                        msg.content
                    );
                }
                None => println!("  {} {}", style("[new_message]").cyan(), frame.data()),
            },
            FrameType::Notification => match frame.as_notification() {
                Some(n) => println!(
                    "  {} {} ({})",
                    style("[notification]").magenta(),
                    n.notification.kind,
                    n.notification.reference_id
                ),
                None => println!("  {} {}", style("[notification]").magenta(), frame.data()),
            },
            other => println!("  {} {}", style(format!("[{other}]")).dim(), frame.data()),
        },
    }
}

/// Print a connection state transition.
pub fn print_state(snapshot: &ConnectionSnapshot, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "type": "connection_state",
                "state": snapshot.state.to_string(),
                "reconnect": snapshot.reconnect.to_string(),
                "retry_count": snapshot.retry_count,
                "last_error": snapshot.last_error,
            });
            println!("{json}");
        }
        OutputFormat::Text => {
            let label = format!("[{}]", snapshot.state);
            let label = if snapshot.is_failed() {
                style(label).red().bold()
            } else {
                style(label).yellow()
            };
            match &snapshot.last_error {
                Some(err) if snapshot.is_failed() => {
                    println!("  {label} {} ({err})", snapshot.reconnect)
                }
                _ => println!("  {label} {}", snapshot.reconnect),
            }
        }
    }
}

/// Restart the connection after automatic reconnection gave up.
pub async fn reconnect(manager: &ConnectionManager, format: OutputFormat) -> SnResult<()> {
    manager.retry().await?;
    if matches!(format, OutputFormat::Text) {
        println!("  {} Reconnecting...", style("..").cyan());
    }
    Ok(())
}

/// Truncate a string to a maximum length, appending an ellipsis if truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len > 3 {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{head}...")
    } else {
        s.chars().take(max_len).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use sn_core::config::AppConfig;
    use sn_socket::ReconnectState;

    /// Manager pointed at a closed local port that gives up after one attempt.
    fn unreachable_manager() -> ConnectionManager {
        let mut config = AppConfig::default();
        config.server.address = "http://127.0.0.1:1".into();
        config.realtime.max_attempts = 1;
        config.realtime.base_delay_ms = 1;
        config.realtime.max_delay_ms = 1;
        ConnectionManager::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_reconnect_restarts_after_give_up() {
        let manager = unreachable_manager();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        manager.on_state_change(move |s| log.lock().unwrap().push(s.reconnect));

        manager.open("token").await.unwrap();
        let mut rx = manager.state_receiver();
        tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|s| s.is_failed()))
            .await
            .unwrap()
            .unwrap();

        reconnect(&manager, OutputFormat::Json).await.unwrap();
        let seen = seen.lock().unwrap().clone();
        let failed_at = seen
            .iter()
            .position(|r| *r == ReconnectState::Failed)
            .unwrap();
        assert_eq!(seen.get(failed_at + 1), Some(&ReconnectState::Connecting));

        manager.close().await;
    }

    #[tokio::test]
    async fn test_reconnect_without_give_up_is_rejected() {
        let manager = unreachable_manager();
        assert!(reconnect(&manager, OutputFormat::Json).await.is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 8), "hello...");
        assert_eq!(truncate("héllo wörld", 8), "héllo...");
        assert_eq!(truncate("abc", 2), "ab");
    }
}
