//! Chat listing and history commands.

use clap::Subcommand;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use console::style;

use sn_api::MessageQuery;
use sn_core::config::ConfigHandle;
use sn_core::error::SnResult;

use crate::OutputFormat;

#[derive(Subcommand)]
pub enum ChatsAction {
    /// List the chats of the current user.
    List,
    /// Show the message history of a chat.
    History {
        /// Chat id.
        chat_id: String,
        /// Number of messages to fetch (max 100).
        #[arg(short = 'n', long, default_value = "50")]
        limit: u32,
        /// Only messages sent before this RFC 3339 timestamp.
        #[arg(long)]
        before: Option<String>,
    },
}

pub async fn run(config: ConfigHandle, action: ChatsAction, format: OutputFormat) -> SnResult<()> {
    let api = super::create_api_client(&config).await?;

    match action {
        ChatsAction::List => {
            let chats = api.list_chats().await?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&chats).unwrap_or_default());
                }
                OutputFormat::Text => {
                    if chats.is_empty() {
                        println!("No chats found.");
                        return Ok(());
                    }

                    let mut table = Table::new();
                    table
                        .load_preset(UTF8_FULL)
                        .apply_modifier(UTF8_ROUND_CORNERS)
                        .set_content_arrangement(ContentArrangement::Dynamic);
                    table.set_header(vec!["ID", "Name", "Type", "Members", "Last message"]);

                    for chat in &chats {
                        let last = chat
                            .last_message
                            .as_ref()
                            .map(|m| super::truncate(&m.content, 40))
                            .unwrap_or_else(|| "-".into());
                        table.add_row(vec![
                            chat.id.clone(),
                            chat.name.clone(),
                            if chat.is_group() { "group" } else { "direct" }.to_string(),
                            chat.participants.len().to_string(),
                            last,
                        ]);
                    }

                    println!("{table}");
                    println!("\n{} chat(s)", chats.len());
                }
            }
        }
        ChatsAction::History { chat_id, limit, before } => {
            let query = MessageQuery { limit, before };
            let page = api.chat_messages(&chat_id, &query).await?;

            match format {
                OutputFormat::Json => {
                    let json = serde_json::json!({
                        "chat_id": chat_id,
                        "messages": page.messages,
                        "has_more": page.has_more,
                    });
                    println!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
                }
                OutputFormat::Text => {
                    if page.messages.is_empty() {
                        println!("No messages found.");
                        return Ok(());
                    }

                    let mut table = Table::new();
                    table
                        .load_preset(UTF8_FULL)
                        .apply_modifier(UTF8_ROUND_CORNERS)
                        .set_content_arrangement(ContentArrangement::Dynamic);
                    table.set_header(vec!["ID", "Sender", "Message", "Sent"]);

                    // Newest first from the server; print oldest first.
                    for msg in page.messages.iter().rev() {
                        table.add_row(vec![
                            msg.id.clone(),
                            msg.sender_id.clone(),
                            super::truncate(&msg.content, 50),
                            display_timestamp(&msg.sent_at),
                        ]);
                    }

                    println!("{table}");
                    if page.has_more {
                        if let Some(oldest) = page.messages.last() {
                            println!(
                                "\n{} older messages available (--before {})",
                                style("More:").dim(),
                                display_timestamp(&oldest.sent_at)
                            );
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

fn display_timestamp(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "-".into(),
        other => other.to_string(),
    }
}
