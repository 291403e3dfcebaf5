//! Notification commands.

use clap::Subcommand;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use console::style;

use sn_core::config::ConfigHandle;
use sn_core::error::SnResult;

use crate::OutputFormat;

#[derive(Subcommand)]
pub enum NotificationsAction {
    /// List notifications.
    List {
        /// Only show unread notifications.
        #[arg(short, long)]
        unread: bool,
    },
    /// Mark notifications as read.
    Read {
        /// Notification ids. Marks every unread notification when omitted.
        ids: Vec<String>,
    },
}

pub async fn run(
    config: ConfigHandle,
    action: NotificationsAction,
    format: OutputFormat,
) -> SnResult<()> {
    let api = super::create_api_client(&config).await?;

    match action {
        NotificationsAction::List { unread } => {
            let mut notifications = api.notifications().await?;
            if unread {
                notifications.retain(|n| !n.is_read);
            }

            match format {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&notifications).unwrap_or_default()
                    );
                }
                OutputFormat::Text => {
                    if notifications.is_empty() {
                        println!("No notifications.");
                        return Ok(());
                    }

                    let mut table = Table::new();
                    table
                        .load_preset(UTF8_FULL)
                        .apply_modifier(UTF8_ROUND_CORNERS)
                        .set_content_arrangement(ContentArrangement::Dynamic);
                    table.set_header(vec!["ID", "Type", "From", "Reference", "Read"]);

                    for n in &notifications {
                        let actor = if n.actor_nickname.is_empty() {
                            n.actor_id.clone()
                        } else {
                            n.actor_nickname.clone()
                        };
                        table.add_row(vec![
                            n.id.clone(),
                            n.kind.clone(),
                            actor,
                            n.reference_id.clone(),
                            if n.is_read { "yes" } else { "no" }.to_string(),
                        ]);
                    }

                    println!("{table}");
                }
            }
        }
        NotificationsAction::Read { ids } => {
            let ids: Vec<String> = if ids.is_empty() {
                api.notifications()
                    .await?
                    .into_iter()
                    .filter(|n| !n.is_read)
                    .map(|n| n.id)
                    .collect()
            } else {
                ids
            };

            let marked = api.mark_notifications_read(&ids).await?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "marked_read": marked }));
                }
                OutputFormat::Text => {
                    println!(
                        "  {} Marked {marked} notification(s) as read.",
                        style("OK").green().bold()
                    );
                }
            }
        }
    }

    Ok(())
}
