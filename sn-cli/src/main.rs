//! Social network CLI - terminal client for the realtime connection.
//!
//! Opens the same WebSocket session a browser tab would, prints the frames
//! it receives, and sends chat messages from stdin. Useful for debugging the
//! backend hub and for scripting.

mod commands;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::info;

use sn_core::config::{AppConfig, ConfigHandle};
use sn_core::error::SnResult;
use sn_core::logging;

/// Social network realtime client.
#[derive(Parser)]
#[command(
    name = "social-net",
    version,
    about = "Social network realtime client CLI",
    long_about = "A command-line client for the social network backend.\n\
                  Listens for chat messages and notifications over the realtime \
                  connection and sends chat messages from the terminal."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a realtime session and print incoming frames until Ctrl+C.
    Listen {
        /// Chat ids to join in addition to global notifications.
        #[arg(long = "chat")]
        chats: Vec<String>,
        /// Server address (overrides config).
        #[arg(short, long)]
        address: Option<String>,
        /// Session token (overrides config).
        #[arg(short, long)]
        token: Option<String>,
        /// Save connection settings to the config file.
        #[arg(long)]
        save: bool,
    },
    /// Chat interactively: stdin lines are sent to the chat.
    Chat {
        /// Chat id.
        chat_id: String,
        /// Send through the HTTP endpoint instead of the socket.
        #[arg(long)]
        http: bool,
    },
    /// List chats and message history.
    Chats {
        #[command(subcommand)]
        action: commands::chats::ChatsAction,
    },
    /// List and acknowledge notifications.
    Notifications {
        #[command(subcommand)]
        action: commands::notifications::NotificationsAction,
    },
    /// Show the effective configuration and reconnect schedule.
    Status,
}

#[tokio::main]
async fn main() -> SnResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match cli.config.as_deref() {
        Some(path) => AppConfig::load_from_file(Path::new(path))?,
        None => AppConfig::load_default()?,
    };

    // Initialize logging
    let log_dir = config
        .effective_log_dir()
        .unwrap_or_else(|_| PathBuf::from("logs"));
    let level_override = cli.verbose.then_some("debug");
    let _guard = logging::init_from_config(&config.logging, &log_dir, level_override)?;

    let config_handle = ConfigHandle::new(config);

    info!("social-net CLI v{}", sn_core::constants::APP_VERSION);

    match cli.command {
        Commands::Listen { chats, address, token, save } => {
            commands::listen::run(config_handle, chats, address, token, save, cli.format).await
        }
        Commands::Chat { chat_id, http } => {
            commands::chat::run(config_handle, chat_id, http, cli.format).await
        }
        Commands::Chats { action } => {
            commands::chats::run(config_handle, action, cli.format).await
        }
        Commands::Notifications { action } => {
            commands::notifications::run(config_handle, action, cli.format).await
        }
        Commands::Status => commands::status::run(config_handle, cli.format).await,
    }
}
