//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `start` (default) -- run Telegram intake and the reply engine
//! - `config show|path` -- print the effective configuration or its location
//! - `inspect <chat-id>` -- print a stored chat's memory, cursor and quota
//! - `version` -- print version info

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{self, Settings};
use crate::logging::redact::redact_json_value;
use crate::sessions::{ChatStateStore, SessionSummary, StoreError};

/// Companion chatbot engine.
#[derive(Parser, Debug)]
#[command(
    name = "confidant",
    version = env!("CARGO_PKG_VERSION"),
    about = "Confidant: a paced, memory-keeping companion chatbot for Telegram"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start intake and the reply engine (default when no subcommand is given).
    Start,

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Print the stored state of one chat as JSON.
    Inspect {
        /// Telegram chat id.
        #[arg(allow_hyphen_values = true)]
        chat_id: i64,
    },

    /// Print version information.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration with secrets redacted.
    Show,
    /// Print the config file path.
    Path,
}

/// Run the `config show` subcommand.
pub fn handle_config_show() -> Result<(), Box<dyn std::error::Error>> {
    let settings = config::load_settings()?;
    println!("{}", render_settings(&settings)?);
    Ok(())
}

fn render_settings(settings: &Settings) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(settings)?;
    redact_json_value(&mut value);
    serde_json::to_string_pretty(&value)
}

/// Run the `config path` subcommand.
pub fn handle_config_path() {
    println!("{}", config::get_config_path().display());
}

/// Run the `inspect <chat-id>` subcommand.
pub fn handle_inspect(chat_id: i64) -> Result<(), Box<dyn std::error::Error>> {
    let settings = config::load_settings()?;
    match load_summary(&settings, chat_id)? {
        Some(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        None => {
            eprintln!("No stored chat with id {}", chat_id);
            std::process::exit(1);
        }
    }
}

/// Read one chat's summary without writing anything to the state directory,
/// so it is safe to run next to a live bot.
fn load_summary(settings: &Settings, chat_id: i64) -> Result<Option<SessionSummary>, StoreError> {
    let store = ChatStateStore::open_read_only(state_dir(settings), settings.engine.daily_limit)?;
    Ok(store.summary(chat_id))
}

/// Run the `version` subcommand.
pub fn handle_version() {
    println!("confidant {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Platform:   {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}

/// State directory from settings, falling back to the default location.
pub fn state_dir(settings: &Settings) -> PathBuf {
    settings
        .engine
        .state_dir
        .clone()
        .unwrap_or_else(config::default_state_dir)
}
