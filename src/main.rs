use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use serde_json::Value;
use tracing::{error, info, warn};

use confidant::agent::gemini::GeminiGenerator;
use confidant::channels::allowlist::{AllowList, ALLOWLIST_FILE};
use confidant::channels::inbound::InboundHandler;
use confidant::channels::telegram::TelegramClient;
use confidant::channels::telegram_receive::Intake;
use confidant::cli::{self, Cli, Command, ConfigCommand};
use confidant::config::{self, Settings};
use confidant::logging;
use confidant::messages::ThreadRandom;
use confidant::scheduler::Engine;
use confidant::sessions::ChatStateStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        // No subcommand or explicit `start` both launch the bot.
        None | Some(Command::Start) => run_bot().await,

        Some(Command::Config(sub)) => {
            match sub {
                ConfigCommand::Show => cli::handle_config_show()?,
                ConfigCommand::Path => cli::handle_config_path(),
            }
            Ok(())
        }

        Some(Command::Inspect { chat_id }) => cli::handle_inspect(chat_id),

        Some(Command::Version) => {
            cli::handle_version();
            Ok(())
        }
    }
}

/// Run intake and the reply engine until a shutdown signal arrives.
async fn run_bot() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging(logging::LogConfig::from_env())?;
    let settings = load_and_validate_config()?;

    let state_dir = cli::state_dir(&settings);
    std::fs::create_dir_all(&state_dir)?;
    let store = Arc::new(ChatStateStore::open(&state_dir, settings.engine.daily_limit)?);
    let allowlist = AllowList::load(&state_dir.join(ALLOWLIST_FILE))?;

    let telegram = Arc::new(TelegramClient::new(
        &settings.telegram.api_base_url,
        &settings.telegram.bot_token,
    )?);
    let generator = Arc::new(GeminiGenerator::new(
        settings.gemini.clone(),
        settings.persona.clone(),
    )?);

    log_startup_banner(&settings, &state_dir, &store, &allowlist);

    let engine = Engine::new(
        store.clone(),
        telegram.clone(),
        generator,
        Arc::new(ThreadRandom),
        &settings,
    );
    let handler = Arc::new(InboundHandler::new(store.clone(), telegram.clone(), allowlist));
    let intake = Arc::new(Intake::new(
        telegram,
        handler,
        store.clone(),
        settings.telegram.poll_timeout_secs,
    ));

    let (engine_tx, engine_rx) = tokio::sync::watch::channel(false);
    let (intake_tx, intake_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(engine.run(settings.engine.tick_interval(), engine_rx));
    let intake_task = tokio::spawn(intake.run(intake_rx));

    let reason = await_shutdown_trigger().await;
    info!("Shutdown signal received ({})", reason);

    // Scheduler first, then intake.
    let _ = engine_tx.send(true);
    if let Err(e) = engine_task.await {
        error!("Reply engine task failed: {}", e);
    }
    let _ = intake_tx.send(true);
    if let Err(e) = intake_task.await {
        error!("Intake task failed: {}", e);
    }

    store.flush();
    let pending = store.pending_write_count();
    if pending > 0 {
        warn!(pending, "writes still pending at exit");
    }
    info!("Confidant shut down");
    Ok(())
}

/// Load configuration, validate it, and abort on errors.
fn load_and_validate_config() -> Result<Settings, Box<dyn std::error::Error>> {
    let raw = config::load_config(&config::get_config_path()).unwrap_or_else(|e| {
        warn!("Failed to load config: {}, using defaults", e);
        Value::Object(serde_json::Map::new())
    });
    let settings = config::resolve_settings(&raw)?;

    let mut issues = config::schema::validate_raw(&raw);
    issues.extend(config::schema::validate_settings(&settings));
    let mut has_errors = false;
    for issue in &issues {
        match issue.severity {
            config::schema::Severity::Error => {
                error!("Config error at {}: {}", issue.path, issue.message);
                has_errors = true;
            }
            config::schema::Severity::Warning => {
                warn!("Config warning at {}: {}", issue.path, issue.message);
            }
        }
    }
    if has_errors {
        return Err("Configuration contains errors, aborting startup".into());
    }

    Ok(settings)
}

fn log_startup_banner(
    settings: &Settings,
    state_dir: &Path,
    store: &ChatStateStore,
    allowlist: &AllowList,
) {
    info!("Confidant v{}", env!("CARGO_PKG_VERSION"));
    info!("State directory: {}", state_dir.display());
    info!("Persona: {}", settings.persona.name);
    info!(
        "Models: conversation={}, distillation={}",
        settings.gemini.conversation_model, settings.gemini.distillation_model
    );
    info!(
        "Known chats: {}, allowed users: {}",
        store.list_chat_ids().len(),
        allowlist.len()
    );
    info!(
        "Tick every {}s, daily limit {} per chat",
        settings.engine.tick_interval_secs, settings.engine.daily_limit
    );
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
#[cfg(unix)]
async fn await_shutdown_trigger() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "ctrl-c",
                _ = sigterm.recv() => "SIGTERM",
            }
        }
        Err(e) => {
            warn!(
                "Failed to install SIGTERM handler: {}; falling back to Ctrl+C only",
                e
            );
            match tokio::signal::ctrl_c().await {
                Ok(()) => "ctrl-c",
                Err(e) => {
                    panic!("Failed to install Ctrl+C handler: {}", e);
                }
            }
        }
    }
}

/// On non-Unix platforms, only Ctrl+C is available.
#[cfg(not(unix))]
async fn await_shutdown_trigger() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "ctrl-c",
        Err(e) => {
            panic!("Failed to install Ctrl+C handler: {}", e);
        }
    }
}
