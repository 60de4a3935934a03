//! Logging subsystem
//!
//! Structured logging via tracing with JSON (production) and plaintext
//! (development) output. Every writer is wrapped in
//! [`redact::RedactingMakeWriter`] so bot tokens and API keys never reach
//! the log sink.
//!
//! Targets are module paths, so `CONFIDANT_LOG=confidant::scheduler=debug`
//! narrows output to the reply engine.
//!
//! # Environment Variables
//!
//! - `CONFIDANT_LOG` - Primary log level/filter (takes precedence)
//! - `RUST_LOG` - Fallback log level/filter

pub mod redact;

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use crate::logging::redact::RedactingMakeWriter;
use tracing::Level;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

static INIT_GUARD: OnceLock<()> = OnceLock::new();

pub const LOG_ENV: &str = "CONFIDANT_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON format for production (structured logs)
    Json,
    /// Human-readable plaintext for development
    #[default]
    Plaintext,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub output: LogOutput,
    /// Default log level when no env filter is set
    pub default_level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Plaintext,
            output: LogOutput::Stdout,
            default_level: Level::INFO,
        }
    }
}

impl LogConfig {
    /// Plaintext to stdout, debug level.
    pub fn development() -> Self {
        Self {
            format: LogFormat::Plaintext,
            output: LogOutput::Stdout,
            default_level: Level::DEBUG,
        }
    }

    /// JSON to stdout, info level.
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            output: LogOutput::Stdout,
            default_level: Level::INFO,
        }
    }

    /// Pick development or production based on `CONFIDANT_DEV`.
    pub fn from_env() -> Self {
        let dev = std::env::var("CONFIDANT_DEV")
            .map(|v| !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(false);
        if dev {
            Self::development()
        } else {
            Self::production()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to create log file: {0}")]
    FileCreation(#[from] io::Error),
    #[error("failed to parse log filter: {0}")]
    FilterParse(#[from] tracing_subscriber::filter::ParseError),
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("failed to initialize subscriber: {0}")]
    TryInit(#[from] tracing_subscriber::util::TryInitError),
}

/// Build an EnvFilter from `CONFIDANT_LOG`, then `RUST_LOG`, then the default level.
fn build_env_filter(default_level: Level) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = std::env::var(LOG_ENV) {
        return Ok(EnvFilter::try_new(filter)?);
    }
    if let Ok(filter) = std::env::var("RUST_LOG") {
        return Ok(EnvFilter::try_new(filter)?);
    }

    // Keep HTTP client internals quiet unless explicitly asked for.
    let default_filter = format!(
        "{level},hyper=warn,reqwest=warn,h2=warn",
        level = default_level.as_str().to_lowercase()
    );
    Ok(EnvFilter::try_new(default_filter)?)
}

fn build_writer(output: &LogOutput) -> Result<RedactingMakeWriter<BoxMakeWriter>, LoggingError> {
    let inner = match output {
        LogOutput::Stdout => BoxMakeWriter::new(io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(io::stderr),
        LogOutput::File(path) => BoxMakeWriter::new(Mutex::new(File::create(path)?)),
    };
    Ok(RedactingMakeWriter::new(inner))
}

/// Initialize the logging subsystem. Call once at startup; later calls fail
/// with [`LoggingError::AlreadyInitialized`].
pub fn init_logging(config: LogConfig) -> Result<(), LoggingError> {
    if INIT_GUARD.set(()).is_err() {
        return Err(LoggingError::AlreadyInitialized);
    }
    install(config)
}

/// Test-friendly initialization; ignores repeated calls.
pub fn init_test_logging() {
    let _ = install(LogConfig {
        format: LogFormat::Plaintext,
        output: LogOutput::Stderr,
        default_level: Level::DEBUG,
    });
}

fn install(config: LogConfig) -> Result<(), LoggingError> {
    let filter = build_env_filter(config.default_level)?;
    let writer = build_writer(&config.output)?;
    let timer = UtcTime::rfc_3339();

    match config.format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_timer(timer)
                .with_target(true)
                .with_current_span(true)
                .with_span_list(false)
                .with_writer(writer)
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).try_init()?;
        }
        LogFormat::Plaintext => {
            let layer = tracing_subscriber::fmt::layer()
                .with_timer(timer)
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .with_writer(writer)
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).try_init()?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    /// Serializes tests that modify env vars.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_log_config_presets() {
        let dev = LogConfig::development();
        assert_eq!(dev.format, LogFormat::Plaintext);
        assert_eq!(dev.default_level, Level::DEBUG);

        let prod = LogConfig::production();
        assert_eq!(prod.format, LogFormat::Json);
        assert_eq!(prod.output, LogOutput::Stdout);
        assert_eq!(prod.default_level, Level::INFO);
    }

    #[test]
    fn test_log_config_from_env() {
        let _lock = TEST_LOCK.lock().unwrap();
        std::env::set_var("CONFIDANT_DEV", "1");
        assert_eq!(LogConfig::from_env().format, LogFormat::Plaintext);
        std::env::set_var("CONFIDANT_DEV", "false");
        assert_eq!(LogConfig::from_env().format, LogFormat::Json);
        std::env::remove_var("CONFIDANT_DEV");
        assert_eq!(LogConfig::from_env().format, LogFormat::Json);
    }

    #[test]
    fn test_env_filter_default() {
        let _lock = TEST_LOCK.lock().unwrap();
        std::env::remove_var(LOG_ENV);
        std::env::remove_var("RUST_LOG");
        assert!(build_env_filter(Level::INFO).is_ok());
    }

    #[test]
    fn test_env_filter_directives() {
        let _lock = TEST_LOCK.lock().unwrap();
        std::env::set_var(LOG_ENV, "confidant::scheduler=debug,confidant::sessions=info,warn");
        assert!(build_env_filter(Level::INFO).is_ok());
        std::env::remove_var(LOG_ENV);
    }

    #[test]
    fn test_env_filter_rejects_garbage() {
        let _lock = TEST_LOCK.lock().unwrap();
        std::env::set_var(LOG_ENV, "confidant=notalevel");
        assert!(matches!(
            build_env_filter(Level::INFO),
            Err(LoggingError::FilterParse(_))
        ));
        std::env::remove_var(LOG_ENV);
    }

    #[test]
    fn test_file_writer_is_created() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();
        assert!(build_writer(&LogOutput::File(path.clone())).is_ok());
        assert!(path.exists());
    }

    #[test]
    fn test_logging_error_display() {
        assert_eq!(
            LoggingError::AlreadyInitialized.to_string(),
            "logging already initialized"
        );
    }
}
