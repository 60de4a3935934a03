//! Typed settings with defaults.
//!
//! Every section deserializes with `#[serde(default)]`, so a partial (or
//! empty) config file yields a complete [`Settings`]. Secrets that are not
//! present in the file are picked up from the environment afterwards by
//! [`Settings::apply_env_fallbacks`].

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::ConfigError;
use crate::scheduler::distill::DEFAULT_DISTILL_BACKLOG;
use crate::sessions::DEFAULT_DAILY_LIMIT;

pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_CONVERSATION_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_DISTILLATION_MODEL: &str = "gemini-2.5-flash-lite";

const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TICK_INTERVAL_SECS: u64 = 15;
const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 120;
const DEFAULT_HISTORY_WINDOW: usize = 20;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub telegram: TelegramSettings,
    #[serde(default)]
    pub gemini: GeminiSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub persona: PersonaSettings,
    #[serde(default)]
    pub sanitizer: SanitizerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramSettings {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_telegram_api_base")]
    pub api_base_url: String,
    /// Long-poll hold time passed to `getUpdates`.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base_url: default_telegram_api_base(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

fn default_telegram_api_base() -> String {
    DEFAULT_TELEGRAM_API_BASE.to_string()
}
fn default_poll_timeout_secs() -> u64 {
    DEFAULT_POLL_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
    #[serde(default = "default_conversation_model")]
    pub conversation_model: String,
    #[serde(default = "default_distillation_model")]
    pub distillation_model: String,
    #[serde(default = "default_conversation_temperature")]
    pub conversation_temperature: f64,
    #[serde(default = "default_distillation_temperature")]
    pub distillation_temperature: f64,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_gemini_base_url(),
            conversation_model: default_conversation_model(),
            distillation_model: default_distillation_model(),
            conversation_temperature: default_conversation_temperature(),
            distillation_temperature: default_distillation_temperature(),
        }
    }
}

fn default_gemini_base_url() -> String {
    DEFAULT_GEMINI_BASE_URL.to_string()
}
fn default_conversation_model() -> String {
    DEFAULT_CONVERSATION_MODEL.to_string()
}
fn default_distillation_model() -> String {
    DEFAULT_DISTILLATION_MODEL.to_string()
}
fn default_conversation_temperature() -> f64 {
    0.75
}
fn default_distillation_temperature() -> f64 {
    0.43
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    /// Where chat logs and snapshots live. Empty means "next to the config file".
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,
    /// Unsummarized messages that trigger a memory update.
    #[serde(default = "default_distill_backlog")]
    pub distill_backlog: i64,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            state_dir: None,
            tick_interval_secs: default_tick_interval_secs(),
            daily_limit: default_daily_limit(),
            generation_timeout_secs: default_generation_timeout_secs(),
            distill_backlog: default_distill_backlog(),
            history_window: default_history_window(),
        }
    }
}

impl EngineSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }
}

fn default_tick_interval_secs() -> u64 {
    DEFAULT_TICK_INTERVAL_SECS
}
fn default_daily_limit() -> u32 {
    DEFAULT_DAILY_LIMIT
}
fn default_generation_timeout_secs() -> u64 {
    DEFAULT_GENERATION_TIMEOUT_SECS
}
fn default_distill_backlog() -> i64 {
    DEFAULT_DISTILL_BACKLOG
}
fn default_history_window() -> usize {
    DEFAULT_HISTORY_WINDOW
}

/// Fixed facts about the bot's own character. These seed the `persona`
/// profile of a fresh memory record and are restated in every prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaSettings {
    #[serde(default = "default_persona_name")]
    pub name: String,
    #[serde(default = "default_persona_age")]
    pub age: u32,
    #[serde(default)]
    pub occupation: String,
    #[serde(default)]
    pub residence: String,
    #[serde(default)]
    pub relationship_status: String,
    #[serde(default)]
    pub flirt_level: String,
    /// Free-form character description appended to the system instruction.
    #[serde(default)]
    pub backstory: String,
}

impl Default for PersonaSettings {
    fn default() -> Self {
        Self {
            name: default_persona_name(),
            age: default_persona_age(),
            occupation: String::new(),
            residence: String::new(),
            relationship_status: String::new(),
            flirt_level: String::new(),
            backstory: String::new(),
        }
    }
}

fn default_persona_name() -> String {
    "Mira".to_string()
}
fn default_persona_age() -> u32 {
    24
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizerSettings {
    /// Additional words or phrases, merged with the built-in list.
    #[serde(default)]
    pub extra_terms: Vec<String>,
}

impl Settings {
    /// Deserialize a parsed config value. Missing sections and fields take
    /// their defaults.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let settings: Settings =
            serde_json::from_value(value.clone()).map_err(|e| ConfigError::ValidationError {
                path: ".".to_string(),
                message: e.to_string(),
            })?;
        debug!(target: "config", "settings deserialized");
        Ok(settings)
    }

    /// Fill empty secrets from the conventional environment variables.
    pub fn apply_env_fallbacks(&mut self) {
        if self.telegram.bot_token.is_empty() {
            if let Some(token) = non_empty_env("TELEGRAM_BOT_TOKEN") {
                self.telegram.bot_token = token;
            }
        }
        if self.gemini.api_key.is_empty() {
            if let Some(key) =
                non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
            {
                self.gemini.api_key = key;
            }
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
