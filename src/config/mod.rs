//! Configuration loading
//!
//! A single JSON5 file with `${VAR}` environment substitution, deserialized
//! into the typed [`Settings`] tree from [`defaults`].

pub mod defaults;
pub mod schema;

use regex::Regex;
use serde_json::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

pub use defaults::Settings;

pub const CONFIG_FILE_NAME: &str = "confidant.json5";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse JSON5 at {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Failed to read config file {path}: {message}")]
    ReadError { path: String, message: String },

    #[error("Missing environment variable: {var}")]
    MissingEnvVar { var: String },

    #[error("Validation error at {path}: {message}")]
    ValidationError { path: String, message: String },
}

/// Base directory for config and state.
/// Priority: CONFIDANT_STATE_DIR > ~/.confidant
pub fn default_state_dir() -> PathBuf {
    if let Ok(dir) = env::var("CONFIDANT_STATE_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".confidant")
}

/// Get the config file path.
/// Priority: CONFIDANT_CONFIG_PATH > CONFIDANT_STATE_DIR/confidant.json5 > ~/.confidant/confidant.json5
pub fn get_config_path() -> PathBuf {
    if let Ok(path) = env::var("CONFIDANT_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    default_state_dir().join(CONFIG_FILE_NAME)
}

/// Load and parse the config file. A missing file yields `{}`.
pub fn load_config(path: &Path) -> Result<Value, ConfigError> {
    if !path.exists() {
        return Ok(Value::Object(serde_json::Map::new()));
    }

    let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut value = parse_json5(&content, path)?;
    substitute_env_vars(&mut value)?;
    Ok(value)
}

/// Load the config from [`get_config_path`], apply env fallbacks and resolve
/// the state directory.
pub fn load_settings() -> Result<Settings, ConfigError> {
    let value = load_config(&get_config_path())?;
    resolve_settings(&value)
}

/// Typed settings from an already loaded config value.
pub fn resolve_settings(value: &Value) -> Result<Settings, ConfigError> {
    let mut settings = Settings::from_value(value)?;
    settings.apply_env_fallbacks();
    if settings.engine.state_dir.is_none() {
        settings.engine.state_dir = Some(default_state_dir());
    }
    Ok(settings)
}

fn parse_json5(content: &str, path: &Path) -> Result<Value, ConfigError> {
    json5::from_str(content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Substitute environment variables in string values.
/// Pattern: ${VAR} where VAR matches [A-Z_][A-Z0-9_]*
/// Escape with $${VAR} to get literal ${VAR}
fn substitute_env_vars(value: &mut Value) -> Result<(), ConfigError> {
    match value {
        Value::String(s) => {
            *s = substitute_env_in_string(s)?;
        }
        Value::Object(obj) => {
            for (_, v) in obj.iter_mut() {
                substitute_env_vars(v)?;
            }
        }
        Value::Array(arr) => {
            for item in arr.iter_mut() {
                substitute_env_vars(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\$?\{([A-Z_][A-Z0-9_]*)\}").expect("failed to compile regex: env_var")
});

fn substitute_env_in_string(s: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(s.len());
    let mut last_end = 0;

    for caps in ENV_VAR_PATTERN.captures_iter(s) {
        let (Some(full_match), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let var_name = name.as_str();
        result.push_str(&s[last_end..full_match.start()]);

        if full_match.as_str().starts_with("$$") {
            result.push_str(&format!("${{{}}}", var_name));
        } else {
            let value = env::var(var_name).map_err(|_| ConfigError::MissingEnvVar {
                var: var_name.to_string(),
            })?;
            result.push_str(&value);
        }

        last_end = full_match.end();
    }

    result.push_str(&s[last_end..]);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_missing_file_is_empty_object() {
        let dir = TempDir::new().unwrap();
        let value = load_config(&dir.path().join("nope.json5")).unwrap();
        assert_eq!(value, json!({}));
    }

    #[test]
    fn test_json5_comments_and_trailing_commas() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{
                // tuned for a small group
                engine: { dailyLimit: 12, },
            }"#,
        );
        let value = load_config(&path).unwrap();
        assert_eq!(value["engine"]["dailyLimit"], 12);
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "{ engine: ");
        match load_config(&path) {
            Err(ConfigError::ParseError { path: p, .. }) => assert!(p.ends_with(CONFIG_FILE_NAME)),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_env_substitution() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::set_var("CONFIDANT_TEST_TOKEN", "123:abc");
        let out = substitute_env_in_string("bot${CONFIDANT_TEST_TOKEN}/x").unwrap();
        assert_eq!(out, "bot123:abc/x");
        env::remove_var("CONFIDANT_TEST_TOKEN");
    }

    #[test]
    fn test_env_substitution_escape() {
        let out = substitute_env_in_string("literal $${NOT_EXPANDED}").unwrap();
        assert_eq!(out, "literal ${NOT_EXPANDED}");
    }

    #[test]
    fn test_env_substitution_missing_var() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::remove_var("CONFIDANT_TEST_ABSENT");
        let err = substitute_env_in_string("${CONFIDANT_TEST_ABSENT}").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar { var } if var == "CONFIDANT_TEST_ABSENT"));
    }

    #[test]
    fn test_config_path_env_override() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::set_var("CONFIDANT_CONFIG_PATH", "/tmp/custom.json5");
        assert_eq!(get_config_path(), PathBuf::from("/tmp/custom.json5"));
        env::remove_var("CONFIDANT_CONFIG_PATH");

        env::set_var("CONFIDANT_STATE_DIR", "/srv/confidant");
        assert_eq!(
            get_config_path(),
            PathBuf::from("/srv/confidant").join(CONFIG_FILE_NAME)
        );
        env::remove_var("CONFIDANT_STATE_DIR");
    }

    #[test]
    fn test_load_settings_resolves_state_dir() {
        let _lock = ENV_LOCK.lock().unwrap();
        let dir = TempDir::new().unwrap();
        env::remove_var("CONFIDANT_CONFIG_PATH");
        env::set_var("CONFIDANT_STATE_DIR", dir.path());
        write_config(&dir, "{ engine: { tickIntervalSecs: 5 } }");

        let settings = load_settings().unwrap();
        assert_eq!(settings.engine.tick_interval_secs, 5);
        assert_eq!(settings.engine.state_dir.as_deref(), Some(dir.path()));
        env::remove_var("CONFIDANT_STATE_DIR");
    }
}
