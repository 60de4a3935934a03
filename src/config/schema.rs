//! Config validation with typed checks and range enforcement.

use serde_json::Value;

use super::Settings;

/// Severity of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Hard error, startup must abort.
    Error,
    /// Advisory, logged but does not prevent startup.
    Warning,
}

#[derive(Debug, Clone)]
pub struct SchemaIssue {
    pub severity: Severity,
    pub path: String,
    pub message: String,
}

impl SchemaIssue {
    fn error(path: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            path: path.to_string(),
            message: message.into(),
        }
    }

    fn warning(path: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            path: path.to_string(),
            message: message.into(),
        }
    }
}

const KNOWN_TOP_LEVEL_KEYS: &[&str] = &["telegram", "gemini", "engine", "persona", "sanitizer"];

/// Flag unknown top-level keys in the raw config value.
pub fn validate_raw(config: &Value) -> Vec<SchemaIssue> {
    let Some(obj) = config.as_object() else {
        return vec![SchemaIssue::error(".", "Config root must be an object")];
    };
    obj.keys()
        .filter(|key| !KNOWN_TOP_LEVEL_KEYS.contains(&key.as_str()))
        .map(|key| {
            SchemaIssue::warning(
                &format!(".{key}"),
                format!("Unknown configuration key: {key}"),
            )
        })
        .collect()
}

/// Validate resolved settings, after env fallbacks have been applied.
pub fn validate_settings(settings: &Settings) -> Vec<SchemaIssue> {
    let mut issues = Vec::new();

    if settings.telegram.bot_token.trim().is_empty() {
        issues.push(SchemaIssue::error(
            ".telegram.botToken",
            "No bot token configured (set telegram.botToken or TELEGRAM_BOT_TOKEN)",
        ));
    }
    if settings.gemini.api_key.trim().is_empty() {
        issues.push(SchemaIssue::error(
            ".gemini.apiKey",
            "No Gemini API key configured (set gemini.apiKey or GEMINI_API_KEY)",
        ));
    }
    check_url(&settings.telegram.api_base_url, ".telegram.apiBaseUrl", &mut issues);
    check_url(&settings.gemini.base_url, ".gemini.baseUrl", &mut issues);

    for (path, temperature) in [
        (".gemini.conversationTemperature", settings.gemini.conversation_temperature),
        (".gemini.distillationTemperature", settings.gemini.distillation_temperature),
    ] {
        if !(0.0..=2.0).contains(&temperature) {
            issues.push(SchemaIssue::error(path, "must be between 0.0 and 2.0"));
        }
    }

    let engine = &settings.engine;
    if engine.tick_interval_secs == 0 {
        issues.push(SchemaIssue::error(".engine.tickIntervalSecs", "must be at least 1"));
    }
    if engine.generation_timeout_secs == 0 {
        issues.push(SchemaIssue::error(
            ".engine.generationTimeoutSecs",
            "must be at least 1",
        ));
    }
    if engine.daily_limit == 0 {
        issues.push(SchemaIssue::warning(
            ".engine.dailyLimit",
            "is 0; the bot will never reply",
        ));
    }
    if engine.distill_backlog < 1 {
        issues.push(SchemaIssue::error(".engine.distillBacklog", "must be at least 1"));
    }
    if engine.history_window == 0 {
        issues.push(SchemaIssue::error(".engine.historyWindow", "must be at least 1"));
    }
    if settings.telegram.poll_timeout_secs > 50 {
        issues.push(SchemaIssue::warning(
            ".telegram.pollTimeoutSecs",
            "above 50s is often cut short by proxies",
        ));
    }

    if settings.persona.name.trim().is_empty() {
        issues.push(SchemaIssue::error(".persona.name", "must not be empty"));
    }

    issues
}

fn check_url(raw: &str, path: &str, issues: &mut Vec<SchemaIssue>) {
    match url::Url::parse(raw) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => {}
        Ok(u) => issues.push(SchemaIssue::error(
            path,
            format!("unsupported scheme '{}'", u.scheme()),
        )),
        Err(e) => issues.push(SchemaIssue::error(path, format!("invalid URL: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_settings() -> Settings {
        let mut s = Settings::default();
        s.telegram.bot_token = "123:abc".to_string();
        s.gemini.api_key = "key".to_string();
        s
    }

    #[test]
    fn test_valid_settings_have_no_issues() {
        assert!(validate_settings(&valid_settings()).is_empty());
    }

    #[test]
    fn test_missing_secrets_are_errors() {
        let issues = validate_settings(&Settings::default());
        let paths: Vec<_> = issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .map(|i| i.path.as_str())
            .collect();
        assert!(paths.contains(&".telegram.botToken"));
        assert!(paths.contains(&".gemini.apiKey"));
    }

    #[test]
    fn test_zero_limit_is_only_a_warning() {
        let mut s = valid_settings();
        s.engine.daily_limit = 0;
        let issues = validate_settings(&s);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Warning);
    }

    #[test]
    fn test_bad_url_and_temperature() {
        let mut s = valid_settings();
        s.gemini.base_url = "ftp://example.com".to_string();
        s.gemini.conversation_temperature = 3.5;
        let issues = validate_settings(&s);
        assert!(issues.iter().any(|i| i.path == ".gemini.baseUrl"));
        assert!(issues.iter().any(|i| i.path == ".gemini.conversationTemperature"));
    }

    #[test]
    fn test_unknown_top_level_key_warns() {
        let issues = validate_raw(&json!({ "engine": {}, "gatway": {} }));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, ".gatway");
        assert_eq!(issues[0].severity, Severity::Warning);
    }

    #[test]
    fn test_non_object_root_is_error() {
        let issues = validate_raw(&json!([1, 2]));
        assert_eq!(issues[0].severity, Severity::Error);
    }
}
