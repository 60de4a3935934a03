//! Google Gemini generator.
//!
//! Calls `{base_url}/models/{model}:generateContent` with the persona system
//! instruction. Distillation requests structured JSON output with a response
//! schema; conversation requests plain text. Safety refusals surface as
//! [`GenerationError::ContentBlocked`].

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agent::prompts;
use crate::agent::provider::{ConversationRequest, DistillRequest, Generator};
use crate::agent::GenerationError;
use crate::config::defaults::{GeminiSettings, PersonaSettings};
use crate::sessions::MemoryRecord;

/// Finish reasons that mean the model refused rather than finished.
const BLOCKING_FINISH_REASONS: &[&str] = &["SAFETY", "BLOCKLIST", "PROHIBITED_CONTENT"];

const HARM_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Debug)]
pub struct GeminiGenerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    settings: GeminiSettings,
    persona: PersonaSettings,
}

impl GeminiGenerator {
    pub fn new(settings: GeminiSettings, persona: PersonaSettings) -> Result<Self, GenerationError> {
        if settings.api_key.trim().is_empty() {
            return Err(GenerationError::InvalidApiKey(
                "API key must not be empty".to_string(),
            ));
        }
        let parsed = url::Url::parse(&settings.base_url).map_err(|e| {
            GenerationError::Provider(format!("invalid base URL \"{}\": {e}", settings.base_url))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(GenerationError::Provider(format!(
                "base URL must use http or https, got \"{}\"",
                parsed.scheme()
            )));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| GenerationError::Provider(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            settings,
            persona,
        })
    }

    fn endpoint(&self, model: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    async fn generate(&self, model: &str, body: &Value) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(self.endpoint(model))
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(classify_transport_error)?;
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &text));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text)
            .map_err(|e| GenerationError::Malformed(format!("response is not valid JSON: {e}")))?;
        extract_text(parsed)
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn distill(&self, request: DistillRequest) -> Result<MemoryRecord, GenerationError> {
        let prompt = prompts::distillation_prompt(&self.persona, &request.memory, &request.history);
        let body = build_body(
            prompts::distillation_system_instruction(),
            &prompt,
            self.settings.distillation_temperature,
            Some(prompts::memory_response_schema()),
        );
        tracing::debug!(chat_id = request.chat_id, model = %self.settings.distillation_model, "distillation call");
        let text = self.generate(&self.settings.distillation_model, &body).await?;
        serde_json::from_str(strip_code_fence(&text))
            .map_err(|e| GenerationError::Malformed(format!("memory record: {e}")))
    }

    async fn converse(&self, request: ConversationRequest) -> Result<String, GenerationError> {
        let system = prompts::conversation_system_instruction(&self.persona, request.must_answer);
        let prompt = prompts::conversation_prompt(
            &self.persona,
            &request.memory,
            &request.history,
            request.story,
            request.now,
        );
        let body = build_body(&system, &prompt, self.settings.conversation_temperature, None);
        tracing::debug!(
            chat_id = request.chat_id,
            model = %self.settings.conversation_model,
            story = request.story,
            must_answer = request.must_answer,
            "conversation call"
        );
        self.generate(&self.settings.conversation_model, &body).await
    }
}

/// JSON body for `generateContent`.
fn build_body(system: &str, prompt: &str, temperature: f64, schema: Option<Value>) -> Value {
    let safety: Vec<Value> = HARM_CATEGORIES
        .iter()
        .map(|category| json!({ "category": category, "threshold": "OFF" }))
        .collect();

    let mut generation_config = json!({ "temperature": temperature });
    if let Some(schema) = schema {
        generation_config["responseMimeType"] = json!("application/json");
        generation_config["responseSchema"] = schema;
    }

    json!({
        "systemInstruction": { "parts": [{ "text": system }] },
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "safetySettings": safety,
        "generationConfig": generation_config,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

/// Concatenated text of the first candidate. A candidate without content
/// yields an empty string.
fn extract_text(response: GenerateContentResponse) -> Result<String, GenerationError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(GenerationError::ContentBlocked(reason));
    }
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| GenerationError::Malformed("no candidates in response".to_string()))?;
    if let Some(reason) = candidate.finish_reason.as_deref() {
        if BLOCKING_FINISH_REASONS.contains(&reason) {
            return Err(GenerationError::ContentBlocked(reason.to_string()));
        }
    }
    Ok(candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<String>())
        .unwrap_or_default())
}

/// Strip a surrounding markdown code fence (```json ... ```), if any.
fn strip_code_fence(text: &str) -> &str {
    let mut s = text.trim();
    if let Some(rest) = s.strip_prefix("```json").or_else(|| s.strip_prefix("```")) {
        s = rest.trim_start();
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest.trim_end();
    }
    s
}

fn classify_status(status: u16, body: &str) -> GenerationError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect());
    match status {
        401 | 403 => GenerationError::InvalidApiKey(message),
        400 if message.contains("API key") => GenerationError::InvalidApiKey(message),
        408 | 504 => GenerationError::Timeout,
        _ => GenerationError::Provider(format!("API returned {status}: {message}")),
    }
}

fn classify_transport_error(err: reqwest::Error) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Timeout
    } else if err.is_connect() {
        GenerationError::Provider(format!("connection error: {err}"))
    } else {
        GenerationError::Provider(format!("HTTP request failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(key: &str) -> GeminiSettings {
        GeminiSettings {
            api_key: key.to_string(),
            ..Default::default()
        }
    }

    fn parse(raw: &str) -> Result<String, GenerationError> {
        extract_text(serde_json::from_str(raw).unwrap())
    }

    #[test]
    fn test_new_rejects_empty_api_key() {
        let err = GeminiGenerator::new(settings("  "), PersonaSettings::default()).unwrap_err();
        assert!(matches!(err, GenerationError::InvalidApiKey(_)));
    }

    #[test]
    fn test_new_rejects_bad_base_url() {
        let mut s = settings("AIzaSyA-valid-key-1234567890");
        s.base_url = "ftp://example.com".into();
        assert!(GeminiGenerator::new(s.clone(), PersonaSettings::default()).is_err());
        s.base_url = "not a url".into();
        assert!(GeminiGenerator::new(s, PersonaSettings::default()).is_err());
    }

    #[test]
    fn test_endpoint() {
        let mut s = settings("k");
        s.base_url = "https://proxy.example.com/v1beta/".into();
        let generator = GeminiGenerator::new(s, PersonaSettings::default()).unwrap();
        assert_eq!(
            generator.endpoint("gemini-2.5-flash"),
            "https://proxy.example.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(
            generator.endpoint("models/gemini-2.5-flash-lite"),
            "https://proxy.example.com/v1beta/models/gemini-2.5-flash-lite:generateContent"
        );
    }

    #[test]
    fn test_build_body_plain() {
        let body = build_body("sys", "hello", 0.75, None);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["generationConfig"]["temperature"], 0.75);
        assert!(body["generationConfig"].get("responseSchema").is_none());
        assert_eq!(body["safetySettings"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_build_body_structured() {
        let body = build_body("sys", "p", 0.43, Some(prompts::memory_response_schema()));
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["responseSchema"]["type"], "OBJECT");
    }

    #[test]
    fn test_extract_text() {
        let text = parse(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hey "},{"text":"du"}],"role":"model"},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(text, "Hey du");
    }

    #[test]
    fn test_extract_text_without_content_is_empty() {
        assert_eq!(parse(r#"{"candidates":[{"finishReason":"STOP"}]}"#).unwrap(), "");
    }

    #[test]
    fn test_prompt_feedback_block() {
        let err = parse(r#"{"promptFeedback":{"blockReason":"PROHIBITED_CONTENT"}}"#).unwrap_err();
        assert!(matches!(err, GenerationError::ContentBlocked(ref r) if r == "PROHIBITED_CONTENT"));
    }

    #[test]
    fn test_finish_reason_block() {
        for reason in ["SAFETY", "BLOCKLIST", "PROHIBITED_CONTENT"] {
            let raw = format!(r#"{{"candidates":[{{"finishReason":"{reason}"}}]}}"#);
            assert!(parse(&raw).unwrap_err().is_content_blocked(), "{reason}");
        }
        assert!(parse(r#"{"candidates":[{"finishReason":"MAX_TOKENS"}]}"#).is_ok());
    }

    #[test]
    fn test_no_candidates_is_malformed() {
        assert!(matches!(parse("{}").unwrap_err(), GenerationError::Malformed(_)));
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{}\n```  "), "{}");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn test_fenced_memory_record_decodes() {
        let raw = "```json\n{\"correspondent\":{\"name\":\"Jonas\",\"age\":31}}\n```";
        let record: MemoryRecord = serde_json::from_str(strip_code_fence(raw)).unwrap();
        assert_eq!(record.correspondent.name, "Jonas");
        assert_eq!(record.correspondent.age, 31);
        assert!(record.persona.name.is_empty());
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(403, r#"{"error":{"message":"Permission denied"}}"#),
            GenerationError::InvalidApiKey(_)
        ));
        assert!(matches!(
            classify_status(400, r#"{"error":{"message":"API key not valid. Please pass a valid API key."}}"#),
            GenerationError::InvalidApiKey(_)
        ));
        assert!(matches!(classify_status(504, ""), GenerationError::Timeout));
        let err = classify_status(500, r#"{"error":{"message":"internal"}}"#);
        assert_eq!(err.to_string(), "provider error: API returned 500: internal");
    }
}
