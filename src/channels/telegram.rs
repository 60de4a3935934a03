//! Telegram Bot API client.
//!
//! Implements [`Transport`] for outbound messages and typing indicators, and
//! exposes `getUpdates` for the long-poll receive loop.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::channels::telegram_inbound::TelegramUpdate;
use crate::channels::{ChannelError, SentMessage, Transport};

/// Timeout for ordinary API calls. `getUpdates` gets the poll hold time on top.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentPayload {
    message_id: i64,
    date: i64,
    #[serde(default)]
    from: Option<SentFrom>,
}

#[derive(Debug, Deserialize)]
struct SentFrom {
    id: i64,
}

#[derive(Debug)]
pub struct TelegramClient {
    client: reqwest::Client,
    base_url: String,
    bot_token: String,
}

impl TelegramClient {
    pub fn new(base_url: &str, bot_token: &str) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChannelError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.bot_token, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<T, ChannelError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(classify_transport_error(&e).to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ChannelError::Transport(classify_transport_error(&e).to_string()))?;
        parse_response(status, &text)
    }

    /// Long-poll for updates starting at `offset`, holding the request open
    /// for up to `poll_timeout_secs`.
    pub async fn get_updates(
        &self,
        offset: i64,
        poll_timeout_secs: u64,
    ) -> Result<Vec<TelegramUpdate>, ChannelError> {
        let body = json!({
            "offset": offset,
            "timeout": poll_timeout_secs,
            "allowed_updates": ["message"],
        });
        let timeout = Duration::from_secs(poll_timeout_secs) + POLL_GRACE;
        self.call("getUpdates", &body, timeout).await
    }
}

#[async_trait]
impl Transport for TelegramClient {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<Option<SentMessage>, ChannelError> {
        if text.is_empty() {
            return Err(ChannelError::Api("text must not be empty".to_string()));
        }
        let body = json!({ "chat_id": chat_id, "text": text });
        let sent: SentPayload = self.call("sendMessage", &body, REQUEST_TIMEOUT).await?;
        Ok(sent.from.map(|from| SentMessage {
            message_id: sent.message_id,
            sender_id: from.id,
            timestamp: sent.date,
        }))
    }

    async fn send_typing(&self, chat_id: i64) -> Result<(), ChannelError> {
        let body = json!({ "chat_id": chat_id, "action": "typing" });
        let _: bool = self.call("sendChatAction", &body, REQUEST_TIMEOUT).await?;
        Ok(())
    }
}

fn parse_response<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T, ChannelError> {
    if status == StatusCode::CONFLICT {
        return Err(ChannelError::Conflict);
    }
    let parsed: ApiResponse<T> = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(_) if !status.is_success() => {
            return Err(ChannelError::Http {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            })
        }
        Err(e) => return Err(ChannelError::Decode(e.to_string())),
    };
    if !parsed.ok {
        let description = parsed
            .description
            .unwrap_or_else(|| "request failed".to_string());
        return Err(if status.is_success() {
            ChannelError::Api(description)
        } else {
            ChannelError::Http {
                status: status.as_u16(),
                message: description,
            }
        });
    }
    parsed
        .result
        .ok_or_else(|| ChannelError::Decode("missing result".to_string()))
}

fn classify_transport_error(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        "request timeout"
    } else if err.is_connect() {
        "connection error"
    } else {
        "request failed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_trims_trailing_slash() {
        let client = TelegramClient::new("https://api.telegram.org/", "123:abc").unwrap();
        assert_eq!(
            client.api_url("getUpdates"),
            "https://api.telegram.org/bot123:abc/getUpdates"
        );
    }

    #[test]
    fn test_parse_sent_message() {
        let sent: SentPayload = parse_response(
            StatusCode::OK,
            r#"{"ok":true,"result":{"message_id":88,"date":1718193600,"from":{"id":999,"is_bot":true},"chat":{"id":1},"text":"hi"}}"#,
        )
        .unwrap();
        assert_eq!(sent.message_id, 88);
        assert_eq!(sent.from.unwrap().id, 999);
    }

    #[test]
    fn test_parse_conflict() {
        let err = parse_response::<bool>(
            StatusCode::CONFLICT,
            r#"{"ok":false,"error_code":409,"description":"Conflict: terminated by other getUpdates request"}"#,
        )
        .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_parse_http_error_with_description() {
        let err = parse_response::<bool>(
            StatusCode::BAD_REQUEST,
            r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "HTTP 400: Bad Request: chat not found");
    }

    #[test]
    fn test_parse_non_json_error() {
        let err = parse_response::<bool>(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, ChannelError::Http { status: 502, .. }));
    }

    #[test]
    fn test_parse_garbage_success_is_decode_error() {
        let err = parse_response::<bool>(StatusCode::OK, "not json").unwrap_err();
        assert!(matches!(err, ChannelError::Decode(_)));
    }

    #[test]
    fn test_parse_updates() {
        let updates: Vec<TelegramUpdate> = parse_response(
            StatusCode::OK,
            r#"{"ok":true,"result":[{"update_id":5,"message":{"message_id":1,"date":0,"chat":{"id":2},"from":{"id":3,"first_name":"A"},"text":"x"}}]}"#,
        )
        .unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].update_id, 5);
    }
}
