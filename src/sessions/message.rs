//! Stored chat messages.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};

/// Format of [`Message::date`], in the host's local time zone.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What the sender actually sent. Non-text payloads carry a rendered
/// caption in [`Message::text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Photo,
    Document,
    Audio,
    Video,
    Voice,
    Sticker,
    Location,
    Contact,
}

/// One line of a chat log.
///
/// Identity fields never change after the message is stored; only
/// `suppressed` is flipped when the bot decides a message needs no reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_title: Option<String>,
    pub sender_id: i64,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub text: String,
    /// Unix seconds.
    pub timestamp: i64,
    /// Human-readable local time, see [`DATE_FORMAT`].
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub suppressed: bool,
}

impl Message {
    /// Build the record for a message the bot itself sent.
    pub fn from_bot(
        chat_id: i64,
        message_id: i64,
        sender_id: i64,
        sender_name: &str,
        text: &str,
        timestamp: i64,
    ) -> Self {
        Self {
            message_id,
            chat_id,
            chat_title: None,
            sender_id,
            sender_name: sender_name.to_string(),
            username: None,
            is_bot: true,
            text: text.to_string(),
            timestamp,
            date: format_local_date(timestamp),
            kind: MessageKind::Text,
            suppressed: false,
        }
    }

    /// Parse [`Message::date`] back into a local timestamp.
    pub fn sent_at(&self) -> Option<DateTime<Local>> {
        parse_local_date(&self.date)
    }
}

/// Render unix seconds as a local `YYYY-MM-DD HH:MM:SS` string. Out-of-range
/// values render as an empty string.
pub fn format_local_date(timestamp: i64) -> String {
    Local
        .timestamp_opt(timestamp, 0)
        .single()
        .map(|dt| dt.format(DATE_FORMAT).to_string())
        .unwrap_or_default()
}

pub fn parse_local_date(date: &str) -> Option<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(date, DATE_FORMAT).ok()?;
    Local.from_local_datetime(&naive).earliest()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_date_round_trip() {
        let ts = 1_718_000_000;
        let date = format_local_date(ts);
        let parsed = parse_local_date(&date).unwrap();
        assert_eq!(parsed.timestamp(), ts);
    }

    #[test]
    fn test_unparseable_date() {
        assert!(parse_local_date("yesterday-ish").is_none());
        assert!(parse_local_date("").is_none());
    }

    #[test]
    fn test_old_log_lines_deserialize_with_defaults() {
        let line = r#"{"message_id":7,"chat_id":42,"sender_id":1,"timestamp":1700000000}"#;
        let msg: Message = serde_json::from_str(line).unwrap();
        assert_eq!(msg.kind, MessageKind::Text);
        assert!(!msg.suppressed);
        assert!(!msg.is_bot);
        assert!(msg.username.is_none());
    }

    #[test]
    fn test_bot_message_carries_date() {
        let msg = Message::from_bot(42, 9, 100, "Mira", "hey", 1_700_000_000);
        assert!(msg.is_bot);
        assert_eq!(msg.sent_at().map(|d| d.timestamp()), Some(1_700_000_000));
    }
}
