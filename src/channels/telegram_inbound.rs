//! Telegram update payloads and their conversion into stored messages.

use serde::Deserialize;
use serde_json::Value;

use crate::sessions::message::format_local_date;
use crate::sessions::{Message, MessageKind};

/// Telegram update payload. Only new messages are of interest; edits and
/// channel posts are acknowledged and dropped.
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    /// Unix seconds.
    pub date: i64,
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub photo: Option<Vec<Value>>,
    #[serde(default)]
    pub document: Option<TelegramDocument>,
    #[serde(default)]
    pub audio: Option<Value>,
    #[serde(default)]
    pub video: Option<Value>,
    #[serde(default)]
    pub voice: Option<Value>,
    #[serde(default)]
    pub sticker: Option<TelegramSticker>,
    #[serde(default)]
    pub location: Option<TelegramLocation>,
    #[serde(default)]
    pub contact: Option<TelegramContact>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "type")]
    pub chat_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramDocument {
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramSticker {
    #[serde(default)]
    pub emoji: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramLocation {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize)]
pub struct TelegramContact {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone_number: String,
}

impl TelegramUser {
    pub fn display_name(&self) -> String {
        match self.last_name.as_deref().filter(|s| !s.is_empty()) {
            Some(last) => format!("{} {}", self.first_name, last),
            None => self.first_name.clone(),
        }
    }
}

impl TelegramMessage {
    /// Payload kind and the text stored for it. Non-text payloads get a
    /// bracketed description so the model knows what was sent.
    pub fn render(&self) -> (MessageKind, String) {
        let caption = self.caption.as_deref().unwrap_or_default();
        if self.photo.is_some() {
            (MessageKind::Photo, caption.to_string())
        } else if let Some(doc) = &self.document {
            let name = doc.file_name.as_deref().unwrap_or_default();
            (MessageKind::Document, format!("[Document: {name}] {caption}"))
        } else if self.audio.is_some() {
            (MessageKind::Audio, format!("[Audio] {caption}"))
        } else if self.video.is_some() {
            (MessageKind::Video, format!("[Video] {caption}"))
        } else if self.voice.is_some() {
            (MessageKind::Voice, "[Voice message]".to_string())
        } else if let Some(sticker) = &self.sticker {
            let emoji = sticker.emoji.as_deref().unwrap_or_default();
            (MessageKind::Sticker, format!("[Sticker: {emoji}]"))
        } else if let Some(loc) = &self.location {
            (
                MessageKind::Location,
                format!("[Location: {:.6}, {:.6}]", loc.latitude, loc.longitude),
            )
        } else if let Some(contact) = &self.contact {
            let last = contact.last_name.as_deref().unwrap_or_default();
            (
                MessageKind::Contact,
                format!(
                    "[Contact: {} {}, {}]",
                    contact.first_name, last, contact.phone_number
                ),
            )
        } else {
            (MessageKind::Text, self.text.clone().unwrap_or_default())
        }
    }

    /// Stored form of this message. `None` for messages without a sender.
    pub fn to_message(&self) -> Option<Message> {
        let from = self.from.as_ref()?;
        let (kind, text) = self.render();
        Some(Message {
            message_id: self.message_id,
            chat_id: self.chat.id,
            chat_title: self.chat.title.clone(),
            sender_id: from.id,
            sender_name: from.display_name(),
            username: from.username.clone(),
            is_bot: from.is_bot,
            text,
            timestamp: self.date,
            date: format_local_date(self.date),
            kind,
            suppressed: false,
        })
    }
}
