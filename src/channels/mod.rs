//! Chat transport
//!
//! The [`Transport`] trait is the outbound boundary used by the reply engine
//! (send a message, show the typing indicator). The Telegram Bot API is the
//! concrete implementation; inbound updates arrive through the long-poll
//! loop in [`telegram_receive`] and are recorded by [`inbound`].

pub mod allowlist;
pub mod inbound;
pub mod telegram;
pub mod telegram_inbound;
pub mod telegram_receive;

use async_trait::async_trait;

/// What the transport reports back about a message it delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: i64,
    /// Id of the sending account (the bot itself).
    pub sender_id: i64,
    /// Unix seconds as reported by the transport.
    pub timestamp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Another process is polling the same bot (HTTP 409).
    #[error("conflict: another instance is receiving updates")]
    Conflict,
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("API error: {0}")]
    Api(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl ChannelError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `text` to `chat_id`. `Ok(None)` means the message went out but
    /// the transport did not report an id for it.
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<Option<SentMessage>, ChannelError>;

    /// Show the typing indicator in `chat_id`.
    async fn send_typing(&self, chat_id: i64) -> Result<(), ChannelError>;
}
