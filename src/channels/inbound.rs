//! Inbound message handling.
//!
//! Gates each incoming Telegram message on the allow-list and records
//! accepted ones in the chat store. Replies are never produced here; the
//! reply engine picks new messages up on its next tick.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channels::allowlist::AllowList;
use crate::channels::telegram_inbound::TelegramMessage;
use crate::channels::Transport;
use crate::sessions::ChatStateStore;

/// Sent once per message from a sender that is not on the allow-list.
pub const REFUSAL_TEXT: &str = "Sorry, you need to be approved before we can chat. :)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Stored in the chat history.
    Recorded,
    /// Sender not allowed; a refusal was sent and nothing was stored.
    Refused,
    /// No sender (e.g. channel posts), or a message from a bot.
    Ignored,
}

pub struct InboundHandler {
    store: Arc<ChatStateStore>,
    transport: Arc<dyn Transport>,
    allowlist: AllowList,
}

impl InboundHandler {
    pub fn new(store: Arc<ChatStateStore>, transport: Arc<dyn Transport>, allowlist: AllowList) -> Self {
        Self {
            store,
            transport,
            allowlist,
        }
    }

    pub async fn handle(&self, message: &TelegramMessage) -> Disposition {
        let chat_id = message.chat.id;
        let Some(from) = message.from.as_ref() else {
            debug!(chat_id, message_id = message.message_id, "message without sender ignored");
            return Disposition::Ignored;
        };
        if from.is_bot {
            debug!(chat_id, sender_id = from.id, "message from bot ignored");
            return Disposition::Ignored;
        }

        if !self.allowlist.is_allowed(from.username.as_deref()) {
            info!(
                chat_id,
                sender_id = from.id,
                username = from.username.as_deref().unwrap_or("-"),
                "sender not on allow-list, refusing"
            );
            if let Err(e) = self.transport.send_text(chat_id, REFUSAL_TEXT).await {
                warn!(chat_id, error = %e, "failed to send refusal");
            }
            return Disposition::Refused;
        }

        let Some(stored) = message.to_message() else {
            return Disposition::Ignored;
        };
        debug!(
            chat_id,
            message_id = stored.message_id,
            kind = ?stored.kind,
            "inbound message recorded"
        );
        self.store.append_message(stored);
        Disposition::Recorded
    }
}
