//! Humanized delivery.
//!
//! A reply is split into chunks (see [`split`](crate::messages::split)), and
//! each chunk is sent after showing the typing indicator for roughly as long
//! as a person would need to type it. Chunks of one reply go out strictly in
//! order; different chats are delivered independently by their own tasks.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::channels::Transport;
use crate::messages::random::RandomSource;
use crate::messages::split::split_message;
use crate::sessions::{ChatStateStore, Message};

/// Per-character typing delay is drawn once per chunk from this range.
pub const TYPING_MS_PER_CHAR: std::ops::Range<u64> = 120..170;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    pub failed: usize,
}

pub struct DeliveryPipeline {
    transport: Arc<dyn Transport>,
    store: Arc<ChatStateStore>,
    rng: Arc<dyn RandomSource>,
    persona_name: String,
}

impl DeliveryPipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<ChatStateStore>,
        rng: Arc<dyn RandomSource>,
        persona_name: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            store,
            rng,
            persona_name: persona_name.into(),
        }
    }

    /// Split, pace and send `text`, recording every delivered chunk as a bot
    /// message. A failed chunk is logged and skipped; the rest still go out.
    pub async fn deliver(&self, chat_id: i64, text: &str) -> DeliveryReport {
        let chunks = split_message(text, self.rng.as_ref());
        let mut report = DeliveryReport::default();

        for chunk in &chunks {
            if let Err(e) = self.transport.send_typing(chat_id).await {
                debug!(chat_id, error = %e, "typing indicator failed");
            }
            tokio::time::sleep(self.typing_delay(chunk)).await;

            match self.transport.send_text(chat_id, chunk).await {
                Ok(Some(sent)) => {
                    report.sent += 1;
                    self.store.append_message(Message::from_bot(
                        chat_id,
                        sent.message_id,
                        sent.sender_id,
                        &self.persona_name,
                        chunk,
                        sent.timestamp,
                    ));
                }
                Ok(None) => {
                    report.sent += 1;
                    debug!(chat_id, "transport returned no message id, not recording");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(chat_id, error = %e, "failed to send reply chunk");
                }
            }
        }

        debug!(chat_id, chunks = chunks.len(), sent = report.sent, failed = report.failed, "reply delivered");
        report
    }

    fn typing_delay(&self, chunk: &str) -> Duration {
        let per_char = self
            .rng
            .between(TYPING_MS_PER_CHAR.start, TYPING_MS_PER_CHAR.end);
        Duration::from_millis(per_char.saturating_mul(chunk.chars().count() as u64))
    }
}
