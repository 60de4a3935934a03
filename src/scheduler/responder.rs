//! One conversational reply, with fallbacks for safety refusals.
//!
//! A reply costs one unit of the chat's daily quota no matter how many
//! attempts it takes. Attempts run in the order of [`FALLBACK_CHAIN`] and the
//! chain only advances when the model refuses on content grounds; any other
//! failure ends the cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::agent::{ContentSanitizer, ConversationRequest, GenerationError, Generator};
use crate::sessions::{ChatStateStore, MemoryRecord, Message};

/// How the generation input is prepared for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Memory and history unchanged.
    AsIs,
    /// Flagged memory entries and messages removed.
    Sanitized,
    /// No memory, no history, and a fresh story.
    EmptyContext,
}

pub const FALLBACK_CHAIN: [Attempt; 3] = [Attempt::AsIs, Attempt::Sanitized, Attempt::EmptyContext];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    Reply(String),
    /// The model chose not to answer; the triggering message is now suppressed.
    Silence,
    Timeout,
    QuotaExceeded,
    Failed,
}

/// Input prepared for one attempt.
#[derive(Debug)]
pub(crate) struct AttemptInput {
    pub memory: MemoryRecord,
    pub history: Vec<Message>,
    pub story: bool,
}

impl Attempt {
    pub(crate) fn prepare(
        self,
        sanitizer: &ContentSanitizer,
        memory: &MemoryRecord,
        history: &[Message],
        story: bool,
    ) -> AttemptInput {
        match self {
            Attempt::AsIs => AttemptInput {
                memory: memory.clone(),
                history: history.to_vec(),
                story,
            },
            Attempt::Sanitized => AttemptInput {
                memory: sanitizer.clean_memory_record(memory),
                history: sanitizer.clean_messages(history),
                story,
            },
            Attempt::EmptyContext => AttemptInput {
                memory: MemoryRecord::default(),
                history: Vec::new(),
                story: true,
            },
        }
    }
}

pub struct Responder {
    store: Arc<ChatStateStore>,
    generator: Arc<dyn Generator>,
    sanitizer: Arc<ContentSanitizer>,
    timeout: Duration,
    history_window: usize,
}

impl Responder {
    pub fn new(
        store: Arc<ChatStateStore>,
        generator: Arc<dyn Generator>,
        sanitizer: Arc<ContentSanitizer>,
        timeout: Duration,
        history_window: usize,
    ) -> Self {
        Self {
            store,
            generator,
            sanitizer,
            timeout,
            history_window,
        }
    }

    /// Generate a reply to `last_message_id` in `chat_id`.
    pub async fn respond(
        &self,
        chat_id: i64,
        last_message_id: i64,
        story: bool,
        now: DateTime<Local>,
    ) -> ReplyOutcome {
        if !self.store.try_consume_daily_quota(chat_id) {
            // Out of budget for today: stay quiet until the next message.
            self.store.set_suppressed(chat_id, last_message_id);
            return ReplyOutcome::QuotaExceeded;
        }
        let Some(view) = self.store.view(chat_id, self.history_window) else {
            warn!(chat_id, "reply requested for unknown chat");
            return ReplyOutcome::Failed;
        };

        for attempt in FALLBACK_CHAIN {
            let input = attempt.prepare(&self.sanitizer, &view.memory, &view.recent, story);
            let request = ConversationRequest {
                chat_id,
                memory: input.memory,
                history: input.history,
                story: input.story,
                // Re-engagement openers must not be swallowed by silence.
                must_answer: input.story,
                now,
            };

            let result = match tokio::time::timeout(self.timeout, self.generator.converse(request)).await {
                Ok(result) => result,
                Err(_) => Err(GenerationError::Timeout),
            };

            match result {
                Ok(text) if is_silence(&text) => {
                    info!(chat_id, message_id = last_message_id, "model chose silence");
                    self.store.set_suppressed(chat_id, last_message_id);
                    return ReplyOutcome::Silence;
                }
                Ok(text) => {
                    debug!(chat_id, ?attempt, chars = text.chars().count(), "reply generated");
                    return ReplyOutcome::Reply(text.trim().to_string());
                }
                Err(GenerationError::ContentBlocked(reason)) => {
                    info!(chat_id, ?attempt, %reason, "reply blocked, trying next fallback");
                }
                Err(GenerationError::Timeout) => {
                    warn!(chat_id, ?attempt, timeout_secs = self.timeout.as_secs(), "reply generation timed out");
                    return ReplyOutcome::Timeout;
                }
                Err(e) => {
                    warn!(chat_id, ?attempt, error = %e, "reply generation failed");
                    return ReplyOutcome::Failed;
                }
            }
        }

        warn!(chat_id, "every fallback was blocked");
        ReplyOutcome::Failed
    }
}

/// Empty, or an empty string the model quoted literally.
pub fn is_silence(text: &str) -> bool {
    matches!(text.trim(), "" | "\"\"" | "''")
}
