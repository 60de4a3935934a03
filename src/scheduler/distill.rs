//! Periodic memory distillation.
//!
//! Once a chat has accumulated more than `backlog` messages past its
//! distillation cursor, the recent history is summarized into the chat's
//! [`MemoryRecord`] and the cursor moves to the newest message. The cursor
//! moves even when the update fails, so a chat that keeps failing is retried
//! only after another full backlog instead of on every tick.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::agent::{ContentSanitizer, DistillRequest, GenerationError, Generator};
use crate::scheduler::responder::FALLBACK_CHAIN;
use crate::sessions::{ChatStateStore, MemoryRecord, Message};

pub const DEFAULT_DISTILL_BACKLOG: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistillOutcome {
    NotDue,
    Updated,
    QuotaExceeded,
    Timeout,
    Failed,
}

/// `true` once more than `backlog` message ids lie strictly between the
/// cursor and the newest message. With cursor 100 and backlog 15 the first
/// trigger is at id 117.
pub fn is_due(newest_message_id: i64, cursor: i64, backlog: i64) -> bool {
    newest_message_id.saturating_sub(cursor).saturating_sub(1) > backlog
}

pub struct Distiller {
    store: Arc<ChatStateStore>,
    generator: Arc<dyn Generator>,
    sanitizer: Arc<ContentSanitizer>,
    timeout: Duration,
    backlog: i64,
    history_window: usize,
}

impl Distiller {
    pub fn new(
        store: Arc<ChatStateStore>,
        generator: Arc<dyn Generator>,
        sanitizer: Arc<ContentSanitizer>,
        timeout: Duration,
        backlog: i64,
        history_window: usize,
    ) -> Self {
        Self {
            store,
            generator,
            sanitizer,
            timeout,
            backlog,
            history_window,
        }
    }

    /// Distill `chat_id` if its backlog is large enough.
    pub async fn run_if_due(&self, chat_id: i64) -> DistillOutcome {
        let Some(view) = self.store.view(chat_id, self.history_window) else {
            return DistillOutcome::NotDue;
        };
        let Some(newest) = view.last_message().map(|m| m.message_id) else {
            return DistillOutcome::NotDue;
        };
        if !is_due(newest, view.last_distilled_message_id, self.backlog) {
            return DistillOutcome::NotDue;
        }
        info!(
            chat_id,
            newest,
            cursor = view.last_distilled_message_id,
            "distilling memory"
        );

        let outcome = if self.store.try_consume_daily_quota(chat_id) {
            self.attempt_chain(chat_id, &view.memory, &view.recent).await
        } else {
            Err(DistillOutcome::QuotaExceeded)
        };

        let outcome = match outcome {
            Ok(update) => {
                self.store.update_memory(chat_id, update);
                DistillOutcome::Updated
            }
            Err(outcome) => {
                debug!(chat_id, ?outcome, "memory left unchanged");
                outcome
            }
        };
        self.store.advance_distillation_cursor(chat_id, newest);
        outcome
    }

    async fn attempt_chain(
        &self,
        chat_id: i64,
        memory: &MemoryRecord,
        history: &[Message],
    ) -> Result<MemoryRecord, DistillOutcome> {
        for attempt in FALLBACK_CHAIN {
            let input = attempt.prepare(&self.sanitizer, memory, history, false);
            let request = DistillRequest {
                chat_id,
                memory: input.memory,
                history: input.history,
            };
            let result = match tokio::time::timeout(self.timeout, self.generator.distill(request)).await {
                Ok(result) => result,
                Err(_) => Err(GenerationError::Timeout),
            };
            match result {
                Ok(update) => return Ok(update),
                Err(GenerationError::ContentBlocked(reason)) => {
                    info!(chat_id, ?attempt, %reason, "distillation blocked, trying next fallback");
                }
                Err(GenerationError::Timeout) => {
                    warn!(chat_id, ?attempt, "distillation timed out");
                    return Err(DistillOutcome::Timeout);
                }
                Err(e) => {
                    warn!(chat_id, ?attempt, error = %e, "distillation failed");
                    return Err(DistillOutcome::Failed);
                }
            }
        }
        warn!(chat_id, "every distillation fallback was blocked");
        Err(DistillOutcome::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ConversationRequest;
    use crate::sessions::message::format_local_date;
    use crate::sessions::MessageKind;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    struct ScriptedDistiller {
        results: Mutex<VecDeque<Result<MemoryRecord, GenerationError>>>,
        seen: Mutex<Vec<DistillRequest>>,
    }

    impl ScriptedDistiller {
        fn new(results: Vec<Result<MemoryRecord, GenerationError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Generator for ScriptedDistiller {
        async fn distill(&self, request: DistillRequest) -> Result<MemoryRecord, GenerationError> {
            self.seen.lock().push(request);
            self.results
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(GenerationError::Provider("script exhausted".into())))
        }

        async fn converse(&self, _request: ConversationRequest) -> Result<String, GenerationError> {
            Err(GenerationError::Provider("unused".into()))
        }
    }

    fn message(id: i64, text: &str) -> Message {
        let ts = 1_718_193_600 + id * 60;
        Message {
            message_id: id,
            chat_id: 1,
            chat_title: None,
            sender_id: 2,
            sender_name: "Jonas".into(),
            username: None,
            is_bot: false,
            text: text.into(),
            timestamp: ts,
            date: format_local_date(ts),
            kind: MessageKind::Text,
            suppressed: false,
        }
    }

    fn store_with(dir: &TempDir, cursor: i64, newest: i64, limit: u32) -> Arc<ChatStateStore> {
        let store = Arc::new(ChatStateStore::open(dir.path(), limit).unwrap());
        for id in (newest - 5).max(1)..=newest {
            store.append_message(message(id, "ich arbeite jetzt als Tischler"));
        }
        store.advance_distillation_cursor(1, cursor);
        let mut seed = MemoryRecord::default();
        seed.correspondent.name = "Jonas".into();
        seed.correspondent.occupation = "Student".into();
        store.update_memory(1, seed);
        store
    }

    fn distiller(store: Arc<ChatStateStore>, generator: Arc<ScriptedDistiller>) -> Distiller {
        Distiller::new(
            store,
            generator,
            Arc::new(ContentSanitizer::default()),
            Duration::from_secs(120),
            DEFAULT_DISTILL_BACKLOG,
            20,
        )
    }

    fn update_with_occupation(occupation: &str) -> MemoryRecord {
        let mut record = MemoryRecord::default();
        record.correspondent.occupation = occupation.into();
        record
    }

    #[test]
    fn test_is_due_boundary() {
        assert!(!is_due(115, 100, 15));
        assert!(!is_due(116, 100, 15));
        assert!(is_due(117, 100, 15));
        assert!(!is_due(0, 0, 15));
    }

    #[tokio::test]
    async fn test_not_due_leaves_everything() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, 100, 116, 30);
        let generator = ScriptedDistiller::new(vec![]);
        let outcome = distiller(store.clone(), generator.clone()).run_if_due(1).await;
        assert_eq!(outcome, DistillOutcome::NotDue);
        assert!(generator.seen.lock().is_empty());
        assert_eq!(store.get(1).last_distilled_message_id, 100);
        assert_eq!(store.get(1).quota.count, 0);
    }

    #[tokio::test]
    async fn test_due_merges_and_advances() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, 100, 117, 30);
        let generator = ScriptedDistiller::new(vec![Ok(update_with_occupation("Tischler"))]);
        let outcome = distiller(store.clone(), generator.clone()).run_if_due(1).await;
        assert_eq!(outcome, DistillOutcome::Updated);

        let session = store.get(1);
        assert_eq!(session.last_distilled_message_id, 117);
        assert_eq!(session.memory.correspondent.occupation, "Tischler");
        // blank name in the update did not erase the known one
        assert_eq!(session.memory.correspondent.name, "Jonas");
        assert_eq!(session.quota.count, 1);
        assert_eq!(generator.seen.lock()[0].history.len(), 6);
    }

    #[tokio::test]
    async fn test_failure_advances_cursor_keeps_memory() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, 100, 117, 30);
        let generator = ScriptedDistiller::new(vec![Err(GenerationError::Malformed("not json".into()))]);
        let outcome = distiller(store.clone(), generator).run_if_due(1).await;
        assert_eq!(outcome, DistillOutcome::Failed);

        let session = store.get(1);
        assert_eq!(session.last_distilled_message_id, 117);
        assert_eq!(session.memory.correspondent.occupation, "Student");
    }

    #[tokio::test]
    async fn test_quota_exhausted_advances_cursor() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, 100, 117, 0);
        let generator = ScriptedDistiller::new(vec![Ok(update_with_occupation("Tischler"))]);
        let outcome = distiller(store.clone(), generator.clone()).run_if_due(1).await;
        assert_eq!(outcome, DistillOutcome::QuotaExceeded);
        assert!(generator.seen.lock().is_empty());
        assert_eq!(store.get(1).last_distilled_message_id, 117);
        assert_eq!(store.get(1).memory.correspondent.occupation, "Student");
    }

    #[tokio::test]
    async fn test_block_uses_fallback_chain() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, 100, 117, 30);
        let generator = ScriptedDistiller::new(vec![
            Err(GenerationError::ContentBlocked("SAFETY".into())),
            Ok(update_with_occupation("Tischler")),
        ]);
        let outcome = distiller(store.clone(), generator.clone()).run_if_due(1).await;
        assert_eq!(outcome, DistillOutcome::Updated);
        assert_eq!(generator.seen.lock().len(), 2);
        assert_eq!(store.get(1).quota.count, 1);
    }

    #[tokio::test]
    async fn test_unknown_chat_not_due() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ChatStateStore::open(dir.path(), 30).unwrap());
        let generator = ScriptedDistiller::new(vec![]);
        assert_eq!(
            distiller(store, generator).run_if_due(42).await,
            DistillOutcome::NotDue
        );
    }
}
