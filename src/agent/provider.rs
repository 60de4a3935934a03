//! Generation trait and request types.

use async_trait::async_trait;
use chrono::{DateTime, Local};

use crate::agent::GenerationError;
use crate::sessions::{MemoryRecord, Message};

/// Input for one conversational reply.
#[derive(Debug, Clone)]
pub struct ConversationRequest {
    pub chat_id: i64,
    pub memory: MemoryRecord,
    /// Recent messages, ascending.
    pub history: Vec<Message>,
    /// Open with something new instead of answering the last message.
    pub story: bool,
    /// Remove the option of answering with silence.
    pub must_answer: bool,
    pub now: DateTime<Local>,
}

/// Input for one memory update.
#[derive(Debug, Clone)]
pub struct DistillRequest {
    pub chat_id: i64,
    pub memory: MemoryRecord,
    pub history: Vec<Message>,
}

/// Model backend used by the reply engine.
///
/// Implementations report safety refusals as
/// [`GenerationError::ContentBlocked`] so callers can retry with cleaned
/// input.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Updated memory record derived from `request`. Fields the model left
    /// blank come back blank; merging is the caller's job.
    async fn distill(&self, request: DistillRequest) -> Result<MemoryRecord, GenerationError>;

    /// Raw reply text. An empty or quoted-empty string means the model chose
    /// to stay silent.
    async fn converse(&self, request: ConversationRequest) -> Result<String, GenerationError>;
}
