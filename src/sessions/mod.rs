//! Session and storage layer
//!
//! Per-chat message history, long-term memory and daily quota, persisted
//! under the state directory as JSONL logs plus small snapshot files.

pub mod memory;
pub mod message;
mod store;

pub use memory::{MemoryRecord, Profile, Relation};
pub use message::{Message, MessageKind};
pub use store::{
    ChatSession, ChatStateStore, DailyQuota, SessionSummary, SessionView, StoreError,
    DEFAULT_DAILY_LIMIT,
};
