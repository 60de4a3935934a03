//! confidant library
//!
//! Companion chatbot engine: Telegram intake, per-chat history and memory,
//! a reply scheduler with memory distillation, and paced message delivery.

pub mod agent;
pub mod channels;
pub mod cli;
pub mod config;
pub mod logging;
pub mod messages;
pub mod scheduler;
pub mod sessions;
