//! Text generation
//!
//! The [`Generator`] trait is the boundary between the reply engine and the
//! language model. [`gemini::GeminiGenerator`] talks to the Gemini
//! `generateContent` endpoint; [`sanitizer::ContentSanitizer`] scrubs inputs
//! after a safety refusal.

pub mod gemini;
pub mod prompts;
pub mod provider;
pub mod sanitizer;

pub use provider::{ConversationRequest, DistillRequest, Generator};
pub use sanitizer::ContentSanitizer;

/// Errors from a generation call.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation timed out")]
    Timeout,

    /// The model refused on safety grounds.
    #[error("content blocked: {0}")]
    ContentBlocked(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("invalid API key: {0}")]
    InvalidApiKey(String),
}

impl GenerationError {
    pub fn is_content_blocked(&self) -> bool {
        matches!(self, Self::ContentBlocked(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_error_display() {
        assert_eq!(GenerationError::Timeout.to_string(), "generation timed out");
        let blocked = GenerationError::ContentBlocked("SAFETY".into());
        assert_eq!(blocked.to_string(), "content blocked: SAFETY");
        assert!(blocked.is_content_blocked());
        assert!(!GenerationError::Malformed("x".into()).is_content_blocked());
    }
}
