//! Word and phrase filter for generation inputs.
//!
//! Used only after the model has refused a request on content grounds: the
//! memory record and history are scrubbed of flagged material and the call
//! is retried. Inbound messages are never gated by this filter.
//!
//! Matching has two modes:
//! - single words match against a normalized copy of the text (lowercase,
//!   letters and digits only, separator runs collapsed to one space) with
//!   whitespace-bounded containment, so "hure" does not flag "churer".
//! - phrases compile to a case-insensitive regex where each space matches
//!   any run of whitespace or punctuation, anchored at word boundaries.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::sessions::{MemoryRecord, Message, Profile};

const DEFAULT_TERMS: &[&str] = &["fotze", "hure", "fick", "arschfotze", "pussy", "tank man"];

static RE_SYMBOLS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^\p{L}\p{N}\s\p{P}]").expect("failed to compile regex: symbols")
});

static RE_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s\p{P}]+").expect("failed to compile regex: separators"));

#[derive(Debug, Clone)]
enum FilterTerm {
    Word(String),
    Phrase(Regex),
}

#[derive(Debug, Clone)]
pub struct ContentSanitizer {
    terms: Vec<FilterTerm>,
}

impl Default for ContentSanitizer {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl ContentSanitizer {
    /// Built-in terms plus `extra_terms`.
    pub fn new(extra_terms: &[String]) -> Self {
        let mut sanitizer = Self { terms: Vec::new() };
        for term in DEFAULT_TERMS {
            sanitizer.add_term(term);
        }
        for term in extra_terms {
            sanitizer.add_term(term);
        }
        sanitizer
    }

    pub fn add_term(&mut self, term: &str) {
        let normalized = normalize(term);
        if normalized.is_empty() {
            return;
        }
        if !normalized.contains(' ') {
            self.terms.push(FilterTerm::Word(normalized));
            return;
        }
        let pattern = format!(
            r"(?i)\b{}\b",
            regex::escape(&normalized).replace(' ', r"[\s\p{P}]+")
        );
        match Regex::new(&pattern) {
            Ok(re) => self.terms.push(FilterTerm::Phrase(re)),
            Err(e) => warn!(term = %normalized, error = %e, "cannot compile filter phrase"),
        }
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn is_flagged(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        let padded = format!(" {} ", normalize(text));
        self.terms.iter().any(|term| match term {
            FilterTerm::Word(word) => padded.contains(&format!(" {word} ")),
            FilterTerm::Phrase(re) => re.is_match(text),
        })
    }

    /// Copy of `record` with flagged scalars blanked, flagged list entries
    /// dropped, and any relation with a flagged field removed entirely.
    pub fn clean_memory_record(&self, record: &MemoryRecord) -> MemoryRecord {
        MemoryRecord {
            persona: self.clean_profile(&record.persona),
            correspondent: self.clean_profile(&record.correspondent),
        }
    }

    fn clean_profile(&self, profile: &Profile) -> Profile {
        let text = |value: &String| {
            if self.is_flagged(value) {
                String::new()
            } else {
                value.clone()
            }
        };
        let list = |values: &[String]| -> Vec<String> {
            values
                .iter()
                .filter(|v| !self.is_flagged(v))
                .cloned()
                .collect()
        };

        Profile {
            name: text(&profile.name),
            age: profile.age,
            occupation: text(&profile.occupation),
            residence: text(&profile.residence),
            relationship_status: text(&profile.relationship_status),
            flirt_level: text(&profile.flirt_level),
            favorite_color: text(&profile.favorite_color),
            interests: list(&profile.interests),
            aspirations: list(&profile.aspirations),
            memories: list(&profile.memories),
            current_topics: list(&profile.current_topics),
            taboo_topics: list(&profile.taboo_topics),
            relations: profile
                .relations
                .iter()
                .filter(|r| {
                    let flagged = self.is_flagged(&r.name)
                        || self.is_flagged(&r.relation)
                        || self.is_flagged(&r.shared_history);
                    if flagged {
                        debug!(relation = %r.name, "dropping flagged relation");
                    }
                    !flagged
                })
                .cloned()
                .collect(),
        }
    }

    pub fn clean_messages(&self, messages: &[Message]) -> Vec<Message> {
        let cleaned: Vec<Message> = messages
            .iter()
            .filter(|m| !self.is_flagged(&m.text))
            .cloned()
            .collect();
        let removed = messages.len() - cleaned.len();
        if removed > 0 {
            debug!(removed, total = messages.len(), "dropped flagged messages");
        }
        cleaned
    }
}

/// Lowercase, drop symbols, collapse whitespace/punctuation runs to a space.
fn normalize(text: &str) -> String {
    let lower = text.to_lowercase();
    let stripped = RE_SYMBOLS.replace_all(&lower, "");
    RE_SEPARATORS
        .replace_all(&stripped, " ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::{MessageKind, Relation};

    fn msg(id: i64, text: &str) -> Message {
        Message {
            message_id: id,
            chat_id: 1,
            chat_title: None,
            sender_id: 2,
            sender_name: "Jonas".into(),
            username: None,
            is_bot: false,
            text: text.into(),
            timestamp: 0,
            date: String::new(),
            kind: MessageKind::Text,
            suppressed: false,
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Hallo,   WELT!!  "), "hallo welt");
        assert_eq!(normalize("a 😊 b"), "a b");
        assert_eq!(normalize("Straße-42"), "straße 42");
    }

    #[test]
    fn test_word_match_is_whitespace_bounded() {
        let s = ContentSanitizer::default();
        assert!(s.is_flagged("du HURE!"));
        assert!(s.is_flagged("fick,dich"));
        assert!(!s.is_flagged("der Churer Bahnhof"));
        assert!(!s.is_flagged("Fickle weather today"));
    }

    #[test]
    fn test_phrase_allows_punctuation_between_words() {
        let s = ContentSanitizer::default();
        assert!(s.is_flagged("the Tank Man photo"));
        assert!(s.is_flagged("tank...man"));
        assert!(s.is_flagged("TANK \n - MAN"));
        assert!(!s.is_flagged("tankman"));
        assert!(!s.is_flagged("a tank manual"));
    }

    #[test]
    fn test_extra_terms() {
        let s = ContentSanitizer::new(&["Voldemort".to_string(), "  ".to_string()]);
        assert_eq!(s.term_count(), DEFAULT_TERMS.len() + 1);
        assert!(s.is_flagged("he who must not be named is voldemort"));
    }

    #[test]
    fn test_empty_text_not_flagged() {
        assert!(!ContentSanitizer::default().is_flagged(""));
    }

    #[test]
    fn test_clean_memory_record() {
        let s = ContentSanitizer::default();
        let mut record = MemoryRecord::default();
        record.correspondent.name = "Jonas".into();
        record.correspondent.occupation = "calls everyone hure".into();
        record.correspondent.interests = vec!["chess".into(), "tank man history".into()];
        record.correspondent.relations = vec![
            Relation {
                name: "Lena".into(),
                relation: "sister".into(),
                ..Default::default()
            },
            Relation {
                name: "Kai".into(),
                shared_history: "fick".into(),
                ..Default::default()
            },
        ];

        let cleaned = s.clean_memory_record(&record);
        assert_eq!(cleaned.correspondent.name, "Jonas");
        assert!(cleaned.correspondent.occupation.is_empty());
        assert_eq!(cleaned.correspondent.interests, vec!["chess"]);
        assert_eq!(cleaned.correspondent.relations.len(), 1);
        assert_eq!(cleaned.correspondent.relations[0].name, "Lena");
    }

    #[test]
    fn test_clean_messages_drops_flagged() {
        let s = ContentSanitizer::default();
        let cleaned = s.clean_messages(&[msg(1, "hi"), msg(2, "pussy"), msg(3, "bye")]);
        let ids: Vec<i64> = cleaned.iter().map(|m| m.message_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }
}
