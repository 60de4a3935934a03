//! Splitting a reply into chat-sized chunks.
//!
//! Two independent coin flips shape the output. A reply over
//! [`SPLIT_THRESHOLD_CHARS`] may be broken up at sentence boundaries
//! (grouped up to [`SENTENCE_GROUP_CHARS`]), then at clause punctuation, then
//! by word wrap at [`WRAP_CHARS`]. A reply ending in an emoji or text smiley
//! may have it detached into a final chunk of its own.
//!
//! Chunks keep their punctuation, so joining them with single spaces gives
//! back the original text up to whitespace runs.

use std::sync::LazyLock;

use regex::Regex;

use crate::messages::random::RandomSource;

pub const SPLIT_THRESHOLD_CHARS: usize = 150;
pub const SENTENCE_GROUP_CHARS: usize = 120;
pub const WRAP_CHARS: usize = 100;

const SPLIT_CHANCE: f64 = 0.5;
const DETACH_CHANCE: f64 = 0.5;

const EMOJI_CLASS: &str = r"[\x{1F600}-\x{1F64F}\x{1F300}-\x{1F5FF}\x{1F680}-\x{1F6FF}\x{1F1E0}-\x{1F1FF}\x{1F900}-\x{1F9FF}\x{2600}-\x{26FF}\x{2700}-\x{27BF}]\x{FE0F}?";
const TEXT_SMILEYS: &str = r":-\)|:-\(|:-D|:-P|:-p|;-\)|;-D|:\)|:\(|:D|:P|:p|;\)|;D|<3|:\*";

static RE_TRAILING_EMOTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?s)^(.*?)\s*({EMOJI_CLASS}|{TEXT_SMILEYS})\s*$"))
        .expect("failed to compile regex: trailing emote")
});

static RE_SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+\s+").expect("failed to compile regex: sentence end"));

static RE_CLAUSE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,;]+\s+").expect("failed to compile regex: clause end"));

/// Break `text` into the chunks to send, in order. Empty input gives no chunks.
pub fn split_message(text: &str, rng: &dyn RandomSource) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let split_long = char_len(text) > SPLIT_THRESHOLD_CHARS && rng.chance(SPLIT_CHANCE);
    let (body, emote) = match trailing_emote(text) {
        Some((body, emote)) if rng.chance(DETACH_CHANCE) => (body, Some(emote)),
        _ => (text, None),
    };

    let mut chunks = if split_long && char_len(body) > SPLIT_THRESHOLD_CHARS {
        split_long_text(body)
    } else {
        vec![body.to_string()]
    };
    if let Some(emote) = emote {
        chunks.push(emote.to_string());
    }
    chunks
}

/// `(body, emote)` when `text` ends in an emoji or smiley preceded by
/// something else.
fn trailing_emote(text: &str) -> Option<(&str, &str)> {
    let caps = RE_TRAILING_EMOTE.captures(text)?;
    let body = caps.get(1)?.as_str().trim_end();
    let emote = caps.get(2)?.as_str();
    if body.is_empty() {
        return None;
    }
    Some((body, emote))
}

fn split_long_text(text: &str) -> Vec<String> {
    let sentences = split_after(&RE_SENTENCE_END, text);
    let parts = if sentences.len() > 1 {
        group(&sentences, SENTENCE_GROUP_CHARS)
    } else {
        split_after(&RE_CLAUSE_END, text)
            .into_iter()
            .map(String::from)
            .collect()
    };
    if parts.len() > 1 {
        return parts;
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    group(&words, WRAP_CHARS)
}

/// Split after every match of `re`, keeping the matched punctuation on the
/// left-hand piece and dropping the trailing whitespace.
fn split_after<'a>(re: &Regex, text: &'a str) -> Vec<&'a str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for m in re.find_iter(text) {
        let piece = text[start..m.end()].trim();
        if !piece.is_empty() {
            pieces.push(piece);
        }
        start = m.end();
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        pieces.push(rest);
    }
    pieces
}

/// Greedily join pieces with single spaces while the result stays within
/// `max_chars`. A single piece longer than `max_chars` stands alone.
fn group<S: AsRef<str>>(pieces: &[S], max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for piece in pieces {
        let piece = piece.as_ref();
        let len = char_len(piece);
        if current_len > 0 && current_len + 1 + len > max_chars {
            out.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(piece);
        current_len += len;
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::random::{AlwaysRandom, ScriptedRandom};

    fn squash(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn assert_lossless(original: &str, chunks: &[String]) {
        assert_eq!(squash(&chunks.join(" ")), squash(original));
    }

    #[test]
    fn test_short_plain_text_is_one_chunk() {
        let chunks = split_message("Hallo, wie geht's?", &AlwaysRandom);
        assert_eq!(chunks, vec!["Hallo, wie geht's?"]);
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(split_message("   ", &AlwaysRandom).is_empty());
    }

    #[test]
    fn test_trailing_emoji_detached() {
        let text = "Das war heute wirklich schön und ich habe mich sehr gefreut dich zu sehen 😊";
        let chunks = split_message(text, &ScriptedRandom::new([true], []));
        assert_eq!(
            chunks,
            vec![
                "Das war heute wirklich schön und ich habe mich sehr gefreut dich zu sehen",
                "😊"
            ]
        );
        assert_lossless(text, &chunks);
    }

    #[test]
    fn test_trailing_emoji_kept_when_coin_says_no() {
        let text = "Bis morgen 😊";
        let chunks = split_message(text, &ScriptedRandom::new([false], []));
        assert_eq!(chunks, vec![text]);
    }

    #[test]
    fn test_text_smileys_detached() {
        for (text, smiley) in [("gute Nacht :-)", ":-)"), ("klar ;D", ";D"), ("ich dich auch <3", "<3")] {
            let chunks = split_message(text, &AlwaysRandom);
            assert_eq!(chunks.last().map(String::as_str), Some(smiley), "{text}");
            assert_lossless(text, &chunks);
        }
    }

    #[test]
    fn test_emoji_with_variation_selector() {
        let chunks = split_message("Danke dir ❤️", &AlwaysRandom);
        assert_eq!(chunks, vec!["Danke dir", "❤️"]);
    }

    #[test]
    fn test_lone_emoji_is_not_detached() {
        assert_eq!(split_message("😊", &AlwaysRandom), vec!["😊"]);
    }

    #[test]
    fn test_long_text_groups_sentences() {
        let text = "Ich war heute am See und das Wasser war noch ziemlich kalt. \
                    Trotzdem bin ich kurz reingesprungen, weil die Sonne so schön war! \
                    Danach gab es Eis. Was hast du heute so gemacht?";
        assert!(char_len(text) > SPLIT_THRESHOLD_CHARS);
        let chunks = split_message(text, &AlwaysRandom);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(char_len(chunk) <= SENTENCE_GROUP_CHARS, "{chunk}");
        }
        assert!(chunks[0].ends_with('.'));
        assert_lossless(text, &chunks);
    }

    #[test]
    fn test_long_text_left_alone_when_coin_says_no() {
        let text = "a".repeat(40) + ". " + &"b".repeat(60) + ". " + &"c".repeat(60) + ".";
        let chunks = split_message(&text, &ScriptedRandom::new([false], []));
        assert_eq!(chunks, vec![text]);
    }

    #[test]
    fn test_single_sentence_splits_on_clauses() {
        let text = "Ich weiß nicht genau was ich davon halten soll, \
                    weil du mir das schon so oft erzählt hast und es nie passiert ist; \
                    aber vielleicht klappt es ja diesmal wirklich";
        assert!(char_len(text) > SPLIT_THRESHOLD_CHARS);
        let chunks = split_message(text, &AlwaysRandom);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].ends_with(','));
        assert!(chunks[1].ends_with(';'));
        assert_lossless(text, &chunks);
    }

    #[test]
    fn test_unpunctuated_text_word_wraps() {
        let text = "wort ".repeat(60);
        let chunks = split_message(&text, &AlwaysRandom);
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(char_len(chunk) <= WRAP_CHARS);
        }
        assert_lossless(&text, &chunks);
    }

    #[test]
    fn test_long_text_with_emoji_splits_both_ways() {
        let text = "Ich war heute am See und das Wasser war noch ziemlich kalt. \
                    Trotzdem bin ich kurz reingesprungen, weil die Sonne so schön war! \
                    Was hast du heute so gemacht? 😄";
        let chunks = split_message(text, &AlwaysRandom);
        assert_eq!(chunks.last().map(String::as_str), Some("😄"));
        assert!(chunks.len() >= 3);
        assert_lossless(text, &chunks);
    }

    #[test]
    fn test_chunk_length_counts_chars_not_bytes() {
        // 105 chars but 205 bytes: below the threshold.
        let text = format!("{}. Ja.", "ö".repeat(100));
        let chunks = split_message(&text, &AlwaysRandom);
        assert_eq!(chunks, vec![text]);
    }
}
