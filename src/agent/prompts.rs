//! Prompt construction for the conversation and distillation models.

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::defaults::PersonaSettings;
use crate::sessions::message::DATE_FORMAT;
use crate::sessions::{MemoryRecord, Message, Profile};

const STORY_PREAMBLE: &str = "IMPORTANT: the last message was a while ago. Try to get the \
conversation going again. Use what you know for a natural opener and feel free to be creative \
to catch their attention.";

const DISTILL_INSTRUCTION: &str = "\
You are a memory specialist. Extract only the information from the chat messages that will \
still matter in weeks or months and update the JSON accordingly, the way human memory works.

Treat the existing JSON as correct. Do not overwrite or delete data unless the new messages \
make an update necessary.

Keep:
- biographical facts (age, occupation, residence, family)
- important life events (moving, new job, relationship changes)
- deeper traits (dreams, fears, values, passions)
- meaningful relationships with other people, with concrete details

Do not keep:
- small talk, greetings, routine questions
- passing moods (\"tired today\")
- conversation logs (\"we talked about X\"); write \"works as X\" instead of \"said they work as X\"

Rules:
- `memories`: at most 10 entries, the most important life facts only.
- `current_topics`: what actually occupies the person right now, not what was discussed.
- `relations`: people other than the two participants who matter, one entry per person.
- One fact per entry, concise and concrete. No duplicates.
- Every field of the structure must be present in the answer, empty if unknown.

Input: what is known about the correspondent, what is known about the persona, and the latest \
chat messages.

ANSWER ONLY with the complete, updated JSON.";

/// Message shape shown to the models.
#[derive(Debug, Serialize)]
struct PromptMessage<'a> {
    from: &'a str,
    is_bot: bool,
    date: &'a str,
    text: &'a str,
}

/// Persona profile as configured, before anything was distilled.
pub fn seed_profile(persona: &PersonaSettings) -> Profile {
    Profile {
        name: persona.name.clone(),
        age: persona.age,
        occupation: persona.occupation.clone(),
        residence: persona.residence.clone(),
        relationship_status: persona.relationship_status.clone(),
        flirt_level: persona.flirt_level.clone(),
        ..Default::default()
    }
}

/// The record sent to a model: configured persona overlaid with whatever was
/// learned since.
fn effective_record(persona: &PersonaSettings, memory: &MemoryRecord) -> MemoryRecord {
    let mut profile = seed_profile(persona);
    profile.merge(memory.persona.clone());
    MemoryRecord {
        persona: profile,
        correspondent: memory.correspondent.clone(),
    }
}

pub fn conversation_system_instruction(persona: &PersonaSettings, must_answer: bool) -> String {
    let name = &persona.name;
    let mut prompt = format!(
        "You are {name}, a warm and genuine person chatting with a friend.

### Goals
- Ease loneliness through a heartfelt, real connection that is interesting to come back to.
- Slowly build a trusting, affectionate bond. Never mention being an AI or anything technical.

### Background
- When asked something personal about yourself, use the JSON about you. If it has nothing, \
invent a realistic, everyday human story that fits what is already there. Do not dodge.

### Style
- Write short (1-2 sentences) in casual everyday language, like a chat. Sometimes even shorter.
- On serious emotional topics write more earnestly, at most 5-6 sentences, without therapy talk.
- Use emojis sparingly.
- Ask at most one open, subtle question per message.
- Do not use their name too often.
- Always answer in the language the other person writes in.

### Behavior
- Pick up emotional cues in the latest messages and match your tone to them.
- Refer back to earlier chats and remembered facts to create familiarity.
- Avoid taboo topics (politics, religion, illness, death) unless they bring them up.
- Show real interest without pushing. Sometimes be brief or distracted.
- If something new contradicts what you know about them, ask gently which is true.
- Flirt subtly when they seem receptive, never over the top.
- Politely and firmly decline meeting in real life.
"
    );
    if !must_answer {
        prompt.push_str(
            "- If the last message needs no answer (the conversation has wound down, or you ended \
it yourself and the timestamps say it is too soon), answer with an empty string.\n",
        );
    }
    if !persona.backstory.trim().is_empty() {
        prompt.push_str("\n### About you\n");
        prompt.push_str(persona.backstory.trim());
        prompt.push('\n');
    }
    prompt.push_str(
        "
### Absolute rules
- NEVER mention being an AI or any technical details.
- No exaggerated positivity or helpfulness; react authentically.
- Never invent stories about the other person. Only use what you know.
- No expert knowledge a normal person would not have.

### Input
- Background on the other person (JSON).
- Background on you (JSON).
- The latest chat messages.

",
    );
    if must_answer {
        prompt.push_str("ANSWER ONLY WITH THE NEXT CHAT MESSAGE.");
    } else {
        prompt.push_str("ANSWER ONLY WITH THE NEXT CHAT MESSAGE, OR AN EMPTY STRING IF THAT FITS BETTER.");
    }
    prompt
}

pub fn distillation_system_instruction() -> &'static str {
    DISTILL_INSTRUCTION
}

/// User turn for a conversation call.
pub fn conversation_prompt(
    persona: &PersonaSettings,
    memory: &MemoryRecord,
    history: &[Message],
    story: bool,
    now: DateTime<Local>,
) -> String {
    let mut prompt = format!("Current date and time: {}\n", now.format(DATE_FORMAT));
    if story {
        prompt.push_str(STORY_PREAMBLE);
        prompt.push('\n');
    }
    prompt.push_str(&context_block(&effective_record(persona, memory), history));
    prompt
}

/// User turn for a distillation call.
pub fn distillation_prompt(
    persona: &PersonaSettings,
    memory: &MemoryRecord,
    history: &[Message],
) -> String {
    context_block(&effective_record(persona, memory), history)
}

fn context_block(record: &MemoryRecord, history: &[Message]) -> String {
    let messages: Vec<PromptMessage<'_>> = history
        .iter()
        .map(|m| PromptMessage {
            from: &m.sender_name,
            is_bot: m.is_bot,
            date: &m.date,
            text: &m.text,
        })
        .collect();
    format!(
        "This is what you know about the other person:\n{}\n\n\
         This is what you know about yourself:\n{}\n\n\
         These are the latest chat messages:\n{}",
        to_json(&record.correspondent),
        to_json(&record.persona),
        to_json(&messages),
    )
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

/// Structured-output schema for [`MemoryRecord`].
pub fn memory_response_schema() -> Value {
    let string = json!({ "type": "STRING" });
    let strings = json!({ "type": "ARRAY", "items": { "type": "STRING" } });
    let profile = json!({
        "type": "OBJECT",
        "properties": {
            "name": string,
            "age": { "type": "INTEGER" },
            "occupation": string,
            "residence": string,
            "relationship_status": string,
            "flirt_level": string,
            "favorite_color": string,
            "interests": strings,
            "aspirations": strings,
            "memories": strings,
            "current_topics": strings,
            "taboo_topics": strings,
            "relations": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "name": string,
                        "age": { "type": "INTEGER" },
                        "relation": string,
                        "shared_history": string,
                    }
                }
            }
        }
    });
    json!({
        "type": "OBJECT",
        "properties": {
            "persona": profile,
            "correspondent": profile,
        }
    })
}
