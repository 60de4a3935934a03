//! Long-term memory about both sides of a conversation.
//!
//! The record is rewritten by the distillation model every few dozen
//! messages. Models routinely omit fields they have nothing new to say
//! about, so [`MemoryRecord::merge`] is additive: a blank value in an update
//! never erases what is already known.

use serde::{Deserialize, Serialize};

/// Soft cap on remembered anecdotes per profile; oldest are dropped first.
pub const MAX_MEMORIES: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryRecord {
    /// The bot's own character.
    pub persona: Profile,
    /// The person on the other end of the chat.
    pub correspondent: Profile,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub name: String,
    pub age: u32,
    pub occupation: String,
    pub residence: String,
    pub relationship_status: String,
    pub flirt_level: String,
    pub favorite_color: String,
    pub interests: Vec<String>,
    pub aspirations: Vec<String>,
    pub memories: Vec<String>,
    pub current_topics: Vec<String>,
    pub taboo_topics: Vec<String>,
    pub relations: Vec<Relation>,
}

/// A third person in someone's life.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Relation {
    pub name: String,
    pub age: u32,
    /// e.g. "sister", "coworker".
    pub relation: String,
    pub shared_history: String,
}

impl MemoryRecord {
    pub fn merge(&mut self, update: MemoryRecord) {
        self.persona.merge(update.persona);
        self.correspondent.merge(update.correspondent);
    }

    pub fn is_empty(&self) -> bool {
        self.persona == Profile::default() && self.correspondent == Profile::default()
    }
}

impl Profile {
    pub fn merge(&mut self, update: Profile) {
        merge_text(&mut self.name, update.name);
        if update.age != 0 {
            self.age = update.age;
        }
        merge_text(&mut self.occupation, update.occupation);
        merge_text(&mut self.residence, update.residence);
        merge_text(&mut self.relationship_status, update.relationship_status);
        merge_text(&mut self.flirt_level, update.flirt_level);
        merge_text(&mut self.favorite_color, update.favorite_color);

        merge_list(&mut self.interests, update.interests);
        merge_list(&mut self.aspirations, update.aspirations);
        if merge_list(&mut self.memories, update.memories) && self.memories.len() > MAX_MEMORIES {
            let excess = self.memories.len() - MAX_MEMORIES;
            self.memories.drain(..excess);
        }
        merge_list(&mut self.current_topics, update.current_topics);
        merge_list(&mut self.taboo_topics, update.taboo_topics);

        for incoming in update.relations {
            if incoming.name.trim().is_empty() {
                continue;
            }
            match self
                .relations
                .iter_mut()
                .find(|r| r.name.eq_ignore_ascii_case(incoming.name.trim()))
            {
                Some(existing) => existing.merge(incoming),
                None => self.relations.push(incoming),
            }
        }
    }
}

impl Relation {
    fn merge(&mut self, update: Relation) {
        if update.age != 0 {
            self.age = update.age;
        }
        merge_text(&mut self.relation, update.relation);
        merge_text(&mut self.shared_history, update.shared_history);
    }
}

fn merge_text(current: &mut String, update: String) {
    if !update.trim().is_empty() {
        *current = update;
    }
}

/// Replace `current` with a non-empty, different `update`. Returns whether
/// anything changed.
fn merge_list(current: &mut Vec<String>, update: Vec<String>) -> bool {
    let update: Vec<String> = update
        .into_iter()
        .filter(|item| !item.trim().is_empty())
        .collect();
    if update.is_empty() || *current == update {
        return false;
    }
    *current = update;
    true
}
