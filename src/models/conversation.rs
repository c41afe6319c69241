#[cfg(test)]
#[path = "conversation_test.rs"]
mod tests;

use serde::{Deserialize, Serialize};

use super::{DisplayMessage, Role};

const DEFAULT_TITLE: &str = "New Chat";
const MAX_TITLE_CHARS: usize = 50;

/// Entry of the conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMeta {
    pub id: String,
    pub title: String,
}

impl ConversationMeta {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

/// Generate a prefixed, collision resistant id, e.g. `chat-3f2a...`.
pub fn new_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}

pub fn new_conversation_id() -> String {
    new_id("chat")
}

/// Title of a transcript: the first line of the first user text.
pub fn title_of(messages: &[DisplayMessage]) -> String {
    let first = messages
        .iter()
        .filter(|m| m.role() == Role::User)
        .map(|m| m.text())
        .find(|text| !text.trim().is_empty());

    let Some(text) = first else {
        return DEFAULT_TITLE.to_string();
    };

    let line = text.trim().lines().next().unwrap_or_default().trim();
    let mut title: String = line.chars().take(MAX_TITLE_CHARS).collect();
    if line.chars().count() > MAX_TITLE_CHARS {
        title.push('…');
    }
    title
}
