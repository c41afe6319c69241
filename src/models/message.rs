#[cfg(test)]
#[path = "message_test.rs"]
mod tests;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::new_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolState {
    InputAvailable,
    OutputAvailable,
    OutputError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    File {
        url: String,
        media_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolInvocation {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        state: ToolState,
    },
    #[serde(rename_all = "camelCase")]
    SourceUrl {
        source_id: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn file(
        url: impl Into<String>,
        media_type: impl Into<String>,
        filename: Option<String>,
    ) -> Self {
        Part::File {
            url: url.into(),
            media_type: media_type.into(),
            filename,
        }
    }
}

/// A message as it is shown to the user and stored in the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayMessage {
    id: String,
    role: Role,
    #[serde(default)]
    parts: Vec<Part>,
}

impl DisplayMessage {
    pub fn new(role: Role) -> Self {
        Self {
            id: new_id("msg"),
            role,
            parts: vec![],
        }
    }

    pub fn new_user(text: impl Into<String>) -> Self {
        Self::new(Role::User).with_part(Part::text(text))
    }

    pub fn new_assistant() -> Self {
        Self::new(Role::Assistant)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    pub fn with_parts(mut self, parts: Vec<Part>) -> Self {
        self.parts = parts;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Append streamed text. Consecutive deltas extend the trailing text part
    /// instead of creating a new one.
    pub fn append_text(&mut self, delta: &str) {
        if let Some(Part::Text { text }) = self.parts.last_mut() {
            text.push_str(delta);
            return;
        }
        self.parts.push(Part::text(delta));
    }

    pub fn append_reasoning(&mut self, delta: &str) {
        if let Some(Part::Reasoning { text }) = self.parts.last_mut() {
            text.push_str(delta);
            return;
        }
        self.parts.push(Part::Reasoning {
            text: delta.to_string(),
        });
    }

    pub fn push_part(&mut self, part: Part) {
        self.parts.push(part);
    }
}
