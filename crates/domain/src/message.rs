//! Chat message model for the session history list.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry in the append-only session history. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Render recent history as a compact transcript block for prompts.
pub fn format_transcript(messages: &[Message]) -> String {
    let mut lines = Vec::with_capacity(messages.len());
    for msg in messages {
        match msg.role {
            Role::User => lines.push(format!("Player: {}", msg.content)),
            Role::Assistant => lines.push(format!("DM: {}", msg.content)),
            Role::System => lines.push(format!("[System]: {}", msg.content)),
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_wire_names_are_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).expect("serialize"), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).expect("serialize"),
            "\"assistant\""
        );
    }

    #[test]
    fn message_round_trips() {
        let msg = Message::user("look around");
        let json = serde_json::to_string(&msg).expect("serialize");
        let back: Message = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, msg);
    }

    #[test]
    fn transcript_formats_by_role() {
        let transcript = format_transcript(&[
            Message::system("player spawned at tavern"),
            Message::user("hello"),
            Message::assistant("The barkeep nods."),
        ]);
        assert_eq!(
            transcript,
            "[System]: player spawned at tavern\nPlayer: hello\nDM: The barkeep nods."
        );
    }

    #[test]
    fn empty_transcript_is_empty_string() {
        assert_eq!(format_transcript(&[]), "");
    }
}
