//! Players and the player adapter.
//!
//! A player is anything that can turn a chat transcript into a move: an
//! LLM back-end reached over HTTP, a human on a live channel, or a
//! scripted stand-in for tests. The adapter owns the conversation with one
//! player for the duration of a trial: it renders the event log through
//! the game's presentation function, calls the back-end with retry, and
//! extracts the `<move>` from the reply.

mod adapter;
mod backend;
mod human;
mod llm;
mod presentation;
mod ratelimit;
mod scripted;

use serde::{Deserialize, Serialize};

pub use adapter::{AdapterConfig, PlayerAdapter};
pub use backend::{BackendPool, Completion, PlayerBackend};
pub use human::HumanBackend;
pub use llm::LlmBackend;
pub use presentation::{
    resolve_presentation, DefaultPresentation, Presentation, PresentationCtx, PresentationMeta,
};
pub use ratelimit::TokenBucket;
pub use scripted::ScriptedBackend;

/// A message in a chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the sender ("system", "user", "assistant").
    pub role: String,
    /// Content of the message.
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Player variant selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerKind {
    /// Production LLM wrapper with standard extraction and retry.
    Default,
    /// Canned responses, for tests and offline runs.
    Scripted,
    /// Moves read from a live channel.
    Human,
}

/// Back-end request options for a player.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerOptions {
    /// Model identifier, e.g. "gpt-4o" or "claude-sonnet-4-5".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Provider name; guessed from the model when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Token-bucket refill rate for this provider/credential pair.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<f64>,
    /// Canned moves for scripted players.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub moves: Vec<String>,
}

/// A configured player: identity, variant, and back-end options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSpec {
    pub id: String,
    pub player_type: PlayerKind,
    #[serde(default)]
    pub options: PlayerOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_roles() {
        assert_eq!(ChatMessage::system("s").role, "system");
        assert_eq!(ChatMessage::user("u").role, "user");
        assert_eq!(ChatMessage::assistant("a").role, "assistant");
    }

    #[test]
    fn test_player_spec_deserializes_with_defaults() {
        let spec: PlayerSpec = serde_json::from_str(
            r#"{ "id": "gpt-4o", "player_type": "default", "options": { "model": "gpt-4o" } }"#,
        )
        .unwrap();
        assert_eq!(spec.player_type, PlayerKind::Default);
        assert_eq!(spec.options.model.as_deref(), Some("gpt-4o"));
        assert!(spec.options.temperature.is_none());

        let bare: PlayerSpec =
            serde_json::from_str(r#"{ "id": "h", "player_type": "human" }"#).unwrap();
        assert_eq!(bare.options, PlayerOptions::default());
    }
}
