//! Canned-response player back-end.
//!
//! Used by tests and offline benchmark runs: replies are popped from a
//! fixed queue, and an exhausted queue yields empty replies (which usually
//! produce failed ensures downstream, exactly like a silent player).

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::PlayerError;
use crate::interp::TokenUsage;

use super::{backend::Completion, ChatMessage, PlayerBackend};

/// A player that replays a fixed list of replies.
pub struct ScriptedBackend {
    id: String,
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedBackend {
    pub fn new(id: impl Into<String>, replies: Vec<String>) -> Self {
        Self {
            id: id.into(),
            replies: Mutex::new(replies.into()),
        }
    }

    /// Wraps each reply in `<move>` tags, the way a well-behaved LLM
    /// player is instructed to answer.
    pub fn with_moves(id: impl Into<String>, moves: &[&str]) -> Self {
        Self::new(
            id,
            moves
                .iter()
                .map(|m| format!("<move>{}</move>", m))
                .collect(),
        )
    }
}

#[async_trait]
impl PlayerBackend for ScriptedBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(
        &self,
        transcript: &[ChatMessage],
        _max_tokens: usize,
    ) -> Result<Completion, PlayerError> {
        let text = self.replies.lock().await.pop_front().unwrap_or_default();
        let input_tokens = transcript
            .iter()
            .map(|m| m.content.split_whitespace().count() as u64)
            .sum();
        let output_tokens = text.split_whitespace().count() as u64;
        Ok(Completion {
            text,
            usage: TokenUsage {
                input_tokens,
                output_tokens,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_in_order_then_empty() {
        let backend = ScriptedBackend::with_moves("p", &["first", "second"]);
        let transcript = [ChatMessage::user("go")];
        assert_eq!(
            backend.complete(&transcript, 10).await.unwrap().text,
            "<move>first</move>"
        );
        assert_eq!(
            backend.complete(&transcript, 10).await.unwrap().text,
            "<move>second</move>"
        );
        assert_eq!(backend.complete(&transcript, 10).await.unwrap().text, "");
    }
}
