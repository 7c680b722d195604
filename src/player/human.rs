//! Human player: moves arrive over a live channel.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};

use crate::error::PlayerError;
use crate::interp::TokenUsage;

use super::{backend::Completion, ChatMessage, PlayerBackend};

/// A player whose moves are read from a channel.
///
/// The last transcript turn is forwarded on `prompt_tx` so whatever drives
/// the channel (a terminal, a websocket bridge) can show the human what
/// the game is asking; the reply comes back on `move_rx`.
pub struct HumanBackend {
    id: String,
    prompt_tx: mpsc::UnboundedSender<String>,
    move_rx: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl HumanBackend {
    /// A channel-backed human player. The caller keeps the other ends.
    pub fn new(
        id: impl Into<String>,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedSender<String>,
    ) {
        let (prompt_tx, prompt_rx) = mpsc::unbounded_channel();
        let (move_tx, move_rx) = mpsc::unbounded_channel();
        (
            Self {
                id: id.into(),
                prompt_tx,
                move_rx: Mutex::new(move_rx),
            },
            prompt_rx,
            move_tx,
        )
    }

    /// A human on the local terminal: prompts print to stdout, one line of
    /// stdin per move.
    pub fn stdin(id: impl Into<String>) -> Self {
        let (backend, mut prompt_rx, move_tx) = Self::new(id);
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(prompt) = prompt_rx.recv().await {
                println!("{}", prompt);
                println!("your move (wrap in <move></move>):");
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if move_tx.send(line).is_err() {
                            break;
                        }
                    }
                    _ => break,
                }
            }
        });
        backend
    }
}

#[async_trait]
impl PlayerBackend for HumanBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(
        &self,
        transcript: &[ChatMessage],
        _max_tokens: usize,
    ) -> Result<Completion, PlayerError> {
        let prompt = transcript
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.prompt_tx
            .send(prompt)
            .map_err(|_| PlayerError::Backend("human channel closed".into()))?;

        let mut rx = self.move_rx.lock().await;
        match rx.recv().await {
            Some(text) => Ok(Completion {
                text,
                usage: TokenUsage::default(),
            }),
            None => Err(PlayerError::Backend("human channel closed".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_roundtrip() {
        let (backend, mut prompt_rx, move_tx) = HumanBackend::new("human");
        let driver = tokio::spawn(async move {
            let prompt = prompt_rx.recv().await.unwrap();
            assert!(prompt.contains("your story"));
            move_tx.send("<move>a knight</move>".to_string()).unwrap();
        });

        let transcript = [ChatMessage::user("continue your story")];
        let completion = backend.complete(&transcript, 10).await.unwrap();
        assert_eq!(completion.text, "<move>a knight</move>");
        driver.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_channel_is_backend_error() {
        let (backend, prompt_rx, move_tx) = HumanBackend::new("human");
        drop(prompt_rx);
        drop(move_tx);
        let err = backend
            .complete(&[ChatMessage::user("hello")], 10)
            .await
            .unwrap_err();
        assert!(matches!(err, PlayerError::Backend(_)));
    }
}
