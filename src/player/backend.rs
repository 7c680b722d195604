//! The player back-end capability and the shared connection pool.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::PlayerError;
use crate::interp::TokenUsage;

use super::human::HumanBackend;
use super::llm::LlmBackend;
use super::scripted::ScriptedBackend;
use super::{ChatMessage, PlayerKind, PlayerSpec};

/// A back-end reply with its token accounting.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// The player capability consumed by the adapter.
///
/// Retry policy lives in the adapter, not here: back-ends surface
/// transient failures as `PlayerError::Backend` and let the adapter decide
/// how often to come back.
#[async_trait]
pub trait PlayerBackend: Send + Sync {
    /// Stable identity for connection sharing and logging.
    fn id(&self) -> &str;

    /// Completes the transcript with at most `max_tokens` new tokens.
    async fn complete(
        &self,
        transcript: &[ChatMessage],
        max_tokens: usize,
    ) -> Result<Completion, PlayerError>;
}

/// Process-wide pool of player back-end connections.
///
/// LLM back-ends are shared per (provider, model, credential) so that
/// concurrent trials against the same provider reuse one HTTP client and
/// one rate limiter. Scripted and human back-ends hold per-trial state and
/// are built fresh every time.
#[derive(Default)]
pub struct BackendPool {
    shared: Mutex<HashMap<String, Arc<dyn PlayerBackend>>>,
}

impl BackendPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the back-end for a player spec.
    pub async fn backend_for(&self, spec: &PlayerSpec) -> Result<Arc<dyn PlayerBackend>, PlayerError> {
        match spec.player_type {
            PlayerKind::Scripted => Ok(Arc::new(ScriptedBackend::new(
                &spec.id,
                spec.options.moves.clone(),
            ))),
            PlayerKind::Human => Ok(Arc::new(HumanBackend::stdin(&spec.id))),
            PlayerKind::Default => {
                let backend = LlmBackend::from_spec(spec)?;
                let key = backend.pool_key();
                let mut shared = self.shared.lock().await;
                if let Some(existing) = shared.get(&key) {
                    return Ok(Arc::clone(existing));
                }
                let backend: Arc<dyn PlayerBackend> = Arc::new(backend);
                shared.insert(key, Arc::clone(&backend));
                Ok(backend)
            }
        }
    }
}
