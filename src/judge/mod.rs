//! Judge capability and the scoring gateway.
//!
//! The judge is the language model used solely for tokenization and
//! scoring; it is distinct from any player model. This module defines the
//! capability interface consumed by the runtime, the process-wide
//! `JudgeGateway` that adds retry, alignment checking, and the xent-family
//! formula operations, and a deterministic in-repo judge for tests and
//! offline runs.
//!
//! The gateway is the only component in the harness that knows about
//! tokenization.

mod gateway;
mod mock;

use async_trait::async_trait;

use crate::error::JudgeError;
use crate::score::Token;

pub use gateway::{GatewayConfig, JudgeGateway};
pub use mock::MockJudge;

/// The judge capability: a causal language model plus its tokenizer.
///
/// Implementations must be deterministic for a fixed model version and
/// seed, and thread-safe; the gateway is shared process-wide and callers
/// never hold locks across its calls.
#[async_trait]
pub trait Judge: Send + Sync {
    /// Identifier of the held model, e.g. `"gpt2"`.
    fn model_id(&self) -> &str;

    /// Canonical tokenization of `text`. Concatenating the returned
    /// surfaces must reproduce `text` exactly.
    async fn tokenize(&self, text: &str) -> Result<Vec<Token>, JudgeError>;

    /// Per-token cross-entropy of `text` given `context`, in bits, one
    /// value per token of `tokenize(text)` in order.
    ///
    /// The first token of `text` is conditioned on `context` only; an
    /// empty `context` means the model's beginning-of-sequence marker.
    async fn score(&self, text: &str, context: &str) -> Result<Vec<f64>, JudgeError>;

    /// Sampled continuation of `prompt`, at most `max_tokens` tokens.
    /// Deterministic for a fixed `seed`.
    async fn sample(&self, prompt: &str, max_tokens: usize, seed: u64) -> Result<String, JudgeError>;
}
