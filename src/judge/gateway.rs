//! Retrying, alignment-checking front end over a judge back-end.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::JudgeError;
use crate::score::{Token, TokenXent};

use super::Judge;

/// Retry configuration for judge back-end calls.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Maximum number of attempts per call (first try included).
    pub max_attempts: u32,
    /// Backoff before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on the backoff between attempts.
    pub max_backoff: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(8),
        }
    }
}

/// Process-wide scoring front end.
///
/// Wraps a single judge back-end and exposes the operations the game
/// runtime needs: tokenization, token-boundary truncation, conditional
/// cross-entropy, token-aligned differences, and seeded sampling. Transient
/// back-end failures are retried with exponential backoff up to the
/// configured cap, then surfaced as `JudgeError::Unavailable`.
///
/// The gateway outlives all trials and is shared behind an `Arc`.
pub struct JudgeGateway {
    backend: Arc<dyn Judge>,
    config: GatewayConfig,
}

impl JudgeGateway {
    pub fn new(backend: Arc<dyn Judge>) -> Self {
        Self::with_config(backend, GatewayConfig::default())
    }

    pub fn with_config(backend: Arc<dyn Judge>, config: GatewayConfig) -> Self {
        Self { backend, config }
    }

    /// Identifier of the held judge model.
    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    /// Canonical tokenization of `text`.
    pub async fn tokenize(&self, text: &str) -> Result<Vec<Token>, JudgeError> {
        let tokens = self
            .retry("tokenize", || self.backend.tokenize(text))
            .await?;
        let concat: String = tokens.iter().map(|t| t.surface.as_str()).collect();
        if concat != text {
            return Err(JudgeError::Misaligned(format!(
                "tokenization does not round-trip: {:?} -> {:?}",
                text, concat
            )));
        }
        Ok(tokens)
    }

    /// Number of tokens in `text`.
    pub async fn num_tokens(&self, text: &str) -> Result<usize, JudgeError> {
        Ok(self.tokenize(text).await?.len())
    }

    /// Truncates `text` at the token boundary after `max_tokens` tokens.
    /// Returns the input unchanged when it already fits.
    pub async fn truncate_tokens(&self, text: &str, max_tokens: usize) -> Result<String, JudgeError> {
        if max_tokens == 0 {
            return Ok(String::new());
        }
        let tokens = self.tokenize(text).await?;
        if tokens.len() <= max_tokens {
            return Ok(text.to_string());
        }
        Ok(tokens
            .iter()
            .take(max_tokens)
            .map(|t| t.surface.as_str())
            .collect())
    }

    /// Per-token cross-entropy of `text` conditioned on `context`, paired
    /// with the canonical tokens of `text`.
    ///
    /// An empty `context` conditions on the model's beginning-of-sequence
    /// marker. The score vector must match the tokenization element for
    /// element; a mismatch is a `Misaligned` error, never a resize.
    pub async fn xent(&self, text: &str, context: &str) -> Result<TokenXent, JudgeError> {
        let tokens = self.tokenize(text).await?;
        let scores = self
            .retry("score", || self.backend.score(text, context))
            .await?;
        if scores.len() != tokens.len() {
            return Err(JudgeError::Misaligned(format!(
                "judge returned {} scores for {} tokens",
                scores.len(),
                tokens.len()
            )));
        }
        debug!(
            model = %self.backend.model_id(),
            tokens = tokens.len(),
            "scored text"
        );
        Ok(TokenXent::new(tokens.into_iter().zip(scores).collect()))
    }

    /// Token-aligned difference `xent(text | context_a) − xent(text | context_b)`.
    ///
    /// Both runs must tokenize `text` identically; divergence fails the
    /// call with a `Misaligned` error.
    pub async fn xent_diff(
        &self,
        text: &str,
        context_a: &str,
        context_b: &str,
    ) -> Result<TokenXent, JudgeError> {
        let a = self.xent(text, context_a).await?;
        let b = self.xent(text, context_b).await?;
        a.checked_sub(&b)
            .map_err(|e| JudgeError::Misaligned(e.to_string()))
    }

    /// Conditioning gain: `xed(text | prefix) = xent(text) − xent(text | prefix)`.
    ///
    /// How many bits the prefix saves the judge on `text`. With an empty
    /// prefix this is identically zero.
    pub async fn xed(&self, text: &str, prefix: &str) -> Result<TokenXent, JudgeError> {
        self.xent_diff(text, "", prefix).await
    }

    /// Negated cross-entropy: `nex(text | prefix) = −xent(text | prefix)`.
    pub async fn nex(&self, text: &str, prefix: &str) -> Result<TokenXent, JudgeError> {
        Ok(-self.xent(text, prefix).await?)
    }

    /// Negated conditioning gain: `dex(text | prefix) = −xed(text | prefix)`.
    pub async fn dex(&self, text: &str, prefix: &str) -> Result<TokenXent, JudgeError> {
        Ok(-self.xed(text, prefix).await?)
    }

    /// Seeded sampling, used by map generation and story expressions.
    pub async fn generate(
        &self,
        prompt: &str,
        max_tokens: usize,
        seed: u64,
    ) -> Result<String, JudgeError> {
        self.retry("sample", || self.backend.sample(prompt, max_tokens, seed))
            .await
    }

    async fn retry<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T, JudgeError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, JudgeError>>,
    {
        let mut backoff = self.config.initial_backoff;
        let mut last_message = String::new();
        for attempt in 1..=self.config.max_attempts {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retriable() && attempt < self.config.max_attempts => {
                    warn!(op, attempt, error = %e, "judge call failed, retrying");
                    last_message = e.to_string();
                    // Full jitter keeps concurrent trials from retrying in lockstep.
                    let jittered = backoff.mul_f64(rand::thread_rng().gen_range(0.5..1.5));
                    tokio::time::sleep(jittered.min(self.config.max_backoff)).await;
                    backoff = (backoff * 2).min(self.config.max_backoff);
                }
                Err(e) if e.is_retriable() => {
                    return Err(JudgeError::Unavailable {
                        attempts: self.config.max_attempts,
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Err(JudgeError::Unavailable {
            attempts: self.config.max_attempts,
            message: last_message,
        })
    }
}
