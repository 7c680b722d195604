//! The player adapter: event log to prompt to move.
//!
//! One adapter serves one player for one trial. On each elicit it renders
//! the not-yet-presented tail of the event log through the game's
//! presentation function, calls the back-end with retry, and extracts the
//! last `<move>` fragment from the reply. The conversation with the
//! back-end is append-only across rounds.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::PlayerError;
use crate::interp::{Event, MoveSource, TokenUsage};

use super::presentation::{Presentation, PresentationCtx, PresentationMeta};
use super::{ChatMessage, PlayerBackend};

/// Retry configuration for back-end calls.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Maximum attempts per elicit (first try included).
    pub max_attempts: u32,
    /// Backoff before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on the backoff between attempts.
    pub max_backoff: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

fn think_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"))
}

fn move_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<move>(.*?)</move>").expect("valid regex"))
}

/// Extracts the last `<move>…</move>` fragment after stripping `<think>`
/// blocks. `None` when the reply carries no move tags.
fn extract_move(reply: &str) -> Option<String> {
    let cleaned = think_re().replace_all(reply, "");
    move_re()
        .captures_iter(&cleaned)
        .last()
        .map(|c| c[1].to_string())
}

/// Adapter between the interpreter and one player back-end.
pub struct PlayerAdapter {
    backend: Arc<dyn PlayerBackend>,
    presentation: Arc<dyn Presentation>,
    meta: PresentationMeta,
    config: AdapterConfig,
    conversation: Vec<ChatMessage>,
    ctx: PresentationCtx,
    /// Number of events of the current round's log already presented.
    presented: usize,
    usage_total: TokenUsage,
}

impl PlayerAdapter {
    pub fn new(
        backend: Arc<dyn PlayerBackend>,
        presentation: Arc<dyn Presentation>,
        meta: PresentationMeta,
    ) -> Self {
        Self::with_config(backend, presentation, meta, AdapterConfig::default())
    }

    pub fn with_config(
        backend: Arc<dyn PlayerBackend>,
        presentation: Arc<dyn Presentation>,
        meta: PresentationMeta,
        config: AdapterConfig,
    ) -> Self {
        Self {
            backend,
            presentation,
            meta,
            config,
            conversation: Vec::new(),
            ctx: PresentationCtx::new(),
            presented: 0,
            usage_total: TokenUsage::default(),
        }
    }

    /// Total back-end token usage across the trial so far.
    pub fn total_usage(&self) -> TokenUsage {
        self.usage_total
    }

    /// Presentation functions are untrusted; a panic inside one is a
    /// presentation failure, not a harness crash.
    fn run_presentation(
        &mut self,
        registers: &[(String, String)],
        since: &[Event],
        events: &[Event],
    ) -> Result<Vec<ChatMessage>, PlayerError> {
        let presentation = Arc::clone(&self.presentation);
        let meta = self.meta.clone();
        let mut ctx = std::mem::take(&mut self.ctx);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let result = presentation.present(registers, since, &meta, events, &mut ctx);
            (result, ctx)
        }));
        match outcome {
            Ok((result, ctx)) => {
                self.ctx = ctx;
                result
            }
            Err(_) => Err(PlayerError::Presentation(
                "presentation function panicked".to_string(),
            )),
        }
    }

    async fn call_with_retry(&self, max_tokens: usize) -> Result<super::Completion, PlayerError> {
        let mut backoff = self.config.initial_backoff;
        let mut last_message = String::new();
        for attempt in 1..=self.config.max_attempts {
            match self.backend.complete(&self.conversation, max_tokens).await {
                Ok(completion) => return Ok(completion),
                Err(e) if e.is_retriable() && attempt < self.config.max_attempts => {
                    warn!(
                        player = %self.backend.id(),
                        attempt,
                        error = %e,
                        "player call failed, retrying"
                    );
                    last_message = e.to_string();
                    let jittered = backoff.mul_f64(rand::thread_rng().gen_range(0.5..1.5));
                    tokio::time::sleep(jittered.min(self.config.max_backoff)).await;
                    backoff = (backoff * 2).min(self.config.max_backoff);
                }
                Err(e) if e.is_retriable() => {
                    return Err(PlayerError::Unavailable {
                        attempts: self.config.max_attempts,
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Err(PlayerError::Unavailable {
            attempts: self.config.max_attempts,
            message: last_message,
        })
    }
}

#[async_trait]
impl MoveSource for PlayerAdapter {
    fn begin_round(&mut self) {
        // The round's event log starts over; the conversation does not.
        self.presented = 0;
    }

    fn log_truncated(&mut self, len: usize) {
        self.presented = self.presented.min(len);
    }

    async fn provide_move(
        &mut self,
        var: &str,
        max_tokens: usize,
        registers: &[(String, String)],
        events: &[Event],
    ) -> Result<(String, TokenUsage), PlayerError> {
        let since: Vec<Event> = events[self.presented.min(events.len())..].to_vec();
        self.presented = events.len();

        let turns = self.run_presentation(registers, &since, events)?;
        if turns.is_empty() && self.conversation.is_empty() {
            return Err(PlayerError::Presentation(
                "presentation produced an empty transcript".to_string(),
            ));
        }
        self.conversation.extend(turns);

        let completion = self.call_with_retry(max_tokens).await?;
        self.usage_total.add(completion.usage);

        let cleaned = think_re().replace_all(&completion.text, "").to_string();
        self.conversation.push(ChatMessage::assistant(cleaned.as_str()));

        let result = match extract_move(&cleaned) {
            Some(fragment) => fragment,
            None => {
                debug!(player = %self.backend.id(), var, "reply carried no move tags");
                self.conversation.push(ChatMessage::user(
                    "No move specified. Make sure that you provide your move within \
                     the <move></move> tags.",
                ));
                String::new()
            }
        };
        Ok((result, completion.usage))
    }
}
