//! Presentation functions: event log in, chat transcript out.
//!
//! The presentation function is part of the game, not the player: it
//! defines the information set by deciding how the event log is shown.
//! The runtime never inspects the produced transcript beyond requiring a
//! non-empty sequence of turns, and treats any failure inside a
//! presentation as a player-unavailable condition, because the trial
//! cannot proceed without a prompt.

use std::sync::Arc;

use crate::error::PlayerError;
use crate::interp::Event;

use super::ChatMessage;

/// Opaque state a presentation threads through the trial.
pub type PresentationCtx = serde_json::Map<String, serde_json::Value>;

/// Metadata handed to presentation functions.
#[derive(Debug, Clone)]
pub struct PresentationMeta {
    pub benchmark_id: String,
    pub judge_model: String,
    pub game: String,
    pub map_seed: String,
    pub player_id: String,
    pub num_rounds: usize,
}

/// Renders the event log into chat turns for the player.
pub trait Presentation: Send + Sync {
    /// Produces the next transcript turns.
    ///
    /// `since_events` is the tail of the log not yet presented (ending at
    /// the pending `elicit_request`); `full_history` is the whole round
    /// log; `ctx` persists across calls within one trial.
    fn present(
        &self,
        registers: &[(String, String)],
        since_events: &[Event],
        meta: &PresentationMeta,
        full_history: &[Event],
        ctx: &mut PresentationCtx,
    ) -> Result<Vec<ChatMessage>, PlayerError>;
}

/// Resolves a presentation by the name given in the game config.
pub fn resolve_presentation(name: &str) -> Result<Arc<dyn Presentation>, PlayerError> {
    match name {
        "" | "default" => Ok(Arc::new(DefaultPresentation)),
        other => Err(PlayerError::InvalidConfig(format!(
            "unknown presentation '{}'",
            other
        ))),
    }
}

/// The stock turn-by-turn presentation.
///
/// First call emits a system turn with the rules of engagement; every call
/// renders the unseen events into one user turn ending with the pending
/// move request.
pub struct DefaultPresentation;

impl DefaultPresentation {
    fn render_event(event: &Event, lines: &mut Vec<String>) {
        match event {
            Event::RoundStarted { round_index, .. } => {
                lines.push(format!("--- round {} ---", round_index));
            }
            Event::Reveal { values, .. } => {
                for (name, value) in values {
                    lines.push(format!("{} = {}", name, value));
                }
            }
            Event::Reward { value, .. } => {
                lines.push(format!("reward: {:.3} bits", value.total()));
            }
            Event::FailedEnsure { line_num, .. } => {
                lines.push(format!(
                    "your move failed a constraint (line {}); the game rolled back, try again",
                    line_num
                ));
            }
            Event::ElicitRequest {
                var,
                max_tokens,
                registers,
                ..
            } => {
                if !registers.is_empty() {
                    lines.push("current values:".to_string());
                    for (name, value) in registers {
                        lines.push(format!("  {} = {}", name, value));
                    }
                }
                lines.push(format!(
                    "Provide text for '{}' ({} tokens max), inside <move></move> tags.",
                    var, max_tokens
                ));
            }
            Event::ElicitResponse { var, response, .. } => {
                lines.push(format!("you played {} = {}", var, response));
            }
            Event::RoundFinished { round_index, .. } => {
                lines.push(format!("--- round {} finished ---", round_index));
            }
        }
    }
}

impl Presentation for DefaultPresentation {
    fn present(
        &self,
        _registers: &[(String, String)],
        since_events: &[Event],
        meta: &PresentationMeta,
        _full_history: &[Event],
        ctx: &mut PresentationCtx,
    ) -> Result<Vec<ChatMessage>, PlayerError> {
        let mut messages = Vec::new();

        if !ctx.contains_key("intro_sent") {
            messages.push(ChatMessage::system(format!(
                "You are playing '{}', a cross-entropy game scored by the judge model '{}'. \
                 The game runs for up to {} rounds and your score is the best round. \
                 Rewards are measured in bits of cross-entropy. When asked for a move, \
                 reply with your text inside <move></move> tags; it will be truncated \
                 to the stated token budget.",
                meta.game, meta.judge_model, meta.num_rounds
            )));
            ctx.insert("intro_sent".to_string(), serde_json::Value::Bool(true));
        }

        let mut lines = Vec::new();
        for event in since_events {
            Self::render_event(event, &mut lines);
        }
        if lines.is_empty() {
            lines.push("Provide your move inside <move></move> tags.".to_string());
        }
        messages.push(ChatMessage::user(lines.join("\n")));

        Ok(messages)
    }
}
