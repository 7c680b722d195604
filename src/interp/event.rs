//! Per-round event log entries.
//!
//! The event log is the append-only record of one round and the only input
//! to the presentation function: everything a player observes flows
//! through it. Register snapshots are embedded in `elicit_request` events
//! so presentation functions stay pure with respect to interpreter
//! internals.

use serde::{Deserialize, Serialize};

use crate::score::TokenXent;

/// Input/output token counts for a player back-end call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// One entry in a round's event log.
///
/// Within a round, emission order equals execution order. Every event
/// carries the 1-based source line of the operation that emitted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RoundStarted {
        line_num: usize,
        round_index: usize,
    },
    /// A move was requested from the player. `registers` is the ordered
    /// snapshot of the register file at request time.
    ElicitRequest {
        line_num: usize,
        var: String,
        max_tokens: usize,
        registers: Vec<(String, String)>,
    },
    /// The player's move, after token-boundary truncation.
    ElicitResponse {
        line_num: usize,
        var: String,
        response: String,
        token_usage: TokenUsage,
    },
    /// Bindings disclosed to the player, in argument order.
    Reveal {
        line_num: usize,
        values: Vec<(String, String)>,
    },
    /// A reward was awarded.
    Reward {
        line_num: usize,
        value: TokenXent,
    },
    /// An `ensure` failed; execution rolled back to the cited beacon.
    FailedEnsure {
        line_num: usize,
        beacon_line: usize,
        ensure_results: Vec<bool>,
    },
    RoundFinished {
        line_num: usize,
        round_index: usize,
    },
}

impl Event {
    /// Source line of the emitting operation.
    pub fn line_num(&self) -> usize {
        match self {
            Event::RoundStarted { line_num, .. }
            | Event::ElicitRequest { line_num, .. }
            | Event::ElicitResponse { line_num, .. }
            | Event::Reveal { line_num, .. }
            | Event::Reward { line_num, .. }
            | Event::FailedEnsure { line_num, .. }
            | Event::RoundFinished { line_num, .. } => *line_num,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::{Token, TokenXent};

    #[test]
    fn test_events_tag_by_type() {
        let event = Event::ElicitRequest {
            line_num: 3,
            var: "x".into(),
            max_tokens: 10,
            registers: vec![("s".into(), "story text".into())],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "elicit_request");
        assert_eq!(json["line_num"], 3);
        assert_eq!(json["registers"][0][0], "s");
    }

    #[test]
    fn test_reward_event_roundtrip() {
        let value = TokenXent::new(vec![(Token::new(1, "hi"), 2.0)]);
        let event = Event::Reward { line_num: 6, value };
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        match back {
            Event::Reward { value, .. } => assert!((value.total() - 2.0).abs() < 1e-12),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
