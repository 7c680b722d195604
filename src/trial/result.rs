//! Trial outcome types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GameError, JudgeError, PlayerError};
use crate::interp::{Event, RoundRecord, TokenUsage};

/// Final status of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialStatus {
    /// Completed normally.
    Ok,
    /// Terminated by a non-retriable error.
    Errored,
    /// Terminated by the wall-clock cap.
    Cancelled,
    /// Every played round hit the ensure retry cap.
    Stuck,
}

/// Serializable error attached to a failed trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialErrorInfo {
    pub kind: String,
    pub message: String,
}

impl TrialErrorInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Maps a game error onto the trial-level error taxonomy.
    pub fn from_game_error(error: &GameError) -> Self {
        let kind = match error {
            GameError::Judge(JudgeError::Unavailable { .. })
            | GameError::Judge(JudgeError::Backend(_)) => "judge_unavailable",
            GameError::Judge(JudgeError::Misaligned(_)) | GameError::Score(_) => {
                "scoring_alignment"
            }
            GameError::Player(PlayerError::Presentation(_)) => "player_unavailable",
            GameError::Player(_) => "player_unavailable",
            GameError::EnsureExceeded { .. } => "ensure_exceeded",
            GameError::UndefinedRegister { .. }
            | GameError::TypeMismatch { .. }
            | GameError::Internal(_) => "game_error",
        };
        Self::new(kind, error.to_string())
    }
}

/// Per-round scalars surfaced to the leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub index: usize,
    /// Sum of reward totals in the round.
    pub score: f64,
    /// `elicit_response` events observed.
    pub arms: u32,
    /// `reward` events observed.
    pub iterations: u32,
    /// The round was abandoned at the ensure retry cap.
    #[serde(default)]
    pub stuck: bool,
}

impl From<&RoundRecord> for RoundSummary {
    fn from(record: &RoundRecord) -> Self {
        Self {
            index: record.index,
            score: record.score,
            arms: record.arms,
            iterations: record.iterations,
            stuck: record.stuck,
        }
    }
}

/// The persisted outcome of one (game, map, player) trial.
///
/// `events` is the concatenated event log of all rounds; round boundaries
/// are visible through `round_started` / `round_finished` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub game: String,
    pub map_seed: String,
    pub player_id: String,
    pub events: Vec<Event>,
    pub rounds: Vec<RoundSummary>,
    /// The per-trial scalar: best round total, ties to the earliest round.
    pub headline_score: f64,
    pub status: TrialStatus,
    pub error: Option<TrialErrorInfo>,
    #[serde(default)]
    pub token_usage: TokenUsage,
    pub completed_at: DateTime<Utc>,
}

impl TrialResult {
    pub fn is_ok(&self) -> bool {
        self.status == TrialStatus::Ok
    }

    /// Index of the round achieving the headline score: the earliest round
    /// with the maximum total.
    pub fn winning_round(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for round in &self.rounds {
            match best {
                Some((_, score)) if round.score <= score => {}
                _ => best = Some((round.index, round.score)),
            }
        }
        best.map(|(index, _)| index)
    }
}

/// Headline score over a set of round summaries: maximum round total,
/// 0 when no round was played.
pub fn headline_score(rounds: &[RoundSummary]) -> f64 {
    rounds
        .iter()
        .map(|r| r.score)
        .fold(None::<f64>, |best, score| {
            Some(match best {
                Some(b) if b >= score => b,
                _ => score,
            })
        })
        .unwrap_or(0.0)
}
