//! Offline aggregation of stored trial results.
//!
//! Nothing aggregates online: every number here derives from the trial
//! files on disk, so a leaderboard can always be recomputed after the
//! fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::trial::TrialResult;

use super::config::ExpandedConfig;

/// One (game, player) cell of the leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamePlayerAggregate {
    pub game: String,
    pub player_id: String,
    /// Mean over maps of the trial headline score.
    pub score: f64,
    /// Element-wise mean over maps of per-round scores, for line charts.
    pub per_iteration: Vec<f64>,
    /// Trials found on disk for this cell.
    pub trials: usize,
    /// Of those, trials that did not complete ok.
    pub failed: usize,
}

/// A player's leaderboard row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerAggregate {
    pub player_id: String,
    /// Mean over games of the per-game score.
    pub overall_score: f64,
    pub games: Vec<GamePlayerAggregate>,
}

/// The scheduler-level benchmark record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSummary {
    pub benchmark_id: String,
    pub judge_model: String,
    pub generated_at: DateTime<Utc>,
    pub players: Vec<PlayerAggregate>,
}

/// Reduces stored trial results to the benchmark summary.
///
/// Trials missing from `trials` simply do not contribute; the scheduler
/// only aggregates once every planned trial has a file.
pub fn aggregate(expanded: &ExpandedConfig, trials: &[TrialResult]) -> BenchmarkSummary {
    let mut game_names: Vec<&str> = expanded.games.iter().map(|g| g.name.as_str()).collect();
    game_names.sort_unstable();

    let players = expanded
        .players
        .iter()
        .map(|player| {
            let games: Vec<GamePlayerAggregate> = game_names
                .iter()
                .map(|game| aggregate_cell(game, &player.id, trials))
                .collect();
            let scored: Vec<f64> = games.iter().map(|g| g.score).collect();
            PlayerAggregate {
                player_id: player.id.clone(),
                overall_score: mean(&scored),
                games,
            }
        })
        .collect();

    BenchmarkSummary {
        benchmark_id: expanded.metadata.benchmark_id.clone(),
        judge_model: expanded.metadata.judge_model.clone(),
        generated_at: Utc::now(),
        players,
    }
}

fn aggregate_cell(game: &str, player_id: &str, trials: &[TrialResult]) -> GamePlayerAggregate {
    let cell: Vec<&TrialResult> = trials
        .iter()
        .filter(|t| t.game == game && t.player_id == player_id)
        .collect();

    let headlines: Vec<f64> = cell.iter().map(|t| t.headline_score).collect();
    let max_rounds = cell.iter().map(|t| t.rounds.len()).max().unwrap_or(0);
    let per_iteration = (0..max_rounds)
        .map(|i| {
            let at_round: Vec<f64> = cell
                .iter()
                .filter_map(|t| t.rounds.get(i).map(|r| r.score))
                .collect();
            mean(&at_round)
        })
        .collect();

    GamePlayerAggregate {
        game: game.to_string(),
        player_id: player_id.to_string(),
        score: mean(&headlines),
        per_iteration,
        trials: cell.len(),
        failed: cell.iter().filter(|t| !t.is_ok()).count(),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
