//! Benchmark configuration.
//!
//! A benchmark arrives *condensed*: games, players, and an expansion
//! recipe. Expansion derives the map seeds, resolves the map prefixes, and
//! yields the Cartesian product of games × maps × players as the trial
//! list. The expanded form is what the scheduler executes and what result
//! directories record.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::player::PlayerSpec;
use crate::trial::GameMap;

use super::BenchError;

/// Benchmark-wide metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkMetadata {
    pub benchmark_id: String,
    /// Judge model identifier; the judge back-end must hold this model.
    pub judge_model: String,
    pub num_rounds_per_game: usize,
    /// Master seed; every map seed derives from it.
    pub seed: String,
}

/// Story text generator selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TextGeneratorKind {
    /// Seeded sampling on the judge model.
    Judge,
    /// Draws from a fixed text archive file.
    CommunityArchive,
}

/// How to expand a condensed config into maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionConfig {
    pub num_maps_per_game: usize,
    pub generator: TextGeneratorKind,
    /// Token budget per sampled story.
    pub max_story_length: usize,
    /// Archive file (one text per line) for `COMMUNITY_ARCHIVE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_path: Option<PathBuf>,
}

/// One game: name, XDL source, presentation selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSpec {
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub presentation: String,
}

/// The condensed benchmark configuration, as authored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CondensedConfig {
    pub metadata: BenchmarkMetadata,
    pub expansion: ExpansionConfig,
    pub players: Vec<PlayerSpec>,
    pub games: Vec<GameSpec>,
}

impl CondensedConfig {
    pub fn from_json(json: &str) -> Result<Self, BenchError> {
        let config: CondensedConfig =
            serde_json::from_str(json).map_err(|e| BenchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the scheduler cannot execute sensibly.
    pub fn validate(&self) -> Result<(), BenchError> {
        if self.metadata.benchmark_id.is_empty() {
            return Err(BenchError::Config("benchmark_id must not be empty".into()));
        }
        if self.metadata.num_rounds_per_game == 0 {
            return Err(BenchError::Config(
                "num_rounds_per_game must be at least 1".into(),
            ));
        }
        if self.expansion.num_maps_per_game == 0 {
            return Err(BenchError::Config(
                "num_maps_per_game must be at least 1".into(),
            ));
        }
        if self.players.is_empty() {
            return Err(BenchError::Config("at least one player required".into()));
        }
        if self.games.is_empty() {
            return Err(BenchError::Config("at least one game required".into()));
        }
        let mut player_ids: Vec<&str> = self.players.iter().map(|p| p.id.as_str()).collect();
        player_ids.sort_unstable();
        player_ids.dedup();
        if player_ids.len() != self.players.len() {
            return Err(BenchError::Config("player ids must be unique".into()));
        }
        let mut game_names: Vec<&str> = self.games.iter().map(|g| g.name.as_str()).collect();
        game_names.sort_unstable();
        game_names.dedup();
        if game_names.len() != self.games.len() {
            return Err(BenchError::Config("game names must be unique".into()));
        }
        if self.expansion.generator == TextGeneratorKind::CommunityArchive
            && self.expansion.archive_path.is_none()
        {
            return Err(BenchError::Config(
                "COMMUNITY_ARCHIVE generation needs archive_path".into(),
            ));
        }
        Ok(())
    }
}

/// A game whose XDL failed to parse: its trials are errored up front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedGame {
    pub name: String,
    pub reason: String,
    pub map_seeds: Vec<String>,
}

/// The expanded configuration: everything the scheduler needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedConfig {
    pub metadata: BenchmarkMetadata,
    pub players: Vec<PlayerSpec>,
    pub games: Vec<GameSpec>,
    /// Resolved maps for every parseable game.
    pub maps: Vec<GameMap>,
    /// Games dropped by parse errors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedGame>,
}

/// Stable trial identity: `game × player × map_seed`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrialKey {
    pub game: String,
    pub player_id: String,
    pub map_seed: String,
}

impl std::fmt::Display for TrialKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}) for {}", self.game, self.map_seed, self.player_id)
    }
}

impl ExpandedConfig {
    /// Every planned trial, including those of skipped games.
    pub fn trial_keys(&self) -> Vec<TrialKey> {
        let mut keys = Vec::new();
        for map in &self.maps {
            for player in &self.players {
                keys.push(TrialKey {
                    game: map.game.clone(),
                    player_id: player.id.clone(),
                    map_seed: map.map_seed.clone(),
                });
            }
        }
        for skipped in &self.skipped {
            for map_seed in &skipped.map_seeds {
                for player in &self.players {
                    keys.push(TrialKey {
                        game: skipped.name.clone(),
                        player_id: player.id.clone(),
                        map_seed: map_seed.clone(),
                    });
                }
            }
        }
        keys
    }
}
