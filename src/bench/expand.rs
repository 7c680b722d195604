//! Condensed-to-expanded configuration expansion.
//!
//! Derives `num_maps_per_game` map seeds per game from the master seed,
//! resolves each map's prefix with the configured text source, and carries
//! parse failures forward as skipped games so the scheduler can still
//! produce an errored result file for every planned trial.

use std::collections::HashMap;

use tokio::fs;
use tracing::{info, warn};

use crate::judge::JudgeGateway;
use crate::trial::{MapGenerator, TextSource};
use crate::xdl::{parse_program, Program};

use super::config::{CondensedConfig, ExpandedConfig, SkippedGame, TextGeneratorKind};
use super::storage::BenchmarkStorage;
use super::BenchError;

/// Deterministic map seed names for one game.
pub fn map_seeds(game: &str, num_maps: usize) -> Vec<String> {
    (0..num_maps)
        .map(|i| format!("game{}_map{}", game, i))
        .collect()
}

/// Expands a condensed configuration.
///
/// Maps are memoised through `storage`; a re-run (or a second player) of
/// the same (game, map seed) pair reuses the stored opening instead of
/// sampling again. Returns the expanded config plus the parsed program for
/// each surviving game.
pub async fn expand_config(
    condensed: &CondensedConfig,
    gateway: &JudgeGateway,
    storage: &BenchmarkStorage,
) -> Result<(ExpandedConfig, HashMap<String, Program>), BenchError> {
    condensed.validate()?;

    let source = match condensed.expansion.generator {
        TextGeneratorKind::Judge => TextSource::Judge,
        TextGeneratorKind::CommunityArchive => {
            let path = condensed
                .expansion
                .archive_path
                .as_ref()
                .expect("validated above");
            let raw = fs::read_to_string(path)
                .await
                .map_err(|e| BenchError::Config(format!("cannot read archive: {}", e)))?;
            let texts: Vec<String> = raw
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect();
            if texts.is_empty() {
                return Err(BenchError::Config("archive file has no texts".into()));
            }
            TextSource::CommunityArchive { texts }
        }
    };
    let generator = MapGenerator::new(gateway, source, condensed.expansion.max_story_length);

    let mut maps = Vec::new();
    let mut skipped = Vec::new();
    let mut programs = HashMap::new();

    for game in &condensed.games {
        let seeds = map_seeds(&game.name, condensed.expansion.num_maps_per_game);
        let program = match parse_program(&game.code) {
            Ok(program) => program,
            Err(e) => {
                // A bad game never aborts the benchmark; its trials all
                // come back errored.
                warn!(game = %game.name, error = %e, "game failed to parse, skipping");
                skipped.push(SkippedGame {
                    name: game.name.clone(),
                    reason: e.to_string(),
                    map_seeds: seeds,
                });
                continue;
            }
        };

        for map_seed in &seeds {
            let map = match storage.load_map(&game.name, map_seed).await {
                Some(map) => map,
                None => {
                    let map = generator
                        .generate(&game.name, &program, &condensed.metadata.seed, map_seed)
                        .await
                        .map_err(|e| {
                            BenchError::Config(format!(
                                "map generation failed for {} ({}): {}",
                                game.name, map_seed, e
                            ))
                        })?;
                    storage.store_map(&map).await?;
                    map
                }
            };
            maps.push(map);
        }
        programs.insert(game.name.clone(), program);
    }

    info!(
        games = condensed.games.len(),
        skipped = skipped.len(),
        maps = maps.len(),
        "expanded benchmark config"
    );
    Ok((
        ExpandedConfig {
            metadata: condensed.metadata.clone(),
            players: condensed.players.clone(),
            games: condensed.games.clone(),
            maps,
            skipped,
        },
        programs,
    ))
}
