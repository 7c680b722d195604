//! The benchmark scheduler.
//!
//! Expands a condensed configuration into a trial list and runs it with
//! bounded parallelism. The result directory is the source of truth: a
//! trial whose file already parses is skipped, everything else is
//! (re)computed, and even failed trials get a result file so a restart
//! can tell "done and broken" from "not yet attempted".

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::interp::TokenUsage;
use crate::judge::JudgeGateway;
use crate::player::BackendPool;
use crate::trial::{
    run_trial, TrialConfig, TrialContext, TrialErrorInfo, TrialResult, TrialStatus,
};
use crate::xdl::Program;

use super::aggregate::{aggregate, BenchmarkSummary};
use super::config::{CondensedConfig, ExpandedConfig};
use super::expand::expand_config;
use super::storage::BenchmarkStorage;
use super::BenchError;

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker-pool size: trials in flight at once.
    pub max_concurrent_trials: usize,
    /// Per-trial limits. `max_rounds` is overridden by the benchmark
    /// metadata.
    pub trial: TrialConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_trials: 4,
            trial: TrialConfig::default(),
        }
    }
}

/// Runs benchmarks against one judge gateway and one results directory.
pub struct BenchmarkScheduler {
    gateway: Arc<JudgeGateway>,
    pool: Arc<BackendPool>,
    storage: Arc<BenchmarkStorage>,
    config: SchedulerConfig,
}

impl BenchmarkScheduler {
    pub fn new(
        gateway: Arc<JudgeGateway>,
        storage: Arc<BenchmarkStorage>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            gateway,
            pool: Arc::new(BackendPool::new()),
            storage,
            config,
        }
    }

    /// Expands and executes a condensed configuration, then aggregates.
    ///
    /// Idempotent: running twice against the same results directory leaves
    /// existing trial files untouched and recomputes only what is missing.
    pub async fn run(&self, condensed: &CondensedConfig) -> Result<BenchmarkSummary, BenchError> {
        self.storage.initialize().await?;
        let (expanded, programs) = expand_config(condensed, &self.gateway, &self.storage).await?;

        self.storage.set_running(true).await?;
        let outcome = self.execute(&expanded, programs).await;
        self.storage.set_running(false).await?;
        outcome
    }

    async fn execute(
        &self,
        expanded: &ExpandedConfig,
        programs: HashMap<String, Program>,
    ) -> Result<BenchmarkSummary, BenchError> {
        let benchmark_id = &expanded.metadata.benchmark_id;
        info!(
            benchmark_id = %benchmark_id,
            trials = expanded.trial_keys().len(),
            workers = self.config.max_concurrent_trials,
            "starting benchmark"
        );
        self.storage
            .append_log(&format!("benchmark {} started", benchmark_id))
            .await?;

        self.record_skipped_games(expanded).await?;
        self.dispatch_trials(expanded, Arc::new(programs)).await?;

        // Everything aggregates from disk so results stay recomputable.
        let mut trials = Vec::new();
        for key in expanded.trial_keys() {
            if let Some(result) = self
                .storage
                .load_trial(&key.game, &key.player_id, &key.map_seed)
                .await
            {
                trials.push(result);
            } else {
                error!(trial = %key, "trial produced no result file");
            }
        }

        let summary = aggregate(expanded, &trials);
        self.storage.store_summary(&summary).await?;
        for player in &summary.players {
            for cell in &player.games {
                self.storage
                    .store_game_aggregate(&cell.game, &cell.player_id, cell)
                    .await?;
            }
        }
        self.storage
            .append_log(&format!("benchmark {} completed", benchmark_id))
            .await?;
        info!(benchmark_id = %benchmark_id, "benchmark completed");
        Ok(summary)
    }

    /// Writes an errored result for every trial of a game that failed to
    /// parse, unless a file already exists.
    async fn record_skipped_games(&self, expanded: &ExpandedConfig) -> Result<(), BenchError> {
        for skipped in &expanded.skipped {
            for map_seed in &skipped.map_seeds {
                for player in &expanded.players {
                    if self
                        .storage
                        .load_trial(&skipped.name, &player.id, map_seed)
                        .await
                        .is_some()
                    {
                        continue;
                    }
                    let result = TrialResult {
                        game: skipped.name.clone(),
                        map_seed: map_seed.clone(),
                        player_id: player.id.clone(),
                        events: vec![],
                        rounds: vec![],
                        headline_score: 0.0,
                        status: TrialStatus::Errored,
                        error: Some(TrialErrorInfo::new("parse_error", skipped.reason.clone())),
                        token_usage: TokenUsage::default(),
                        completed_at: Utc::now(),
                    };
                    self.storage.store_trial(&result).await?;
                }
            }
        }
        Ok(())
    }

    async fn dispatch_trials(
        &self,
        expanded: &ExpandedConfig,
        programs: Arc<HashMap<String, Program>>,
    ) -> Result<(), BenchError> {
        let presentations: HashMap<String, String> = expanded
            .games
            .iter()
            .map(|g| (g.name.clone(), g.presentation.clone()))
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_trials));
        let mut tasks = JoinSet::new();

        for map in &expanded.maps {
            for player in &expanded.players {
                let gateway = Arc::clone(&self.gateway);
                let pool = Arc::clone(&self.pool);
                let storage = Arc::clone(&self.storage);
                let programs = Arc::clone(&programs);
                let semaphore = Arc::clone(&semaphore);
                let map = map.clone();
                let player = player.clone();
                let presentation = presentations.get(&map.game).cloned().unwrap_or_default();
                let benchmark_id = expanded.metadata.benchmark_id.clone();
                let master_seed = expanded.metadata.seed.clone();
                let trial_config = TrialConfig {
                    max_rounds: expanded.metadata.num_rounds_per_game,
                    ..self.config.trial.clone()
                };

                tasks.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("semaphore never closed");

                    if let Some(existing) = storage
                        .load_trial(&map.game, &player.id, &map.map_seed)
                        .await
                    {
                        info!(
                            game = %map.game,
                            map_seed = %map.map_seed,
                            player = %player.id,
                            "found existing result, skipping"
                        );
                        let _ = storage
                            .append_log(&format!(
                                "skipped {} ({}) for {}: already {}",
                                map.game,
                                map.map_seed,
                                player.id,
                                serde_json::to_string(&existing.status).unwrap_or_default()
                            ))
                            .await;
                        return Ok::<(), BenchError>(());
                    }

                    let program = programs
                        .get(&map.game)
                        .expect("maps only exist for parsed games");
                    let result = run_trial(TrialContext {
                        gateway: &gateway,
                        pool: &pool,
                        program,
                        map: &map,
                        player: &player,
                        presentation: &presentation,
                        benchmark_id: &benchmark_id,
                        master_seed: &master_seed,
                        config: &trial_config,
                    })
                    .await;

                    storage.store_trial(&result).await?;
                    let _ = storage
                        .append_log(&format!(
                            "finished {} ({}) for {}: {} (headline {:.3})",
                            map.game,
                            map.map_seed,
                            player.id,
                            serde_json::to_string(&result.status).unwrap_or_default(),
                            result.headline_score
                        ))
                        .await;
                    Ok(())
                });
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(BenchError::Join(e.to_string())),
            }
        }
        Ok(())
    }
}
