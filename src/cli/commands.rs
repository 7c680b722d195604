//! CLI command definitions for xentbench.
//!
//! The CLI drives benchmarks with the built-in deterministic judge, which
//! is good for offline runs and smoke tests. Real judge models implement
//! the `Judge` trait and are wired in through the library API.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::fs;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::bench::{
    aggregate, expand_config, BenchmarkScheduler, BenchmarkStorage, CondensedConfig,
    SchedulerConfig,
};
use crate::judge::{JudgeGateway, MockJudge};
use crate::trial::{derive_seed, TrialConfig};

/// Benchmark harness for adversarial cross-entropy games.
#[derive(Parser)]
#[command(name = "xentbench")]
#[command(about = "Run cross-entropy game benchmarks against LLM players")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Expand a condensed benchmark configuration and print the result.
    Expand {
        /// Path to the condensed configuration JSON.
        config: PathBuf,

        /// Results directory (maps are memoised here).
        #[arg(long, default_value = "results")]
        results_dir: PathBuf,
    },

    /// Run a benchmark to completion, resuming from existing results.
    Run {
        /// Path to the condensed configuration JSON.
        config: PathBuf,

        /// Results directory.
        #[arg(long, default_value = "results")]
        results_dir: PathBuf,

        /// Trials to run in parallel.
        #[arg(long, default_value_t = 4)]
        max_concurrent: usize,

        /// Wall-clock cap per trial, in seconds.
        #[arg(long, default_value_t = 600)]
        trial_timeout_secs: u64,
    },

    /// Recompute aggregates from the trial files on disk.
    Aggregate {
        /// Path to the condensed configuration JSON.
        config: PathBuf,

        /// Results directory.
        #[arg(long, default_value = "results")]
        results_dir: PathBuf,
    },
}

/// Parses CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Initializes tracing from the global `--log-level` flag, then executes
/// the invocation. A set `RUST_LOG` overrides the flag.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
    run_with_cli(cli).await
}

async fn load_condensed(path: &PathBuf) -> anyhow::Result<CondensedConfig> {
    let raw = fs::read_to_string(path).await?;
    Ok(CondensedConfig::from_json(&raw)?)
}

fn build_gateway(config: &CondensedConfig) -> Arc<JudgeGateway> {
    let judge_seed = derive_seed(&config.metadata.seed, "judge");
    Arc::new(JudgeGateway::new(Arc::new(MockJudge::new(
        config.metadata.judge_model.clone(),
        judge_seed,
    ))))
}

/// Executes a parsed CLI invocation.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Expand {
            config,
            results_dir,
        } => {
            let condensed = load_condensed(&config).await?;
            let gateway = build_gateway(&condensed);
            let storage = BenchmarkStorage::new(results_dir, &condensed.metadata.benchmark_id);
            storage.initialize().await?;
            let (expanded, _) = expand_config(&condensed, &gateway, &storage).await?;
            println!("{}", serde_json::to_string_pretty(&expanded)?);
        }

        Commands::Run {
            config,
            results_dir,
            max_concurrent,
            trial_timeout_secs,
        } => {
            let condensed = load_condensed(&config).await?;
            let gateway = build_gateway(&condensed);
            let storage = Arc::new(BenchmarkStorage::new(
                results_dir,
                &condensed.metadata.benchmark_id,
            ));
            let scheduler = BenchmarkScheduler::new(
                gateway,
                storage,
                SchedulerConfig {
                    max_concurrent_trials: max_concurrent,
                    trial: TrialConfig {
                        wall_clock: Duration::from_secs(trial_timeout_secs),
                        ..TrialConfig::default()
                    },
                },
            );
            let summary = scheduler.run(&condensed).await?;
            info!(
                benchmark_id = %condensed.metadata.benchmark_id,
                players = summary.players.len(),
                "benchmark finished"
            );
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Commands::Aggregate {
            config,
            results_dir,
        } => {
            let condensed = load_condensed(&config).await?;
            let gateway = build_gateway(&condensed);
            let storage = BenchmarkStorage::new(results_dir, &condensed.metadata.benchmark_id);
            storage.initialize().await?;
            let (expanded, _) = expand_config(&condensed, &gateway, &storage).await?;

            let mut trials = Vec::new();
            for key in expanded.trial_keys() {
                if let Some(result) = storage
                    .load_trial(&key.game, &key.player_id, &key.map_seed)
                    .await
                {
                    trials.push(result);
                }
            }
            let summary = aggregate(&expanded, &trials);
            storage.store_summary(&summary).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}
