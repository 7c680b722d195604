//! Benchmark configuration, scheduling, storage, and aggregation.

mod aggregate;
mod config;
mod expand;
mod scheduler;
mod storage;

use thiserror::Error;

pub use aggregate::{aggregate, BenchmarkSummary, GamePlayerAggregate, PlayerAggregate};
pub use config::{
    BenchmarkMetadata, CondensedConfig, ExpandedConfig, ExpansionConfig, GameSpec, SkippedGame,
    TextGeneratorKind, TrialKey,
};
pub use expand::{expand_config, map_seeds};
pub use scheduler::{BenchmarkScheduler, SchedulerConfig};
pub use storage::{BenchmarkStorage, StorageError};

/// Benchmark-level errors. These only exist for configuration and storage
/// problems, which abort scheduling; per-trial failures are encoded in the
/// persisted `TrialResult`s instead.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("task join error: {0}")]
    Join(String),
}
