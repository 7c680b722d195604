//! On-disk benchmark storage.
//!
//! The filesystem is the only cross-process rendezvous: the presence of a
//! parseable file means "done", its absence means "not yet". All writes go
//! through a temp file renamed into place so a crash can never leave a
//! half-written file looking complete.
//!
//! Layout under `<results_dir>/<benchmark_id>/`:
//!
//! - `trial_<game>_<player>_<map_seed>.json` — one per trial
//! - `maps/map_<game>_<map_seed>.json` — memoised map prefixes
//! - `benchmark_<id>.json` — the aggregate summary
//! - `game_<game>_<player>.json` — per (game, player) aggregation
//! - `log.txt`, `running_state.txt`

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::trial::{GameMap, TrialResult};

/// Errors from benchmark storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Replaces filesystem-hostile characters in an identity component.
pub(crate) fn sanitize_component(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Directory-backed storage for one benchmark run.
pub struct BenchmarkStorage {
    results_dir: PathBuf,
    benchmark_id: String,
}

impl BenchmarkStorage {
    pub fn new(results_dir: impl Into<PathBuf>, benchmark_id: impl Into<String>) -> Self {
        Self {
            results_dir: results_dir.into(),
            benchmark_id: benchmark_id.into(),
        }
    }

    /// `<results_dir>/<benchmark_id>/`.
    pub fn dir(&self) -> PathBuf {
        self.results_dir.join(sanitize_component(&self.benchmark_id))
    }

    fn maps_dir(&self) -> PathBuf {
        self.dir().join("maps")
    }

    /// Creates the directory structure.
    pub async fn initialize(&self) -> Result<(), StorageError> {
        fs::create_dir_all(self.maps_dir()).await?;
        Ok(())
    }

    /// Stable per-trial path; doubles as the idempotency key.
    pub fn trial_path(&self, game: &str, player_id: &str, map_seed: &str) -> PathBuf {
        self.dir().join(format!(
            "trial_{}_{}_{}.json",
            sanitize_component(game),
            sanitize_component(player_id),
            sanitize_component(map_seed)
        ))
    }

    /// Loads a completed trial result.
    ///
    /// An unparseable file is treated as a partial write from an
    /// interrupted run: it is discarded so the trial gets re-queued.
    pub async fn load_trial(
        &self,
        game: &str,
        player_id: &str,
        map_seed: &str,
    ) -> Option<TrialResult> {
        let path = self.trial_path(game, player_id, map_seed);
        let bytes = fs::read(&path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding partial trial result");
                let _ = fs::remove_file(&path).await;
                None
            }
        }
    }

    pub async fn store_trial(&self, result: &TrialResult) -> Result<(), StorageError> {
        let path = self.trial_path(&result.game, &result.player_id, &result.map_seed);
        self.write_atomic(&path, &serde_json::to_vec_pretty(result)?)
            .await
    }

    fn map_path(&self, game: &str, map_seed: &str) -> PathBuf {
        self.maps_dir().join(format!(
            "map_{}_{}.json",
            sanitize_component(game),
            sanitize_component(map_seed)
        ))
    }

    pub async fn load_map(&self, game: &str, map_seed: &str) -> Option<GameMap> {
        let bytes = fs::read(self.map_path(game, map_seed)).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub async fn store_map(&self, map: &GameMap) -> Result<(), StorageError> {
        let path = self.map_path(&map.game, &map.map_seed);
        self.write_atomic(&path, &serde_json::to_vec_pretty(map)?)
            .await
    }

    /// Writes the scheduler-level benchmark record.
    pub async fn store_summary<T: serde::Serialize>(&self, summary: &T) -> Result<(), StorageError> {
        let path = self.dir().join(format!(
            "benchmark_{}.json",
            sanitize_component(&self.benchmark_id)
        ));
        self.write_atomic(&path, &serde_json::to_vec_pretty(summary)?)
            .await
    }

    /// Writes one per-(game, player) aggregation file.
    pub async fn store_game_aggregate<T: serde::Serialize>(
        &self,
        game: &str,
        player_id: &str,
        aggregate: &T,
    ) -> Result<(), StorageError> {
        let path = self.dir().join(format!(
            "game_{}_{}.json",
            sanitize_component(game),
            sanitize_component(player_id)
        ));
        self.write_atomic(&path, &serde_json::to_vec_pretty(aggregate)?)
            .await
    }

    /// Appends a line to the run log.
    pub async fn append_log(&self, line: &str) -> Result<(), StorageError> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir().join("log.txt"))
            .await?;
        file.write_all(format!("{} {}\n", chrono::Utc::now().to_rfc3339(), line).as_bytes())
            .await?;
        Ok(())
    }

    /// Marks the benchmark directory as running / stopped.
    pub async fn set_running(&self, running: bool) -> Result<(), StorageError> {
        let contents = if running { "running" } else { "stopped" };
        self.write_atomic(&self.dir().join("running_state.txt"), contents.as_bytes())
            .await
    }

    pub async fn is_running(&self) -> bool {
        matches!(
            fs::read_to_string(self.dir().join("running_state.txt")).await,
            Ok(contents) if contents == "running"
        )
    }

    /// Temp-file-then-rename write; the rename is the commit point.
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let parent = path.parent().expect("storage paths have parents");
        fs::create_dir_all(parent).await?;
        let tmp = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), "wrote file");
        Ok(())
    }
}
