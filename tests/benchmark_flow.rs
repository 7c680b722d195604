//! Integration tests for benchmark scheduling: bounded concurrency and the
//! on-disk result contract.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use xentbench::bench::{
    BenchmarkMetadata, BenchmarkScheduler, BenchmarkStorage, CondensedConfig, ExpansionConfig,
    GameSpec, SchedulerConfig, TextGeneratorKind,
};
use xentbench::error::JudgeError;
use xentbench::judge::{Judge, JudgeGateway, MockJudge};
use xentbench::player::{PlayerKind, PlayerOptions, PlayerSpec};
use xentbench::score::Token;
use xentbench::trial::TrialConfig;

/// Judge that sleeps inside `score` and tracks how many scoring calls are
/// in flight at once. Each trial is single-threaded internally, so the
/// watermark bounds the number of concurrently running trials.
struct GaugedJudge {
    inner: MockJudge,
    active: AtomicU64,
    high_water: AtomicU64,
}

impl GaugedJudge {
    fn new() -> Self {
        Self {
            inner: MockJudge::new("gauged", 6),
            active: AtomicU64::new(0),
            high_water: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Judge for GaugedJudge {
    fn model_id(&self) -> &str {
        "gauged"
    }

    async fn tokenize(&self, text: &str) -> Result<Vec<Token>, JudgeError> {
        self.inner.tokenize(text).await
    }

    async fn score(&self, text: &str, context: &str) -> Result<Vec<f64>, JudgeError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = self.inner.score(text, context).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn sample(&self, prompt: &str, max_tokens: usize, seed: u64) -> Result<String, JudgeError> {
        self.inner.sample(prompt, max_tokens, seed).await
    }
}

fn scripted(id: &str) -> PlayerSpec {
    PlayerSpec {
        id: id.into(),
        player_type: PlayerKind::Scripted,
        options: PlayerOptions {
            moves: vec![
                "<move>first guess</move>".into(),
                "<move>second guess</move>".into(),
            ],
            ..PlayerOptions::default()
        },
    }
}

fn condensed(num_maps: usize, rounds: usize) -> CondensedConfig {
    CondensedConfig {
        metadata: BenchmarkMetadata {
            benchmark_id: "flow-bench".into(),
            judge_model: "gauged".into(),
            num_rounds_per_game: rounds,
            seed: "master".into(),
        },
        expansion: ExpansionConfig {
            num_maps_per_game: num_maps,
            generator: TextGeneratorKind::Judge,
            max_story_length: 10,
            archive_path: None,
        },
        players: vec![scripted("p1"), scripted("p2")],
        games: vec![GameSpec {
            name: "condense".into(),
            code: "assign(s=story())\nelicit(x, 5)\nreward(xed(s | x))".into(),
            presentation: "default".into(),
        }],
    }
}

#[tokio::test]
async fn worker_pool_saturates_without_exceeding_cap() {
    let tmp = TempDir::new().unwrap();
    let judge = Arc::new(GaugedJudge::new());
    let gateway = Arc::new(JudgeGateway::new(Arc::clone(&judge) as Arc<dyn Judge>));
    let storage = Arc::new(BenchmarkStorage::new(tmp.path(), "flow-bench"));
    let scheduler = BenchmarkScheduler::new(
        gateway,
        storage,
        SchedulerConfig {
            max_concurrent_trials: 2,
            trial: TrialConfig::default(),
        },
    );

    // 1 game x 3 maps x 2 players = 6 trials under a cap of 2.
    let summary = scheduler.run(&condensed(3, 1)).await.unwrap();
    assert_eq!(summary.players.len(), 2);

    let peak = judge.high_water.load(Ordering::SeqCst);
    assert!(peak <= 2, "scoring concurrency peaked at {}", peak);
    assert!(peak >= 1, "the pool actually ran trials");
}

#[tokio::test]
async fn trial_files_match_the_documented_contract() {
    let tmp = TempDir::new().unwrap();
    let gateway = Arc::new(JudgeGateway::new(Arc::new(MockJudge::new("mock", 8))));
    let storage = Arc::new(BenchmarkStorage::new(tmp.path(), "flow-bench"));
    let scheduler =
        BenchmarkScheduler::new(gateway, storage, SchedulerConfig::default());

    scheduler.run(&condensed(1, 2)).await.unwrap();

    let storage = BenchmarkStorage::new(tmp.path(), "flow-bench");
    let raw = tokio::fs::read_to_string(storage.trial_path(
        "condense",
        "p1",
        "gamecondense_map0",
    ))
    .await
    .unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();

    assert_eq!(json["game"], "condense");
    assert_eq!(json["map_seed"], "gamecondense_map0");
    assert_eq!(json["player_id"], "p1");
    assert_eq!(json["status"], "ok");
    assert!(json["error"].is_null());
    assert!(json["headline_score"].is_number());

    let events = json["events"].as_array().unwrap();
    assert!(events
        .iter()
        .all(|e| e["type"].is_string() && e["line_num"].is_number()));
    assert!(events.iter().any(|e| e["type"] == "reward"));

    let rounds = json["rounds"].as_array().unwrap();
    assert_eq!(rounds.len(), 2);
    for (i, round) in rounds.iter().enumerate() {
        assert_eq!(round["index"], i as u64);
        assert!(round["score"].is_number());
        assert_eq!(round["arms"], 1);
        assert_eq!(round["iterations"], 1);
    }

    // Reward events serialize the TokenXent pair list.
    let reward = events.iter().find(|e| e["type"] == "reward").unwrap();
    let pairs = reward["value"]["pairs"].as_array().unwrap();
    assert!(!pairs.is_empty());
    assert!(pairs[0][0].is_string() && pairs[0][1].is_number());
}

#[tokio::test]
async fn benchmark_summary_covers_all_players() {
    let tmp = TempDir::new().unwrap();
    let gateway = Arc::new(JudgeGateway::new(Arc::new(MockJudge::new("mock", 8))));
    let storage = Arc::new(BenchmarkStorage::new(tmp.path(), "flow-bench"));
    let scheduler =
        BenchmarkScheduler::new(gateway, storage, SchedulerConfig::default());

    let summary = scheduler.run(&condensed(2, 1)).await.unwrap();
    assert_eq!(summary.benchmark_id, "flow-bench");
    for player in &summary.players {
        assert_eq!(player.games.len(), 1);
        let cell = &player.games[0];
        assert_eq!(cell.trials, 2, "one per map");
        assert_eq!(cell.failed, 0);
        assert_eq!(cell.per_iteration.len(), 1);
    }

    // The per-(game, player) aggregation files exist and parse.
    let storage = BenchmarkStorage::new(tmp.path(), "flow-bench");
    for player in ["p1", "p2"] {
        let raw = tokio::fs::read_to_string(
            storage.dir().join(format!("game_condense_{}.json", player)),
        )
        .await
        .unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["game"], "condense");
        assert!(json["score"].is_number());
    }
}
