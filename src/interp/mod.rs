//! The game interpreter.
//!
//! A small virtual machine whose program counter steps through a parsed
//! XDL [`Program`] and whose state is the register file, the per-round
//! event log, the rollback journal, and the round counter. One trial
//! corresponds to one interpreter lifetime.
//!
//! `elicit` is the only suspension point on the player side; expressions
//! that call into the judge gateway suspend on scoring. Rollback after a
//! failed `ensure` is journal-based: each register mutation since the
//! matching beacon is undone and the event log is truncated to the beacon
//! watermark, so no register-file copies are ever taken.

mod eval;
mod event;
mod registers;

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{GameError, PlayerError};
use crate::judge::JudgeGateway;
use crate::xdl::{OpKind, Program};

pub use eval::{eval_expr, EvalCtx, StorySource, Value};
pub use event::{Event, TokenUsage};
pub use registers::RegisterFile;

/// Where the interpreter gets moves from.
///
/// Implemented by the player adapter; tests implement it directly with
/// scripted responses. The interpreter notifies the source when rollback
/// truncates the event log so that "events not yet presented" bookkeeping
/// survives rollbacks.
#[async_trait]
pub trait MoveSource: Send {
    /// Called at round entry, before any event is emitted.
    fn begin_round(&mut self) {}

    /// Called when rollback truncated the event log to `len` entries.
    fn log_truncated(&mut self, _len: usize) {}

    /// Produces the player's move for an `elicit`. The final event in
    /// `events` is the corresponding `elicit_request`.
    async fn provide_move(
        &mut self,
        var: &str,
        max_tokens: usize,
        registers: &[(String, String)],
        events: &[Event],
    ) -> Result<(String, TokenUsage), PlayerError>;
}

/// Interpreter tuning knobs.
#[derive(Debug, Clone)]
pub struct InterpConfig {
    /// Rounds to play per trial.
    pub max_rounds: usize,
    /// Failures allowed per `ensure` call site per round before the round
    /// is abandoned as stuck.
    pub max_ensure_failures: u32,
    /// Seed for `story()` calls evaluated outside the map prefix.
    pub story_seed: u64,
    /// Token budget for such stories.
    pub story_max_tokens: usize,
}

impl Default for InterpConfig {
    fn default() -> Self {
        Self {
            max_rounds: 1,
            max_ensure_failures: 10,
            story_seed: 0,
            story_max_tokens: 50,
        }
    }
}

/// Outcome of one round.
#[derive(Debug, Clone)]
pub struct RoundRecord {
    pub index: usize,
    /// Sum of reward totals emitted this round.
    pub score: f64,
    /// Number of `elicit_response` events (moves made).
    pub arms: u32,
    /// Number of `reward` events (completed reward cycles).
    pub iterations: u32,
    /// The round hit the ensure retry cap and was abandoned.
    pub stuck: bool,
    pub events: Vec<Event>,
}

/// Event-log and journal watermarks taken when a beacon executes.
#[derive(Debug, Clone, Copy)]
struct BeaconMark {
    event_len: usize,
    journal_len: usize,
}

/// The game virtual machine.
pub struct Interpreter {
    program: Program,
    /// Map prefix bindings, reloaded at every round entry.
    prefix: Vec<(String, String)>,
    config: InterpConfig,
    registers: RegisterFile,
    events: Vec<Event>,
    /// Register mutations since round entry: (name, replaced value).
    journal: Vec<(String, Option<String>)>,
    beacon_marks: HashMap<usize, BeaconMark>,
    /// Per-call-site failure counts, reset each round.
    ensure_failures: HashMap<usize, u32>,
    story: StorySource,
    round: usize,
}

impl Interpreter {
    pub fn new(program: Program, prefix: Vec<(String, String)>, config: InterpConfig) -> Self {
        let story = StorySource::new(config.story_seed, config.story_max_tokens);
        Self {
            program,
            prefix,
            config,
            registers: RegisterFile::new(),
            events: Vec::new(),
            journal: Vec::new(),
            beacon_marks: HashMap::new(),
            ensure_failures: HashMap::new(),
            story,
            round: 0,
        }
    }

    /// Index of the completed rounds so far.
    pub fn rounds_played(&self) -> usize {
        self.round
    }

    /// Whether another round may be played.
    pub fn has_rounds_remaining(&self) -> bool {
        self.round < self.config.max_rounds
    }

    /// Plays one full round, or up to the point the round gets stuck.
    ///
    /// Errors terminate the trial; the caller attaches them to the final
    /// round. A stuck round is not an error: the record comes back with
    /// `stuck = true` and the caller decides whether rounds remain.
    pub async fn run_round(
        &mut self,
        gateway: &JudgeGateway,
        moves: &mut dyn MoveSource,
    ) -> Result<RoundRecord, GameError> {
        let prefix_len = self.program.map_prefix_len();
        let round_index = self.round;

        self.registers.reset(&self.prefix);
        self.events.clear();
        self.journal.clear();
        self.beacon_marks.clear();
        self.ensure_failures.clear();
        moves.begin_round();

        let first_line = self
            .program
            .ops
            .get(prefix_len)
            .map(|op| op.line_num)
            .unwrap_or(1);
        self.events.push(Event::RoundStarted {
            line_num: first_line,
            round_index,
        });

        let mut stuck = false;
        let mut pc = prefix_len;
        while pc < self.program.ops.len() {
            let op = self.program.ops[pc].clone();
            let line = op.line_num;
            debug!(pc, line, "executing op");
            match op.kind {
                OpKind::Assign { ref bindings } => {
                    for (name, expr) in bindings {
                        let value = self.eval(expr, gateway, line).await?.into_text(line)?;
                        let previous = self.registers.set(name.clone(), value);
                        self.journal.push((name.clone(), previous));
                    }
                    pc += 1;
                }
                OpKind::Reveal { ref names } => {
                    let mut values = Vec::with_capacity(names.len());
                    for name in names {
                        let value = self.registers.get(name).ok_or_else(|| {
                            GameError::UndefinedRegister {
                                name: name.clone(),
                                line,
                            }
                        })?;
                        values.push((name.clone(), value.to_string()));
                    }
                    self.events.push(Event::Reveal {
                        line_num: line,
                        values,
                    });
                    pc += 1;
                }
                OpKind::Elicit { ref var, max_tokens } => {
                    let snapshot = self.registers.snapshot();
                    self.events.push(Event::ElicitRequest {
                        line_num: line,
                        var: var.clone(),
                        max_tokens,
                        registers: snapshot.clone(),
                    });

                    // A zero budget never reaches the player back-end.
                    let (raw, usage) = if max_tokens == 0 {
                        (String::new(), TokenUsage::default())
                    } else {
                        moves
                            .provide_move(var, max_tokens, &snapshot, &self.events)
                            .await?
                    };
                    let truncated = gateway.truncate_tokens(&raw, max_tokens).await?;

                    let previous = self.registers.set(var.clone(), truncated.clone());
                    self.journal.push((var.clone(), previous));
                    self.events.push(Event::ElicitResponse {
                        line_num: line,
                        var: var.clone(),
                        response: truncated,
                        token_usage: usage,
                    });
                    pc += 1;
                }
                OpKind::Beacon => {
                    self.beacon_marks.insert(
                        pc,
                        BeaconMark {
                            event_len: self.events.len(),
                            journal_len: self.journal.len(),
                        },
                    );
                    pc += 1;
                }
                OpKind::Ensure {
                    ref conditions,
                    beacon_index,
                } => {
                    let mut results = Vec::with_capacity(conditions.len());
                    for condition in conditions {
                        let value = self.eval(condition, gateway, line).await?;
                        results.push(value.as_bool(line)?);
                    }
                    if results.iter().all(|ok| *ok) {
                        pc += 1;
                        continue;
                    }

                    let beacon_line = self.program.ops[beacon_index].line_num;
                    let failures = self.ensure_failures.entry(pc).or_insert(0);
                    *failures += 1;
                    if *failures > self.config.max_ensure_failures {
                        debug!(
                            line,
                            failures = *failures,
                            "ensure retry budget exceeded, round stuck"
                        );
                        self.events.push(Event::FailedEnsure {
                            line_num: line,
                            beacon_line,
                            ensure_results: results,
                        });
                        stuck = true;
                        break;
                    }

                    let mark = self.beacon_marks.get(&beacon_index).copied().ok_or_else(|| {
                        GameError::Internal(format!(
                            "ensure at line {} rolled back to unexecuted beacon at line {}",
                            line, beacon_line
                        ))
                    })?;
                    self.rollback(mark, moves);
                    self.events.push(Event::FailedEnsure {
                        line_num: line,
                        beacon_line,
                        ensure_results: results,
                    });
                    pc = beacon_index + 1;
                }
                OpKind::Reward { ref value } => {
                    let reward = self.eval(value, gateway, line).await?.into_xent(line)?;
                    self.events.push(Event::Reward {
                        line_num: line,
                        value: reward,
                    });
                    pc += 1;
                }
            }
        }

        let last_line = self
            .program
            .ops
            .last()
            .map(|op| op.line_num)
            .unwrap_or(first_line);
        self.events.push(Event::RoundFinished {
            line_num: last_line,
            round_index,
        });

        self.round += 1;
        Ok(self.collect_record(round_index, stuck))
    }

    /// Undoes every register mutation and event recorded since `mark`.
    fn rollback(&mut self, mark: BeaconMark, moves: &mut dyn MoveSource) {
        while self.journal.len() > mark.journal_len {
            let (name, previous) = self.journal.pop().expect("journal entry");
            match previous {
                Some(value) => self.registers.restore(&name, value),
                None => self.registers.remove(&name),
            }
        }
        self.events.truncate(mark.event_len);
        moves.log_truncated(mark.event_len);
    }

    async fn eval(
        &mut self,
        expr: &crate::xdl::Expr,
        gateway: &JudgeGateway,
        line: usize,
    ) -> Result<Value, GameError> {
        let mut ctx = EvalCtx {
            registers: &self.registers,
            gateway,
            story: &mut self.story,
            line,
        };
        eval_expr(expr, &mut ctx).await
    }

    fn collect_record(&mut self, index: usize, stuck: bool) -> RoundRecord {
        let events = std::mem::take(&mut self.events);
        let score = events
            .iter()
            .map(|e| match e {
                Event::Reward { value, .. } => value.total(),
                _ => 0.0,
            })
            .sum();
        let arms = events
            .iter()
            .filter(|e| matches!(e, Event::ElicitResponse { .. }))
            .count() as u32;
        let iterations = events
            .iter()
            .filter(|e| matches!(e, Event::Reward { .. }))
            .count() as u32;
        RoundRecord {
            index,
            score,
            arms,
            iterations,
            stuck,
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use super::*;
    use crate::judge::{JudgeGateway, MockJudge};
    use crate::xdl::parse_program;

    /// Scripted move source for interpreter tests.
    struct Script {
        moves: VecDeque<String>,
        calls: u32,
    }

    impl Script {
        fn new(moves: &[&str]) -> Self {
            Self {
                moves: moves.iter().map(|m| m.to_string()).collect(),
                calls: 0,
            }
        }
    }

    #[async_trait]
    impl MoveSource for Script {
        async fn provide_move(
            &mut self,
            _var: &str,
            _max_tokens: usize,
            _registers: &[(String, String)],
            _events: &[Event],
        ) -> Result<(String, TokenUsage), PlayerError> {
            self.calls += 1;
            Ok((
                self.moves.pop_front().unwrap_or_default(),
                TokenUsage {
                    input_tokens: 10,
                    output_tokens: 2,
                },
            ))
        }
    }

    fn gateway() -> JudgeGateway {
        JudgeGateway::new(Arc::new(MockJudge::new("mock", 3)))
    }

    fn interp(source: &str, prefix: &[(&str, &str)], config: InterpConfig) -> Interpreter {
        let program = parse_program(source).unwrap();
        let prefix = prefix
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();
        Interpreter::new(program, prefix, config)
    }

    #[tokio::test]
    async fn test_simple_round_event_order() {
        let source = "\
assign(s=story())
reveal(s)
elicit(x, 5)
reward(xed(s | x))
";
        let mut vm = interp(source, &[("s", "Once upon a time")], InterpConfig::default());
        let gateway = gateway();
        let mut script = Script::new(&["Fairy tale:"]);
        let record = vm.run_round(&gateway, &mut script).await.unwrap();

        let kinds: Vec<&str> = record
            .events
            .iter()
            .map(|e| match e {
                Event::RoundStarted { .. } => "round_started",
                Event::Reveal { .. } => "reveal",
                Event::ElicitRequest { .. } => "elicit_request",
                Event::ElicitResponse { .. } => "elicit_response",
                Event::Reward { .. } => "reward",
                Event::FailedEnsure { .. } => "failed_ensure",
                Event::RoundFinished { .. } => "round_finished",
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "round_started",
                "reveal",
                "elicit_request",
                "elicit_response",
                "reward",
                "round_finished"
            ]
        );
        assert_eq!(record.arms, 1);
        assert_eq!(record.iterations, 1);
        assert!(!record.stuck);
    }

    #[tokio::test]
    async fn test_reward_surface_matches_scored_text() {
        let mut vm = interp(
            "reward(xent(s))",
            &[("s", "the brave knight")],
            InterpConfig::default(),
        );
        // The map prefix is empty here: `s` comes preloaded, the reward op
        // is the whole program.
        let gateway = gateway();
        let mut script = Script::new(&[]);
        let record = vm.run_round(&gateway, &mut script).await.unwrap();
        match &record.events[1] {
            Event::Reward { value, .. } => {
                assert_eq!(value.surface_concat(), "the brave knight");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_elicit_truncates_to_token_budget() {
        let mut vm = interp("elicit(x, 2)\nreveal(x)", &[], InterpConfig::default());
        let gateway = gateway();
        let mut script = Script::new(&["one two three four five"]);
        let record = vm.run_round(&gateway, &mut script).await.unwrap();
        match &record.events[2] {
            Event::ElicitResponse { response, .. } => assert_eq!(response, "one two"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_token_elicit_skips_player() {
        let mut vm = interp("elicit(x, 0)", &[], InterpConfig::default());
        let gateway = gateway();
        let mut script = Script::new(&["should never be used"]);
        let record = vm.run_round(&gateway, &mut script).await.unwrap();
        assert_eq!(script.calls, 0);
        match &record.events[2] {
            Event::ElicitResponse { response, .. } => assert_eq!(response, ""),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_ensure_rolls_back_and_retries() {
        let source = "\
beacon()
elicit(x, 5)
assign(y=remove_common_words(x, s))
ensure(len(y) > 0)
reward(xed(s | x))
";
        let mut vm = interp(
            source,
            &[("s", "the brave knight rides")],
            InterpConfig::default(),
        );
        let gateway = gateway();
        // First move only reuses story words, second brings a new one.
        let mut script = Script::new(&["the brave", "dragons"]);
        let record = vm.run_round(&gateway, &mut script).await.unwrap();

        let failed_at = record
            .events
            .iter()
            .position(|e| matches!(e, Event::FailedEnsure { .. }))
            .expect("failed_ensure present");
        // Rollback discarded the first request/response; the failure is
        // followed by a fresh elicit_request.
        assert!(matches!(
            record.events[failed_at + 1],
            Event::ElicitRequest { .. }
        ));
        match &record.events[failed_at] {
            Event::FailedEnsure {
                beacon_line,
                ensure_results,
                ..
            } => {
                assert_eq!(*beacon_line, 1);
                assert_eq!(ensure_results, &vec![false]);
            }
            other => panic!("unexpected event {:?}", other),
        }
        // The discarded binding of `y` was undone before re-binding.
        assert_eq!(record.arms, 1, "rolled-back responses are not counted");
        assert!(!record.stuck);
        assert_eq!(record.index, 0, "round counter does not advance on rollback");
    }

    #[tokio::test]
    async fn test_ensure_cap_marks_round_stuck() {
        let source = "\
beacon()
elicit(x, 5)
ensure(x == 'impossible to guess')
reward(xent(x))
";
        let config = InterpConfig {
            max_ensure_failures: 3,
            ..InterpConfig::default()
        };
        let mut vm = interp(source, &[], config);
        let gateway = gateway();
        let mut script = Script::new(&[]);
        let record = vm.run_round(&gateway, &mut script).await.unwrap();
        assert!(record.stuck);
        assert_eq!(record.iterations, 0, "reward after the stuck ensure never ran");
        // Cap consumed: initial attempt plus three retries.
        assert_eq!(script.calls, 4);
    }

    #[tokio::test]
    async fn test_rounds_are_monotonic_and_reset_registers() {
        let source = "\
assign(s=story())
elicit(x, 5)
reward(xent(x | s))
";
        let config = InterpConfig {
            max_rounds: 3,
            ..InterpConfig::default()
        };
        let mut vm = interp(source, &[("s", "a fixed opening")], config);
        let gateway = gateway();
        let mut script = Script::new(&["first", "second", "third"]);

        let mut indices = Vec::new();
        while vm.has_rounds_remaining() {
            let record = vm.run_round(&gateway, &mut script).await.unwrap();
            indices.push(record.index);
            // Map prefix bindings survive; the elicited move does not leak
            // into the next round.
            match &record.events[1] {
                Event::ElicitRequest { registers, .. } => {
                    assert_eq!(registers, &vec![("s".to_string(), "a fixed opening".to_string())]);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(!vm.has_rounds_remaining());
    }

    #[tokio::test]
    async fn test_player_error_propagates() {
        struct Failing;

        #[async_trait]
        impl MoveSource for Failing {
            async fn provide_move(
                &mut self,
                _var: &str,
                _max_tokens: usize,
                _registers: &[(String, String)],
                _events: &[Event],
            ) -> Result<(String, TokenUsage), PlayerError> {
                Err(PlayerError::Unavailable {
                    attempts: 3,
                    message: "all back-ends down".into(),
                })
            }
        }

        let mut vm = interp("elicit(x, 5)", &[], InterpConfig::default());
        let gateway = gateway();
        let err = vm.run_round(&gateway, &mut Failing).await.unwrap_err();
        assert!(matches!(err, GameError::Player(PlayerError::Unavailable { .. })));
    }
}
