//! Error types for xentbench operations.
//!
//! Defines error types for the major subsystems:
//! - Token-aligned score arithmetic
//! - Judge gateway scoring and generation
//! - Game execution (interpreter and expression evaluation)
//! - Player back-ends and presentation functions
//!
//! Parser and storage errors live next to their modules (`xdl::parser`,
//! `bench::storage`); the enums here are the ones that cross subsystem
//! boundaries during a running trial.

use thiserror::Error;

/// Errors from token-aligned score arithmetic.
#[derive(Debug, Error)]
pub enum ScoreError {
    /// Two score sequences could not be aligned token-for-token.
    #[error("token sequences are misaligned at index {index}: '{left}' vs '{right}'")]
    Misaligned {
        index: usize,
        left: String,
        right: String,
    },

    /// Two score sequences have different lengths.
    #[error("token sequences have different lengths: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
}

/// Errors from the judge gateway.
#[derive(Debug, Error)]
pub enum JudgeError {
    /// The back-end failed transiently (timeout, OOM, HTTP 5xx). Retried by
    /// the gateway before being promoted to `Unavailable`.
    #[error("judge back-end error: {0}")]
    Backend(String),

    /// The back-end stayed unreachable through the retry budget.
    #[error("judge unavailable after {attempts} attempts: {message}")]
    Unavailable { attempts: u32, message: String },

    /// The judge produced inconsistent tokenization for the same text, or a
    /// score vector that does not match the tokenization. Never recovered.
    #[error("scoring alignment error: {0}")]
    Misaligned(String),
}

impl JudgeError {
    /// Whether the gateway should retry the failed call.
    pub fn is_retriable(&self) -> bool {
        matches!(self, JudgeError::Backend(_))
    }
}

/// Errors from player back-ends and the player adapter.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// The back-end failed transiently (timeout, rate limit, HTTP 5xx).
    /// Retried by the adapter before being promoted to `Unavailable`.
    #[error("player back-end error: {0}")]
    Backend(String),

    /// The request was rejected and retrying cannot help (auth, bad request).
    #[error("player request rejected: {0}")]
    Rejected(String),

    /// The back-end stayed unreachable through the retry budget.
    #[error("player unavailable after {attempts} attempts: {message}")]
    Unavailable { attempts: u32, message: String },

    /// The presentation function failed to produce a transcript. The trial
    /// cannot proceed without a prompt, so this is promoted to
    /// `Unavailable` by the adapter.
    #[error("presentation function failed: {0}")]
    Presentation(String),

    /// A required credential environment variable is not set.
    #[error("missing credential: {0} environment variable not set")]
    MissingCredential(String),

    /// The player configuration is invalid (unknown provider, bad options).
    #[error("invalid player configuration: {0}")]
    InvalidConfig(String),
}

impl PlayerError {
    /// Whether the adapter should retry the failed call.
    pub fn is_retriable(&self) -> bool {
        matches!(self, PlayerError::Backend(_))
    }
}

/// Errors raised while executing a game program.
///
/// These terminate the current trial unless noted otherwise; the trial
/// orchestrator maps them onto a `TrialResult` status.
#[derive(Debug, Error)]
pub enum GameError {
    /// An expression referenced a register that has no binding.
    #[error("undefined register '{name}' (line {line})")]
    UndefinedRegister { name: String, line: usize },

    /// An operation was applied to values of the wrong type.
    #[error("type error (line {line}): {message}")]
    TypeMismatch { line: usize, message: String },

    /// An `ensure` failed more times than the per-call-site budget allows.
    /// Round-level: the round is marked stuck, the trial continues.
    #[error("ensure retry budget exceeded (line {line})")]
    EnsureExceeded { line: usize },

    /// Judge gateway failure during expression evaluation.
    #[error(transparent)]
    Judge(#[from] JudgeError),

    /// Score arithmetic failure; indicates tokenization drift.
    #[error(transparent)]
    Score(#[from] ScoreError),

    /// Player adapter failure during `elicit`.
    #[error(transparent)]
    Player(#[from] PlayerError),

    /// A bug in the interpreter itself (invalid jump target, corrupt
    /// journal). Should never surface in normal operation.
    #[error("internal interpreter error: {0}")]
    Internal(String),
}
