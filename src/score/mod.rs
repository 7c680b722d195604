//! Token-aligned reward values.
//!
//! Reward attribution happens at token granularity: every scored text has,
//! for a fixed judge model, a canonical token sequence, and a reward is a
//! sequence of `(token, xent)` pairs. All arithmetic over rewards is
//! element-wise over aligned pairs; tokenization divergence is a hard
//! error, never a silent resize.

mod token_xent;

pub use token_xent::{Token, TokenXent};
