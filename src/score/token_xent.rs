//! Token sequences paired with per-token cross-entropy.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ops::{Mul, Neg};

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ScoreError;

/// A single judge-model token: an opaque id plus its printable surface form.
///
/// Ids are judge-internal; alignment checks compare ids, never surfaces or
/// floats. Concatenating the surfaces of a tokenization reproduces the
/// original text exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub id: u32,
    pub surface: String,
}

impl Token {
    pub fn new(id: u32, surface: impl Into<String>) -> Self {
        Self {
            id,
            surface: surface.into(),
        }
    }

    /// Derives a stable id from a surface form.
    ///
    /// Used when reconstructing tokens from serialized results, where only
    /// surfaces survive. Values deserialized this way are for reporting;
    /// alignment-checked arithmetic only happens on live judge output.
    pub fn from_surface(surface: impl Into<String>) -> Self {
        let surface = surface.into();
        let mut hasher = DefaultHasher::new();
        surface.hash(&mut hasher);
        Self {
            id: hasher.finish() as u32,
            surface,
        }
    }
}

/// A token-aligned sequence of `(token, xent)` pairs; the canonical reward
/// value.
///
/// Xent values are in bits. A lazy scalar `scale` supports negation and
/// scalar multiplication without rewriting the pairs; `total()` and the
/// element-wise operations apply it. Serializes as
/// `{ "pairs": [[surface, xent], ...], "scale": s }`.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenXent {
    pairs: Vec<(Token, f64)>,
    scale: f64,
}

impl TokenXent {
    /// Creates a reward value from aligned pairs with unit scale.
    pub fn new(pairs: Vec<(Token, f64)>) -> Self {
        Self { pairs, scale: 1.0 }
    }

    /// An empty reward value (total 0).
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Number of token entries.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Total reward: `scale * Σ xent`, additive cross-entropy in bits.
    pub fn total(&self) -> f64 {
        self.scale * self.pairs.iter().map(|(_, x)| x).sum::<f64>()
    }

    /// Concatenation of the token surfaces, i.e. the scored text.
    pub fn surface_concat(&self) -> String {
        self.pairs.iter().map(|(t, _)| t.surface.as_str()).collect()
    }

    /// The pairs with the scale folded in.
    pub fn resolved_pairs(&self) -> Vec<(Token, f64)> {
        self.pairs
            .iter()
            .map(|(t, x)| (t.clone(), x * self.scale))
            .collect()
    }

    /// The first `n` token entries as a new value (slice by token count).
    pub fn take_tokens(&self, n: usize) -> TokenXent {
        TokenXent {
            pairs: self.pairs.iter().take(n).cloned().collect(),
            scale: self.scale,
        }
    }

    fn check_aligned(&self, other: &TokenXent) -> Result<(), ScoreError> {
        if self.pairs.len() != other.pairs.len() {
            return Err(ScoreError::LengthMismatch {
                left: self.pairs.len(),
                right: other.pairs.len(),
            });
        }
        for (index, ((a, _), (b, _))) in self.pairs.iter().zip(other.pairs.iter()).enumerate() {
            if a.id != b.id {
                return Err(ScoreError::Misaligned {
                    index,
                    left: a.surface.clone(),
                    right: b.surface.clone(),
                });
            }
        }
        Ok(())
    }

    /// Element-wise sum. Both operands must tokenize identically.
    pub fn checked_add(&self, other: &TokenXent) -> Result<TokenXent, ScoreError> {
        self.check_aligned(other)?;
        let pairs = self
            .pairs
            .iter()
            .zip(other.pairs.iter())
            .map(|((t, a), (_, b))| (t.clone(), a * self.scale + b * other.scale))
            .collect();
        Ok(TokenXent::new(pairs))
    }

    /// Element-wise difference. Both operands must tokenize identically.
    pub fn checked_sub(&self, other: &TokenXent) -> Result<TokenXent, ScoreError> {
        self.check_aligned(other)?;
        let pairs = self
            .pairs
            .iter()
            .zip(other.pairs.iter())
            .map(|((t, a), (_, b))| (t.clone(), a * self.scale - b * other.scale))
            .collect();
        Ok(TokenXent::new(pairs))
    }
}

impl Neg for TokenXent {
    type Output = TokenXent;

    fn neg(self) -> TokenXent {
        TokenXent {
            pairs: self.pairs,
            scale: -self.scale,
        }
    }
}

impl Mul<f64> for TokenXent {
    type Output = TokenXent;

    fn mul(self, rhs: f64) -> TokenXent {
        TokenXent {
            pairs: self.pairs,
            scale: self.scale * rhs,
        }
    }
}

/// Wire form: surfaces only, ids are judge-internal.
#[derive(Serialize, Deserialize)]
struct TokenXentWire {
    pairs: Vec<(String, f64)>,
    scale: f64,
}

impl Serialize for TokenXent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = TokenXentWire {
            pairs: self
                .pairs
                .iter()
                .map(|(t, x)| (t.surface.clone(), *x))
                .collect(),
            scale: self.scale,
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TokenXent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = TokenXentWire::deserialize(deserializer)?;
        if !wire.scale.is_finite() {
            return Err(D::Error::custom("non-finite scale"));
        }
        Ok(TokenXent {
            pairs: wire
                .pairs
                .into_iter()
                .map(|(surface, xent)| (Token::from_surface(surface), xent))
                .collect(),
            scale: wire.scale,
        })
    }
}
