//! Map generation.
//!
//! A map binds a game to a map seed: the program's leading `assign` prefix
//! is resolved once with a deterministic text source, so every player of
//! that (game, seed) pair sees the same opening. Story text comes either
//! from the judge model (seeded sampling) or from a fixed text archive.

use futures::future::BoxFuture;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::GameError;
use crate::interp::{eval_expr, EvalCtx, RegisterFile, StorySource};
use crate::judge::JudgeGateway;
use crate::xdl::{Expr, Func, OpKind, Program};

/// Deterministic 64-bit seed for a (master seed, map seed) pair.
pub fn derive_seed(master_seed: &str, map_seed: &str) -> u64 {
    let digest = Sha256::digest(format!("{}_{}", master_seed, map_seed).as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("digest is long enough"))
}

/// A precomputed game opening: the resolved register-file prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameMap {
    pub game: String,
    pub map_seed: String,
    /// Bindings produced by the program's leading `assign` run, in order.
    pub bindings: Vec<(String, String)>,
}

/// Where map stories come from.
pub enum TextSource {
    /// Seeded sampling on the judge gateway.
    Judge,
    /// Draws from a fixed text archive.
    CommunityArchive { texts: Vec<String> },
}

/// Resolves map prefixes for one benchmark.
pub struct MapGenerator<'a> {
    gateway: &'a JudgeGateway,
    source: TextSource,
    /// Token budget per sampled story.
    max_story_tokens: usize,
}

impl<'a> MapGenerator<'a> {
    pub fn new(gateway: &'a JudgeGateway, source: TextSource, max_story_tokens: usize) -> Self {
        Self {
            gateway,
            source,
            max_story_tokens,
        }
    }

    /// Runs the program's `assign` prefix with story calls resolved from
    /// the seeded text source.
    pub async fn generate(
        &self,
        game: &str,
        program: &Program,
        master_seed: &str,
        map_seed: &str,
    ) -> Result<GameMap, GameError> {
        let seed = derive_seed(master_seed, map_seed);
        let mut story_counter = 0u64;
        let mut registers = RegisterFile::new();

        for op in program.ops.iter().take(program.map_prefix_len()) {
            let bindings = match &op.kind {
                OpKind::Assign { bindings } => bindings,
                _ => unreachable!("map prefix contains only assign ops"),
            };
            for (name, expr) in bindings {
                let resolved = self
                    .resolve_stories(expr, seed, &mut story_counter)
                    .await?;
                // Stories are already constants here, so the story source
                // below is never consulted.
                let mut story = StorySource::new(seed, self.max_story_tokens);
                let mut ctx = EvalCtx {
                    registers: &registers,
                    gateway: self.gateway,
                    story: &mut story,
                    line: op.line_num,
                };
                let value = eval_expr(&resolved, &mut ctx).await?.into_text(op.line_num)?;
                registers.set(name.clone(), value);
            }
        }

        debug!(game, map_seed, bindings = registers.len(), "map generated");
        Ok(GameMap {
            game: game.to_string(),
            map_seed: map_seed.to_string(),
            bindings: registers.snapshot(),
        })
    }

    /// Replaces every `story()` call in `expr` with generated text.
    fn resolve_stories<'b>(
        &'b self,
        expr: &'b Expr,
        seed: u64,
        counter: &'b mut u64,
    ) -> BoxFuture<'b, Result<Expr, GameError>> {
        Box::pin(async move {
            // The expression sub-grammar is tiny; a handwritten walk beats
            // a visitor here.
            Ok(match expr {
                Expr::Str(_) | Expr::Num(_) | Expr::Ident(_) => expr.clone(),
                Expr::Neg(inner) => {
                    Expr::Neg(Box::new(self.resolve_stories(inner, seed, counter).await?))
                }
                Expr::Add(lhs, rhs) => Expr::Add(
                    Box::new(self.resolve_stories(lhs, seed, &mut *counter).await?),
                    Box::new(self.resolve_stories(rhs, seed, &mut *counter).await?),
                ),
                Expr::Sub(lhs, rhs) => Expr::Sub(
                    Box::new(self.resolve_stories(lhs, seed, &mut *counter).await?),
                    Box::new(self.resolve_stories(rhs, seed, &mut *counter).await?),
                ),
                Expr::Conditioned { text, context } => Expr::Conditioned {
                    text: Box::new(self.resolve_stories(text, seed, &mut *counter).await?),
                    context: Box::new(self.resolve_stories(context, seed, &mut *counter).await?),
                },
                Expr::Compare { op, lhs, rhs } => Expr::Compare {
                    op: *op,
                    lhs: Box::new(self.resolve_stories(lhs, seed, &mut *counter).await?),
                    rhs: Box::new(self.resolve_stories(rhs, seed, &mut *counter).await?),
                },
                Expr::Call {
                    func: Func::Story, ..
                } => {
                    let story_seed = seed.wrapping_add(*counter);
                    *counter += 1;
                    Expr::Str(self.generate_story(story_seed).await?)
                }
                Expr::Call { func, args } => {
                    let mut resolved = Vec::with_capacity(args.len());
                    for arg in args {
                        resolved.push(self.resolve_stories(arg, seed, &mut *counter).await?);
                    }
                    Expr::Call {
                        func: *func,
                        args: resolved,
                    }
                }
            })
        })
    }

    async fn generate_story(&self, seed: u64) -> Result<String, GameError> {
        match &self.source {
            TextSource::Judge => Ok(self
                .gateway
                .generate("", self.max_story_tokens, seed)
                .await?),
            TextSource::CommunityArchive { texts } => {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let text = texts
                    .choose(&mut rng)
                    .cloned()
                    .unwrap_or_default();
                Ok(self
                    .gateway
                    .truncate_tokens(&text, self.max_story_tokens)
                    .await?)
            }
        }
    }
}
