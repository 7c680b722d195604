//! XDL expression evaluation.
//!
//! Expressions evaluate over the register file and the judge gateway.
//! Gateway calls (`xent`-family functions, `story`, `first_n_tokens`) are
//! the only suspension points; everything else is pure.

use std::collections::HashSet;

use futures::future::BoxFuture;

use crate::error::GameError;
use crate::judge::JudgeGateway;
use crate::score::TokenXent;
use crate::xdl::{CmpOp, Expr, Func};

use super::registers::RegisterFile;

/// Seeded source for `story()` calls evaluated outside the map prefix.
///
/// Each call draws a fresh deterministic seed, so repeated stories within
/// a trial differ but two runs of the same trial agree.
#[derive(Debug, Clone)]
pub struct StorySource {
    seed: u64,
    max_tokens: usize,
    counter: u64,
}

impl StorySource {
    pub fn new(seed: u64, max_tokens: usize) -> Self {
        Self {
            seed,
            max_tokens,
            counter: 0,
        }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    fn next_seed(&mut self) -> u64 {
        let seed = self
            .seed
            .wrapping_add(self.counter.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        self.counter += 1;
        seed
    }
}

/// Evaluation context threaded through one expression.
pub struct EvalCtx<'a> {
    pub registers: &'a RegisterFile,
    pub gateway: &'a JudgeGateway,
    pub story: &'a mut StorySource,
    /// Source line of the operation being executed, for error reporting.
    pub line: usize,
}

/// An evaluated expression value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Num(f64),
    Xent(TokenXent),
    Bool(bool),
    /// A text decorated with a conditioning context, consumed by the
    /// xent-family functions.
    Conditioned { text: String, context: String },
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Num(_) => "number",
            Value::Xent(_) => "xent",
            Value::Bool(_) => "bool",
            Value::Conditioned { .. } => "conditioned text",
        }
    }

    /// Coerces to text. Conditioning decorations decay to their text;
    /// numbers format without a trailing `.0`.
    pub fn into_text(self, line: usize) -> Result<String, GameError> {
        match self {
            Value::Text(text) | Value::Conditioned { text, .. } => Ok(text),
            Value::Num(n) if n.fract() == 0.0 => Ok(format!("{}", n as i64)),
            Value::Num(n) => Ok(format!("{}", n)),
            other => Err(GameError::TypeMismatch {
                line,
                message: format!("expected text, got {}", other.kind()),
            }),
        }
    }

    pub fn into_xent(self, line: usize) -> Result<TokenXent, GameError> {
        match self {
            Value::Xent(value) => Ok(value),
            other => Err(GameError::TypeMismatch {
                line,
                message: format!("expected a xent value, got {}", other.kind()),
            }),
        }
    }

    pub fn as_bool(&self, line: usize) -> Result<bool, GameError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(GameError::TypeMismatch {
                line,
                message: format!("expected a boolean condition, got {}", other.kind()),
            }),
        }
    }

    /// The (text, context) pair consumed by xent-family functions. Plain
    /// text scores against the empty context (the BOS marker).
    fn into_scored(self, line: usize) -> Result<(String, String), GameError> {
        match self {
            Value::Conditioned { text, context } => Ok((text, context)),
            other => Ok((other.into_text(line)?, String::new())),
        }
    }
}

/// Evaluates `expr` in `ctx`.
pub fn eval_expr<'a>(
    expr: &'a Expr,
    ctx: &'a mut EvalCtx<'_>,
) -> BoxFuture<'a, Result<Value, GameError>> {
    Box::pin(async move {
        match expr {
            Expr::Str(value) => Ok(Value::Text(value.clone())),
            Expr::Num(value) => Ok(Value::Num(*value)),
            Expr::Ident(name) => match ctx.registers.get(name) {
                Some(value) => Ok(Value::Text(value.to_string())),
                None => Err(GameError::UndefinedRegister {
                    name: name.clone(),
                    line: ctx.line,
                }),
            },
            Expr::Neg(inner) => {
                let line = ctx.line;
                match eval_expr(inner, &mut *ctx).await? {
                    Value::Num(n) => Ok(Value::Num(-n)),
                    Value::Xent(x) => Ok(Value::Xent(-x)),
                    other => Err(GameError::TypeMismatch {
                        line,
                        message: format!("cannot negate {}", other.kind()),
                    }),
                }
            }
            Expr::Add(lhs, rhs) => {
                let line = ctx.line;
                let left = eval_expr(lhs, &mut *ctx).await?;
                let right = eval_expr(rhs, &mut *ctx).await?;
                match (left, right) {
                    (Value::Num(a), Value::Num(b)) => Ok(Value::Num(a + b)),
                    (Value::Xent(a), Value::Xent(b)) => Ok(Value::Xent(a.checked_add(&b)?)),
                    (a @ (Value::Text(_) | Value::Conditioned { .. }), b) => Ok(Value::Text(
                        format!("{}{}", a.into_text(line)?, b.into_text(line)?),
                    )),
                    (a, b) => Err(GameError::TypeMismatch {
                        line,
                        message: format!("cannot add {} and {}", a.kind(), b.kind()),
                    }),
                }
            }
            Expr::Sub(lhs, rhs) => {
                let line = ctx.line;
                let left = eval_expr(lhs, &mut *ctx).await?;
                let right = eval_expr(rhs, &mut *ctx).await?;
                match (left, right) {
                    (Value::Num(a), Value::Num(b)) => Ok(Value::Num(a - b)),
                    (Value::Xent(a), Value::Xent(b)) => Ok(Value::Xent(a.checked_sub(&b)?)),
                    (a, b) => Err(GameError::TypeMismatch {
                        line,
                        message: format!("cannot subtract {} from {}", b.kind(), a.kind()),
                    }),
                }
            }
            Expr::Conditioned { text, context } => {
                let line = ctx.line;
                let text = eval_expr(text, &mut *ctx).await?.into_text(line)?;
                let context = eval_expr(context, &mut *ctx).await?.into_text(line)?;
                Ok(Value::Conditioned { text, context })
            }
            Expr::Compare { op, lhs, rhs } => {
                let line = ctx.line;
                let left = eval_expr(lhs, &mut *ctx).await?;
                let right = eval_expr(rhs, &mut *ctx).await?;
                compare(*op, left, right, line)
            }
            Expr::Call { func, args } => eval_call(*func, args, ctx).await,
        }
    })
}

async fn eval_call(
    func: Func,
    args: &[Expr],
    ctx: &mut EvalCtx<'_>,
) -> Result<Value, GameError> {
    let line = ctx.line;
    match func {
        Func::Story => {
            let seed = ctx.story.next_seed();
            let max_tokens = ctx.story.max_tokens();
            let text = ctx.gateway.generate("", max_tokens, seed).await?;
            Ok(Value::Text(text))
        }
        Func::Xent | Func::Xed | Func::Nex | Func::Dex => {
            let (text, context) = eval_expr(&args[0], &mut *ctx).await?.into_scored(line)?;
            let value = match func {
                Func::Xent => ctx.gateway.xent(&text, &context).await?,
                Func::Xed => ctx.gateway.xed(&text, &context).await?,
                Func::Nex => ctx.gateway.nex(&text, &context).await?,
                Func::Dex => ctx.gateway.dex(&text, &context).await?,
                _ => unreachable!(),
            };
            Ok(Value::Xent(value))
        }
        Func::Len => {
            let text = eval_expr(&args[0], &mut *ctx).await?.into_text(line)?;
            Ok(Value::Num(text.chars().count() as f64))
        }
        Func::NumWords => {
            let text = eval_expr(&args[0], &mut *ctx).await?.into_text(line)?;
            Ok(Value::Num(word_set(&text).len() as f64))
        }
        Func::RemoveCommonWords => {
            let target = eval_expr(&args[0], &mut *ctx).await?.into_text(line)?;
            let other = eval_expr(&args[1], &mut *ctx).await?.into_text(line)?;
            Ok(Value::Text(remove_common_words(&target, &other)))
        }
        Func::FirstNTokens => {
            let text = eval_expr(&args[0], &mut *ctx).await?.into_text(line)?;
            let n = match eval_expr(&args[1], &mut *ctx).await? {
                Value::Num(n) if n >= 0.0 => n as usize,
                other => {
                    return Err(GameError::TypeMismatch {
                        line,
                        message: format!("first_n_tokens count must be a number, got {}", other.kind()),
                    })
                }
            };
            let truncated = ctx.gateway.truncate_tokens(&text, n).await?;
            Ok(Value::Text(truncated))
        }
    }
}

fn compare(op: CmpOp, left: Value, right: Value, line: usize) -> Result<Value, GameError> {
    let ordering = |a: f64, b: f64| -> bool {
        match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Ge => a >= b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Lt => a < b,
        }
    };
    match (left, right) {
        (Value::Num(a), Value::Num(b)) => Ok(Value::Bool(ordering(a, b))),
        // Xent values compare by total, against each other or a number.
        (Value::Xent(a), Value::Xent(b)) => Ok(Value::Bool(ordering(a.total(), b.total()))),
        (Value::Xent(a), Value::Num(b)) => Ok(Value::Bool(ordering(a.total(), b))),
        (Value::Num(a), Value::Xent(b)) => Ok(Value::Bool(ordering(a, b.total()))),
        (Value::Text(a), Value::Text(b)) => match op {
            CmpOp::Eq => Ok(Value::Bool(a == b)),
            CmpOp::Ne => Ok(Value::Bool(a != b)),
            _ => Err(GameError::TypeMismatch {
                line,
                message: "text values only support == and !=".to_string(),
            }),
        },
        (a, b) => Err(GameError::TypeMismatch {
            line,
            message: format!("cannot compare {} and {}", a.kind(), b.kind()),
        }),
    }
}

/// ASCII punctuation, deleted from words before comparison. Deletion (not
/// splitting) means a hyphenated word folds as one word: "well-known"
/// compares as "wellknown".
const PUNCTUATION: &str = r##"!"#$%&'()*+,-./:;<=>?@[\]^_`{|}~"##;

fn fold_word(word: &str) -> String {
    word.chars()
        .filter(|c| !PUNCTUATION.contains(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Distinct words of `text`: split on whitespace, punctuation deleted,
/// case-folded.
pub(crate) fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(fold_word)
        .filter(|word| !word.is_empty())
        .collect()
}

/// Removes from `target` every word it has in common with `other`
/// (per [`word_set`] folding), collapsing the whitespace left behind.
///
/// Occurrences in `target` are delimited by whitespace or punctuation, so
/// removing "knight" from "knight," keeps the comma, and "well-known"
/// never matches the common word "well".
pub(crate) fn remove_common_words(target: &str, other: &str) -> String {
    let common: HashSet<String> = word_set(target)
        .intersection(&word_set(other))
        .cloned()
        .collect();

    let mut result = String::with_capacity(target.len());
    let mut word = String::new();
    for c in target.chars() {
        if c.is_whitespace() || PUNCTUATION.contains(c) {
            if !common.contains(&word.to_lowercase()) {
                result.push_str(&word);
            }
            word.clear();
            result.push(c);
        } else {
            word.push(c);
        }
    }
    if !common.contains(&word.to_lowercase()) {
        result.push_str(&word);
    }

    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::judge::{JudgeGateway, MockJudge};
    use crate::xdl::parse_program;
    use crate::xdl::OpKind;

    fn gateway() -> JudgeGateway {
        JudgeGateway::new(Arc::new(MockJudge::new("mock", 11)))
    }

    fn reward_expr(line: &str) -> Expr {
        let program = parse_program(&format!("reward({})", line)).unwrap();
        match &program.ops[0].kind {
            OpKind::Reward { value } => value.clone(),
            other => panic!("unexpected op {:?}", other),
        }
    }

    async fn eval_str(source: &str, registers: &RegisterFile) -> Result<Value, GameError> {
        let gateway = gateway();
        let mut story = StorySource::new(1, 10);
        let mut ctx = EvalCtx {
            registers,
            gateway: &gateway,
            story: &mut story,
            line: 1,
        };
        eval_expr(&reward_expr(source), &mut ctx).await
    }

    #[tokio::test]
    async fn test_concat_and_len() {
        let mut regs = RegisterFile::new();
        regs.set("s".into(), "hello".into());
        let value = eval_str("len(s + ' world')", &regs).await.unwrap();
        assert_eq!(value, Value::Num(11.0));
    }

    #[tokio::test]
    async fn test_undefined_register() {
        let regs = RegisterFile::new();
        let err = eval_str("len(missing)", &regs).await.unwrap_err();
        assert!(matches!(
            err,
            GameError::UndefinedRegister { ref name, line: 1 } if name == "missing"
        ));
    }

    #[tokio::test]
    async fn test_xed_difference_formula() {
        let mut regs = RegisterFile::new();
        regs.set("s".into(), "Once upon a time".into());
        regs.set("x".into(), "Fairy tale:".into());

        let gain = eval_str("xed(s | x)", &regs).await.unwrap();
        let bare = eval_str("xent(s)", &regs).await.unwrap();
        let primed = eval_str("xent(s | x)", &regs).await.unwrap();
        match (gain, bare, primed) {
            (Value::Xent(gain), Value::Xent(bare), Value::Xent(primed)) => {
                assert!((gain.total() - (bare.total() - primed.total())).abs() < 1e-9);
            }
            other => panic!("unexpected values {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_xent_comparisons() {
        let mut regs = RegisterFile::new();
        regs.set("s".into(), "same text".into());
        let value = eval_str("xent(s) == xent(s)", &regs).await.unwrap();
        assert_eq!(value, Value::Bool(true));
        let value = eval_str("xent(s) > 0", &regs).await.unwrap();
        assert_eq!(value, Value::Bool(true));
    }

    #[tokio::test]
    async fn test_story_is_deterministic_per_counter() {
        let regs = RegisterFile::new();
        let gateway = gateway();
        let mut story = StorySource::new(7, 8);
        let mut ctx = EvalCtx {
            registers: &regs,
            gateway: &gateway,
            story: &mut story,
            line: 1,
        };
        let expr = reward_expr("story()");
        let first = eval_expr(&expr, &mut ctx).await.unwrap();
        let second = eval_expr(&expr, &mut ctx).await.unwrap();
        assert_ne!(first, second);

        let mut story2 = StorySource::new(7, 8);
        let mut ctx2 = EvalCtx {
            registers: &regs,
            gateway: &gateway,
            story: &mut story2,
            line: 1,
        };
        let again = eval_expr(&expr, &mut ctx2).await.unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn test_word_set_folds_case_and_punctuation() {
        let words = word_set("The knight, the KNIGHT!");
        assert_eq!(words.len(), 2);
        assert!(words.contains("the"));
        assert!(words.contains("knight"));
    }

    #[test]
    fn test_remove_common_words() {
        let out = remove_common_words("the brave knight rides", "the knight sleeps");
        assert_eq!(out, "brave rides");
        let all_common = remove_common_words("the knight", "the knight");
        assert_eq!(all_common, "");
        let none_common = remove_common_words("alpha beta", "gamma");
        assert_eq!(none_common, "alpha beta");
    }

    #[test]
    fn test_punctuation_is_deleted_not_split() {
        // Hyphenated words fold as one word, so nothing here is common.
        let words = word_set("well-known fact");
        assert!(words.contains("wellknown"));
        assert_eq!(
            remove_common_words("well-known fact", "well known theory"),
            "well-known fact"
        );
        // Removing a word keeps neighboring punctuation.
        assert_eq!(
            remove_common_words("the knight, rides", "knight"),
            "the , rides"
        );
    }
}
