//! Typed operation list and expression AST.

use serde::{Deserialize, Serialize};

/// Whitelisted functions callable from XDL expressions.
///
/// This is the entire surface a game author can reach; anything else is a
/// parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Func {
    /// `story()` — seeded sample from the map text generator.
    Story,
    /// `xent(t)` / `xent(t | p)` — per-token cross-entropy in bits.
    Xent,
    /// `xed(t | p)` — conditioning gain: `xent(t) − xent(t | p)`.
    Xed,
    /// `nex(t | p)` — negated cross-entropy: `−xent(t | p)`.
    Nex,
    /// `dex(t | p)` — negated conditioning gain: `−xed(t | p)`.
    Dex,
    /// `len(x)` — character length of a text value.
    Len,
    /// `num_words(x)` — distinct case-folded words in a text value.
    NumWords,
    /// `remove_common_words(a, b)` — `a` with the words it shares with `b`
    /// removed.
    RemoveCommonWords,
    /// `first_n_tokens(t, n)` — `t` truncated to `n` judge tokens.
    FirstNTokens,
}

impl Func {
    /// Resolves a source-level name, `None` when not whitelisted.
    pub fn from_name(name: &str) -> Option<Func> {
        match name {
            "story" => Some(Func::Story),
            "xent" => Some(Func::Xent),
            "xed" => Some(Func::Xed),
            "nex" => Some(Func::Nex),
            "dex" => Some(Func::Dex),
            "len" => Some(Func::Len),
            "num_words" => Some(Func::NumWords),
            "remove_common_words" => Some(Func::RemoveCommonWords),
            "first_n_tokens" => Some(Func::FirstNTokens),
            _ => None,
        }
    }

    /// Source-level name.
    pub fn name(&self) -> &'static str {
        match self {
            Func::Story => "story",
            Func::Xent => "xent",
            Func::Xed => "xed",
            Func::Nex => "nex",
            Func::Dex => "dex",
            Func::Len => "len",
            Func::NumWords => "num_words",
            Func::RemoveCommonWords => "remove_common_words",
            Func::FirstNTokens => "first_n_tokens",
        }
    }

    /// Required argument count.
    pub fn arity(&self) -> usize {
        match self {
            Func::Story => 0,
            Func::Xent | Func::Xed | Func::Nex | Func::Dex | Func::Len | Func::NumWords => 1,
            Func::RemoveCommonWords | Func::FirstNTokens => 2,
        }
    }
}

/// Comparison operators, valid at the top level of `ensure` conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

/// Expression AST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// String literal.
    Str(String),
    /// Numeric literal.
    Num(f64),
    /// Register reference.
    Ident(String),
    /// Unary negation, used on xent values and numbers.
    Neg(Box<Expr>),
    /// Concatenation of texts, or element-wise sum of xent values.
    Add(Box<Expr>, Box<Expr>),
    /// Element-wise difference of xent values, or numeric subtraction.
    Sub(Box<Expr>, Box<Expr>),
    /// `text | context` — conditioning decoration consumed by the
    /// xent-family functions.
    Conditioned {
        text: Box<Expr>,
        context: Box<Expr>,
    },
    /// Whitelisted function call.
    Call { func: Func, args: Vec<Expr> },
    /// Boolean comparison.
    Compare {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    /// Whether this expression (recursively) calls `story()`.
    ///
    /// Operations whose expressions sample stories form the map prefix and
    /// are resolved once per map seed.
    pub fn contains_story(&self) -> bool {
        match self {
            Expr::Str(_) | Expr::Num(_) | Expr::Ident(_) => false,
            Expr::Neg(inner) => inner.contains_story(),
            Expr::Add(lhs, rhs) | Expr::Sub(lhs, rhs) => {
                lhs.contains_story() || rhs.contains_story()
            }
            Expr::Conditioned { text, context } => {
                text.contains_story() || context.contains_story()
            }
            Expr::Call { func, args } => {
                *func == Func::Story || args.iter().any(Expr::contains_story)
            }
            Expr::Compare { lhs, rhs, .. } => lhs.contains_story() || rhs.contains_story(),
        }
    }
}

/// One operation variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    /// Bind each `name` to its expression's value, left to right.
    Assign { bindings: Vec<(String, Expr)> },
    /// Emit a `reveal` event carrying the named bindings.
    Reveal { names: Vec<String> },
    /// Elicit a move from the player, bind it (token-truncated) to `var`.
    Elicit { var: String, max_tokens: usize },
    /// Evaluate the conditions; on any false, roll back to the matching
    /// beacon. `beacon_index` is the op index of that beacon in the
    /// program.
    Ensure {
        conditions: Vec<Expr>,
        beacon_index: usize,
    },
    /// Mark a rollback point.
    Beacon,
    /// Emit a `reward` event carrying the evaluated xent value.
    Reward { value: Expr },
}

/// An operation with its source position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Op {
    pub kind: OpKind,
    /// 1-based source line.
    pub line_num: usize,
}

/// A parsed game: a linear operation list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub ops: Vec<Op>,
}

impl Program {
    /// Length of the map prefix: the maximal leading run of `assign`
    /// operations. These are deterministic given the map seed and are
    /// resolved once per map, so every player sees the same opening.
    pub fn map_prefix_len(&self) -> usize {
        self.ops
            .iter()
            .take_while(|op| matches!(op.kind, OpKind::Assign { .. }))
            .count()
    }
}
