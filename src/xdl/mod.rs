//! XDL, the game definition language.
//!
//! An XDL program is one operation per line: `assign`, `reveal`, `elicit`,
//! `ensure`, `beacon`, and `reward`, with `#` comments and a small typed
//! expression sub-grammar (literals, register refs, concatenation,
//! conditioning with `|`, comparisons, and a whitelist of functions).
//! Parsing yields a linear [`Program`] whose operations carry source lines
//! and resolved expression ASTs; `ensure` operations are cross-referenced
//! to their matching `beacon` at parse time.

mod ast;
mod parser;

pub use ast::{CmpOp, Expr, Func, Op, OpKind, Program};
pub use parser::{parse_program, ParseError};
