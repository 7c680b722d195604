//! Line-oriented XDL parser.
//!
//! One operation per line; `#` starts a comment; blank lines are skipped.
//! Parse errors are positional and fatal for the whole game.

use thiserror::Error;

use super::ast::{CmpOp, Expr, Func, Op, OpKind, Program};

/// Programs longer than this are rejected outright.
const MAX_PROGRAM_LINES: usize = 64;

/// A positional, fatal parse error.
#[derive(Debug, Error)]
#[error("parse error (line {line}): {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Parses XDL source into a typed operation list.
///
/// Each `ensure` is cross-referenced to the nearest preceding `beacon`;
/// an `ensure` with no beacon before it is a parse error, since the
/// interpreter would have nowhere to roll back to.
pub fn parse_program(source: &str) -> Result<Program, ParseError> {
    let lines: Vec<&str> = source.lines().collect();
    if lines.len() > MAX_PROGRAM_LINES {
        return Err(ParseError::new(
            MAX_PROGRAM_LINES + 1,
            format!("program too long: max {} lines", MAX_PROGRAM_LINES),
        ));
    }

    let mut ops = Vec::new();
    let mut last_beacon: Option<usize> = None;

    for (idx, raw) in lines.iter().enumerate() {
        let line_num = idx + 1;
        let tokens = Lexer::new(raw, line_num).run()?;
        if tokens.is_empty() {
            continue;
        }
        let mut parser = LineParser {
            tokens,
            pos: 0,
            line_num,
        };
        let kind = parser.parse_op(last_beacon)?;
        if matches!(kind, OpKind::Beacon) {
            last_beacon = Some(ops.len());
        }
        ops.push(Op { kind, line_num });
    }

    Ok(Program { ops })
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Num(f64),
    LParen,
    RParen,
    Comma,
    Assign,
    Plus,
    Minus,
    Pipe,
    Cmp(CmpOp),
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Ident(name) => format!("identifier '{}'", name),
            Tok::Str(_) => "string literal".to_string(),
            Tok::Num(_) => "number".to_string(),
            Tok::LParen => "'('".to_string(),
            Tok::RParen => "')'".to_string(),
            Tok::Comma => "','".to_string(),
            Tok::Assign => "'='".to_string(),
            Tok::Plus => "'+'".to_string(),
            Tok::Minus => "'-'".to_string(),
            Tok::Pipe => "'|'".to_string(),
            Tok::Cmp(_) => "comparison operator".to_string(),
        }
    }
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line_num: usize,
}

impl<'a> Lexer<'a> {
    fn new(line: &'a str, line_num: usize) -> Self {
        Self {
            chars: line.chars().peekable(),
            line_num,
        }
    }

    fn run(mut self) -> Result<Vec<Tok>, ParseError> {
        let mut tokens = Vec::new();
        while let Some(&c) = self.chars.peek() {
            match c {
                '#' => break,
                c if c.is_whitespace() => {
                    self.chars.next();
                }
                '(' => tokens.push(self.single(Tok::LParen)),
                ')' => tokens.push(self.single(Tok::RParen)),
                ',' => tokens.push(self.single(Tok::Comma)),
                '+' => tokens.push(self.single(Tok::Plus)),
                '-' => tokens.push(self.single(Tok::Minus)),
                '|' => tokens.push(self.single(Tok::Pipe)),
                '=' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'=') {
                        self.chars.next();
                        tokens.push(Tok::Cmp(CmpOp::Eq));
                    } else {
                        tokens.push(Tok::Assign);
                    }
                }
                '!' => {
                    self.chars.next();
                    if self.chars.next() == Some('=') {
                        tokens.push(Tok::Cmp(CmpOp::Ne));
                    } else {
                        return Err(self.err("expected '=' after '!'"));
                    }
                }
                '>' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'=') {
                        self.chars.next();
                        tokens.push(Tok::Cmp(CmpOp::Ge));
                    } else {
                        tokens.push(Tok::Cmp(CmpOp::Gt));
                    }
                }
                '<' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'=') {
                        self.chars.next();
                        tokens.push(Tok::Cmp(CmpOp::Le));
                    } else {
                        tokens.push(Tok::Cmp(CmpOp::Lt));
                    }
                }
                '\'' | '"' => tokens.push(self.string_literal(c)?),
                c if c.is_ascii_digit() => tokens.push(self.number()?),
                c if c.is_alphabetic() || c == '_' => tokens.push(self.ident()),
                other => {
                    return Err(self.err(format!("unexpected character '{}'", other)));
                }
            }
        }
        Ok(tokens)
    }

    fn single(&mut self, tok: Tok) -> Tok {
        self.chars.next();
        tok
    }

    fn string_literal(&mut self, quote: char) -> Result<Tok, ParseError> {
        self.chars.next();
        let mut value = String::new();
        loop {
            match self.chars.next() {
                Some(c) if c == quote => return Ok(Tok::Str(value)),
                Some('\\') => match self.chars.next() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('\\') => value.push('\\'),
                    Some(c) if c == quote => value.push(c),
                    Some(other) => {
                        return Err(self.err(format!("unknown escape '\\{}'", other)));
                    }
                    None => return Err(self.err("unterminated string literal")),
                },
                Some(c) => value.push(c),
                None => return Err(self.err("unterminated string literal")),
            }
        }
    }

    fn number(&mut self) -> Result<Tok, ParseError> {
        let mut digits = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                digits.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        digits
            .parse::<f64>()
            .map(Tok::Num)
            .map_err(|_| self.err(format!("invalid number '{}'", digits)))
    }

    fn ident(&mut self) -> Tok {
        let mut name = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        Tok::Ident(name)
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.line_num, message)
    }
}

struct LineParser {
    tokens: Vec<Tok>,
    pos: usize,
    line_num: usize,
}

impl LineParser {
    fn parse_op(&mut self, last_beacon: Option<usize>) -> Result<OpKind, ParseError> {
        let name = match self.next() {
            Some(Tok::Ident(name)) => name,
            other => return Err(self.unexpected("operation name", other)),
        };
        self.expect(Tok::LParen)?;

        let kind = match name.as_str() {
            "assign" => self.parse_assign()?,
            "reveal" => self.parse_reveal()?,
            "elicit" => self.parse_elicit()?,
            "ensure" => {
                let conditions = self.parse_ensure_conditions()?;
                let beacon_index = last_beacon.ok_or_else(|| {
                    self.fail("ensure with no preceding beacon to roll back to")
                })?;
                OpKind::Ensure {
                    conditions,
                    beacon_index,
                }
            }
            "beacon" => {
                if !self.check(&Tok::RParen) {
                    return Err(self.fail("beacon takes no arguments"));
                }
                OpKind::Beacon
            }
            "reward" => OpKind::Reward {
                value: self.parse_expr()?,
            },
            other => {
                return Err(self.fail(format!("unknown operation '{}'", other)));
            }
        };

        self.expect(Tok::RParen)?;
        if let Some(extra) = self.next() {
            return Err(self.unexpected("end of line", Some(extra)));
        }
        Ok(kind)
    }

    fn parse_assign(&mut self) -> Result<OpKind, ParseError> {
        let mut bindings = Vec::new();
        loop {
            let name = match self.next() {
                Some(Tok::Ident(name)) => name,
                other => return Err(self.unexpected("register name", other)),
            };
            self.expect(Tok::Assign)?;
            bindings.push((name, self.parse_expr()?));
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        Ok(OpKind::Assign { bindings })
    }

    fn parse_reveal(&mut self) -> Result<OpKind, ParseError> {
        let mut names = Vec::new();
        loop {
            match self.next() {
                Some(Tok::Ident(name)) => names.push(name),
                other => return Err(self.unexpected("register name", other)),
            }
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        Ok(OpKind::Reveal { names })
    }

    fn parse_elicit(&mut self) -> Result<OpKind, ParseError> {
        let var = match self.next() {
            Some(Tok::Ident(name)) => name,
            other => return Err(self.unexpected("register name", other)),
        };
        self.expect(Tok::Comma)?;
        let max_tokens = match self.next() {
            Some(Tok::Num(n)) if n >= 0.0 && n.fract() == 0.0 => n as usize,
            Some(Tok::Num(_)) => {
                return Err(self.fail("elicit max_tokens must be a non-negative integer"));
            }
            other => return Err(self.unexpected("max_tokens", other)),
        };
        Ok(OpKind::Elicit { var, max_tokens })
    }

    fn parse_ensure_conditions(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut conditions = Vec::new();
        loop {
            // Keyword syntax is assign-only; catch `ensure(cond=...)` early.
            if let (Some(Tok::Ident(_)), Some(Tok::Assign)) = (self.peek(0), self.peek(1)) {
                return Err(self.fail("ensure takes positional conditions only"));
            }
            conditions.push(self.parse_expr()?);
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        Ok(conditions)
    }

    // Precedence, loosest first: conditioning `|`, comparisons, additive,
    // unary minus, primary.
    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let text = self.parse_comparison()?;
        if self.eat(&Tok::Pipe) {
            let context = self.parse_comparison()?;
            if self.check(&Tok::Pipe) {
                return Err(self.fail("chained conditioning is not supported"));
            }
            return Ok(Expr::Conditioned {
                text: Box::new(text),
                context: Box::new(context),
            });
        }
        Ok(text)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_additive()?;
        if let Some(Tok::Cmp(op)) = self.peek(0).cloned() {
            self.next();
            let rhs = self.parse_additive()?;
            return Ok(Expr::Compare {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            if self.eat(&Tok::Plus) {
                let rhs = self.parse_unary()?;
                lhs = Expr::Add(Box::new(lhs), Box::new(rhs));
            } else if self.eat(&Tok::Minus) {
                let rhs = self.parse_unary()?;
                lhs = Expr::Sub(Box::new(lhs), Box::new(rhs));
            } else {
                return Ok(lhs);
            }
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Tok::Minus) {
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.next() {
            Some(Tok::Str(value)) => Ok(Expr::Str(value)),
            Some(Tok::Num(value)) => Ok(Expr::Num(value)),
            Some(Tok::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(Tok::RParen)?;
                Ok(inner)
            }
            Some(Tok::Ident(name)) => {
                if self.check(&Tok::LParen) {
                    self.next();
                    self.parse_call(&name)
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            other => Err(self.unexpected("expression", other)),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<Expr, ParseError> {
        let func = Func::from_name(name)
            .ok_or_else(|| self.fail(format!("function '{}' is not whitelisted", name)))?;
        let mut args = Vec::new();
        if !self.check(&Tok::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
        }
        self.expect(Tok::RParen)?;
        if args.len() != func.arity() {
            return Err(self.fail(format!(
                "{} takes {} argument(s), got {}",
                func.name(),
                func.arity(),
                args.len()
            )));
        }
        Ok(Expr::Call { func, args })
    }

    fn peek(&self, ahead: usize) -> Option<&Tok> {
        self.tokens.get(self.pos + ahead)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, tok: &Tok) -> bool {
        self.peek(0) == Some(tok)
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.check(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<(), ParseError> {
        match self.next() {
            Some(found) if found == tok => Ok(()),
            other => Err(self.unexpected(&tok.describe(), other)),
        }
    }

    fn unexpected(&self, wanted: &str, found: Option<Tok>) -> ParseError {
        let found = match found {
            Some(tok) => tok.describe(),
            None => "end of line".to_string(),
        };
        self.fail(format!("expected {}, found {}", wanted, found))
    }

    fn fail(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.line_num, message)
    }
}
