//! Recursive descent parser: boundary syntax → parsed batches.
//!
//! The grammar is hand-rolled (no external parser dependency) for full
//! control over error messages and the small fixed syntax:
//!
//! - membership: `category[term,u OP val]` with `OP ∈ {=,<,>}`
//! - relation: `<func[obj,u OP val;sbj]>`, n-ary with further `;arg`
//! - time comparison: `timeCalc[a OP b]`, time capture `*t=var`
//! - connectives `|>`, `<=>`, `=>`, `||`, `&&` with parenthesised grouping
//! - quantifier prefix `:vars: v1, v2:` (typed: `t:time`, `t:time=now`)
//!
//! Parse mode is an explicit argument; `tell` and `ask` classify statements
//! differently but share the grammar.

pub mod lexer;

use chrono::{DateTime, TimeZone, Utc};

use crate::atom::{Atom, Comparator, FuncArg, Membership, Relation, TimeArg, TimeCompare};
use crate::error::{DoxaResult, ParseError, SentenceError};
use crate::sentence::{Connective, LogSentence};

use self::lexer::{Token, TokenKind, tokenize};

/// Whether the input is being asserted or queried.
///
/// The original design switched a process-wide singleton between modes; here
/// the mode is threaded through explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Tell,
    Ask,
}

/// Kind of a declared variable.
#[derive(Debug, Clone, PartialEq)]
pub enum VarKind {
    /// Ranges over subjects during unification.
    Object,
    /// A date variable, optionally pre-assigned.
    Time(Option<TimeArg>),
}

/// A variable declared in a `:vars:` prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    pub kind: VarKind,
}

/// Parsed expression tree prior to sentence construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Conn {
        op: Connective,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Atom(Atom),
}

impl Expr {
    fn has_connective(&self) -> bool {
        matches!(self, Expr::Conn { .. })
    }

    fn has_conditional(&self) -> bool {
        match self {
            Expr::Conn { op, lhs, rhs } => {
                matches!(
                    op,
                    Connective::IndCond | Connective::Implies | Connective::Equiv
                ) || lhs.has_conditional()
                    || rhs.has_conditional()
            }
            Expr::Atom(_) => false,
        }
    }

    /// Flatten a pure conjunction tree into its atoms; `None` when any other
    /// connective appears.
    fn conjunction_atoms(&self) -> Option<Vec<&Atom>> {
        match self {
            Expr::Atom(a) => Some(vec![a]),
            Expr::Conn {
                op: Connective::And,
                lhs,
                rhs,
            } => {
                let mut atoms = lhs.conjunction_atoms()?;
                atoms.extend(rhs.conjunction_atoms()?);
                Some(atoms)
            }
            Expr::Conn { .. } => None,
        }
    }
}

/// A quantified query: variables plus the membership and relation atoms to
/// prove for them.
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    pub var_order: Vec<String>,
    pub preds: Vec<Membership>,
    pub funcs: Vec<Relation>,
}

/// The parsed form of one `tell`/`ask` input: four ordered assertion lists
/// plus, for queries, the quantified query specs.
#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub assert_memb: Vec<Membership>,
    pub assert_rel: Vec<Relation>,
    pub assert_rules: Vec<LogSentence>,
    pub assert_cogs: Vec<LogSentence>,
    pub queries: Vec<QuerySpec>,
}

/// Parse an input string in the given mode.
pub fn parse(input: &str, mode: ParseMode) -> DoxaResult<ParsedBatch> {
    if input.trim().is_empty() {
        return Err(ParseError::EmptyInput.into());
    }
    let tokens = tokenize(input)?;
    let mut batch = ParsedBatch::default();

    for stmt in split_statements(&tokens) {
        // Newlines inside a parenthesised statement are not separators.
        let stmt: Vec<Token> = stmt
            .iter()
            .filter(|t| t.kind != TokenKind::Newline)
            .cloned()
            .collect();
        if stmt.is_empty() {
            continue;
        }
        let mut parser = Parser {
            tokens: &stmt,
            pos: 0,
        };
        let (decls, expr) = parser.statement()?;
        parser.expect_end()?;
        classify(&mut batch, decls, expr, mode)?;
    }
    Ok(batch)
}

/// Split the token stream into statements at top-level newlines.
fn split_statements(tokens: &[Token]) -> Vec<&[Token]> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, tok) in tokens.iter().enumerate() {
        match tok.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => depth = depth.saturating_sub(1),
            TokenKind::Newline if depth == 0 => {
                out.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&tokens[start..]);
    out
}

fn classify(
    batch: &mut ParsedBatch,
    decls: Vec<VarDecl>,
    expr: Expr,
    mode: ParseMode,
) -> DoxaResult<()> {
    match mode {
        ParseMode::Tell => {
            if expr.has_connective() {
                if !expr.has_conditional() && decls.is_empty() {
                    return Err(SentenceError::MissingCondition.into());
                }
                if expr.has_conditional() {
                    batch.assert_rules.push(LogSentence::new(expr, decls)?);
                } else {
                    batch.assert_cogs.push(LogSentence::new(expr, decls)?);
                }
            } else if !decls.is_empty() {
                batch.assert_cogs.push(LogSentence::new(expr, decls)?);
            } else {
                match expr {
                    Expr::Atom(Atom::Memb(m)) => {
                        if m.op != Comparator::Equal {
                            return Err(ParseError::AssertionOp.into());
                        }
                        batch.assert_memb.push(m);
                    }
                    Expr::Atom(Atom::Func(r)) => batch.assert_rel.push(r),
                    Expr::Atom(Atom::TimeCmp(_)) => {
                        return Err(SentenceError::TimeCompareAssert.into());
                    }
                    Expr::Conn { .. } => unreachable!("handled above"),
                }
            }
        }
        ParseMode::Ask => {
            if decls.is_empty() {
                match expr {
                    Expr::Atom(Atom::Memb(m)) => batch.assert_memb.push(m),
                    Expr::Atom(Atom::Func(r)) => batch.assert_rel.push(r),
                    Expr::Atom(Atom::TimeCmp(_)) | Expr::Conn { .. } => {
                        return Err(ParseError::ComplexQuery.into());
                    }
                }
            } else {
                let Some(atoms) = expr.conjunction_atoms() else {
                    return Err(ParseError::ComplexQuery.into());
                };
                let mut spec = QuerySpec {
                    var_order: decls
                        .iter()
                        .filter(|d| d.kind == VarKind::Object)
                        .map(|d| d.name.clone())
                        .collect(),
                    ..Default::default()
                };
                for atom in atoms {
                    match atom {
                        Atom::Memb(m) => spec.preds.push(m.clone()),
                        Atom::Func(r) => spec.funcs.push(r.clone()),
                        Atom::TimeCmp(_) => return Err(ParseError::ComplexQuery.into()),
                    }
                }
                batch.queries.push(spec);
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// The parser proper
// ---------------------------------------------------------------------------

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn peek_at(&self, n: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + n).map(|t| &t.kind)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.span.start)
            .unwrap_or(0)
    }

    fn bump(&mut self) -> Option<&'a Token> {
        let tok = self.tokens.get(self.pos);
        self.pos += 1;
        tok
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        ParseError::UnexpectedToken {
            found: self
                .tokens
                .get(self.pos)
                .map(|t| t.kind.to_string())
                .unwrap_or_else(|| "end of statement".into()),
            expected: expected.into(),
            offset: self.offset(),
        }
    }

    fn expect(&mut self, kind: &TokenKind, expected: &str) -> Result<(), ParseError> {
        if self.peek() == Some(kind) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_end(&self) -> Result<(), ParseError> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(self.unexpected("end of statement"))
        }
    }

    fn ident(&mut self, expected: &str) -> Result<String, ParseError> {
        match self.peek() {
            Some(TokenKind::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    // statement := [":" "vars" ":" decls ":"] expr
    fn statement(&mut self) -> DoxaResult<(Vec<VarDecl>, Expr)> {
        let mut decls = Vec::new();
        if self.peek() == Some(&TokenKind::Colon) {
            self.bump();
            let quantifier = self.ident("`vars`")?;
            match quantifier.as_str() {
                "vars" => {}
                "exists" => return Err(ParseError::ExistentialUnsupported.into()),
                _ => {
                    return Err(ParseError::UnexpectedToken {
                        found: quantifier,
                        expected: "`vars`".into(),
                        offset: self.offset(),
                    }
                    .into());
                }
            }
            self.expect(&TokenKind::Colon, "`:` after `vars`")?;
            loop {
                decls.push(self.var_decl()?);
                match self.peek() {
                    Some(TokenKind::Comma) => {
                        self.bump();
                    }
                    Some(TokenKind::Colon) => {
                        self.bump();
                        break;
                    }
                    _ => return Err(self.unexpected("`,` or `:` closing the quantifier").into()),
                }
            }
        }
        let expr = self.conn_expr(0)?;
        Ok((decls, expr))
    }

    // decl := name [":" type ["=" default]]
    fn var_decl(&mut self) -> DoxaResult<VarDecl> {
        let name = self.ident("a variable name")?;
        // A `:` here is a type annotation only when a type name follows;
        // otherwise it closes the quantifier.
        if self.peek() == Some(&TokenKind::Colon)
            && matches!(self.peek_at(1), Some(TokenKind::Ident(ty)) if ty == "time")
        {
            self.bump();
            let ty = self.ident("a variable type")?;
            if ty != "time" {
                return Err(ParseError::UnexpectedToken {
                    found: ty,
                    expected: "`time`".into(),
                    offset: self.offset(),
                }
                .into());
            }
            let default = if self.peek() == Some(&TokenKind::Eq) {
                self.bump();
                Some(self.time_arg()?)
            } else {
                None
            };
            Ok(VarDecl {
                name,
                kind: VarKind::Time(default),
            })
        } else {
            Ok(VarDecl {
                name,
                kind: VarKind::Object,
            })
        }
    }

    // Precedence levels, loosest first: |> <=> => || &&
    fn conn_expr(&mut self, level: usize) -> DoxaResult<Expr> {
        const LEVELS: [(TokenKind, Connective); 5] = [
            (TokenKind::IndCond, Connective::IndCond),
            (TokenKind::Equiv, Connective::Equiv),
            (TokenKind::Implies, Connective::Implies),
            (TokenKind::Or, Connective::Or),
            (TokenKind::And, Connective::And),
        ];
        if level >= LEVELS.len() {
            return self.primary();
        }
        let lhs = self.conn_expr(level + 1)?;
        let (token, op) = &LEVELS[level];
        if self.peek() == Some(token) {
            self.bump();
            // Right-associative: `a |> b |> c` nests in the consequent.
            let rhs = self.conn_expr(level)?;
            Ok(Expr::Conn {
                op: *op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            })
        } else {
            Ok(lhs)
        }
    }

    fn primary(&mut self) -> DoxaResult<Expr> {
        match self.peek() {
            Some(TokenKind::LParen) => {
                self.bump();
                let expr = self.conn_expr(0)?;
                self.expect(&TokenKind::RParen, "`)`")?;
                Ok(expr)
            }
            Some(TokenKind::Lt) => Ok(Expr::Atom(Atom::Func(self.relation()?))),
            Some(TokenKind::Ident(name)) if name == "timeCalc" => {
                Ok(Expr::Atom(Atom::TimeCmp(self.time_compare()?)))
            }
            Some(TokenKind::Ident(_)) => Ok(Expr::Atom(Atom::Memb(self.membership()?))),
            _ => Err(self.unexpected("an atom or `(`").into()),
        }
    }

    // membership := name "[" term ",u" OP val {"," "*t=" time} "]"
    fn membership(&mut self) -> DoxaResult<Membership> {
        let parent = self.ident("a category name")?;
        self.expect(&TokenKind::LBracket, "`[`")?;
        let term = self.ident("a subject or variable")?;
        self.expect(&TokenKind::Comma, "`,u`")?;
        let (op, value) = self.uval()?;
        let mut memb = Membership::new(parent, term, op, value)?;
        while self.peek() == Some(&TokenKind::Comma) {
            self.bump();
            self.time_annotation(&mut memb.dates, &mut memb.time_var)?;
        }
        self.expect(&TokenKind::RBracket, "`]`")?;
        Ok(memb)
    }

    // relation := "<" name "[" arg {";" arg} "]" ">"
    fn relation(&mut self) -> DoxaResult<Relation> {
        self.expect(&TokenKind::Lt, "`<`")?;
        let func = self.ident("a relation name")?;
        self.expect(&TokenKind::LBracket, "`[`")?;
        let mut args = Vec::new();
        let mut dates = Vec::new();
        let mut time_var = None;
        loop {
            let term = self.ident("an argument term")?;
            let mut uval = None;
            while self.peek() == Some(&TokenKind::Comma) {
                self.bump();
                if matches!(self.peek(), Some(TokenKind::Ident(u)) if u == "u") {
                    let (op, value) = self.uval()?;
                    uval = Some((op, value));
                } else {
                    self.time_annotation(&mut dates, &mut time_var)?;
                }
            }
            args.push(match uval {
                Some((op, value)) => FuncArg::with_val(term, op, value)?,
                None => FuncArg::bare(term),
            });
            match self.peek() {
                Some(TokenKind::Semicolon) => {
                    self.bump();
                }
                _ => break,
            }
        }
        self.expect(&TokenKind::RBracket, "`]`")?;
        self.expect(&TokenKind::Gt, "`>`")?;
        let mut rel = Relation::new(func, args)?;
        rel.dates = dates;
        rel.time_var = time_var;
        Ok(rel)
    }

    // uval := "u" OP number
    fn uval(&mut self) -> DoxaResult<(Comparator, f32)> {
        let offset = self.offset();
        let u = self.ident("`u`")?;
        if u != "u" {
            return Err(ParseError::MalformedUval { offset }.into());
        }
        let op = match self.peek() {
            Some(TokenKind::Eq) => Comparator::Equal,
            Some(TokenKind::Gt) => Comparator::More,
            Some(TokenKind::Lt) => Comparator::Less,
            _ => return Err(ParseError::MalformedUval { offset }.into()),
        };
        self.bump();
        match self.peek() {
            Some(TokenKind::Number(v)) => {
                let v = *v;
                self.bump();
                Ok((op, v))
            }
            _ => Err(ParseError::MalformedUval { offset }.into()),
        }
    }

    // "*t=" (var | date | "now") — a date literal extends the validity list,
    // a variable captures the matched atom's date during evaluation.
    fn time_annotation(
        &mut self,
        dates: &mut Vec<DateTime<Utc>>,
        time_var: &mut Option<String>,
    ) -> DoxaResult<()> {
        self.expect(&TokenKind::Star, "`*t=`")?;
        let t = self.ident("`t`")?;
        if t != "t" {
            return Err(self.unexpected("`t`").into());
        }
        self.expect(&TokenKind::Eq, "`=` after `*t`")?;
        match self.time_arg()? {
            TimeArg::Var(name) => *time_var = Some(name),
            TimeArg::At(date) => dates.push(date),
            TimeArg::Now => dates.push(Utc::now()),
        }
        Ok(())
    }

    fn time_arg(&mut self) -> DoxaResult<TimeArg> {
        match self.peek() {
            Some(TokenKind::Ident(name)) if name == "now" => {
                self.bump();
                Ok(TimeArg::Now)
            }
            Some(TokenKind::Ident(name)) => {
                let name = name.clone();
                self.bump();
                Ok(TimeArg::Var(name))
            }
            Some(TokenKind::DateLit(text)) => {
                let text = text.clone();
                self.bump();
                Ok(TimeArg::At(parse_date(&text)?))
            }
            _ => Err(self.unexpected("a date, variable or `now`").into()),
        }
    }

    // timeCalc := "timeCalc" "[" arg OP arg "]"
    fn time_compare(&mut self) -> DoxaResult<TimeCompare> {
        let _ = self.ident("`timeCalc`")?;
        self.expect(&TokenKind::LBracket, "`[`")?;
        let lhs = self.time_arg()?;
        let op = match self.peek() {
            Some(TokenKind::Lt) => Comparator::Less,
            Some(TokenKind::Gt) => Comparator::More,
            Some(TokenKind::Eq) => Comparator::Equal,
            _ => return Err(self.unexpected("`<`, `>` or `=`").into()),
        };
        self.bump();
        let rhs = self.time_arg()?;
        self.expect(&TokenKind::RBracket, "`]`")?;
        Ok(TimeCompare { op, lhs, rhs })
    }
}

/// Parse a dotted date literal: `year.month.day[.hour[.minute[.second]]]`.
fn parse_date(text: &str) -> Result<DateTime<Utc>, ParseError> {
    let bad = || ParseError::BadDate { text: text.into() };
    let parts: Vec<u32> = text
        .split('.')
        .map(|p| p.parse::<u32>().map_err(|_| bad()))
        .collect::<Result<_, _>>()?;
    if parts.len() < 3 || parts.len() > 6 {
        return Err(bad());
    }
    let get = |i: usize| parts.get(i).copied().unwrap_or(0);
    Utc.with_ymd_and_hms(
        parts[0] as i32,
        parts[1],
        parts[2],
        get(3),
        get(4),
        get(5),
    )
    .single()
    .ok_or_else(bad)
}
