//! Meta AST for grammar descriptions
//!
//! The syntax module turns a grammar description into these nodes; the
//! lowering pass turns them into parsing expressions. Every node carries the
//! span of the description text it came from so later passes can point at it.

use serde::Serialize;
use std::fmt;

// ============================================================================
// SPANS
// ============================================================================

/// A byte range in the grammar description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Smallest span covering both.
    pub fn join(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

// ============================================================================
// TOP-LEVEL FORMS
// ============================================================================

/// What a whole description parses to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Form {
    /// A list of rule, class and host-section statements.
    Statements(Vec<Stmt>),
    /// A single bare expression; the generator wraps it in a `start` rule.
    Expr(MetaExpr),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Stmt {
    Rule(RuleDef),
    Class(ClassDef),
    HostSection { source: String, span: Span },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleDef {
    pub name: String,
    pub params: Option<Vec<String>>,
    pub body: MetaExpr,
    pub is_ignored: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassDef {
    pub name: String,
    pub params: Option<Vec<String>>,
    pub fields: Vec<FieldDef>,
    pub is_ignored: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDef {
    pub name: String,
    pub expr: MetaExpr,
    pub span: Span,
}

// ============================================================================
// EXPRESSIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetaExpr {
    pub kind: MetaKind,
    pub span: Span,
}

impl MetaExpr {
    pub fn new(kind: MetaKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MetaKind {
    Str {
        value: String,
        ignore_case: bool,
        binary: bool,
    },
    Regex {
        pattern: String,
        ignore_case: bool,
        binary: bool,
    },
    Ref(String),
    Call {
        func: String,
        args: Vec<MetaArg>,
    },
    /// `[e1, e2, ...]`
    Sequence(Vec<MetaExpr>),
    Postfix {
        expr: Box<MetaExpr>,
        op: PostfixOp,
    },
    Binary {
        op: BinaryOp,
        left: Box<MetaExpr>,
        right: Box<MetaExpr>,
    },
    Let {
        name: String,
        value: Box<MetaExpr>,
        body: Box<MetaExpr>,
    },
    /// Backtick-delimited host expression, unparsed.
    Host(String),
    Int(i64),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MetaArg {
    Positional(MetaExpr),
    Keyword { name: String, value: MetaExpr },
}

impl MetaArg {
    pub fn expr(&self) -> &MetaExpr {
        match self {
            MetaArg::Positional(e) => e,
            MetaArg::Keyword { value, .. } => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PostfixOp {
    /// `?`
    Opt,
    /// `*`
    Many,
    /// `+`
    Some,
    /// `{n}`, `{n,}`, `{,m}`, `{n,m}`
    Repeat {
        min: Option<MetaBound>,
        max: Option<MetaBound>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MetaBound {
    Int(usize),
    Host(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    /// `|`
    Choice,
    /// `|>`
    ApplyRight,
    /// `<|`
    ApplyLeft,
    /// `//`
    Sep,
    /// `/?`
    SepTrailer,
    /// `<<`
    KeepLeft,
    /// `>>`
    KeepRight,
    /// `where`
    Where,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Choice => "|",
            BinaryOp::ApplyRight => "|>",
            BinaryOp::ApplyLeft => "<|",
            BinaryOp::Sep => "//",
            BinaryOp::SepTrailer => "/?",
            BinaryOp::KeepLeft => "<<",
            BinaryOp::KeepRight => ">>",
            BinaryOp::Where => "where",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}
