//! Parsing Expressions
//!
//! The expression tree every grammar is lowered into. Each node knows its
//! static facts (whether it always succeeds, whether it can fail after
//! consuming input, how many nested control-flow blocks its compiled form
//! needs, which locals it reads) and how to compile itself into a parser
//! function (see `compile`).
//!
//! Rule references are names, not pointers. They are resolved to the
//! implementation function of the rule during analysis, which keeps the tree
//! acyclic.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::ast::Span;
use crate::host::{Assignment, HostExpr};
use crate::value::repr_str;

pub mod compile;

// ============================================================================
// NODES
// ============================================================================

#[derive(Debug, Clone)]
pub struct Expr {
    /// Program-wide unique ID, assigned by analysis.
    pub id: usize,
    pub kind: ExprKind,
    pub span: Span,
}

/// What a name refers to once analysis has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Unresolved,
    /// A let-bound name, rule parameter or earlier class field.
    Local,
    /// The implementation function of a rule, e.g. `_try_start`.
    Rule(String),
}

/// An inline host expression together with the locals it captures.
#[derive(Debug, Clone)]
pub struct HostSnippet {
    pub source: String,
    pub expr: Arc<HostExpr>,
    /// Free names that resolve to grammar locals, filled in by analysis.
    pub locals: Vec<String>,
}

impl HostSnippet {
    pub fn new(source: impl Into<String>, expr: HostExpr) -> Self {
        Self {
            source: source.into(),
            expr: Arc::new(expr),
            locals: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Bound {
    Const(usize),
    Host(HostSnippet),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Prefix,
    Postfix,
    LeftAssoc,
    RightAssoc,
    NonAssoc,
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Prefix => "Prefix",
            OpKind::Postfix => "Postfix",
            OpKind::LeftAssoc => "LeftAssoc",
            OpKind::RightAssoc => "RightAssoc",
            OpKind::NonAssoc => "NonAssoc",
        }
    }
}

/// One level of an operator precedence table. The operand is the level
/// below it; the compiler wires that up.
#[derive(Debug, Clone)]
pub struct OpRule {
    pub kind: OpKind,
    pub operator: Box<Expr>,
}

#[derive(Debug, Clone)]
pub enum Arg {
    Positional(Expr),
    Keyword(String, Expr),
}

impl Arg {
    pub fn expr(&self) -> &Expr {
        match self {
            Arg::Positional(e) | Arg::Keyword(_, e) => e,
        }
    }

    pub fn expr_mut(&mut self) -> &mut Expr {
        match self {
            Arg::Positional(e) | Arg::Keyword(_, e) => e,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Str {
        value: Vec<u8>,
        ignore_case: bool,
        binary: bool,
        skip_ignored: bool,
    },
    Regex {
        pattern: String,
        ignore_case: bool,
        binary: bool,
        skip_ignored: bool,
    },
    Ref {
        name: String,
        binding: Binding,
    },
    /// Concatenation. With `names`, each result is bound to a field; with a
    /// `constructor`, the fields build a node of that class.
    Seq {
        exprs: Vec<Expr>,
        names: Option<Vec<String>>,
        constructor: Option<String>,
    },
    Choice(Vec<Expr>),
    List {
        expr: Box<Expr>,
        min_len: Option<Bound>,
        max_len: Option<Bound>,
    },
    Sep {
        expr: Box<Expr>,
        separator: Box<Expr>,
        discard_separators: bool,
        allow_trailer: bool,
        allow_empty: bool,
    },
    Opt(Box<Expr>),
    /// `left |> right` calls right's result on left's; `left <| right`
    /// (apply_left) calls left's result on right's.
    Apply {
        left: Box<Expr>,
        right: Box<Expr>,
        apply_left: bool,
    },
    /// `left >> right` (discard_left) keeps right; `left << right` keeps left.
    Discard {
        left: Box<Expr>,
        right: Box<Expr>,
        discard_left: bool,
    },
    Expect(Box<Expr>),
    ExpectNot(Box<Expr>),
    Fail(Option<String>),
    Let {
        name: String,
        value: Box<Expr>,
        body: Box<Expr>,
    },
    Where {
        expr: Box<Expr>,
        predicate: Box<Expr>,
    },
    Skip(Vec<Expr>),
    Call {
        func: String,
        args: Vec<Arg>,
        binding: Binding,
    },
    Host(HostSnippet),
    OperatorPrecedence {
        atom: Box<Expr>,
        rules: Vec<OpRule>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { id: 0, kind, span }
    }

    pub fn boxed(self) -> Box<Expr> {
        Box::new(self)
    }

    pub fn is_fail(&self) -> bool {
        matches!(self.kind, ExprKind::Fail(_))
    }

    /// True when the compiled form can never leave STATUS false.
    pub fn always_succeeds(&self) -> bool {
        match &self.kind {
            ExprKind::Str { value, .. } => value.is_empty(),
            ExprKind::Regex { .. } | ExprKind::Ref { .. } | ExprKind::Call { .. } => false,
            ExprKind::Seq { exprs, .. } => exprs.iter().all(Expr::always_succeeds),
            ExprKind::Choice(exprs) => exprs.iter().any(Expr::always_succeeds),
            ExprKind::List { expr, min_len, .. } => {
                matches!(min_len, None | Some(Bound::Const(0))) || expr.always_succeeds()
            }
            ExprKind::Sep { allow_empty, .. } => *allow_empty,
            ExprKind::Opt(_) | ExprKind::Skip(_) | ExprKind::Host(_) => true,
            ExprKind::Apply { .. } | ExprKind::Where { .. } => false,
            ExprKind::Discard { left, right, .. } => left.always_succeeds() && right.always_succeeds(),
            ExprKind::Expect(e) => e.always_succeeds(),
            ExprKind::ExpectNot(_) | ExprKind::Fail(_) => false,
            ExprKind::Let { value, body, .. } => value.always_succeeds() && body.always_succeeds(),
            ExprKind::OperatorPrecedence { .. } => false,
        }
    }

    /// True when the node can fail after moving POS, so callers that
    /// backtrack must restore a checkpoint.
    pub fn can_partially_succeed(&self) -> bool {
        match &self.kind {
            ExprKind::Str { .. } | ExprKind::Regex { .. } => false,
            ExprKind::Opt(_) | ExprKind::Skip(_) | ExprKind::Host(_) | ExprKind::Fail(_) => false,
            ExprKind::Expect(_) | ExprKind::ExpectNot(_) => false,
            _ => !self.always_succeeds(),
        }
    }

    /// How many nested blocks the compiled form opens. Compared with the
    /// remaining budget to decide whether to give the node its own function.
    pub fn num_blocks(&self) -> usize {
        match &self.kind {
            ExprKind::Str { skip_ignored, .. } | ExprKind::Regex { skip_ignored, .. } => {
                usize::from(*skip_ignored)
            }
            ExprKind::Ref { .. } | ExprKind::Call { .. } | ExprKind::Host(_) | ExprKind::Fail(_) => 0,
            ExprKind::Sep { .. } | ExprKind::Where { .. } | ExprKind::Skip(_) => 2,
            ExprKind::OperatorPrecedence { .. } => 0,
            _ => 1,
        }
    }

    /// Locals the node reads from its enclosing scope.
    pub fn freevars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_freevars(&mut Vec::new(), &mut out);
        out
    }

    fn collect_freevars(&self, bound: &mut Vec<String>, out: &mut BTreeSet<String>) {
        let note = |name: &String, bound: &Vec<String>, out: &mut BTreeSet<String>| {
            if !bound.contains(name) {
                out.insert(name.clone());
            }
        };
        match &self.kind {
            ExprKind::Str { .. } | ExprKind::Regex { .. } | ExprKind::Fail(_) => {}
            ExprKind::Ref { name, binding } => {
                if *binding == Binding::Local {
                    note(name, bound, out);
                }
            }
            ExprKind::Host(snippet) => {
                for name in &snippet.locals {
                    note(name, bound, out);
                }
            }
            ExprKind::Seq { exprs, names, .. } => {
                let depth = bound.len();
                for (i, expr) in exprs.iter().enumerate() {
                    expr.collect_freevars(bound, out);
                    if let Some(name) = names.as_ref().and_then(|n| n.get(i)) {
                        bound.push(name.clone());
                    }
                }
                bound.truncate(depth);
            }
            ExprKind::Let { name, value, body } => {
                value.collect_freevars(bound, out);
                bound.push(name.clone());
                body.collect_freevars(bound, out);
                bound.pop();
            }
            ExprKind::List { expr, min_len, max_len } => {
                expr.collect_freevars(bound, out);
                for b in [min_len, max_len].into_iter().flatten() {
                    if let Bound::Host(snippet) = b {
                        for name in &snippet.locals {
                            note(name, bound, out);
                        }
                    }
                }
            }
            ExprKind::Call { args, .. } => {
                for arg in args {
                    arg.expr().collect_freevars(bound, out);
                }
            }
            _ => {
                for child in self.children() {
                    child.collect_freevars(bound, out);
                }
            }
        }
    }

    /// Direct sub-expressions, in source order.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Str { .. }
            | ExprKind::Regex { .. }
            | ExprKind::Ref { .. }
            | ExprKind::Fail(_)
            | ExprKind::Host(_) => Vec::new(),
            ExprKind::Seq { exprs, .. } | ExprKind::Choice(exprs) | ExprKind::Skip(exprs) => {
                exprs.iter().collect()
            }
            ExprKind::List { expr, .. }
            | ExprKind::Opt(expr)
            | ExprKind::Expect(expr)
            | ExprKind::ExpectNot(expr) => vec![expr.as_ref()],
            ExprKind::Sep { expr, separator, .. } => vec![expr.as_ref(), separator.as_ref()],
            ExprKind::Apply { left, right, .. } | ExprKind::Discard { left, right, .. } => {
                vec![left.as_ref(), right.as_ref()]
            }
            ExprKind::Let { value, body, .. } => vec![value.as_ref(), body.as_ref()],
            ExprKind::Where { expr, predicate } => vec![expr.as_ref(), predicate.as_ref()],
            ExprKind::Call { args, .. } => args.iter().map(Arg::expr).collect(),
            ExprKind::OperatorPrecedence { atom, rules } => std::iter::once(atom.as_ref())
                .chain(rules.iter().map(|r| r.operator.as_ref()))
                .collect(),
        }
    }

    /// Mutable twin of `children`.
    pub fn children_mut(&mut self) -> Vec<&mut Expr> {
        match &mut self.kind {
            ExprKind::Str { .. }
            | ExprKind::Regex { .. }
            | ExprKind::Ref { .. }
            | ExprKind::Fail(_)
            | ExprKind::Host(_) => Vec::new(),
            ExprKind::Seq { exprs, .. } | ExprKind::Choice(exprs) | ExprKind::Skip(exprs) => {
                exprs.iter_mut().collect()
            }
            ExprKind::List { expr, .. }
            | ExprKind::Opt(expr)
            | ExprKind::Expect(expr)
            | ExprKind::ExpectNot(expr) => vec![expr.as_mut()],
            ExprKind::Sep { expr, separator, .. } => vec![expr.as_mut(), separator.as_mut()],
            ExprKind::Apply { left, right, .. } | ExprKind::Discard { left, right, .. } => {
                vec![left.as_mut(), right.as_mut()]
            }
            ExprKind::Let { value, body, .. } => vec![value.as_mut(), body.as_mut()],
            ExprKind::Where { expr, predicate } => vec![expr.as_mut(), predicate.as_mut()],
            ExprKind::Call { args, .. } => args.iter_mut().map(Arg::expr_mut).collect(),
            ExprKind::OperatorPrecedence { atom, rules } => std::iter::once(atom.as_mut())
                .chain(rules.iter_mut().map(|r| r.operator.as_mut()))
                .collect(),
        }
    }
}

// ============================================================================
// DEFINITIONS
// ============================================================================

/// A top-level rule or class after lowering.
#[derive(Debug, Clone)]
pub struct Definition {
    pub name: String,
    pub params: Option<Vec<String>>,
    pub expr: Expr,
    pub is_ignored: bool,
    /// Field names for class rules.
    pub class_fields: Option<Vec<String>>,
    /// Generated by the generator itself, e.g. `_ignored`.
    pub is_synthetic: bool,
    /// The definition's text in the grammar description.
    pub source: String,
    pub span: Span,
}

impl Definition {
    pub fn is_class(&self) -> bool {
        self.class_fields.is_some()
    }

    /// Name of the function implementing this definition.
    pub fn impl_name(&self) -> String {
        impl_name(&self.name)
    }
}

pub fn impl_name(rule: &str) -> String {
    format!("_try_{rule}")
}

/// A triple-backtick host section, parsed into assignments.
#[derive(Debug, Clone)]
pub struct SectionDef {
    pub source: String,
    pub assignments: Vec<Assignment>,
    pub span: Span,
}

/// Everything lowering produces from a description.
#[derive(Debug, Clone, Default)]
pub struct GrammarTree {
    pub definitions: Vec<Definition>,
    /// Host sections, in order.
    pub sections: Vec<SectionDef>,
}

// ============================================================================
// DISPLAY
// ============================================================================

fn is_operator_form(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Choice(_)
        | ExprKind::Apply { .. }
        | ExprKind::Discard { .. }
        | ExprKind::Where { .. }
        | ExprKind::Let { .. } => true,
        ExprKind::Sep {
            discard_separators: true,
            allow_empty: true,
            ..
        } => true,
        _ => false,
    }
}

struct Operand<'a>(&'a Expr);

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if is_operator_form(self.0) {
            write!(f, "({})", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[&Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Const(n) => write!(f, "{n}"),
            Bound::Host(snippet) => write!(f, "`{}`", snippet.source),
        }
    }
}

fn flag(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Str {
                value,
                ignore_case,
                binary,
                ..
            } => {
                let text: String = if *binary {
                    value.iter().map(|b| *b as char).collect()
                } else {
                    String::from_utf8_lossy(value).into_owned()
                };
                let quoted = repr_str(&text);
                write!(
                    f,
                    "{}\"{}\"{}",
                    if *binary { "b" } else { "" },
                    &quoted[1..quoted.len() - 1].replace('"', "\\\""),
                    if *ignore_case { "i" } else { "" }
                )
            }
            ExprKind::Regex {
                pattern,
                ignore_case,
                binary,
                ..
            } => write!(
                f,
                "{}/{}/{}",
                if *binary { "b" } else { "" },
                pattern.replace('/', "\\/"),
                if *ignore_case { "i" } else { "" }
            ),
            ExprKind::Ref { name, .. } => write!(f, "{name}"),
            ExprKind::Seq { exprs, .. } => {
                write!(f, "[")?;
                write_list(f, &exprs.iter().collect::<Vec<_>>())?;
                write!(f, "]")
            }
            ExprKind::Choice(exprs) => {
                for (i, e) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{}", Operand(e))?;
                }
                Ok(())
            }
            ExprKind::List { expr, min_len, max_len } => match (min_len, max_len) {
                (None | Some(Bound::Const(0)), None) => write!(f, "{}*", Operand(expr)),
                (Some(Bound::Const(1)), None) => write!(f, "{}+", Operand(expr)),
                (min, max) => {
                    write!(f, "{}{{", Operand(expr))?;
                    if let Some(min) = min {
                        write!(f, "{min}")?;
                    }
                    write!(f, ",")?;
                    if let Some(max) = max {
                        write!(f, "{max}")?;
                    }
                    write!(f, "}}")
                }
            },
            ExprKind::Sep {
                expr,
                separator,
                discard_separators,
                allow_trailer,
                allow_empty,
            } => {
                if *discard_separators && *allow_empty {
                    let op = if *allow_trailer { "/?" } else { "//" };
                    write!(f, "{} {op} {}", Operand(expr), Operand(separator))
                } else {
                    write!(
                        f,
                        "Sep({expr}, {separator}, discard_separators={}, allow_trailer={}, allow_empty={})",
                        flag(*discard_separators),
                        flag(*allow_trailer),
                        flag(*allow_empty)
                    )
                }
            }
            ExprKind::Opt(expr) => write!(f, "{}?", Operand(expr)),
            ExprKind::Apply { left, right, apply_left } => {
                let op = if *apply_left { "<|" } else { "|>" };
                write!(f, "{} {op} {}", Operand(left), Operand(right))
            }
            ExprKind::Discard { left, right, discard_left } => {
                let op = if *discard_left { ">>" } else { "<<" };
                write!(f, "{} {op} {}", Operand(left), Operand(right))
            }
            ExprKind::Expect(e) => write!(f, "Expect({e})"),
            ExprKind::ExpectNot(e) => write!(f, "ExpectNot({e})"),
            ExprKind::Fail(None) => write!(f, "Fail()"),
            ExprKind::Fail(Some(message)) => write!(f, "Fail({})", repr_str(message)),
            ExprKind::Let { name, value, body } => write!(f, "let {name} = {value} in {body}"),
            ExprKind::Where { expr, predicate } => {
                write!(f, "{} where {}", Operand(expr), Operand(predicate))
            }
            ExprKind::Skip(exprs) => {
                write!(f, "Skip(")?;
                write_list(f, &exprs.iter().collect::<Vec<_>>())?;
                write!(f, ")")
            }
            ExprKind::Call { func, args, .. } => {
                write!(f, "{func}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match arg {
                        Arg::Positional(e) => write!(f, "{e}")?,
                        Arg::Keyword(name, e) => write!(f, "{name}={e}")?,
                    }
                }
                write!(f, ")")
            }
            ExprKind::Host(snippet) => write!(f, "`{}`", snippet.source),
            ExprKind::OperatorPrecedence { atom, rules } => {
                write!(f, "OperatorPrecedence({atom}")?;
                for rule in rules {
                    write!(f, ", {}({})", rule.kind.name(), rule.operator)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(s: &str) -> Expr {
        Expr::new(
            ExprKind::Str {
                value: s.as_bytes().to_vec(),
                ignore_case: false,
                binary: false,
                skip_ignored: false,
            },
            Span::default(),
        )
    }

    fn local(name: &str) -> Expr {
        Expr::new(
            ExprKind::Ref {
                name: name.to_string(),
                binding: Binding::Local,
            },
            Span::default(),
        )
    }

    #[test]
    fn test_success_flags() {
        assert!(lit("").always_succeeds());
        assert!(!lit("a").always_succeeds());
        let many = Expr::new(
            ExprKind::List {
                expr: lit("a").boxed(),
                min_len: None,
                max_len: None,
            },
            Span::default(),
        );
        assert!(many.always_succeeds());
        let seq = Expr::new(
            ExprKind::Seq {
                exprs: vec![lit("a"), lit("b")],
                names: None,
                constructor: None,
            },
            Span::default(),
        );
        assert!(seq.can_partially_succeed());
        assert!(!lit("a").can_partially_succeed());
    }

    #[test]
    fn test_freevars_respect_let_and_fields() {
        let let_expr = Expr::new(
            ExprKind::Let {
                name: "x".to_string(),
                value: local("y").boxed(),
                body: Expr::new(
                    ExprKind::Seq {
                        exprs: vec![local("x"), local("z")],
                        names: None,
                        constructor: None,
                    },
                    Span::default(),
                )
                .boxed(),
            },
            Span::default(),
        );
        let vars: Vec<_> = let_expr.freevars().into_iter().collect();
        assert_eq!(vars, vec!["y", "z"]);

        let class_body = Expr::new(
            ExprKind::Seq {
                exprs: vec![local("p"), local("a")],
                names: Some(vec!["a".to_string(), "b".to_string()]),
                constructor: Some("Pair".to_string()),
            },
            Span::default(),
        );
        let vars: Vec<_> = class_body.freevars().into_iter().collect();
        assert_eq!(vars, vec!["p"]);
    }

    #[test]
    fn test_display_uses_grammar_syntax() {
        let choice = Expr::new(ExprKind::Choice(vec![lit("foo"), lit("foobar")]), Span::default());
        assert_eq!(choice.to_string(), r#""foo" | "foobar""#);
        let opt = Expr::new(ExprKind::Opt(choice.boxed()), Span::default());
        assert_eq!(opt.to_string(), r#"("foo" | "foobar")?"#);
        let fail = Expr::new(ExprKind::Fail(Some("nope".to_string())), Span::default());
        assert_eq!(fail.to_string(), "Fail('nope')");
    }
}
