//! Grammar Lowering
//!
//! Turns the meta AST into parsing expressions. Surface sugar is resolved
//! here: postfix repetition, the binary operators, integer literals and the
//! builtin call forms (`Opt`, `List`, `Some`, `Sep`, `OperatorPrecedence`,
//! ...). A user rule with the same name as a builtin form shadows it.
//!
//! If any rule is declared `ignored`, a synthetic `_ignored` rule is added
//! whose body skips over all of them.

use std::collections::HashSet;

use crate::ast::{
    BinaryOp, ClassDef, Form, MetaArg, MetaBound, MetaExpr, MetaKind, PostfixOp, RuleDef, Span,
    Stmt,
};
use crate::diagnostics::SourceArc;
use crate::expr::compile::IGNORED_RULE;
use crate::expr::{
    Arg, Binding, Bound, Definition, Expr, ExprKind, GrammarTree, HostSnippet, OpKind, OpRule,
    SectionDef,
};
use crate::host::{self, HostExpr};
use crate::value::Value;
use crate::{err_ctx, SourcerError};

/// Call forms that build expressions instead of calling a rule.
pub const BUILTIN_FORMS: &[&str] = &[
    "Opt",
    "List",
    "Some",
    "Expect",
    "ExpectNot",
    "Fail",
    "Left",
    "Right",
    "Skip",
    "Sep",
    "OperatorPrecedence",
];

/// Lowers a parsed description into definitions and host sections.
pub fn lower(form: Form, description: &str, source: &SourceArc) -> Result<GrammarTree, SourcerError> {
    let stmts = match form {
        Form::Statements(stmts) => stmts,
        Form::Expr(body) => {
            let span = body.span;
            vec![Stmt::Rule(RuleDef {
                name: "start".to_string(),
                params: None,
                body,
                is_ignored: false,
                span,
            })]
        }
    };

    let rule_names = stmts
        .iter()
        .filter_map(|stmt| match stmt {
            Stmt::Rule(rule) => Some(rule.name.clone()),
            Stmt::Class(class) => Some(class.name.clone()),
            Stmt::HostSection { .. } => None,
        })
        .collect();
    let lowering = Lowering {
        description,
        source,
        rule_names,
    };

    let mut tree = GrammarTree::default();
    for stmt in stmts {
        match stmt {
            Stmt::Rule(rule) => tree.definitions.push(lowering.rule(rule)?),
            Stmt::Class(class) => tree.definitions.push(lowering.class(class)?),
            Stmt::HostSection { source: text, span } => {
                let assignments = host::parse_section(&text)
                    .map_err(|e| lowering.error(e.message(), span))?;
                tree.sections.push(SectionDef {
                    source: text,
                    assignments,
                    span,
                });
            }
        }
    }

    let ignored: Vec<&Definition> = tree.definitions.iter().filter(|d| d.is_ignored).collect();
    if !ignored.is_empty() {
        if let Some(start) = ignored.iter().find(|d| d.name.eq_ignore_ascii_case("start")) {
            return Err(lowering.error("the start rule cannot be ignored", start.span));
        }
        let refs = ignored
            .iter()
            .map(|d| {
                Expr::new(
                    ExprKind::Ref {
                        name: d.name.clone(),
                        binding: Binding::Unresolved,
                    },
                    d.span,
                )
            })
            .collect();
        let expr = Expr::new(ExprKind::Skip(refs), Span::default());
        let definition = Definition {
            name: IGNORED_RULE.to_string(),
            params: None,
            source: format!("{IGNORED_RULE} = {expr}"),
            expr,
            is_ignored: false,
            class_fields: None,
            is_synthetic: true,
            span: Span::default(),
        };
        log::debug!("synthesized {} over {} ignored rules", IGNORED_RULE, ignored.len());
        tree.definitions.push(definition);
    }

    Ok(tree)
}

struct Lowering<'a> {
    description: &'a str,
    source: &'a SourceArc,
    rule_names: HashSet<String>,
}

/// Arguments of a builtin form, matched against its parameter names.
struct FormArgs<'m> {
    slots: Vec<Option<&'m MetaExpr>>,
}

impl<'m> FormArgs<'m> {
    fn get(&self, index: usize) -> Option<&'m MetaExpr> {
        self.slots.get(index).copied().flatten()
    }
}

impl Lowering<'_> {
    fn error(&self, message: impl std::fmt::Display, span: Span) -> SourcerError {
        err_ctx!(Grammar, message, self.source, span)
    }

    fn text(&self, span: Span) -> String {
        self.description
            .get(span.start..span.end)
            .unwrap_or_default()
            .trim()
            .to_string()
    }

    fn rule(&self, rule: RuleDef) -> Result<Definition, SourcerError> {
        let expr = self.expr(&rule.body)?;
        let source = if rule.span == rule.body.span {
            format!("{} = {}", rule.name, self.text(rule.span))
        } else {
            self.text(rule.span)
        };
        Ok(Definition {
            name: rule.name,
            params: rule.params,
            expr,
            is_ignored: rule.is_ignored,
            class_fields: None,
            is_synthetic: false,
            source,
            span: rule.span,
        })
    }

    fn class(&self, class: ClassDef) -> Result<Definition, SourcerError> {
        let fields: Vec<String> = class.fields.iter().map(|f| f.name.clone()).collect();
        let exprs = class
            .fields
            .iter()
            .map(|f| self.expr(&f.expr))
            .collect::<Result<Vec<_>, _>>()?;
        let expr = Expr::new(
            ExprKind::Seq {
                exprs,
                names: Some(fields.clone()),
                constructor: Some(class.name.clone()),
            },
            class.span,
        );
        Ok(Definition {
            name: class.name,
            params: class.params,
            expr,
            is_ignored: class.is_ignored,
            class_fields: Some(fields),
            is_synthetic: false,
            source: self.text(class.span),
            span: class.span,
        })
    }

    fn boxed(&self, meta: &MetaExpr) -> Result<Box<Expr>, SourcerError> {
        Ok(self.expr(meta)?.boxed())
    }

    fn expr(&self, meta: &MetaExpr) -> Result<Expr, SourcerError> {
        let span = meta.span;
        let kind = match &meta.kind {
            MetaKind::Str {
                value,
                ignore_case,
                binary,
            } => ExprKind::Str {
                value: self.literal_bytes(value, *binary, span)?,
                ignore_case: *ignore_case,
                binary: *binary,
                skip_ignored: false,
            },
            MetaKind::Regex {
                pattern,
                ignore_case,
                binary,
            } => ExprKind::Regex {
                pattern: pattern.clone(),
                ignore_case: *ignore_case,
                binary: *binary,
                skip_ignored: false,
            },
            MetaKind::Ref(name) => ExprKind::Ref {
                name: name.clone(),
                binding: Binding::Unresolved,
            },
            MetaKind::Call { func, args } => {
                if BUILTIN_FORMS.contains(&func.as_str()) && !self.rule_names.contains(func) {
                    return self.builtin(func, args, span);
                }
                ExprKind::Call {
                    func: func.clone(),
                    args: args
                        .iter()
                        .map(|arg| {
                            Ok(match arg {
                                MetaArg::Positional(e) => Arg::Positional(self.expr(e)?),
                                MetaArg::Keyword { name, value } => {
                                    Arg::Keyword(name.clone(), self.expr(value)?)
                                }
                            })
                        })
                        .collect::<Result<_, SourcerError>>()?,
                    binding: Binding::Unresolved,
                }
            }
            MetaKind::Sequence(items) => ExprKind::Seq {
                exprs: items
                    .iter()
                    .map(|i| self.expr(i))
                    .collect::<Result<_, _>>()?,
                names: None,
                constructor: None,
            },
            MetaKind::Postfix { expr, op } => {
                let inner = self.boxed(expr)?;
                match op {
                    PostfixOp::Opt => ExprKind::Opt(inner),
                    PostfixOp::Many => ExprKind::List {
                        expr: inner,
                        min_len: None,
                        max_len: None,
                    },
                    PostfixOp::Some => ExprKind::List {
                        expr: inner,
                        min_len: Some(Bound::Const(1)),
                        max_len: None,
                    },
                    PostfixOp::Repeat { min, max } => {
                        let min_len = min.as_ref().map(|b| self.meta_bound(b, span)).transpose()?;
                        let max_len = max.as_ref().map(|b| self.meta_bound(b, span)).transpose()?;
                        self.list(inner, min_len, max_len, span)?
                    }
                }
            }
            MetaKind::Binary { op, left, right } => match op {
                BinaryOp::Choice => {
                    let mut alternatives = Vec::new();
                    for side in [left, right] {
                        match self.expr(side)? {
                            Expr {
                                kind: ExprKind::Choice(inner),
                                ..
                            } => alternatives.extend(inner),
                            other => alternatives.push(other),
                        }
                    }
                    ExprKind::Choice(alternatives)
                }
                BinaryOp::ApplyRight | BinaryOp::ApplyLeft => ExprKind::Apply {
                    left: self.boxed(left)?,
                    right: self.boxed(right)?,
                    apply_left: *op == BinaryOp::ApplyLeft,
                },
                BinaryOp::Sep | BinaryOp::SepTrailer => ExprKind::Sep {
                    expr: self.boxed(left)?,
                    separator: self.boxed(right)?,
                    discard_separators: true,
                    allow_trailer: *op == BinaryOp::SepTrailer,
                    allow_empty: true,
                },
                BinaryOp::KeepLeft | BinaryOp::KeepRight => ExprKind::Discard {
                    left: self.boxed(left)?,
                    right: self.boxed(right)?,
                    discard_left: *op == BinaryOp::KeepRight,
                },
                BinaryOp::Where => ExprKind::Where {
                    expr: self.boxed(left)?,
                    predicate: self.boxed(right)?,
                },
            },
            MetaKind::Let { name, value, body } => ExprKind::Let {
                name: name.clone(),
                value: self.boxed(value)?,
                body: self.boxed(body)?,
            },
            MetaKind::Host(text) => ExprKind::Host(self.snippet(text, span)?),
            MetaKind::Int(n) => ExprKind::Host(HostSnippet::new(
                n.to_string(),
                HostExpr::Literal(Value::Int(*n)),
            )),
        };
        Ok(Expr::new(kind, span))
    }

    fn snippet(&self, text: &str, span: Span) -> Result<HostSnippet, SourcerError> {
        let parsed = host::parse_expr(text).map_err(|e| self.error(e.message(), span))?;
        Ok(HostSnippet::new(text.trim(), parsed))
    }

    fn literal_bytes(&self, value: &str, binary: bool, span: Span) -> Result<Vec<u8>, SourcerError> {
        if !binary {
            return Ok(value.as_bytes().to_vec());
        }
        value
            .chars()
            .map(|c| {
                u8::try_from(u32::from(c))
                    .map_err(|_| self.error(format!("character {c:?} does not fit in a byte literal"), span))
            })
            .collect()
    }

    fn meta_bound(&self, bound: &MetaBound, span: Span) -> Result<Bound, SourcerError> {
        match bound {
            MetaBound::Int(n) => Ok(Bound::Const(*n)),
            MetaBound::Host(text) => Ok(Bound::Host(self.snippet(text, span)?)),
        }
    }

    fn list(
        &self,
        expr: Box<Expr>,
        min_len: Option<Bound>,
        max_len: Option<Bound>,
        span: Span,
    ) -> Result<ExprKind, SourcerError> {
        if let (Some(Bound::Const(min)), Some(Bound::Const(max))) = (&min_len, &max_len) {
            if min > max {
                return Err(self.error(
                    format!("invalid repetition bounds: min_len {min} is greater than max_len {max}"),
                    span,
                ));
            }
        }
        Ok(ExprKind::List {
            expr,
            min_len,
            max_len,
        })
    }

    // ------------------------------------------------------------------
    // Builtin forms
    // ------------------------------------------------------------------

    /// Matches call arguments to parameter names. The first `required`
    /// parameters must be given.
    fn form_args<'m>(
        &self,
        func: &str,
        args: &'m [MetaArg],
        params: &[&str],
        required: usize,
        span: Span,
    ) -> Result<FormArgs<'m>, SourcerError> {
        let mut slots: Vec<Option<&'m MetaExpr>> = vec![None; params.len()];
        let mut next = 0;
        for arg in args {
            let index = match arg {
                MetaArg::Positional(_) => {
                    next += 1;
                    next - 1
                }
                MetaArg::Keyword { name, .. } => params
                    .iter()
                    .position(|p| *p == name.as_str())
                    .ok_or_else(|| self.error(format!("{func}() got an unexpected keyword argument '{name}'"), span))?,
            };
            match slots.get_mut(index) {
                None => {
                    return Err(self.error(
                        format!("{func}() takes at most {} arguments ({} given)", params.len(), args.len()),
                        span,
                    ))
                }
                Some(Some(_)) => {
                    return Err(self.error(
                        format!("{func}() got multiple values for argument '{}'", params[index]),
                        span,
                    ))
                }
                Some(slot) => *slot = Some(arg.expr()),
            }
        }
        if let Some(missing) = slots.iter().take(required).position(Option::is_none) {
            return Err(self.error(
                format!("{func}() is missing required argument '{}'", params[missing]),
                span,
            ));
        }
        Ok(FormArgs { slots })
    }

    fn positional_only<'m>(&self, func: &str, args: &'m [MetaArg], span: Span) -> Result<Vec<&'m MetaExpr>, SourcerError> {
        args.iter()
            .map(|arg| match arg {
                MetaArg::Positional(e) => Ok(e),
                MetaArg::Keyword { name, .. } => {
                    Err(self.error(format!("{func}() got an unexpected keyword argument '{name}'"), span))
                }
            })
            .collect()
    }

    fn flag(&self, meta: Option<&MetaExpr>, default: bool) -> Result<bool, SourcerError> {
        let Some(meta) = meta else {
            return Ok(default);
        };
        match &meta.kind {
            MetaKind::Ref(name) if name == "True" => Ok(true),
            MetaKind::Ref(name) if name == "False" => Ok(false),
            MetaKind::Int(n) => Ok(*n != 0),
            MetaKind::Host(text) => match self.snippet(text, meta.span)?.expr.as_ref() {
                HostExpr::Literal(value) => Ok(value.is_truthy()),
                _ => Err(self.error("expected a constant flag value", meta.span)),
            },
            _ => Err(self.error("expected True or False", meta.span)),
        }
    }

    fn form_bound(&self, meta: Option<&MetaExpr>) -> Result<Option<Bound>, SourcerError> {
        let Some(meta) = meta else {
            return Ok(None);
        };
        match &meta.kind {
            MetaKind::Int(n) => usize::try_from(*n)
                .map(|n| Some(Bound::Const(n)))
                .map_err(|_| self.error(format!("repetition bound {n} is negative"), meta.span)),
            MetaKind::Ref(name) if name == "None" => Ok(None),
            MetaKind::Host(text) => {
                let snippet = self.snippet(text, meta.span)?;
                match snippet.expr.as_ref() {
                    HostExpr::Literal(Value::None) => Ok(None),
                    HostExpr::Literal(Value::Int(n)) if *n >= 0 => Ok(Some(Bound::Const(*n as usize))),
                    _ => Ok(Some(Bound::Host(snippet))),
                }
            }
            _ => Err(self.error("expected an integer or a host expression", meta.span)),
        }
    }

    fn required<'m>(&self, meta: Option<&'m MetaExpr>, span: Span) -> Result<&'m MetaExpr, SourcerError> {
        meta.ok_or_else(|| self.error("missing argument", span))
    }

    fn builtin(&self, func: &str, args: &[MetaArg], span: Span) -> Result<Expr, SourcerError> {
        let kind = match func {
            "Opt" | "Some" | "Expect" | "ExpectNot" => {
                let a = self.form_args(func, args, &["expr"], 1, span)?;
                let inner = self.boxed(self.required(a.get(0), span)?)?;
                match func {
                    "Opt" => ExprKind::Opt(inner),
                    "Some" => ExprKind::List {
                        expr: inner,
                        min_len: Some(Bound::Const(1)),
                        max_len: None,
                    },
                    "Expect" => ExprKind::Expect(inner),
                    _ => ExprKind::ExpectNot(inner),
                }
            }
            "List" => {
                let a = self.form_args(func, args, &["expr", "min_len", "max_len"], 1, span)?;
                let inner = self.boxed(self.required(a.get(0), span)?)?;
                let min_len = self.form_bound(a.get(1))?;
                let max_len = self.form_bound(a.get(2))?;
                self.list(inner, min_len, max_len, span)?
            }
            "Fail" => {
                let a = self.form_args(func, args, &["message"], 0, span)?;
                let message = match a.get(0).map(|m| &m.kind) {
                    None => None,
                    Some(MetaKind::Str {
                        value, binary: false, ..
                    }) => Some(value.clone()),
                    Some(_) => return Err(self.error("Fail() expects a string message", span)),
                };
                ExprKind::Fail(message)
            }
            "Left" | "Right" => {
                let a = self.form_args(func, args, &["left", "right"], 2, span)?;
                ExprKind::Discard {
                    left: self.boxed(self.required(a.get(0), span)?)?,
                    right: self.boxed(self.required(a.get(1), span)?)?,
                    discard_left: func == "Right",
                }
            }
            "Skip" => {
                let exprs = self.positional_only(func, args, span)?;
                if exprs.is_empty() {
                    return Err(self.error("Skip() needs at least one expression", span));
                }
                ExprKind::Skip(exprs.into_iter().map(|e| self.expr(e)).collect::<Result<_, _>>()?)
            }
            "Sep" => {
                let a = self.form_args(
                    func,
                    args,
                    &["expr", "separator", "discard_separators", "allow_trailer", "allow_empty"],
                    2,
                    span,
                )?;
                ExprKind::Sep {
                    expr: self.boxed(self.required(a.get(0), span)?)?,
                    separator: self.boxed(self.required(a.get(1), span)?)?,
                    discard_separators: self.flag(a.get(2), true)?,
                    allow_trailer: self.flag(a.get(3), false)?,
                    allow_empty: self.flag(a.get(4), true)?,
                }
            }
            "OperatorPrecedence" => {
                let parts = self.positional_only(func, args, span)?;
                let Some((atom, levels)) = parts.split_first() else {
                    return Err(self.error("OperatorPrecedence() needs an atom", span));
                };
                ExprKind::OperatorPrecedence {
                    atom: self.boxed(atom)?,
                    rules: levels
                        .iter()
                        .map(|level| self.op_rule(level))
                        .collect::<Result<_, _>>()?,
                }
            }
            other => return Err(self.error(format!("unknown builtin form '{other}'"), span)),
        };
        Ok(Expr::new(kind, span))
    }

    fn op_rule(&self, meta: &MetaExpr) -> Result<OpRule, SourcerError> {
        let MetaKind::Call { func, args } = &meta.kind else {
            return Err(self.error(
                "expected Prefix, Postfix, LeftAssoc, RightAssoc or NonAssoc",
                meta.span,
            ));
        };
        let kind = match func.as_str() {
            "Prefix" => OpKind::Prefix,
            "Postfix" => OpKind::Postfix,
            "LeftAssoc" => OpKind::LeftAssoc,
            "RightAssoc" => OpKind::RightAssoc,
            "NonAssoc" => OpKind::NonAssoc,
            other => return Err(self.error(format!("'{other}' is not an operator rule"), meta.span)),
        };
        let operators = self.positional_only(func, args, meta.span)?;
        let mut lowered = operators
            .into_iter()
            .map(|op| self.expr(op))
            .collect::<Result<Vec<_>, _>>()?;
        let operator = match lowered.len() {
            0 => return Err(self.error(format!("{func}() needs at least one operator"), meta.span)),
            1 => lowered.remove(0),
            _ => Expr::new(ExprKind::Choice(lowered), meta.span),
        };
        Ok(OpRule {
            kind,
            operator: operator.boxed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::to_error_source;
    use crate::syntax;

    fn lower_text(text: &str) -> Result<GrammarTree, SourcerError> {
        let source = to_error_source("grammar", text);
        let form = syntax::parse(text, &source)?;
        lower(form, text, &source)
    }

    fn start_expr(tree: &GrammarTree) -> &Expr {
        &tree
            .definitions
            .iter()
            .find(|d| d.name == "start")
            .unwrap()
            .expr
    }

    #[test]
    fn test_bare_expression_becomes_start() {
        let tree = lower_text(r#""a" | "b""#).unwrap();
        assert_eq!(tree.definitions.len(), 1);
        assert_eq!(tree.definitions[0].name, "start");
        assert!(matches!(&tree.definitions[0].expr.kind, ExprKind::Choice(alts) if alts.len() == 2));
    }

    #[test]
    fn test_choice_chains_flatten() {
        let tree = lower_text(r#"start = "a" | "b" | "c""#).unwrap();
        assert!(matches!(&start_expr(&tree).kind, ExprKind::Choice(alts) if alts.len() == 3));
    }

    #[test]
    fn test_sugar_lowering() {
        let tree = lower_text("start = x /? \",\"\nx = /a/+").unwrap();
        assert!(matches!(
            start_expr(&tree).kind,
            ExprKind::Sep {
                discard_separators: true,
                allow_trailer: true,
                allow_empty: true,
                ..
            }
        ));
        let x = &tree.definitions[1].expr;
        assert!(matches!(
            x.kind,
            ExprKind::List {
                min_len: Some(Bound::Const(1)),
                max_len: None,
                ..
            }
        ));
    }

    #[test]
    fn test_builtin_forms() {
        let tree = lower_text(
            "start = OperatorPrecedence(int, Prefix(\"-\"), LeftAssoc(\"+\", \"-\"))\nint = /[0-9]+/",
        )
        .unwrap();
        let ExprKind::OperatorPrecedence { rules, .. } = &start_expr(&tree).kind else {
            panic!("expected an operator precedence node");
        };
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].kind, OpKind::Prefix);
        assert!(matches!(rules[1].operator.kind, ExprKind::Choice(_)));

        let tree = lower_text("start = Sep(/a/, \",\", discard_separators=False)").unwrap();
        assert!(matches!(
            start_expr(&tree).kind,
            ExprKind::Sep {
                discard_separators: false,
                allow_empty: true,
                ..
            }
        ));
    }

    #[test]
    fn test_user_rule_shadows_builtin_form() {
        let tree = lower_text("start = Opt(\"a\")\nOpt(x) = x").unwrap();
        assert!(matches!(start_expr(&tree).kind, ExprKind::Call { .. }));
    }

    #[test]
    fn test_ignored_rules_get_skip_rule() {
        let tree = lower_text("ignored space = /\\s+/\nstart = \"a\"").unwrap();
        let skip = tree.definitions.last().unwrap();
        assert_eq!(skip.name, IGNORED_RULE);
        assert!(skip.is_synthetic);
        assert!(matches!(&skip.expr.kind, ExprKind::Skip(refs) if refs.len() == 1));
    }

    #[test]
    fn test_ignored_start_is_rejected() {
        let err = lower_text("ignored start = /\\s+/").unwrap_err();
        assert!(err.message().contains("cannot be ignored"));
    }

    #[test]
    fn test_bad_bounds_are_rejected() {
        let err = lower_text("start = \"a\"{3,1}").unwrap_err();
        assert!(err.message().contains("invalid repetition bounds"));
        assert!(lower_text("start = List(\"a\", min_len=2, max_len=1)").is_err());
    }

    #[test]
    fn test_class_becomes_constructor_seq() {
        let tree = lower_text("class Pair { a: /a/  b: /b/ }").unwrap();
        let def = &tree.definitions[0];
        assert!(def.is_class());
        assert!(matches!(
            &def.expr.kind,
            ExprKind::Seq { constructor: Some(c), names: Some(n), .. } if c == "Pair" && n.len() == 2
        ));
    }
}
