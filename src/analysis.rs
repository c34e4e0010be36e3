//! Static Analysis
//!
//! Passes that run over the lowered grammar before code generation, in order:
//!
//! 1. `check_names`: rule names are well formed and unique, and so are the
//!    parameters and fields of each rule.
//! 2. `apply_ignored`: when the grammar has ignored rules, literals in the
//!    other rules skip ignored content after matching, and the start rule
//!    skips it up front.
//! 3. `assign_ids`: every expression gets a unique ID.
//! 4. `mark_local_references`: names bound by `let`, rule parameters and
//!    earlier class fields become locals; host snippets learn which locals
//!    they capture.
//! 5. `resolve_references`: the remaining names are bound to rule functions,
//!    with arity checks and keyword arguments put in parameter order.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::ast::Span;
use crate::diagnostics::SourceArc;
use crate::expr::compile::IGNORED_RULE;
use crate::expr::{impl_name, Arg, Binding, Bound, Definition, Expr, ExprKind, GrammarTree, HostSnippet};
use crate::host::builtins::is_builtin;
use crate::{err_ctx, SourcerError};

static RULE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").unwrap());

/// Names every host snippet may use besides its locals.
const OPERATOR_CLASSES: &[&str] = &["Infix", "Prefix", "Postfix"];

/// Runs all passes in order.
pub fn analyze(tree: GrammarTree, host_fns: &[String], source: &SourceArc) -> Result<GrammarTree, SourcerError> {
    check_names(&tree, source)?;
    let mut tree = apply_ignored(tree);
    let count = assign_ids(&mut tree);
    log::debug!("assigned {} expression ids", count);
    mark_local_references(&mut tree, host_fns, source)?;
    resolve_references(&mut tree, source)?;
    Ok(tree)
}

fn error(source: &SourceArc, message: impl std::fmt::Display, span: Span) -> SourcerError {
    err_ctx!(Grammar, message, source, span)
}

// ============================================================================
// NAMES
// ============================================================================

pub fn check_names(tree: &GrammarTree, source: &SourceArc) -> Result<(), SourcerError> {
    let mut seen = HashSet::new();
    for def in &tree.definitions {
        if !def.is_synthetic && !RULE_NAME.is_match(&def.name) {
            let message = if def.name.starts_with('_') {
                format!("rule names cannot start with an underscore: '{}'", def.name)
            } else {
                format!("invalid rule name '{}'", def.name)
            };
            return Err(error(source, message, def.span));
        }
        if !seen.insert(def.name.as_str()) {
            return Err(error(source, format!("duplicate rule name '{}'", def.name), def.span));
        }
        let mut locals = HashSet::new();
        for name in def.params.iter().flatten().chain(def.class_fields.iter().flatten()) {
            if !locals.insert(name.as_str()) {
                return Err(error(
                    source,
                    format!("duplicate parameter or field '{}' in '{}'", name, def.name),
                    def.span,
                ));
            }
        }
    }
    Ok(())
}

// ============================================================================
// IGNORED CONTENT
// ============================================================================

/// Returns the tree with ignored-content skipping woven in. Grammars without
/// ignored rules come back unchanged.
pub fn apply_ignored(tree: GrammarTree) -> GrammarTree {
    let has_ignored = tree
        .definitions
        .iter()
        .any(|d| d.is_synthetic && d.name == IGNORED_RULE);
    if !has_ignored {
        return tree;
    }
    let definitions = tree
        .definitions
        .into_iter()
        .map(|def| {
            if def.is_ignored || def.is_synthetic {
                return def;
            }
            let mut def = def;
            mark_skip_ignored(&mut def.expr);
            if is_start_rule(&def) {
                let span = def.expr.span;
                let skip = Expr::new(
                    ExprKind::Ref {
                        name: IGNORED_RULE.to_string(),
                        binding: Binding::Unresolved,
                    },
                    span,
                );
                let body = std::mem::replace(&mut def.expr, Expr::new(ExprKind::Fail(None), span));
                def.expr = Expr::new(
                    ExprKind::Discard {
                        left: skip.boxed(),
                        right: body.boxed(),
                        discard_left: true,
                    },
                    span,
                );
            }
            def
        })
        .collect();
    GrammarTree {
        definitions,
        sections: tree.sections,
    }
}

fn is_start_rule(def: &Definition) -> bool {
    def.name.eq_ignore_ascii_case("start") && !def.is_class() && def.params.is_none()
}

fn mark_skip_ignored(expr: &mut Expr) {
    match &mut expr.kind {
        ExprKind::Str { skip_ignored, .. } | ExprKind::Regex { skip_ignored, .. } => *skip_ignored = true,
        _ => expr.children_mut().into_iter().for_each(mark_skip_ignored),
    }
}

// ============================================================================
// IDS
// ============================================================================

/// Numbers every expression, starting at 1. Returns how many were numbered.
pub fn assign_ids(tree: &mut GrammarTree) -> usize {
    fn walk(expr: &mut Expr, next: &mut usize) {
        *next += 1;
        expr.id = *next;
        for child in expr.children_mut() {
            walk(child, next);
        }
    }
    let mut next = 0;
    for def in &mut tree.definitions {
        walk(&mut def.expr, &mut next);
    }
    next
}

// ============================================================================
// LOCALS
// ============================================================================

struct Scopes<'a> {
    rules: HashSet<String>,
    globals: HashSet<String>,
    source: &'a SourceArc,
}

pub fn mark_local_references(
    tree: &mut GrammarTree,
    host_fns: &[String],
    source: &SourceArc,
) -> Result<(), SourcerError> {
    let mut globals: HashSet<String> = host_fns.iter().cloned().collect();
    globals.extend(OPERATOR_CLASSES.iter().map(|s| s.to_string()));
    globals.extend(
        tree.definitions
            .iter()
            .filter(|d| d.is_class())
            .map(|d| d.name.clone()),
    );
    globals.extend(
        tree.sections
            .iter()
            .flat_map(|s| s.assignments.iter().map(|a| a.name.clone())),
    );
    let scopes = Scopes {
        rules: tree.definitions.iter().map(|d| d.name.clone()).collect(),
        globals,
        source,
    };

    for def in &mut tree.definitions {
        let mut scope: Vec<String> = def.params.clone().unwrap_or_default();
        scopes.mark(&mut def.expr, &mut scope)?;
    }
    Ok(())
}

impl Scopes<'_> {
    fn mark(&self, expr: &mut Expr, scope: &mut Vec<String>) -> Result<(), SourcerError> {
        let span = expr.span;
        match &mut expr.kind {
            ExprKind::Ref { name, binding } => {
                if scope.contains(name) {
                    *binding = Binding::Local;
                } else if !self.rules.contains(name) {
                    return Err(error(self.source, format!("undefined rule '{name}'"), span));
                }
                Ok(())
            }
            ExprKind::Host(snippet) => self.mark_snippet(snippet, scope, span),
            ExprKind::List {
                expr: item,
                min_len,
                max_len,
            } => {
                self.mark(item, scope)?;
                for bound in [min_len, max_len] {
                    if let Some(Bound::Host(snippet)) = bound {
                        self.mark_snippet(snippet, scope, span)?;
                    }
                }
                Ok(())
            }
            ExprKind::Seq { exprs, names, .. } => {
                let depth = scope.len();
                for (i, item) in exprs.iter_mut().enumerate() {
                    self.mark(item, scope)?;
                    if let Some(name) = names.as_ref().and_then(|n| n.get(i)) {
                        scope.push(name.clone());
                    }
                }
                scope.truncate(depth);
                Ok(())
            }
            ExprKind::Let { name, value, body } => {
                self.mark(value, scope)?;
                scope.push(name.clone());
                let marked = self.mark(body, scope);
                scope.pop();
                marked
            }
            ExprKind::Call { func, .. } if scope.contains(func) => Err(error(
                self.source,
                format!("'{func}' is a local and cannot be called with arguments"),
                span,
            )),
            _ => {
                for child in expr.children_mut() {
                    self.mark(child, scope)?;
                }
                Ok(())
            }
        }
    }

    fn mark_snippet(&self, snippet: &mut HostSnippet, scope: &[String], span: Span) -> Result<(), SourcerError> {
        let mut locals = Vec::new();
        for name in snippet.expr.free_names() {
            if scope.contains(&name) {
                locals.push(name);
            } else if !self.globals.contains(&name) && !is_builtin(&name) {
                return Err(error(
                    self.source,
                    format!("undefined name '{}' in host expression `{}`", name, snippet.source),
                    span,
                ));
            }
        }
        snippet.locals = locals;
        Ok(())
    }
}

// ============================================================================
// RULE REFERENCES
// ============================================================================

pub fn resolve_references(tree: &mut GrammarTree, source: &SourceArc) -> Result<(), SourcerError> {
    let rules: HashMap<String, Vec<String>> = tree
        .definitions
        .iter()
        .map(|d| (d.name.clone(), d.params.clone().unwrap_or_default()))
        .collect();
    for def in &mut tree.definitions {
        resolve(&mut def.expr, &rules, source)?;
    }
    Ok(())
}

fn resolve(expr: &mut Expr, rules: &HashMap<String, Vec<String>>, source: &SourceArc) -> Result<(), SourcerError> {
    for child in expr.children_mut() {
        resolve(child, rules, source)?;
    }
    let span = expr.span;
    match &mut expr.kind {
        ExprKind::Ref { name, binding } if *binding == Binding::Unresolved => {
            let params = rules
                .get(name.as_str())
                .ok_or_else(|| error(source, format!("undefined rule '{name}'"), span))?;
            if !params.is_empty() {
                return Err(error(
                    source,
                    format!("rule '{}' takes {} arguments but was used without any", name, params.len()),
                    span,
                ));
            }
            *binding = Binding::Rule(impl_name(name));
        }
        ExprKind::Call { func, args, binding } => {
            let params = rules
                .get(func.as_str())
                .ok_or_else(|| error(source, format!("undefined rule '{func}'"), span))?;
            let mut slots: Vec<Option<Expr>> = vec![None; params.len()];
            let mut next = 0;
            for arg in std::mem::take(args) {
                let (index, expr) = match arg {
                    Arg::Positional(expr) => {
                        next += 1;
                        (next - 1, expr)
                    }
                    Arg::Keyword(name, expr) => {
                        let index = params.iter().position(|p| *p == name).ok_or_else(|| {
                            error(source, format!("{func}() got an unexpected keyword argument '{name}'"), span)
                        })?;
                        (index, expr)
                    }
                };
                match slots.get_mut(index) {
                    None => {
                        return Err(error(
                            source,
                            format!("{}() takes {} arguments", func, params.len()),
                            span,
                        ))
                    }
                    Some(Some(_)) => {
                        return Err(error(
                            source,
                            format!("{}() got multiple values for argument '{}'", func, params[index]),
                            span,
                        ))
                    }
                    Some(slot) => *slot = Some(expr),
                }
            }
            *args = slots
                .into_iter()
                .zip(params)
                .map(|(slot, param)| {
                    slot.map(Arg::Positional).ok_or_else(|| {
                        error(source, format!("{func}() is missing argument '{param}'"), span)
                    })
                })
                .collect::<Result<_, _>>()?;
            *binding = Binding::Rule(impl_name(func));
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::to_error_source;
    use crate::{lowering, syntax};

    fn analyze_text(text: &str) -> Result<GrammarTree, SourcerError> {
        let source = to_error_source("grammar", text);
        let form = syntax::parse(text, &source)?;
        let tree = lowering::lower(form, text, &source)?;
        analyze(tree, &[], &source)
    }

    fn definition<'t>(tree: &'t GrammarTree, name: &str) -> &'t Definition {
        tree.definitions.iter().find(|d| d.name == name).unwrap()
    }

    #[test]
    fn test_duplicate_rule_names() {
        let err = analyze_text("a = \"x\"\na = \"y\"").unwrap_err();
        assert!(err.message().contains("duplicate rule name 'a'"));
    }

    #[test]
    fn test_underscore_names_are_rejected() {
        let err = analyze_text("_a = \"x\"").unwrap_err();
        assert!(err.message().contains("underscore"));
    }

    #[test]
    fn test_undefined_names() {
        assert!(analyze_text("start = nope").is_err());
        assert!(analyze_text("start = /a/ |> `nope`").is_err());
        assert!(analyze_text("start = /a/ |> `int`").is_ok());
    }

    #[test]
    fn test_ignored_marks_literals_and_wraps_start() {
        let tree = analyze_text("ignored space = /\\s+/\nstart = \"a\"").unwrap();
        let start = definition(&tree, "start");
        let ExprKind::Discard {
            left,
            right,
            discard_left: true,
        } = &start.expr.kind
        else {
            panic!("start should skip leading ignored content");
        };
        assert!(matches!(&left.kind, ExprKind::Ref { name, .. } if name == IGNORED_RULE));
        assert!(matches!(right.kind, ExprKind::Str { skip_ignored: true, .. }));

        let space = definition(&tree, "space");
        assert!(matches!(space.expr.kind, ExprKind::Regex { skip_ignored: false, .. }));
    }

    #[test]
    fn test_ids_are_unique() {
        let tree = analyze_text("start = [\"a\", \"b\"?, x]\nx = \"c\" | \"d\"").unwrap();
        fn collect(expr: &Expr, out: &mut Vec<usize>) {
            out.push(expr.id);
            expr.children().into_iter().for_each(|c| collect(c, out));
        }
        let mut ids = Vec::new();
        tree.definitions.iter().for_each(|d| collect(&d.expr, &mut ids));
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
        assert!(!ids.contains(&0));
    }

    #[test]
    fn test_locals_and_captures() {
        let tree = analyze_text("class P { a: /[0-9]+/  b: /x/ |> `lambda s: a + s` }").unwrap();
        let ExprKind::Seq { exprs, .. } = &definition(&tree, "P").expr.kind else {
            panic!("class body should be a sequence");
        };
        let ExprKind::Apply { right, .. } = &exprs[1].kind else {
            panic!("second field should be an apply");
        };
        let ExprKind::Host(snippet) = &right.kind else {
            panic!("expected a host snippet");
        };
        assert_eq!(snippet.locals, vec!["a".to_string()]);
    }

    #[test]
    fn test_keyword_arguments_are_ordered() {
        let tree = analyze_text("start = pair(right=/b/, left=/a/)\npair(left, right) = [left, right]").unwrap();
        let ExprKind::Call { args, binding, .. } = &definition(&tree, "start").expr.kind else {
            panic!("expected a call");
        };
        assert_eq!(*binding, Binding::Rule("_try_pair".to_string()));
        assert!(matches!(&args[0], Arg::Positional(e) if e.to_string() == "/a/"));
    }

    #[test]
    fn test_arity_errors() {
        assert!(analyze_text("start = pair(/a/)\npair(l, r) = [l, r]").is_err());
        assert!(analyze_text("start = pair\npair(l, r) = [l, r]").is_err());
        assert!(analyze_text("start(x) = x(/a/)").is_err());
    }
}
