//! Expression Compilation
//!
//! Turns analyzed parsing expressions into parser functions. Every compiled
//! form leaves STATUS, RESULT and POS consistent with its success contract:
//! on success RESULT holds the produced value and POS sits past the consumed
//! input; on failure RESULT holds an error marker and POS marks where the
//! failure happened, so enclosing choices can pick the farthest one.
//!
//! When an expression needs more nested blocks than the current function has
//! left, it is functionalized: compiled into a function of its own whose
//! parameters are its free locals, and replaced by a call.

use crate::emit::builder::EmitResult;
use crate::emit::{
    BoundRef, Callee, Cond, Emitter, Expectation, FnId, HostSection, Instr, Label, Operand,
    Program, RuleEntry, Var,
};
use crate::expr::{impl_name, Binding, Bound, Expr, ExprKind, GrammarTree, HostSnippet, OpKind, OpRule};
use crate::options::GrammarOptions;
use crate::value::Value;
use crate::{err_msg, SourcerError};

/// Name of the synthetic rule that skips ignored content.
pub const IGNORED_RULE: &str = "_ignored";

// ============================================================================
// PROGRAM GENERATION
// ============================================================================

/// Emits the parser program for an analyzed grammar tree.
pub fn generate(tree: &GrammarTree, options: &GrammarOptions) -> Result<Program, SourcerError> {
    let mut e = Emitter::new(options.max_blocks);

    let mut entries = Vec::with_capacity(tree.definitions.len());
    for def in &tree.definitions {
        let func = e.reserve_rule(&def.name);
        if let Some(fields) = &def.class_fields {
            e.class(&def.name, fields);
        }
        entries.push(RuleEntry {
            name: def.name.clone(),
            func,
            params: def.params.clone(),
            definition: def.source.clone(),
            is_class: def.is_class(),
            is_ignored: def.is_ignored,
            is_synthetic: def.is_synthetic,
        });
    }

    for (def, entry) in tree.definitions.iter().zip(&entries) {
        e.set_current_rule(&def.name);
        let params = def.params.clone().unwrap_or_default();
        e.define(entry.func, def.impl_name(), params, |e| compile(&def.expr, e))?;
    }

    let program = e.program_mut();
    program.rules = entries;
    program.sections = tree
        .sections
        .iter()
        .map(|s| HostSection {
            source: s.source.clone(),
            assignments: s.assignments.clone(),
        })
        .collect();
    e.finish()
}

// ============================================================================
// COMPILATION
// ============================================================================

/// Compiles an expression into the current function, functionalizing it
/// first when its blocks no longer fit.
pub fn compile(expr: &Expr, e: &mut Emitter) -> EmitResult {
    if expr.num_blocks() > e.blocks_left() {
        return functionalize(expr, e);
    }
    compile_inner(expr, e)
}

fn functionalize(expr: &Expr, e: &mut Emitter) -> EmitResult {
    let params: Vec<String> = expr.freevars().into_iter().collect();
    let args = lookup_all(&params, e)?;
    log::trace!(
        "functionalizing expression {} ({} blocks, {} left)",
        expr.id,
        expr.num_blocks(),
        e.blocks_left()
    );
    let id = e.define_new(format!("_parse_function_{}", expr.id), params, |e| {
        compile_inner(expr, e)
    })?;
    e.emit(Instr::Call {
        callee: Callee::Func(id),
        args,
    })
}

fn lookup_all(names: &[String], e: &mut Emitter) -> EmitResult<Vec<Var>> {
    names.iter().map(|name| e.lookup(name)).collect()
}

fn store_result(e: &mut Emitter) -> EmitResult<Var> {
    let var = e.var()?;
    e.emit(Instr::Store(var, Operand::Result))?;
    Ok(var)
}

fn checkpoint(e: &mut Emitter) -> EmitResult<Var> {
    let var = e.var()?;
    e.emit(Instr::Store(var, Operand::Pos))?;
    Ok(var)
}

fn succeed_with(e: &mut Emitter, value: Operand) -> EmitResult {
    e.emit(Instr::Load(value))?;
    e.emit(Instr::SetStatus(true))
}

fn compile_inner(expr: &Expr, e: &mut Emitter) -> EmitResult {
    match &expr.kind {
        ExprKind::Str {
            value,
            ignore_case,
            binary,
            skip_ignored,
        } => {
            let text = literal_text(value, *binary);
            let error = e.error(expr.to_string(), Expectation::Str(text.clone()));
            if *ignore_case {
                let pattern = escape_literal(value, *binary);
                let regex = e.regex(&pattern, true, *binary)?;
                e.emit(Instr::MatchRegex { regex, error })?;
            } else {
                let literal = e.literal(value);
                e.emit(Instr::MatchLiteral { literal, error })?;
            }
            if *skip_ignored {
                skip_ignored_content(e)?;
            }
            Ok(())
        }

        ExprKind::Regex {
            pattern,
            ignore_case,
            binary,
            skip_ignored,
        } => {
            let regex = e.regex(pattern, *ignore_case, *binary)?;
            let error = e.error(expr.to_string(), Expectation::Regex(pattern.clone()));
            e.emit(Instr::MatchRegex { regex, error })?;
            if *skip_ignored {
                skip_ignored_content(e)?;
            }
            Ok(())
        }

        ExprKind::Ref { name, binding } => {
            let callee = match binding {
                Binding::Local => Callee::Local(e.lookup(name)?),
                Binding::Rule(imp) => Callee::Func(e.rule_fn(imp)?),
                Binding::Unresolved => return Err(unresolved(name)),
            };
            e.emit(Instr::Call {
                callee,
                args: Vec::new(),
            })
        }

        ExprKind::Call { func, args, binding } => {
            let Binding::Rule(imp) = binding else {
                return Err(unresolved(func));
            };
            let id = e.rule_fn(imp)?;
            let vars = args
                .iter()
                .map(|arg| argumentize(arg.expr(), e))
                .collect::<Result<Vec<_>, _>>()?;
            e.emit(Instr::Call {
                callee: Callee::Func(id),
                args: vars,
            })
        }

        ExprKind::Seq {
            exprs,
            names,
            constructor,
        } => {
            let class = constructor
                .as_ref()
                .map(|c| e.class(c, names.as_deref().unwrap_or_default()));
            e.block(|e, exit| {
                let start = match class {
                    Some(_) => Some(checkpoint(e)?),
                    None => None,
                };
                e.push_scope()?;
                let mut items = Vec::with_capacity(exprs.len());
                for (i, item) in exprs.iter().enumerate() {
                    compile(item, e)?;
                    e.emit(Instr::Branch {
                        cond: Cond::NotStatus,
                        target: exit,
                    })?;
                    let var = store_result(e)?;
                    if let Some(name) = names.as_ref().and_then(|n| n.get(i)) {
                        e.bind(name, var)?;
                    }
                    items.push(var);
                }
                e.pop_scope()?;
                match (class, start) {
                    (Some(class), Some(start)) => e.emit(Instr::MakeNode {
                        class,
                        fields: items,
                        start,
                    })?,
                    _ => e.emit(Instr::MakeList(items))?,
                }
                e.emit(Instr::SetStatus(true))
            })
        }

        ExprKind::Choice(alternatives) => {
            if let [only] = alternatives.as_slice() {
                return compile(only, e);
            }
            let backtrack = checkpoint(e)?;
            let far_pos = e.var()?;
            e.emit(Instr::Store(far_pos, Operand::Const(Value::Int(-1))))?;
            let far_err = e.var()?;
            e.emit(Instr::Store(far_err, Operand::Const(Value::None)))?;
            e.block(|e, exit| {
                for (i, alt) in alternatives.iter().enumerate() {
                    if i > 0 {
                        e.emit(Instr::RestorePos(backtrack))?;
                    }
                    compile(alt, e)?;
                    if alt.always_succeeds() {
                        return e.emit(Instr::Jump(exit));
                    }
                    e.emit(Instr::Branch {
                        cond: Cond::Status,
                        target: exit,
                    })?;
                    // A bare Fail only takes over at a strictly later position.
                    let farther = if alt.is_fail() {
                        Cond::PosGt(far_pos)
                    } else {
                        Cond::PosGe(far_pos)
                    };
                    e.if_(farther, |e| {
                        e.emit(Instr::Store(far_pos, Operand::Pos))?;
                        e.emit(Instr::Store(far_err, Operand::Result))
                    })?;
                }
                e.emit(Instr::RestorePos(far_pos))?;
                e.emit(Instr::Load(Operand::Var(far_err)))?;
                e.emit(Instr::SetStatus(false))
            })
        }

        ExprKind::List {
            expr: item,
            min_len,
            max_len,
        } => {
            let staging = e.var()?;
            e.emit(Instr::NewList(staging))?;
            let unexpected = e.error(expr.to_string(), Expectation::Unexpected);
            let err = e.var()?;
            e.emit(Instr::Store(err, Operand::Const(Value::Error(unexpected))))?;
            let err_pos = checkpoint(e)?;
            let min = bound_ref(min_len.as_ref(), e)?;
            let max = bound_ref(max_len.as_ref(), e)?;

            e.loop_(|e, labels| {
                if let Some(max) = max {
                    e.emit(Instr::Branch {
                        cond: Cond::LenGe(staging, max),
                        target: labels.exit,
                    })?;
                }
                let cp = checkpoint(e)?;
                compile(item, e)?;
                e.if_(Cond::NotStatus, |e| {
                    e.emit(Instr::Store(err, Operand::Result))?;
                    e.emit(Instr::Store(err_pos, Operand::Pos))?;
                    e.emit(Instr::RestorePos(cp))?;
                    e.emit(Instr::Jump(labels.exit))
                })?;
                e.emit(Instr::Push {
                    list: staging,
                    value: Operand::Result,
                })?;
                e.emit(Instr::Branch {
                    cond: Cond::PosEq(cp),
                    target: labels.exit,
                })
            })?;

            match min {
                Some(min) => e.if_else(
                    Cond::LenLt(staging, min),
                    |e| {
                        e.emit(Instr::RestorePos(err_pos))?;
                        e.emit(Instr::Load(Operand::Var(err)))?;
                        e.emit(Instr::SetStatus(false))
                    },
                    |e| succeed_with(e, Operand::Var(staging)),
                ),
                None => succeed_with(e, Operand::Var(staging)),
            }
        }

        ExprKind::Sep {
            expr: item,
            separator,
            discard_separators,
            allow_trailer,
            allow_empty,
        } => {
            let keep_separators = !*discard_separators;
            let staging = e.var()?;
            e.emit(Instr::NewList(staging))?;
            e.block(|e, exit| {
                let first = checkpoint(e)?;
                compile(item, e)?;
                e.if_(Cond::NotStatus, |e| {
                    if *allow_empty {
                        e.emit(Instr::RestorePos(first))?;
                        succeed_with(e, Operand::Const(Value::list(Vec::new())))?;
                    }
                    e.emit(Instr::Jump(exit))
                })?;
                e.emit(Instr::Push {
                    list: staging,
                    value: Operand::Result,
                })?;

                e.loop_(|e, labels| {
                    let cp = checkpoint(e)?;
                    compile(separator, e)?;
                    e.if_(Cond::NotStatus, |e| {
                        e.emit(Instr::RestorePos(cp))?;
                        e.emit(Instr::Jump(labels.exit))
                    })?;
                    if keep_separators {
                        e.emit(Instr::Push {
                            list: staging,
                            value: Operand::Result,
                        })?;
                    }
                    if *allow_trailer {
                        e.emit(Instr::Store(cp, Operand::Pos))?;
                    }
                    compile(item, e)?;
                    e.if_(Cond::NotStatus, |e| {
                        if keep_separators && !*allow_trailer {
                            e.emit(Instr::Pop(staging))?;
                        }
                        e.emit(Instr::RestorePos(cp))?;
                        e.emit(Instr::Jump(labels.exit))
                    })?;
                    e.emit(Instr::Push {
                        list: staging,
                        value: Operand::Result,
                    })?;
                    e.emit(Instr::Branch {
                        cond: Cond::PosEq(cp),
                        target: labels.exit,
                    })
                })?;
                succeed_with(e, Operand::Var(staging))
            })
        }

        ExprKind::Opt(inner) => {
            let cp = checkpoint(e)?;
            e.block(|e, _| compile(inner, e))?;
            e.if_(Cond::NotStatus, |e| {
                e.emit(Instr::RestorePos(cp))?;
                succeed_with(e, Operand::Const(Value::None))
            })
        }

        ExprKind::Apply {
            left,
            right,
            apply_left,
        } => e.block(|e, exit| {
            compile(left, e)?;
            e.emit(Instr::Branch {
                cond: Cond::NotStatus,
                target: exit,
            })?;
            let a = store_result(e)?;
            compile(right, e)?;
            e.emit(Instr::Branch {
                cond: Cond::NotStatus,
                target: exit,
            })?;
            let b = store_result(e)?;
            let (func, arg) = if *apply_left { (a, b) } else { (b, a) };
            e.emit(Instr::Apply { func, arg })
        }),

        ExprKind::Discard {
            left,
            right,
            discard_left,
        } => e.block(|e, exit| {
            compile(left, e)?;
            e.emit(Instr::Branch {
                cond: Cond::NotStatus,
                target: exit,
            })?;
            let kept = if *discard_left {
                None
            } else {
                Some(store_result(e)?)
            };
            compile(right, e)?;
            if let Some(kept) = kept {
                e.emit(Instr::Branch {
                    cond: Cond::NotStatus,
                    target: exit,
                })?;
                e.emit(Instr::Load(Operand::Var(kept)))?;
            }
            Ok(())
        }),

        ExprKind::Expect(inner) => {
            let cp = checkpoint(e)?;
            e.block(|e, _| compile(inner, e))?;
            e.emit(Instr::RestorePos(cp))
        }

        ExprKind::ExpectNot(inner) => {
            let cp = checkpoint(e)?;
            e.block(|e, _| compile(inner, e))?;
            e.emit(Instr::RestorePos(cp))?;
            let error = e.error(expr.to_string(), Expectation::NotExpected(inner.to_string()));
            e.if_else(
                Cond::Status,
                |e| e.emit(Instr::Fail(error)),
                |e| succeed_with(e, Operand::Const(Value::None)),
            )
        }

        ExprKind::Fail(message) => {
            let text = message.clone().unwrap_or_else(|| "Failed".to_string());
            let error = e.error(expr.to_string(), Expectation::Message(text));
            e.emit(Instr::Fail(error))
        }

        ExprKind::Let { name, value, body } => e.block(|e, exit| {
            compile(value, e)?;
            e.emit(Instr::Branch {
                cond: Cond::NotStatus,
                target: exit,
            })?;
            let var = store_result(e)?;
            e.push_scope()?;
            e.bind(name, var)?;
            compile(body, e)?;
            e.pop_scope()
        }),

        ExprKind::Where { expr: inner, predicate } => {
            let source = match &predicate.kind {
                ExprKind::Host(snippet) => snippet.source.trim().to_string(),
                _ => predicate.to_string(),
            };
            let error = e.error(expr.to_string(), Expectation::Predicate(source));
            e.block(|e, exit| {
                compile(inner, e)?;
                e.emit(Instr::Branch {
                    cond: Cond::NotStatus,
                    target: exit,
                })?;
                let arg = store_result(e)?;
                compile(predicate, e)?;
                e.emit(Instr::Branch {
                    cond: Cond::NotStatus,
                    target: exit,
                })?;
                let func = store_result(e)?;
                e.emit(Instr::Test { func, arg, error })
            })
        }

        ExprKind::Skip(exprs) => {
            e.loop_(|e, labels| {
                for item in exprs {
                    let cp = checkpoint(e)?;
                    compile(item, e)?;
                    e.if_else(
                        Cond::Status,
                        |e| {
                            e.emit(Instr::Branch {
                                cond: Cond::PosNe(cp),
                                target: labels.top,
                            })
                        },
                        |e| e.emit(Instr::RestorePos(cp)),
                    )?;
                }
                e.emit(Instr::Jump(labels.exit))
            })?;
            succeed_with(e, Operand::Const(Value::None))
        }

        ExprKind::Host(snippet) => eval_snippet(snippet, e),

        ExprKind::OperatorPrecedence { atom, rules } => {
            let params: Vec<String> = expr.freevars().into_iter().collect();
            let args = lookup_all(&params, e)?;
            let mut operand = e.define_new(format!("_operator_atom_{}", expr.id), params.clone(), |e| {
                compile(atom, e)
            })?;
            for (level, rule) in rules.iter().enumerate() {
                let below = operand;
                let arity = params.len();
                operand = e.define_new(
                    format!("_operator_level_{}_{}", expr.id, level),
                    params.clone(),
                    |e| compile_level(rule, below, arity, e),
                )?;
            }
            e.emit(Instr::Call {
                callee: Callee::Func(operand),
                args,
            })
        }
    }
}

fn unresolved(name: &str) -> SourcerError {
    err_msg!(Internal, "reference to '{}' was never resolved", name)
}

// ============================================================================
// HELPERS
// ============================================================================

/// After a literal matched, consume any ignored content that follows it.
fn skip_ignored_content(e: &mut Emitter) -> EmitResult {
    let skipper = e.rule_fn(&impl_name(IGNORED_RULE))?;
    e.if_(Cond::Status, |e| {
        let matched = store_result(e)?;
        e.emit(Instr::Call {
            callee: Callee::Func(skipper),
            args: Vec::new(),
        })?;
        succeed_with(e, Operand::Var(matched))
    })
}

fn eval_snippet(snippet: &HostSnippet, e: &mut Emitter) -> EmitResult {
    let captures = lookup_all(&snippet.locals, e)?;
    let host = e.host(&snippet.source, snippet.expr.clone(), snippet.locals.clone());
    e.emit(Instr::Eval { host, captures })
}

fn bound_ref(bound: Option<&Bound>, e: &mut Emitter) -> EmitResult<Option<BoundRef>> {
    Ok(match bound {
        None => None,
        Some(Bound::Const(n)) => Some(BoundRef::Const(*n)),
        Some(Bound::Host(snippet)) => {
            eval_snippet(snippet, e)?;
            Some(BoundRef::Var(store_result(e)?))
        }
    })
}

/// Puts an argument of a parameterized rule call into a local. Parsing
/// arguments become parser values; host snippets are evaluated in place.
fn argumentize(expr: &Expr, e: &mut Emitter) -> EmitResult<Var> {
    match &expr.kind {
        ExprKind::Ref {
            name,
            binding: Binding::Local,
        } => e.lookup(name),
        ExprKind::Ref {
            binding: Binding::Rule(imp),
            ..
        } => {
            let func = e.rule_fn(imp)?;
            e.emit(Instr::MakeParser {
                func,
                captures: Vec::new(),
            })?;
            store_result(e)
        }
        ExprKind::Host(snippet) => {
            eval_snippet(snippet, e)?;
            store_result(e)
        }
        _ => {
            let params: Vec<String> = expr.freevars().into_iter().collect();
            let captures = lookup_all(&params, e)?;
            let func = e.define_new(format!("_parse_function_{}", expr.id), params, |e| {
                compile_inner(expr, e)
            })?;
            e.emit(Instr::MakeParser { func, captures })?;
            store_result(e)
        }
    }
}

/// Calls the level below with this level's own parameters passed through.
fn call_operand(operand: FnId, arity: usize, e: &mut Emitter) -> EmitResult {
    e.emit(Instr::Call {
        callee: Callee::Func(operand),
        args: (0..arity).map(Var).collect(),
    })
}

/// Body of one precedence level function.
fn compile_level(rule: &OpRule, operand: FnId, arity: usize, e: &mut Emitter) -> EmitResult {
    let operator = rule.operator.as_ref();
    match rule.kind {
        OpKind::Prefix => {
            let ops = e.var()?;
            e.emit(Instr::NewList(ops))?;
            e.loop_(|e, labels| {
                let cp = checkpoint(e)?;
                compile(operator, e)?;
                e.if_(Cond::NotStatus, |e| {
                    e.emit(Instr::RestorePos(cp))?;
                    e.emit(Instr::Jump(labels.exit))
                })?;
                e.emit(Instr::Push {
                    list: ops,
                    value: Operand::Result,
                })?;
                e.emit(Instr::Branch {
                    cond: Cond::PosEq(cp),
                    target: labels.exit,
                })
            })?;
            call_operand(operand, arity, e)?;
            e.if_(Cond::Status, |e| e.emit(Instr::FoldPrefix { ops }))
        }

        OpKind::Postfix => e.block(|e, exit| {
            call_operand(operand, arity, e)?;
            e.emit(Instr::Branch {
                cond: Cond::NotStatus,
                target: exit,
            })?;
            let acc = store_result(e)?;
            e.loop_(|e, labels| {
                let cp = checkpoint(e)?;
                compile(operator, e)?;
                e.if_(Cond::NotStatus, |e| {
                    e.emit(Instr::RestorePos(cp))?;
                    e.emit(Instr::Jump(labels.exit))
                })?;
                e.emit(Instr::MakePostfix { left: acc })?;
                e.emit(Instr::Store(acc, Operand::Result))?;
                e.emit(Instr::Branch {
                    cond: Cond::PosEq(cp),
                    target: labels.exit,
                })
            })?;
            succeed_with(e, Operand::Var(acc))
        }),

        OpKind::LeftAssoc | OpKind::NonAssoc => e.block(|e, exit| {
            call_operand(operand, arity, e)?;
            e.emit(Instr::Branch {
                cond: Cond::NotStatus,
                target: exit,
            })?;
            let acc = store_result(e)?;
            e.loop_(|e, labels| {
                let (cp, op) = operator_step(operator, operand, arity, labels.exit, e)?;
                e.emit(Instr::MakeInfix { left: acc, op })?;
                e.emit(Instr::Store(acc, Operand::Result))?;
                if rule.kind == OpKind::NonAssoc {
                    e.emit(Instr::Jump(labels.exit))
                } else {
                    e.emit(Instr::Branch {
                        cond: Cond::PosEq(cp),
                        target: labels.exit,
                    })
                }
            })?;
            succeed_with(e, Operand::Var(acc))
        }),

        OpKind::RightAssoc => e.block(|e, exit| {
            let spine = e.var()?;
            e.emit(Instr::NewList(spine))?;
            call_operand(operand, arity, e)?;
            e.emit(Instr::Branch {
                cond: Cond::NotStatus,
                target: exit,
            })?;
            e.emit(Instr::Push {
                list: spine,
                value: Operand::Result,
            })?;
            e.loop_(|e, labels| {
                let (cp, op) = operator_step(operator, operand, arity, labels.exit, e)?;
                e.emit(Instr::Push {
                    list: spine,
                    value: Operand::Var(op),
                })?;
                e.emit(Instr::Push {
                    list: spine,
                    value: Operand::Result,
                })?;
                e.emit(Instr::Branch {
                    cond: Cond::PosEq(cp),
                    target: labels.exit,
                })
            })?;
            e.emit(Instr::FoldRight { spine })?;
            e.emit(Instr::SetStatus(true))
        }),
    }
}

/// `operator operand` inside a binary level loop. Leaves the operand in
/// RESULT; when either part fails, restores POS and leaves the loop.
fn operator_step(
    operator: &Expr,
    operand: FnId,
    arity: usize,
    exit: Label,
    e: &mut Emitter,
) -> EmitResult<(Var, Var)> {
    let cp = checkpoint(e)?;
    compile(operator, e)?;
    e.if_(Cond::NotStatus, |e| {
        e.emit(Instr::RestorePos(cp))?;
        e.emit(Instr::Jump(exit))
    })?;
    let op = store_result(e)?;
    call_operand(operand, arity, e)?;
    e.if_(Cond::NotStatus, |e| {
        e.emit(Instr::RestorePos(cp))?;
        e.emit(Instr::Jump(exit))
    })?;
    Ok((cp, op))
}

/// The literal as the user wrote it, for diagnostics.
fn literal_text(value: &[u8], binary: bool) -> String {
    if binary {
        value.iter().map(|b| *b as char).collect()
    } else {
        String::from_utf8_lossy(value).into_owned()
    }
}

/// A regex matching the literal exactly; used for case-insensitive strings.
fn escape_literal(value: &[u8], binary: bool) -> String {
    if !binary {
        return regex_syntax::escape(&String::from_utf8_lossy(value));
    }
    value
        .iter()
        .map(|b| {
            if b.is_ascii() {
                regex_syntax::escape(&(*b as char).to_string())
            } else {
                format!("\\x{b:02X}")
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;
    use crate::expr::Definition;

    fn lit(s: &str, id: usize) -> Expr {
        let mut expr = Expr::new(
            ExprKind::Str {
                value: s.as_bytes().to_vec(),
                ignore_case: false,
                binary: false,
                skip_ignored: false,
            },
            Span::default(),
        );
        expr.id = id;
        expr
    }

    fn tree_of(expr: Expr) -> GrammarTree {
        GrammarTree {
            definitions: vec![Definition {
                name: "start".to_string(),
                params: None,
                expr,
                is_ignored: false,
                class_fields: None,
                is_synthetic: false,
                source: "start = ...".to_string(),
                span: Span::default(),
            }],
            sections: Vec::new(),
        }
    }

    fn nested_opts(depth: usize) -> Expr {
        let mut expr = lit("a", 0);
        for id in 1..=depth {
            let mut wrapped = Expr::new(ExprKind::Opt(expr.boxed()), Span::default());
            wrapped.id = id;
            expr = wrapped;
        }
        expr
    }

    #[test]
    fn test_generate_registers_rules() {
        let program = generate(&tree_of(lit("a", 1)), &GrammarOptions::default()).unwrap();
        assert_eq!(program.rules.len(), 1);
        assert_eq!(program.rules[0].name, "start");
        assert_eq!(program.function(program.rules[0].func).name, "_try_start");
        assert_eq!(program.literals.len(), 1);
    }

    #[test]
    fn test_deep_nesting_is_functionalized() {
        let options = GrammarOptions {
            max_blocks: 2,
            ..GrammarOptions::default()
        };
        let program = generate(&tree_of(nested_opts(5)), &options).unwrap();
        assert!(program.functions.len() > 1);
        assert!(program.listing().contains("_parse_function_"));

        let roomy = generate(&tree_of(nested_opts(5)), &GrammarOptions::default()).unwrap();
        assert_eq!(roomy.functions.len(), 1);
    }

    #[test]
    fn test_nested_lookaheads_use_up_the_budget() {
        let mut expr = lit("a", 0);
        for id in 1..=4 {
            let kind = if id % 2 == 0 {
                ExprKind::Expect(expr.boxed())
            } else {
                ExprKind::ExpectNot(expr.boxed())
            };
            expr = Expr::new(kind, Span::default());
            expr.id = id;
        }
        let options = GrammarOptions {
            max_blocks: 2,
            ..GrammarOptions::default()
        };
        let program = generate(&tree_of(expr), &options).unwrap();
        assert!(program.functions.len() > 1);
    }

    #[test]
    fn test_escape_literal() {
        assert_eq!(escape_literal(b"a+b", false), "a\\+b");
        assert_eq!(escape_literal(&[0x41, 0xff], true), "A\\xFF");
    }
}
