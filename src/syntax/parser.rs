//! Meta Parser
//!
//! Converts a grammar description into meta AST nodes with source spans.
//! This parser is purely syntactic; names, arities and bounds are checked by
//! the lowering and analysis passes.

use pest::{error::Error, iterators::Pair, Parser};
use pest_derive::Parser;

use crate::ast::{
    BinaryOp, ClassDef, FieldDef, Form, MetaArg, MetaBound, MetaExpr, MetaKind, PostfixOp,
    RuleDef, Span, Stmt,
};
use crate::diagnostics::SourceArc;
use crate::{err_ctx, err_msg, SourcerError};

#[derive(Parser)]
#[grammar = "syntax/grammar.pest"]
struct MetaParser;

// ============================================================================
// PUBLIC API
// ============================================================================

/// Parse a grammar description into its top-level form.
pub fn parse(description: &str, source: &SourceArc) -> Result<Form, SourcerError> {
    if description.trim().is_empty() {
        return Err(err_ctx!(
            Grammar,
            "the grammar description is empty",
            source,
            Span::new(0, description.len())
        ));
    }

    let mut pairs =
        MetaParser::parse(Rule::grammar, description).map_err(|e| convert_parse_error(e, source))?;
    let grammar = pairs
        .next()
        .ok_or_else(|| err_msg!(Internal, "meta parser produced no grammar node"))?;
    let top = grammar
        .into_inner()
        .next()
        .ok_or_else(|| err_msg!(Internal, "meta parser produced an empty grammar node"))?;

    match top.as_rule() {
        Rule::statements => {
            let stmts = top
                .into_inner()
                .map(|p| build_stmt(p, source))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Form::Statements(stmts))
        }
        _ => Ok(Form::Expr(build_expr(top, source)?)),
    }
}

// ============================================================================
// STATEMENT BUILDERS
// ============================================================================

fn build_stmt(pair: Pair<Rule>, source: &SourceArc) -> Result<Stmt, SourcerError> {
    let span = get_span(&pair);
    match pair.as_rule() {
        Rule::host_section => {
            let body = pair
                .into_inner()
                .next()
                .map(|p| p.as_str().to_string())
                .unwrap_or_default();
            Ok(Stmt::HostSection { source: body, span })
        }
        Rule::rule_def => build_rule(pair, source),
        Rule::class_def => build_class(pair, source),
        rule => Err(unsupported(rule, source, span)),
    }
}

fn build_rule(pair: Pair<Rule>, source: &SourceArc) -> Result<Stmt, SourcerError> {
    let span = get_span(&pair);
    let mut is_ignored = false;
    let mut name = None;
    let mut params = None;
    let mut body = None;

    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::ignored_kw => is_ignored = true,
            Rule::callee | Rule::ident if name.is_none() => name = Some(item.as_str().to_string()),
            Rule::params => params = Some(build_params(item)),
            _ => body = Some(build_expr(item, source)?),
        }
    }

    let name = name.ok_or_else(|| err_ctx!(Grammar, "rule definition without a name", source, span))?;
    let body = body.ok_or_else(|| err_ctx!(Grammar, "rule definition without a body", source, span))?;
    Ok(Stmt::Rule(RuleDef {
        name,
        params,
        body,
        is_ignored,
        span,
    }))
}

fn build_class(pair: Pair<Rule>, source: &SourceArc) -> Result<Stmt, SourcerError> {
    let span = get_span(&pair);
    let mut is_ignored = false;
    let mut name = None;
    let mut params = None;
    let mut fields = Vec::new();

    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::ignored_kw => is_ignored = true,
            Rule::kw_class => {}
            Rule::ident => name = Some(item.as_str().to_string()),
            Rule::params => params = Some(build_params(item)),
            Rule::field => fields.push(build_field(item, source)?),
            rule => return Err(unsupported(rule, source, get_span(&item))),
        }
    }

    let name = name.ok_or_else(|| err_ctx!(Grammar, "class definition without a name", source, span))?;
    Ok(Stmt::Class(ClassDef {
        name,
        params,
        fields,
        is_ignored,
        span,
    }))
}

fn build_field(pair: Pair<Rule>, source: &SourceArc) -> Result<FieldDef, SourcerError> {
    let span = get_span(&pair);
    let mut inner = pair.into_inner();
    let name = inner
        .next()
        .map(|p| p.as_str().to_string())
        .ok_or_else(|| err_ctx!(Grammar, "class field without a name", source, span))?;
    let expr = inner
        .next()
        .ok_or_else(|| err_ctx!(Grammar, format!("class field '{name}' without an expression"), source, span))?;
    Ok(FieldDef {
        name,
        expr: build_expr(expr, source)?,
        span,
    })
}

fn build_params(pair: Pair<Rule>) -> Vec<String> {
    pair.into_inner().map(|p| p.as_str().to_string()).collect()
}

// ============================================================================
// EXPRESSION BUILDERS
// ============================================================================

fn build_expr(pair: Pair<Rule>, source: &SourceArc) -> Result<MetaExpr, SourcerError> {
    let span = get_span(&pair);

    match pair.as_rule() {
        Rule::choice | Rule::apply | Rule::sep | Rule::discard | Rule::where_expr => {
            build_binary_chain(pair, source)
        }

        Rule::postfix => {
            let mut inner = pair.into_inner();
            let primary = inner
                .next()
                .ok_or_else(|| err_ctx!(Grammar, "postfix operator without operand", source, span))?;
            let mut expr = build_expr(primary, source)?;
            for op in inner {
                let op_span = get_span(&op);
                let op = build_postfix_op(op, source)?;
                let span = expr.span.join(op_span);
                expr = MetaExpr::new(
                    MetaKind::Postfix {
                        expr: Box::new(expr),
                        op,
                    },
                    span,
                );
            }
            Ok(expr)
        }

        Rule::let_expr => {
            let mut parts = pair
                .into_inner()
                .filter(|p| !matches!(p.as_rule(), Rule::kw_let | Rule::kw_in));
            let missing = || err_ctx!(Grammar, "incomplete let expression", source, span);
            let name = parts.next().ok_or_else(missing)?.as_str().to_string();
            let value = build_expr(parts.next().ok_or_else(missing)?, source)?;
            let body = build_expr(parts.next().ok_or_else(missing)?, source)?;
            Ok(MetaExpr::new(
                MetaKind::Let {
                    name,
                    value: Box::new(value),
                    body: Box::new(body),
                },
                span,
            ))
        }

        Rule::call => {
            let mut inner = pair.into_inner();
            let func = inner
                .next()
                .map(|p| p.as_str().to_string())
                .ok_or_else(|| err_ctx!(Grammar, "call without a callee", source, span))?;
            let args = inner
                .map(|arg| build_arg(arg, source))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(MetaExpr::new(MetaKind::Call { func, args }, span))
        }

        Rule::sequence => {
            let items = pair
                .into_inner()
                .map(|p| build_expr(p, source))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(MetaExpr::new(MetaKind::Sequence(items), span))
        }

        Rule::string => {
            let mut binary = false;
            let mut ignore_case = false;
            let mut value = String::new();
            for part in pair.into_inner() {
                match part.as_rule() {
                    Rule::binary_flag => binary = true,
                    Rule::case_flag => ignore_case = true,
                    Rule::dq_string | Rule::sq_string => {
                        let raw = part.into_inner().next().map(|p| p.as_str()).unwrap_or("");
                        value = unescape_string(raw);
                    }
                    rule => return Err(unsupported(rule, source, span)),
                }
            }
            Ok(MetaExpr::new(
                MetaKind::Str {
                    value,
                    ignore_case,
                    binary,
                },
                span,
            ))
        }

        Rule::regex => {
            let mut binary = false;
            let mut ignore_case = false;
            let mut pattern = String::new();
            for part in pair.into_inner() {
                match part.as_rule() {
                    Rule::binary_flag => binary = true,
                    Rule::case_flag => ignore_case = true,
                    Rule::regex_inner => pattern = part.as_str().replace("\\/", "/"),
                    rule => return Err(unsupported(rule, source, span)),
                }
            }
            Ok(MetaExpr::new(
                MetaKind::Regex {
                    pattern,
                    ignore_case,
                    binary,
                },
                span,
            ))
        }

        Rule::host_expr => {
            let body = pair
                .into_inner()
                .next()
                .map(|p| p.as_str().to_string())
                .unwrap_or_default();
            Ok(MetaExpr::new(MetaKind::Host(body), span))
        }

        Rule::int_lit => {
            let value = pair.as_str().parse::<i64>().map_err(|_| {
                err_ctx!(Grammar, format!("integer literal out of range: {}", pair.as_str()), source, span)
            })?;
            Ok(MetaExpr::new(MetaKind::Int(value), span))
        }

        Rule::reference => Ok(MetaExpr::new(MetaKind::Ref(pair.as_str().to_string()), span)),

        rule => Err(unsupported(rule, source, span)),
    }
}

/// Folds `operand (op operand)*` left to right.
fn build_binary_chain(pair: Pair<Rule>, source: &SourceArc) -> Result<MetaExpr, SourcerError> {
    let span = get_span(&pair);
    let mut inner = pair.into_inner();
    let first = inner
        .next()
        .ok_or_else(|| err_ctx!(Grammar, "binary operator without operand", source, span))?;
    let mut left = build_expr(first, source)?;

    while let Some(op) = inner.next() {
        let op = binary_op(op.as_str())
            .ok_or_else(|| err_ctx!(Grammar, format!("unknown operator '{}'", op.as_str()), source, get_span(&op)))?;
        let right = inner
            .next()
            .ok_or_else(|| err_ctx!(Grammar, format!("missing right operand of '{op}'"), source, span))?;
        let right = build_expr(right, source)?;
        let joined = left.span.join(right.span);
        left = MetaExpr::new(
            MetaKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            joined,
        );
    }
    Ok(left)
}

fn binary_op(text: &str) -> Option<BinaryOp> {
    Some(match text.trim() {
        "|" => BinaryOp::Choice,
        "|>" => BinaryOp::ApplyRight,
        "<|" => BinaryOp::ApplyLeft,
        "//" => BinaryOp::Sep,
        "/?" => BinaryOp::SepTrailer,
        "<<" => BinaryOp::KeepLeft,
        ">>" => BinaryOp::KeepRight,
        "where" => BinaryOp::Where,
        _ => return None,
    })
}

fn build_postfix_op(pair: Pair<Rule>, source: &SourceArc) -> Result<PostfixOp, SourcerError> {
    let span = get_span(&pair);
    match pair.as_rule() {
        Rule::opt_op => Ok(PostfixOp::Opt),
        Rule::many_op => Ok(PostfixOp::Many),
        Rule::some_op => Ok(PostfixOp::Some),
        Rule::repeat => {
            let mut min = None;
            let mut max = None;
            let mut saw_comma = false;
            for part in pair.into_inner() {
                match part.as_rule() {
                    Rule::repeat_comma => saw_comma = true,
                    _ => {
                        let bound = build_bound(part, source)?;
                        if saw_comma {
                            max = Some(bound);
                        } else {
                            min = Some(bound);
                        }
                    }
                }
            }
            // `{n}` means exactly n.
            if !saw_comma {
                max = min.clone();
            }
            Ok(PostfixOp::Repeat { min, max })
        }
        rule => Err(unsupported(rule, source, span)),
    }
}

fn build_bound(pair: Pair<Rule>, source: &SourceArc) -> Result<MetaBound, SourcerError> {
    let span = get_span(&pair);
    match pair.as_rule() {
        Rule::int_lit => pair
            .as_str()
            .parse::<usize>()
            .map(MetaBound::Int)
            .map_err(|_| err_ctx!(Grammar, format!("invalid repetition bound: {}", pair.as_str()), source, span)),
        Rule::host_expr => Ok(MetaBound::Host(
            pair.into_inner()
                .next()
                .map(|p| p.as_str().to_string())
                .unwrap_or_default(),
        )),
        rule => Err(unsupported(rule, source, span)),
    }
}

fn build_arg(pair: Pair<Rule>, source: &SourceArc) -> Result<MetaArg, SourcerError> {
    let span = get_span(&pair);
    if pair.as_rule() == Rule::kwarg {
        let mut inner = pair.into_inner();
        let missing = || err_ctx!(Grammar, "incomplete keyword argument", source, span);
        let name = inner.next().ok_or_else(missing)?.as_str().to_string();
        let value = build_expr(inner.next().ok_or_else(missing)?, source)?;
        return Ok(MetaArg::Keyword { name, value });
    }
    Ok(MetaArg::Positional(build_expr(pair, source)?))
}

// ============================================================================
// UTILITIES
// ============================================================================

fn get_span(pair: &Pair<Rule>) -> Span {
    Span::new(pair.as_span().start(), pair.as_span().end())
}

fn unsupported(rule: Rule, source: &SourceArc, span: Span) -> SourcerError {
    err_ctx!(Grammar, format!("unsupported construct: {:?}", rule), source, span)
}

/// Resolves backslash escapes in a quoted literal body.
pub(crate) fn unescape_string(raw: &str) -> String {
    let mut result = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('r') => result.push('\r'),
            Some('0') => result.push('\0'),
            Some('\\') => result.push('\\'),
            Some('"') => result.push('"'),
            Some('\'') => result.push('\''),
            Some('x') => {
                let hex: String = (0..2).filter_map(|_| chars.next_if(|c| c.is_ascii_hexdigit())).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(c) if hex.len() == 2 => result.push(c),
                    _ => {
                        result.push_str("\\x");
                        result.push_str(&hex);
                    }
                }
            }
            Some('u') if chars.peek() == Some(&'{') => {
                chars.next();
                let hex: String = std::iter::from_fn(|| chars.next_if(|c| *c != '}')).collect();
                chars.next();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(c) => result.push(c),
                    None => {
                        result.push_str("\\u{");
                        result.push_str(&hex);
                        result.push('}');
                    }
                }
            }
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
            None => result.push('\\'),
        }
    }

    result
}

fn describe_rule(rule: &Rule) -> String {
    match rule {
        Rule::EOI => "end of input",
        Rule::ident | Rule::callee => "a name",
        Rule::rule_def => "a rule definition",
        Rule::class_def => "a class definition",
        Rule::host_section => "a host section",
        Rule::field => "a class field",
        Rule::params => "a parameter list",
        Rule::choice_op => "'|'",
        Rule::apply_op => "'|>' or '<|'",
        Rule::sep_op => "'//' or '/?'",
        Rule::discard_op => "'<<' or '>>'",
        Rule::where_op => "'where'",
        Rule::opt_op | Rule::many_op | Rule::some_op | Rule::repeat => "a postfix operator",
        Rule::string => "a string literal",
        Rule::regex => "a regular expression",
        Rule::host_expr => "a host expression",
        Rule::int_lit => "an integer",
        Rule::kw_in => "'in'",
        _ => "an expression",
    }
    .to_string()
}

fn convert_parse_error(error: Error<Rule>, source: &SourceArc) -> SourcerError {
    let span = match error.location {
        pest::error::InputLocation::Pos(pos) => Span::new(pos, pos),
        pest::error::InputLocation::Span((start, end)) => Span::new(start, end),
    };
    let error = error.renamed_rules(describe_rule);
    err_ctx!(
        Grammar,
        format!("invalid grammar description: {}", error.variant.message()),
        source,
        span
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::to_error_source;

    fn parse_ok(text: &str) -> Form {
        parse(text, &to_error_source("test", text)).expect("description should parse")
    }

    fn single_rule(text: &str) -> RuleDef {
        match parse_ok(text) {
            Form::Statements(mut stmts) => match stmts.remove(0) {
                Stmt::Rule(rule) => rule,
                other => panic!("expected a rule, got {other:?}"),
            },
            other => panic!("expected statements, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_input() {
        let result = parse("   ", &to_error_source("test", "   "));
        assert!(result.is_err());
    }

    #[test]
    fn test_bare_expression() {
        match parse_ok("\"a\" | \"b\"") {
            Form::Expr(expr) => assert!(matches!(
                expr.kind,
                MetaKind::Binary { op: BinaryOp::Choice, .. }
            )),
            other => panic!("expected an expression, got {other:?}"),
        }
    }

    #[test]
    fn test_rule_with_params_and_ignored() {
        let rule = single_rule("ignored space(x) = /\\s+/");
        assert!(rule.is_ignored);
        assert_eq!(rule.name, "space");
        assert_eq!(rule.params, Some(vec!["x".to_string()]));
    }

    #[test]
    fn test_operator_precedence_levels() {
        // `|` is looser than `|>`, which is looser than `//`.
        let rule = single_rule("start = a // \",\" |> `f` | b");
        match rule.body.kind {
            MetaKind::Binary { op: BinaryOp::Choice, left, .. } => match left.kind {
                MetaKind::Binary { op: BinaryOp::ApplyRight, left, .. } => {
                    assert!(matches!(left.kind, MetaKind::Binary { op: BinaryOp::Sep, .. }))
                }
                other => panic!("expected apply, got {other:?}"),
            },
            other => panic!("expected choice, got {other:?}"),
        }
    }

    #[test]
    fn test_repeat_bounds() {
        let rule = single_rule("start = \"a\"{2,3} \n other = \"b\"{4}");
        match rule.body.kind {
            MetaKind::Postfix { op: PostfixOp::Repeat { min, max }, .. } => {
                assert_eq!(min, Some(MetaBound::Int(2)));
                assert_eq!(max, Some(MetaBound::Int(3)));
            }
            other => panic!("expected repeat, got {other:?}"),
        }
    }

    #[test]
    fn test_class_and_section() {
        let text = "```\nsquare = lambda x: x * x\n```\nclass Pair { a: int  b: int }\nint = /[0-9]+/";
        match parse_ok(text) {
            Form::Statements(stmts) => {
                assert_eq!(stmts.len(), 3);
                assert!(matches!(&stmts[0], Stmt::HostSection { source, .. } if source.contains("square")));
                match &stmts[1] {
                    Stmt::Class(class) => {
                        assert_eq!(class.name, "Pair");
                        assert_eq!(class.fields.len(), 2);
                        assert_eq!(class.fields[1].name, "b");
                    }
                    other => panic!("expected class, got {other:?}"),
                }
            }
            other => panic!("expected statements, got {other:?}"),
        }
    }

    #[test]
    fn test_string_flags_and_escapes() {
        let rule = single_rule(r#"start = "a\n\"b"i"#);
        assert_eq!(
            rule.body.kind,
            MetaKind::Str {
                value: "a\n\"b".to_string(),
                ignore_case: true,
                binary: false
            }
        );
    }

    #[test]
    fn test_let_and_call() {
        let rule = single_rule("start = let x = foo in Sep(x, \",\", allow_trailer=True)");
        match rule.body.kind {
            MetaKind::Let { name, body, .. } => {
                assert_eq!(name, "x");
                match body.kind {
                    MetaKind::Call { func, args } => {
                        assert_eq!(func, "Sep");
                        assert_eq!(args.len(), 3);
                        assert!(matches!(&args[2], MetaArg::Keyword { name, .. } if name == "allow_trailer"));
                    }
                    other => panic!("expected call, got {other:?}"),
                }
            }
            other => panic!("expected let, got {other:?}"),
        }
    }

    #[test]
    fn test_comments_are_skipped() {
        let rule = single_rule("# leading comment\nstart = \"a\" # trailing");
        assert_eq!(rule.name, "start");
    }

    #[test]
    fn test_unmatched_bracket_fails() {
        let text = "start = [\"a\", \"b\"";
        let err = parse(text, &to_error_source("test", text)).unwrap_err();
        assert!(err.message().contains("invalid grammar description"));
    }
}
