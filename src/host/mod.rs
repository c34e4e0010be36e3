//! Host Expressions
//!
//! Backtick snippets in a grammar are written in a small expression language:
//! literals, names, lists, calls, attributes, subscripts, arithmetic,
//! comparisons, boolean operators, conditionals and lambdas. Host sections
//! (triple backticks) hold `name = expr` assignments evaluated at load time.
//!
//! Snippets are parsed once when the grammar is built. Their free names are
//! checked against the grammar's scopes before any parser exists.

use std::collections::BTreeSet;
use std::sync::Arc;

use pest::{iterators::Pair, Parser};
use pest_derive::Parser;

use crate::syntax::parser::unescape_string;
use crate::value::Value;
use crate::{err_msg, SourcerError};

pub mod builtins;
pub mod eval;

pub use eval::{eval, Env, HostLambda};

#[derive(Parser)]
#[grammar = "host/grammar.pest"]
struct HostParser;

// ============================================================================
// HOST AST
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

#[derive(Debug, Clone)]
pub enum HostExpr {
    Literal(Value),
    Name(String),
    List(Vec<HostExpr>),
    Call {
        func: Box<HostExpr>,
        args: Vec<HostExpr>,
    },
    Attr {
        object: Box<HostExpr>,
        name: String,
    },
    Index {
        object: Box<HostExpr>,
        index: Box<HostExpr>,
    },
    Slice {
        object: Box<HostExpr>,
        lower: Option<Box<HostExpr>>,
        upper: Option<Box<HostExpr>>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<HostExpr>,
    },
    Binary {
        op: BinOp,
        left: Box<HostExpr>,
        right: Box<HostExpr>,
    },
    /// `a < b < c` chains; each pair must hold.
    Compare {
        first: Box<HostExpr>,
        rest: Vec<(CmpOp, HostExpr)>,
    },
    And(Box<HostExpr>, Box<HostExpr>),
    Or(Box<HostExpr>, Box<HostExpr>),
    Conditional {
        then: Box<HostExpr>,
        cond: Box<HostExpr>,
        otherwise: Box<HostExpr>,
    },
    Lambda {
        params: Vec<String>,
        body: Arc<HostExpr>,
    },
}

impl HostExpr {
    /// Names the expression reads from its enclosing scope.
    pub fn free_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_free(&mut Vec::new(), &mut names);
        names
    }

    fn collect_free(&self, bound: &mut Vec<String>, out: &mut BTreeSet<String>) {
        match self {
            HostExpr::Literal(_) => {}
            HostExpr::Name(name) => {
                if !bound.contains(name) {
                    out.insert(name.clone());
                }
            }
            HostExpr::List(items) => items.iter().for_each(|i| i.collect_free(bound, out)),
            HostExpr::Call { func, args } => {
                func.collect_free(bound, out);
                args.iter().for_each(|a| a.collect_free(bound, out));
            }
            HostExpr::Attr { object, .. } => object.collect_free(bound, out),
            HostExpr::Index { object, index } => {
                object.collect_free(bound, out);
                index.collect_free(bound, out);
            }
            HostExpr::Slice { object, lower, upper } => {
                object.collect_free(bound, out);
                for part in [lower, upper].into_iter().flatten() {
                    part.collect_free(bound, out);
                }
            }
            HostExpr::Unary { operand, .. } => operand.collect_free(bound, out),
            HostExpr::Binary { left, right, .. } | HostExpr::And(left, right) | HostExpr::Or(left, right) => {
                left.collect_free(bound, out);
                right.collect_free(bound, out);
            }
            HostExpr::Compare { first, rest } => {
                first.collect_free(bound, out);
                rest.iter().for_each(|(_, e)| e.collect_free(bound, out));
            }
            HostExpr::Conditional { then, cond, otherwise } => {
                then.collect_free(bound, out);
                cond.collect_free(bound, out);
                otherwise.collect_free(bound, out);
            }
            HostExpr::Lambda { params, body } => {
                let depth = bound.len();
                bound.extend(params.iter().cloned());
                body.collect_free(bound, out);
                bound.truncate(depth);
            }
        }
    }
}

/// A parsed `name = expr` line of a host section.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub name: String,
    pub value: HostExpr,
}

// ============================================================================
// PARSING
// ============================================================================

/// Parse a single backtick snippet.
pub fn parse_expr(source: &str) -> Result<HostExpr, SourcerError> {
    let mut pairs = HostParser::parse(Rule::expression, source)
        .map_err(|e| err_msg!(Grammar, "invalid host expression `{}`: {}", source.trim(), e.variant.message()))?;
    let expression = pairs
        .next()
        .ok_or_else(|| err_msg!(Internal, "host parser produced no expression"))?;
    let inner = expression
        .into_inner()
        .next()
        .ok_or_else(|| err_msg!(Internal, "host parser produced an empty expression"))?;
    build(inner)
}

/// Parse the body of a host section.
pub fn parse_section(source: &str) -> Result<Vec<Assignment>, SourcerError> {
    let mut pairs = HostParser::parse(Rule::section, source)
        .map_err(|e| err_msg!(Grammar, "invalid host section: {}", e.variant.message()))?;
    let section = pairs
        .next()
        .ok_or_else(|| err_msg!(Internal, "host parser produced no section"))?;
    section
        .into_inner()
        .filter(|p| p.as_rule() == Rule::assignment)
        .map(|p| {
            let mut inner = p.into_inner();
            let name = next(&mut inner)?.as_str().to_string();
            let value = build(next(&mut inner)?)?;
            Ok(Assignment { name, value })
        })
        .collect()
}

fn next<'a>(pairs: &mut pest::iterators::Pairs<'a, Rule>) -> Result<Pair<'a, Rule>, SourcerError> {
    pairs
        .next()
        .ok_or_else(|| err_msg!(Internal, "host parser produced a truncated node"))
}

fn build(pair: Pair<Rule>) -> Result<HostExpr, SourcerError> {
    match pair.as_rule() {
        Rule::lambda => {
            let mut inner = pair.into_inner();
            let params = next(&mut inner)?
                .into_inner()
                .map(|p| p.as_str().to_string())
                .collect();
            let body = build(next(&mut inner)?)?;
            Ok(HostExpr::Lambda {
                params,
                body: Arc::new(body),
            })
        }

        Rule::conditional => {
            let mut inner = pair.into_inner();
            let value = build(next(&mut inner)?)?;
            match inner.next() {
                None => Ok(value),
                Some(cond) => Ok(HostExpr::Conditional {
                    then: Box::new(value),
                    cond: Box::new(build(cond)?),
                    otherwise: Box::new(build(next(&mut inner)?)?),
                }),
            }
        }

        Rule::or_expr | Rule::and_expr => {
            let is_or = pair.as_rule() == Rule::or_expr;
            let mut inner = pair.into_inner();
            let mut acc = build(next(&mut inner)?)?;
            for operand in inner {
                let operand = Box::new(build(operand)?);
                acc = if is_or {
                    HostExpr::Or(Box::new(acc), operand)
                } else {
                    HostExpr::And(Box::new(acc), operand)
                };
            }
            Ok(acc)
        }

        Rule::not_expr => build(next(&mut pair.into_inner())?),

        Rule::negation => Ok(HostExpr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(build(next(&mut pair.into_inner())?)?),
        }),

        Rule::comparison => {
            let mut inner = pair.into_inner();
            let first = build(next(&mut inner)?)?;
            let mut rest = Vec::new();
            while let Some(op) = inner.next() {
                let op = cmp_op(op.as_str())?;
                rest.push((op, build(next(&mut inner)?)?));
            }
            if rest.is_empty() {
                return Ok(first);
            }
            Ok(HostExpr::Compare {
                first: Box::new(first),
                rest,
            })
        }

        Rule::arith | Rule::term => {
            let mut inner = pair.into_inner();
            let mut acc = build(next(&mut inner)?)?;
            while let Some(op) = inner.next() {
                let op = match op.as_str() {
                    "+" => BinOp::Add,
                    "-" => BinOp::Sub,
                    "*" => BinOp::Mul,
                    "/" => BinOp::Div,
                    "//" => BinOp::FloorDiv,
                    "%" => BinOp::Mod,
                    other => return Err(err_msg!(Internal, "unknown host operator '{}'", other)),
                };
                let right = build(next(&mut inner)?)?;
                acc = HostExpr::Binary {
                    op,
                    left: Box::new(acc),
                    right: Box::new(right),
                };
            }
            Ok(acc)
        }

        Rule::unary => {
            let mut inner = pair.into_inner();
            let first = next(&mut inner)?;
            if first.as_rule() != Rule::neg_op {
                return build(first);
            }
            let op = if first.as_str() == "-" { UnaryOp::Neg } else { UnaryOp::Pos };
            Ok(HostExpr::Unary {
                op,
                operand: Box::new(build(next(&mut inner)?)?),
            })
        }

        Rule::power => {
            let mut inner = pair.into_inner();
            let base = build(next(&mut inner)?)?;
            match inner.next() {
                None => Ok(base),
                Some(exponent) => Ok(HostExpr::Binary {
                    op: BinOp::Pow,
                    left: Box::new(base),
                    right: Box::new(build(exponent)?),
                }),
            }
        }

        Rule::postfix => {
            let mut inner = pair.into_inner();
            let mut acc = build(next(&mut inner)?)?;
            for trailer in inner {
                acc = build_trailer(acc, trailer)?;
            }
            Ok(acc)
        }

        Rule::list => Ok(HostExpr::List(
            pair.into_inner().map(build).collect::<Result<_, _>>()?,
        )),

        Rule::paren => {
            let mut is_tuple = false;
            let mut items = Vec::new();
            for item in pair.into_inner() {
                if item.as_rule() == Rule::tuple_comma {
                    is_tuple = true;
                } else {
                    items.push(build(item)?);
                }
            }
            if !is_tuple && items.len() == 1 {
                return Ok(items.remove(0));
            }
            Ok(HostExpr::List(items))
        }

        Rule::none => Ok(HostExpr::Literal(Value::None)),
        Rule::true_lit => Ok(HostExpr::Literal(Value::Bool(true))),
        Rule::false_lit => Ok(HostExpr::Literal(Value::Bool(false))),

        Rule::int => pair
            .as_str()
            .parse::<i64>()
            .map(|i| HostExpr::Literal(Value::Int(i)))
            .map_err(|_| err_msg!(Grammar, "integer literal out of range: {}", pair.as_str())),

        Rule::float => pair
            .as_str()
            .parse::<f64>()
            .map(|x| HostExpr::Literal(Value::Float(x)))
            .map_err(|_| err_msg!(Grammar, "invalid float literal: {}", pair.as_str())),

        Rule::string => {
            let quoted = next(&mut pair.into_inner())?;
            let raw = quoted.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Ok(HostExpr::Literal(Value::str(unescape_string(raw))))
        }

        Rule::name => Ok(HostExpr::Name(pair.as_str().to_string())),

        rule => Err(err_msg!(Internal, "unexpected host syntax node {:?}", rule)),
    }
}

fn build_trailer(object: HostExpr, trailer: Pair<Rule>) -> Result<HostExpr, SourcerError> {
    let object = Box::new(object);
    match trailer.as_rule() {
        Rule::call_args => Ok(HostExpr::Call {
            func: object,
            args: trailer.into_inner().map(build).collect::<Result<_, _>>()?,
        }),
        Rule::attribute => Ok(HostExpr::Attr {
            object,
            name: next(&mut trailer.into_inner())?.as_str().to_string(),
        }),
        Rule::subscript => {
            let inner = next(&mut trailer.into_inner())?;
            if inner.as_rule() != Rule::slice {
                return Ok(HostExpr::Index {
                    object,
                    index: Box::new(build(inner)?),
                });
            }
            let mut lower = None;
            let mut upper = None;
            for bound in inner.into_inner() {
                let rule = bound.as_rule();
                let value = Some(Box::new(build(next(&mut bound.into_inner())?)?));
                if rule == Rule::slice_lower {
                    lower = value;
                } else {
                    upper = value;
                }
            }
            Ok(HostExpr::Slice { object, lower, upper })
        }
        rule => Err(err_msg!(Internal, "unexpected host trailer {:?}", rule)),
    }
}

fn cmp_op(text: &str) -> Result<CmpOp, SourcerError> {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    Ok(match normalized.as_str() {
        "==" => CmpOp::Eq,
        "!=" => CmpOp::Ne,
        "<" => CmpOp::Lt,
        "<=" => CmpOp::Le,
        ">" => CmpOp::Gt,
        ">=" => CmpOp::Ge,
        "in" => CmpOp::In,
        "not in" => CmpOp::NotIn,
        "is" => CmpOp::Is,
        "is not" => CmpOp::IsNot,
        other => return Err(err_msg!(Internal, "unknown comparison '{}'", other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_names_skip_lambda_params() {
        let expr = parse_expr("lambda x: f(x, y) + len(z)").unwrap();
        let names: Vec<_> = expr.free_names().into_iter().collect();
        assert_eq!(names, vec!["f", "len", "y", "z"]);
    }

    #[test]
    fn test_section_assignments() {
        let section = parse_section("square = lambda x: x * x\n\nlimit = 10 # comment\n").unwrap();
        assert_eq!(section.len(), 2);
        assert_eq!(section[1].name, "limit");
    }

    #[test]
    fn test_paren_forms() {
        assert!(matches!(parse_expr("(1)").unwrap(), HostExpr::Literal(Value::Int(1))));
        assert!(matches!(parse_expr("(1,)").unwrap(), HostExpr::List(items) if items.len() == 1));
        assert!(matches!(parse_expr("()").unwrap(), HostExpr::List(items) if items.is_empty()));
    }

    #[test]
    fn test_comparison_chain_and_not_in() {
        match parse_expr("a not in b").unwrap() {
            HostExpr::Compare { rest, .. } => assert_eq!(rest[0].0, CmpOp::NotIn),
            other => panic!("expected comparison, got {other:?}"),
        }
        match parse_expr("0 < x <= 9").unwrap() {
            HostExpr::Compare { rest, .. } => assert_eq!(rest.len(), 2),
            other => panic!("expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn test_keywords_separated_by_whitespace() {
        assert!(matches!(parse_expr("lambda n: n > 5").unwrap(), HostExpr::Lambda { .. }));
        assert!(matches!(parse_expr("True and False").unwrap(), HostExpr::And(..)));
        assert!(matches!(parse_expr("a or b").unwrap(), HostExpr::Or(..)));
        assert!(matches!(parse_expr("1 if True else 2").unwrap(), HostExpr::Conditional { .. }));
        assert!(matches!(parse_expr("not True").unwrap(), HostExpr::Unary { .. }));
    }

    #[test]
    fn test_names_starting_with_keywords() {
        let names: Vec<_> = parse_expr("island + notable + order + iffy + lambdas")
            .unwrap()
            .free_names()
            .into_iter()
            .collect();
        assert_eq!(names, vec!["iffy", "island", "lambdas", "notable", "order"]);
    }

    #[test]
    fn test_syntax_error_is_grammar_error() {
        let err = parse_expr("1 +").unwrap_err();
        assert_eq!(err.error_type(), crate::diagnostics::ErrorType::Grammar);
    }
}
