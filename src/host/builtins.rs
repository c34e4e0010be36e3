//! # Host Builtins
//!
//! Functions every host expression can call without importing anything, and
//! the methods strings expose through attribute access.
//!
//! ## Builtins Provided
//!
//! - **Conversions**: `int`, `float`, `str`, `bool`, `list`, `tuple`, `repr`
//! - **Aggregates**: `len`, `abs`, `min`, `max`, `sum`
//!
//! All builtins are pure: they only look at their arguments.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::host::Env;
use crate::value::{NativeFn, Value};
use crate::{err_msg, SourcerError};

/// Signature shared by every builtin.
pub type BuiltinFn = fn(args: &[Value]) -> Result<Value, SourcerError>;

// ============================================================================
// HELPERS
// ============================================================================

fn arity_error(name: &str, expected: &str, actual: usize) -> SourcerError {
    err_msg!(Host, "{}() takes {} arguments ({} given)", name, expected, actual)
}

fn type_error(name: &str, expected: &str, found: &Value) -> SourcerError {
    err_msg!(Host, "{}() expected {}, got {}", name, expected, found.type_name())
}

fn expect_args<'a>(name: &str, args: &'a [Value], min: usize, max: usize) -> Result<&'a [Value], SourcerError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max { min.to_string() } else { format!("{min} to {max}") };
        return Err(arity_error(name, &expected, args.len()));
    }
    Ok(args)
}

pub(crate) fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(x) => Some(*x),
        Value::Bool(b) => Some(*b as i64 as f64),
        _ => None,
    }
}

/// Ordering used by comparisons, `min` and `max`.
pub(crate) fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::Bytes(x), Value::Bytes(y)) => Some(x.cmp(y)),
        (Value::List(x), Value::List(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                match compare(left, right)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(x.len().cmp(&y.len()))
        }
        _ => to_f64(a)?.partial_cmp(&to_f64(b)?),
    }
}

/// Items of something iterable: lists, strings (chars) and bytes (ints).
pub(crate) fn iterate(name: &str, value: &Value) -> Result<Vec<Value>, SourcerError> {
    match value {
        Value::List(items) => Ok(items.as_ref().clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::from(c.to_string())).collect()),
        Value::Bytes(b) => Ok(b.iter().map(|x| Value::Int(*x as i64)).collect()),
        Value::Node(node) => Ok(node.values().to_vec()),
        other => Err(type_error(name, "an iterable", other)),
    }
}

fn extremum(name: &str, args: &[Value], wanted: Ordering) -> Result<Value, SourcerError> {
    let items = match args {
        [] => return Err(arity_error(name, "at least 1", 0)),
        [single] => iterate(name, single)?,
        many => many.to_vec(),
    };
    let mut iter = items.into_iter();
    let mut best = iter
        .next()
        .ok_or_else(|| err_msg!(Host, "{}() arg is an empty sequence", name))?;
    for item in iter {
        let ordering = compare(&item, &best)
            .ok_or_else(|| err_msg!(Host, "{}() cannot compare {} and {}", name, item.type_name(), best.type_name()))?;
        if ordering == wanted {
            best = item;
        }
    }
    Ok(best)
}

// ============================================================================
// BUILTINS
// ============================================================================

/// Converts to an integer.
///
/// Usage: int(x) or int(text, base)
pub const BUILTIN_INT: BuiltinFn = |args| {
    let args = expect_args("int", args, 1, 2)?;
    let base = match args.get(1) {
        None => 10,
        Some(Value::Int(b)) if (2..=36).contains(b) => *b as u32,
        Some(other) => return Err(type_error("int", "a base between 2 and 36", other)),
    };
    match &args[0] {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Float(x) if x.is_finite() => Ok(Value::Int(x.trunc() as i64)),
        Value::Str(s) => parse_int(s.trim(), base),
        Value::Bytes(b) => parse_int(String::from_utf8_lossy(b).trim(), base),
        other => Err(type_error("int", "a number or string", other)),
    }
};

fn parse_int(text: &str, base: u32) -> Result<Value, SourcerError> {
    let cleaned = text.replace('_', "");
    i64::from_str_radix(&cleaned, base)
        .map(Value::Int)
        .map_err(|_| err_msg!(Host, "invalid literal for int() with base {}: {}", base, Value::str(text)))
}

/// Converts to a float.
pub const BUILTIN_FLOAT: BuiltinFn = |args| {
    let args = expect_args("float", args, 1, 1)?;
    match &args[0] {
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| err_msg!(Host, "could not convert string to float: {}", args[0])),
        other => to_f64(other)
            .map(Value::Float)
            .ok_or_else(|| type_error("float", "a number or string", other)),
    }
};

/// Converts to a string; strings pass through unquoted.
pub const BUILTIN_STR: BuiltinFn = |args| {
    let args = expect_args("str", args, 0, 1)?;
    Ok(args
        .first()
        .map(|v| Value::from(v.to_display_string()))
        .unwrap_or_else(|| Value::str("")))
};

pub const BUILTIN_BOOL: BuiltinFn = |args| {
    let args = expect_args("bool", args, 0, 1)?;
    Ok(Value::Bool(args.first().map(Value::is_truthy).unwrap_or(false)))
};

/// The printed form of a value, strings quoted.
pub const BUILTIN_REPR: BuiltinFn = |args| {
    let args = expect_args("repr", args, 1, 1)?;
    Ok(Value::from(args[0].to_string()))
};

pub const BUILTIN_LEN: BuiltinFn = |args| {
    let args = expect_args("len", args, 1, 1)?;
    let len = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::Bytes(b) => b.len(),
        Value::List(items) => items.len(),
        Value::Node(node) => node.values().len(),
        other => return Err(type_error("len", "a sized value", other)),
    };
    Ok(Value::Int(len as i64))
};

/// Collects an iterable into a list. `tuple` is the same function.
pub const BUILTIN_LIST: BuiltinFn = |args| {
    let args = expect_args("list", args, 0, 1)?;
    match args.first() {
        None => Ok(Value::list(Vec::new())),
        Some(value) => Ok(Value::list(iterate("list", value)?)),
    }
};

pub const BUILTIN_ABS: BuiltinFn = |args| {
    let args = expect_args("abs", args, 1, 1)?;
    match &args[0] {
        Value::Int(i) => i
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| err_msg!(Host, "integer overflow in abs()")),
        Value::Float(x) => Ok(Value::Float(x.abs())),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        other => Err(type_error("abs", "a number", other)),
    }
};

pub const BUILTIN_MIN: BuiltinFn = |args| extremum("min", args, Ordering::Less);

pub const BUILTIN_MAX: BuiltinFn = |args| extremum("max", args, Ordering::Greater);

/// Adds up numbers, starting from an optional second argument.
pub const BUILTIN_SUM: BuiltinFn = |args| {
    let args = expect_args("sum", args, 1, 2)?;
    let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
    for item in iterate("sum", &args[0])? {
        total = match (&total, &item) {
            (Value::Int(a), Value::Int(b)) => Value::Int(
                a.checked_add(*b)
                    .ok_or_else(|| err_msg!(Host, "integer overflow in sum()"))?,
            ),
            _ => match (to_f64(&total), to_f64(&item)) {
                (Some(a), Some(b)) => Value::Float(a + b),
                _ => return Err(type_error("sum", "numbers", &item)),
            },
        };
    }
    Ok(total)
};

// ============================================================================
// REGISTRATION
// ============================================================================

pub const BUILTINS: &[(&str, BuiltinFn)] = &[
    ("int", BUILTIN_INT),
    ("float", BUILTIN_FLOAT),
    ("str", BUILTIN_STR),
    ("bool", BUILTIN_BOOL),
    ("repr", BUILTIN_REPR),
    ("len", BUILTIN_LEN),
    ("list", BUILTIN_LIST),
    ("tuple", BUILTIN_LIST),
    ("abs", BUILTIN_ABS),
    ("min", BUILTIN_MIN),
    ("max", BUILTIN_MAX),
    ("sum", BUILTIN_SUM),
];

/// Adds every builtin to `env`.
pub fn register_builtins(env: &mut Env) {
    for (name, func) in BUILTINS {
        env.insert(name.to_string(), Value::func(NativeFn::new(*name, *func)));
    }
}

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.iter().any(|(n, _)| *n == name)
}

// ============================================================================
// STRING METHODS
// ============================================================================

fn string_arg<'a>(method: &str, value: &'a Value) -> Result<&'a str, SourcerError> {
    value
        .as_str()
        .ok_or_else(|| type_error(method, "a string", value))
}

/// Looks up a method on a string receiver and binds it.
pub fn string_method(receiver: &Arc<str>, name: &str) -> Option<Value> {
    let s = Arc::clone(receiver);
    let method: NativeFn = match name {
        "join" => NativeFn::new("join", move |args| {
            let args = expect_args("join", args, 1, 1)?;
            let parts = iterate("join", &args[0])?
                .iter()
                .map(|p| string_arg("join", p).map(str::to_string))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::from(parts.join(&s)))
        }),
        "lower" => NativeFn::new("lower", move |args| {
            expect_args("lower", args, 0, 0)?;
            Ok(Value::from(s.to_lowercase()))
        }),
        "upper" => NativeFn::new("upper", move |args| {
            expect_args("upper", args, 0, 0)?;
            Ok(Value::from(s.to_uppercase()))
        }),
        "strip" => NativeFn::new("strip", move |args| {
            let args = expect_args("strip", args, 0, 1)?;
            match args.first() {
                None => Ok(Value::str(s.trim())),
                Some(chars) => {
                    let chars = string_arg("strip", chars)?;
                    Ok(Value::str(s.trim_matches(|c: char| chars.contains(c))))
                }
            }
        }),
        "split" => NativeFn::new("split", move |args| {
            let args = expect_args("split", args, 0, 1)?;
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::None) => s.split_whitespace().map(Value::str).collect(),
                Some(sep) => {
                    let sep = string_arg("split", sep)?;
                    if sep.is_empty() {
                        return Err(err_msg!(Host, "split() separator must not be empty"));
                    }
                    s.split(sep).map(Value::str).collect()
                }
            };
            Ok(Value::list(parts))
        }),
        "startswith" => NativeFn::new("startswith", move |args| {
            let args = expect_args("startswith", args, 1, 1)?;
            Ok(Value::Bool(s.starts_with(string_arg("startswith", &args[0])?)))
        }),
        "endswith" => NativeFn::new("endswith", move |args| {
            let args = expect_args("endswith", args, 1, 1)?;
            Ok(Value::Bool(s.ends_with(string_arg("endswith", &args[0])?)))
        }),
        "replace" => NativeFn::new("replace", move |args| {
            let args = expect_args("replace", args, 2, 2)?;
            let from = string_arg("replace", &args[0])?;
            let to = string_arg("replace", &args[1])?;
            Ok(Value::from(s.replace(from, to)))
        }),
        _ => return None,
    };
    Some(Value::func(method))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Callable;
    use rstest::rstest;

    #[rstest]
    #[case(vec![Value::str(" 42 ")], Value::Int(42))]
    #[case(vec![Value::str("ff"), Value::Int(16)], Value::Int(255))]
    #[case(vec![Value::Float(3.9)], Value::Int(3))]
    #[case(vec![Value::Bool(true)], Value::Int(1))]
    fn test_int_conversions(#[case] args: Vec<Value>, #[case] expected: Value) {
        assert_eq!(BUILTIN_INT(&args).unwrap(), expected);
    }

    #[test]
    fn test_int_rejects_garbage() {
        let err = BUILTIN_INT(&[Value::str("x1")]).unwrap_err();
        assert!(err.message().contains("invalid literal for int()"));
    }

    #[test]
    fn test_min_max_sum() {
        let items = Value::list(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
        assert_eq!(BUILTIN_MIN(&[items.clone()]).unwrap(), Value::Int(1));
        assert_eq!(BUILTIN_MAX(&[Value::Int(1), Value::Float(2.5)]).unwrap(), Value::Float(2.5));
        assert_eq!(BUILTIN_SUM(&[items]).unwrap(), Value::Int(6));
        assert!(BUILTIN_MIN(&[Value::list(vec![])]).is_err());
    }

    #[test]
    fn test_str_and_repr_differ_on_strings() {
        assert_eq!(BUILTIN_STR(&[Value::str("a")]).unwrap(), Value::str("a"));
        assert_eq!(BUILTIN_REPR(&[Value::str("a")]).unwrap(), Value::str("'a'"));
    }

    #[test]
    fn test_string_methods() {
        let receiver: Arc<str> = Arc::from(", ");
        let join = string_method(&receiver, "join").unwrap();
        let Value::Func(join) = join else { panic!("join is not a function") };
        let joined = join
            .call(&[Value::list(vec![Value::str("a"), Value::str("b")])])
            .unwrap();
        assert_eq!(joined, Value::str("a, b"));
        assert!(string_method(&receiver, "nope").is_none());
    }

    #[test]
    fn test_register_builtins() {
        let mut env = Env::new();
        register_builtins(&mut env);
        assert!(env.contains_key("len"));
        assert!(is_builtin("tuple"));
    }
}
