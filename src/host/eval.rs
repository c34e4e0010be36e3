//! Evaluation of host expressions.

use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::host::builtins::{compare, iterate, string_method, to_f64};
use crate::host::{BinOp, CmpOp, HostExpr, UnaryOp};
use crate::value::{Callable, Node, NodeClass, Position, Value};
use crate::{err_msg, SourcerError};

/// Names visible to a host expression.
pub type Env = im::HashMap<String, Value>;

static POSITION_CLASS: Lazy<Arc<NodeClass>> =
    Lazy::new(|| Arc::new(NodeClass::new("_Position", &["index", "line", "column"])));
static POSITION_INFO_CLASS: Lazy<Arc<NodeClass>> =
    Lazy::new(|| Arc::new(NodeClass::new("_PositionInfo", &["start", "end"])));

// ============================================================================
// LAMBDAS
// ============================================================================

/// A host lambda with the environment it was created in.
pub struct HostLambda {
    params: Vec<String>,
    body: Arc<HostExpr>,
    env: Env,
}

impl Callable for HostLambda {
    fn name(&self) -> &str {
        "<lambda>"
    }

    fn call(&self, args: &[Value]) -> Result<Value, SourcerError> {
        if args.len() != self.params.len() {
            return Err(err_msg!(
                Host,
                "<lambda>() takes {} arguments but {} were given",
                self.params.len(),
                args.len()
            ));
        }
        let mut env = self.env.clone();
        for (param, arg) in self.params.iter().zip(args) {
            env.insert(param.clone(), arg.clone());
        }
        eval(&self.body, &env)
    }
}

// ============================================================================
// EVALUATION
// ============================================================================

pub fn eval(expr: &HostExpr, env: &Env) -> Result<Value, SourcerError> {
    match expr {
        HostExpr::Literal(value) => Ok(value.clone()),

        HostExpr::Name(name) => env
            .get(name)
            .cloned()
            .ok_or_else(|| err_msg!(Host, "name '{}' is not defined", name)),

        HostExpr::List(items) => Ok(Value::list(
            items.iter().map(|i| eval(i, env)).collect::<Result<_, _>>()?,
        )),

        HostExpr::Call { func, args } => {
            let func = eval(func, env)?;
            let args = args.iter().map(|a| eval(a, env)).collect::<Result<Vec<_>, _>>()?;
            call_value(&func, &args)
        }

        HostExpr::Attr { object, name } => attribute(&eval(object, env)?, name),

        HostExpr::Index { object, index } => subscript(&eval(object, env)?, &eval(index, env)?),

        HostExpr::Slice { object, lower, upper } => {
            let object = eval(object, env)?;
            let lower = lower.as_ref().map(|e| eval(e, env)).transpose()?;
            let upper = upper.as_ref().map(|e| eval(e, env)).transpose()?;
            slice(&object, lower.as_ref(), upper.as_ref())
        }

        HostExpr::Unary { op, operand } => {
            let value = eval(operand, env)?;
            match (op, &value) {
                (UnaryOp::Not, v) => Ok(Value::Bool(!v.is_truthy())),
                (UnaryOp::Neg, Value::Int(i)) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| err_msg!(Host, "integer overflow")),
                (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
                (UnaryOp::Pos, Value::Int(_) | Value::Float(_)) => Ok(value.clone()),
                _ => Err(err_msg!(Host, "bad operand type for unary operator: {}", value.type_name())),
            }
        }

        HostExpr::Binary { op, left, right } => binary(*op, &eval(left, env)?, &eval(right, env)?),

        HostExpr::Compare { first, rest } => {
            let mut left = eval(first, env)?;
            for (op, right) in rest {
                let right = eval(right, env)?;
                if !compare_op(*op, &left, &right)? {
                    return Ok(Value::Bool(false));
                }
                left = right;
            }
            Ok(Value::Bool(true))
        }

        HostExpr::And(left, right) => {
            let left = eval(left, env)?;
            if !left.is_truthy() {
                return Ok(left);
            }
            eval(right, env)
        }

        HostExpr::Or(left, right) => {
            let left = eval(left, env)?;
            if left.is_truthy() {
                return Ok(left);
            }
            eval(right, env)
        }

        HostExpr::Conditional { then, cond, otherwise } => {
            if eval(cond, env)?.is_truthy() {
                eval(then, env)
            } else {
                eval(otherwise, env)
            }
        }

        HostExpr::Lambda { params, body } => Ok(Value::func(HostLambda {
            params: params.clone(),
            body: Arc::clone(body),
            env: env.clone(),
        })),
    }
}

/// Calls a function value with already evaluated arguments.
pub fn call_value(func: &Value, args: &[Value]) -> Result<Value, SourcerError> {
    match func {
        Value::Func(f) => f.call(args),
        other => Err(err_msg!(Host, "'{}' object is not callable", other.type_name())),
    }
}

fn attribute(object: &Value, name: &str) -> Result<Value, SourcerError> {
    match object {
        Value::Node(node) => match name {
            "_fields" => Ok(Value::list(node.fields().iter().map(Value::str).collect())),
            "_position_info" => Ok(match node.position_info() {
                None => Value::None,
                Some(info) => Value::node(Node::new(
                    Arc::clone(&POSITION_INFO_CLASS),
                    vec![position_value(&info.start), position_value(&info.end)],
                )),
            }),
            field => node
                .get(field)
                .cloned()
                .ok_or_else(|| err_msg!(Host, "'{}' object has no attribute '{}'", node.class_name(), field)),
        },
        Value::Str(s) => string_method(s, name)
            .ok_or_else(|| err_msg!(Host, "'str' object has no attribute '{}'", name)),
        Value::Bytes(b) if name == "decode" => {
            let text = String::from_utf8_lossy(b).into_owned();
            Ok(Value::func(crate::value::NativeFn::new("decode", move |_| {
                Ok(Value::from(text.clone()))
            })))
        }
        other => Err(err_msg!(Host, "'{}' object has no attribute '{}'", other.type_name(), name)),
    }
}

fn position_value(position: &Position) -> Value {
    Value::node(Node::new(
        Arc::clone(&POSITION_CLASS),
        vec![
            Value::Int(position.index as i64),
            Value::Int(position.line as i64),
            Value::Int(position.column as i64),
        ],
    ))
}

fn normalize_index(index: &Value, len: usize) -> Result<usize, SourcerError> {
    let i = index
        .as_int()
        .ok_or_else(|| err_msg!(Host, "indices must be integers, not {}", index.type_name()))?;
    let resolved = if i < 0 { len as i64 + i } else { i };
    if resolved < 0 || resolved as usize >= len {
        return Err(err_msg!(Host, "index out of range: {}", i));
    }
    Ok(resolved as usize)
}

fn subscript(object: &Value, index: &Value) -> Result<Value, SourcerError> {
    match object {
        Value::List(items) => Ok(items[normalize_index(index, items.len())?].clone()),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::from(chars[normalize_index(index, chars.len())?].to_string()))
        }
        Value::Bytes(b) => Ok(Value::Int(b[normalize_index(index, b.len())?] as i64)),
        Value::Node(node) => {
            if let Some(field) = index.as_str() {
                return attribute(object, field);
            }
            Ok(node.values()[normalize_index(index, node.values().len())?].clone())
        }
        other => Err(err_msg!(Host, "'{}' object is not subscriptable", other.type_name())),
    }
}

fn slice_bounds(lower: Option<&Value>, upper: Option<&Value>, len: usize) -> Result<(usize, usize), SourcerError> {
    let clamp = |bound: Option<&Value>, default: usize| -> Result<usize, SourcerError> {
        match bound {
            None | Some(Value::None) => Ok(default),
            Some(value) => {
                let i = value
                    .as_int()
                    .ok_or_else(|| err_msg!(Host, "slice indices must be integers"))?;
                let resolved = if i < 0 { (len as i64 + i).max(0) } else { i.min(len as i64) };
                Ok(resolved as usize)
            }
        }
    };
    let start = clamp(lower, 0)?;
    let end = clamp(upper, len)?;
    Ok((start, end.max(start)))
}

fn slice(object: &Value, lower: Option<&Value>, upper: Option<&Value>) -> Result<Value, SourcerError> {
    match object {
        Value::List(items) => {
            let (start, end) = slice_bounds(lower, upper, items.len())?;
            Ok(Value::list(items[start..end].to_vec()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = slice_bounds(lower, upper, chars.len())?;
            Ok(Value::from(chars[start..end].iter().collect::<String>()))
        }
        Value::Bytes(b) => {
            let (start, end) = slice_bounds(lower, upper, b.len())?;
            Ok(Value::bytes(&b[start..end]))
        }
        other => Err(err_msg!(Host, "'{}' object is not sliceable", other.type_name())),
    }
}

fn unsupported(op: &str, left: &Value, right: &Value) -> SourcerError {
    err_msg!(
        Host,
        "unsupported operand types for {}: '{}' and '{}'",
        op,
        left.type_name(),
        right.type_name()
    )
}

fn overflow() -> SourcerError {
    err_msg!(Host, "integer overflow")
}

fn repeat(items: &[Value], times: i64) -> Vec<Value> {
    let times = times.max(0) as usize;
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend_from_slice(items);
    }
    out
}

fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, SourcerError> {
    use Value::{Bytes, Int, List, Str};

    match (op, left, right) {
        (BinOp::Add, Str(a), Str(b)) => return Ok(Value::from(format!("{a}{b}"))),
        (BinOp::Add, Bytes(a), Bytes(b)) => return Ok(Value::bytes([a.as_ref(), b.as_ref()].concat())),
        (BinOp::Add, List(a), List(b)) => {
            return Ok(Value::list(a.iter().chain(b.iter()).cloned().collect()))
        }
        (BinOp::Mul, Str(s), Int(n)) | (BinOp::Mul, Int(n), Str(s)) => {
            return Ok(Value::from(s.repeat((*n).max(0) as usize)))
        }
        (BinOp::Mul, List(items), Int(n)) | (BinOp::Mul, Int(n), List(items)) => {
            return Ok(Value::list(repeat(items, *n)))
        }
        _ => {}
    }

    let symbol = match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
    };

    let ints = match (left, right) {
        (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => left.as_int().zip(right.as_int()),
        _ => None,
    };

    if let Some((a, b)) = ints {
        let zero = || err_msg!(Host, "division by zero");
        return match op {
            BinOp::Add => a.checked_add(b).map(Int).ok_or_else(overflow),
            BinOp::Sub => a.checked_sub(b).map(Int).ok_or_else(overflow),
            BinOp::Mul => a.checked_mul(b).map(Int).ok_or_else(overflow),
            BinOp::Div if b == 0 => Err(zero()),
            BinOp::Div => Ok(Value::Float(a as f64 / b as f64)),
            BinOp::FloorDiv | BinOp::Mod if b == 0 => Err(zero()),
            BinOp::FloorDiv => {
                let q = a.checked_div(b).ok_or_else(overflow)?;
                Ok(Int(if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q }))
            }
            BinOp::Mod => {
                let r = a % b;
                Ok(Int(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }))
            }
            BinOp::Pow if b >= 0 => u32::try_from(b)
                .ok()
                .and_then(|e| a.checked_pow(e))
                .map(Int)
                .ok_or_else(overflow),
            BinOp::Pow => Ok(Value::Float((a as f64).powf(b as f64))),
        };
    }

    let (a, b) = match (to_f64(left), to_f64(right)) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(unsupported(symbol, left, right)),
    };
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div | BinOp::FloorDiv | BinOp::Mod if b == 0.0 => {
            return Err(err_msg!(Host, "float division by zero"))
        }
        BinOp::Div => a / b,
        BinOp::FloorDiv => (a / b).floor(),
        BinOp::Mod => a - b * (a / b).floor(),
        BinOp::Pow => a.powf(b),
    };
    Ok(Value::Float(result))
}

fn contains(container: &Value, item: &Value) -> Result<bool, SourcerError> {
    match (container, item) {
        (Value::Str(haystack), Value::Str(needle)) => Ok(haystack.contains(needle.as_ref())),
        (Value::Bytes(haystack), Value::Bytes(needle)) => Ok(needle.is_empty()
            || haystack.windows(needle.len()).any(|w| w == needle.as_ref())),
        (Value::List(_) | Value::Bytes(_) | Value::Node(_), _) => {
            Ok(iterate("in", container)?.iter().any(|v| v == item))
        }
        _ => Err(err_msg!(
            Host,
            "argument of type '{}' does not support membership tests",
            container.type_name()
        )),
    }
}

fn compare_op(op: CmpOp, left: &Value, right: &Value) -> Result<bool, SourcerError> {
    let ordered = |wanted: fn(std::cmp::Ordering) -> bool| {
        compare(left, right).map(wanted).ok_or_else(|| {
            err_msg!(
                Host,
                "comparison not supported between '{}' and '{}'",
                left.type_name(),
                right.type_name()
            )
        })
    };
    match op {
        CmpOp::Eq => Ok(left == right),
        CmpOp::Ne => Ok(left != right),
        CmpOp::Lt => ordered(|o| o.is_lt()),
        CmpOp::Le => ordered(|o| o.is_le()),
        CmpOp::Gt => ordered(|o| o.is_gt()),
        CmpOp::Ge => ordered(|o| o.is_ge()),
        CmpOp::In => contains(right, left),
        CmpOp::NotIn => contains(right, left).map(|b| !b),
        CmpOp::Is => Ok(left.ptr_eq(right)),
        CmpOp::IsNot => Ok(!left.ptr_eq(right)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{builtins::register_builtins, parse_expr};

    fn run(source: &str) -> Result<Value, SourcerError> {
        let mut env = Env::new();
        register_builtins(&mut env);
        env.insert("xs".to_string(), Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
        eval(&parse_expr(source)?, &env)
    }

    #[test]
    fn test_arithmetic_follows_host_rules() {
        assert_eq!(run("1 + 2 * 3").unwrap(), Value::Int(7));
        assert_eq!(run("7 // -2").unwrap(), Value::Int(-4));
        assert_eq!(run("-7 % 3").unwrap(), Value::Int(2));
        assert_eq!(run("1 / 2").unwrap(), Value::Float(0.5));
        assert_eq!(run("2 ** 10").unwrap(), Value::Int(1024));
        assert!(run("1 // 0").is_err());
    }

    #[test]
    fn test_lambdas_and_calls() {
        assert_eq!(run("(lambda a, b: a - b)(5, 3)").unwrap(), Value::Int(2));
        assert_eq!(run("sum(xs) if len(xs) > 2 else 0").unwrap(), Value::Int(6));
        assert!(run("(lambda a: a)()").is_err());
    }

    #[test]
    fn test_strings_and_slices() {
        assert_eq!(run("'-'.join(['a', 'b'])").unwrap(), Value::str("a-b"));
        assert_eq!(run("'\"quoted\"'[1:-1]").unwrap(), Value::str("quoted"));
        assert_eq!(run("xs[-1]").unwrap(), Value::Int(3));
        assert_eq!(run("'Hi'.upper() + 'x' * 2").unwrap(), Value::str("HIxx"));
    }

    #[test]
    fn test_comparisons_and_membership() {
        assert_eq!(run("1 < 2 <= 2").unwrap(), Value::Bool(true));
        assert_eq!(run("2 in xs and 5 not in xs").unwrap(), Value::Bool(true));
        assert_eq!(run("None is None").unwrap(), Value::Bool(true));
        assert_eq!(run("not xs").unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_errors_are_host_errors() {
        let err = run("undefined_name").unwrap_err();
        assert_eq!(err.error_type(), crate::diagnostics::ErrorType::Host);
        assert!(run("1 + 'a'").is_err());
        assert!(run("xs(1)").unwrap_err().message().contains("not callable"));
    }

    #[test]
    fn test_node_attributes() {
        let class = Arc::new(NodeClass::new("Pair", &["a", "b"]));
        let node = Value::node(Node::new(class, vec![Value::Int(1), Value::Int(2)]));
        let env = Env::new().update("p".to_string(), node);
        assert_eq!(eval(&parse_expr("p.b").unwrap(), &env).unwrap(), Value::Int(2));
        assert_eq!(
            eval(&parse_expr("p._fields").unwrap(), &env).unwrap(),
            Value::list(vec![Value::str("a"), Value::str("b")])
        );
        assert_eq!(eval(&parse_expr("p._position_info").unwrap(), &env).unwrap(), Value::None);
    }
}
