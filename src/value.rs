//! Runtime values produced by generated parsers.
//!
//! A parse returns a `Value`: strings and bytes matched from the input, lists
//! built by sequences and repetitions, nodes built by classes and by operator
//! precedence rules, and whatever host expressions compute.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::emit::{ErrorId, FnId};
use crate::{err_msg, SourcerError};

// ============================================================================
// CALLABLES
// ============================================================================

/// A function value that host expressions can call.
///
/// Implemented by host lambdas, builtins, node class constructors and
/// functions registered with `GrammarBuilder::host_fn`.
pub trait Callable: Send + Sync {
    fn name(&self) -> &str;
    fn call(&self, args: &[Value]) -> Result<Value, SourcerError>;
}

type HostFnBox = dyn Fn(&[Value]) -> Result<Value, SourcerError> + Send + Sync;

/// A named Rust closure exposed to host expressions.
pub struct NativeFn {
    name: String,
    func: Box<HostFnBox>,
}

impl NativeFn {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, SourcerError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }
}

impl Callable for NativeFn {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, args: &[Value]) -> Result<Value, SourcerError> {
        (self.func)(args)
    }
}

// ============================================================================
// POSITIONS
// ============================================================================

/// A resolved location in the parsed input.
///
/// `index` is a byte offset; `line` and `column` are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub index: usize,
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(index: usize, line: usize, column: usize) -> Self {
        Self { index, line, column }
    }

    /// A position whose line and column are not known yet.
    pub(crate) fn unresolved(index: usize) -> Self {
        Self {
            index,
            line: 0,
            column: 0,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "_Position(index={}, line={}, column={})",
            self.index, self.line, self.column
        )
    }
}

/// Span of input a class node was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PositionInfo {
    pub start: Position,
    pub end: Position,
}

// ============================================================================
// NODES
// ============================================================================

/// The shape of a node: its class name and ordered field names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeClass {
    pub name: String,
    pub fields: Vec<String>,
}

impl NodeClass {
    pub fn new(name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

pub static INFIX: Lazy<Arc<NodeClass>> =
    Lazy::new(|| Arc::new(NodeClass::new("Infix", &["left", "operator", "right"])));
pub static PREFIX: Lazy<Arc<NodeClass>> =
    Lazy::new(|| Arc::new(NodeClass::new("Prefix", &["operator", "right"])));
pub static POSTFIX: Lazy<Arc<NodeClass>> =
    Lazy::new(|| Arc::new(NodeClass::new("Postfix", &["left", "operator"])));

/// A structured parse result.
///
/// Equality compares the class name and the field values; position info is
/// ignored.
#[derive(Clone)]
pub struct Node {
    class: Arc<NodeClass>,
    values: Vec<Value>,
    position_info: Option<PositionInfo>,
}

impl Node {
    pub fn new(class: Arc<NodeClass>, values: Vec<Value>) -> Self {
        Self {
            class,
            values,
            position_info: None,
        }
    }

    pub(crate) fn with_position_info(mut self, info: PositionInfo) -> Self {
        self.position_info = Some(info);
        self
    }

    /// Same class and position info, new field values.
    pub(crate) fn with_values(&self, values: Vec<Value>) -> Self {
        Self {
            class: Arc::clone(&self.class),
            values,
            position_info: self.position_info,
        }
    }

    pub fn class(&self) -> &Arc<NodeClass> {
        &self.class
    }

    pub fn class_name(&self) -> &str {
        &self.class.name
    }

    /// Field names, in declaration order.
    pub fn fields(&self) -> &[String] {
        &self.class.fields
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.class
            .fields
            .iter()
            .position(|f| f == field)
            .and_then(|i| self.values.get(i))
    }

    /// Present on nodes built by class rules.
    pub fn position_info(&self) -> Option<&PositionInfo> {
        self.position_info.as_ref()
    }

    /// Field name and value pairs, in declaration order.
    pub fn as_dict(&self) -> Vec<(String, Value)> {
        self.class
            .fields
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }

    /// Copy of this node with some fields replaced.
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use sourcer::{Node, NodeClass, Value};
    /// let class = Arc::new(NodeClass::new("Pair", &["a", "b"]));
    /// let node = Node::new(class, vec![Value::Int(1), Value::Int(2)]);
    /// let changed = node.replace(&[("b", Value::Int(3))]).unwrap();
    /// assert_eq!(changed.get("b"), Some(&Value::Int(3)));
    /// ```
    pub fn replace(&self, changes: &[(&str, Value)]) -> Result<Node, SourcerError> {
        let mut values = self.values.clone();
        for (field, value) in changes {
            let index = self
                .class
                .fields
                .iter()
                .position(|f| f == field)
                .ok_or_else(|| err_msg!(Host, "{} has no field '{}'", self.class.name, field))?;
            values[index] = value.clone();
        }
        Ok(self.with_values(values))
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.class.name == other.class.name
            && self.class.fields == other.class.fields
            && self.values == other.values
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.class.name)?;
        for (i, (name, value)) in self.class.fields.iter().zip(&self.values).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        write!(f, ")")
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Constructor for a class: calling it with field values builds a node.
impl Callable for NodeClass {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, args: &[Value]) -> Result<Value, SourcerError> {
        if args.len() != self.fields.len() {
            return Err(err_msg!(
                Host,
                "{}() takes {} arguments but {} were given",
                self.name,
                self.fields.len(),
                args.len()
            ));
        }
        Ok(Value::Node(Arc::new(Node::new(
            Arc::new(self.clone()),
            args.to_vec(),
        ))))
    }
}

// ============================================================================
// PARSER VALUES
// ============================================================================

/// A first-class parser: a program function plus the values it captured.
///
/// Produced when a rule or a sub-expression is passed as an argument to a
/// parameterized rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ParserRef {
    pub(crate) func: FnId,
    pub(crate) captures: Vec<Value>,
    pub(crate) name: String,
}

impl ParserRef {
    pub fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// VALUES
// ============================================================================

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Bytes(Arc<[u8]>),
    List(Arc<Vec<Value>>),
    Node(Arc<Node>),
    Func(Arc<dyn Callable>),
    Parser(Arc<ParserRef>),
    /// Failure marker left in RESULT by a failed parse.
    Error(ErrorId),
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Value {
        Value::Str(Arc::from(s.as_ref()))
    }

    pub fn bytes(b: impl AsRef<[u8]>) -> Value {
        Value::Bytes(Arc::from(b.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Arc::new(items))
    }

    pub fn node(node: Node) -> Value {
        Value::Node(Arc::new(node))
    }

    /// `Infix(left, operator, right)`
    pub fn infix(left: Value, operator: Value, right: Value) -> Value {
        Value::node(Node::new(Arc::clone(&INFIX), vec![left, operator, right]))
    }

    /// `Prefix(operator, right)`
    pub fn prefix(operator: Value, right: Value) -> Value {
        Value::node(Node::new(Arc::clone(&PREFIX), vec![operator, right]))
    }

    /// `Postfix(left, operator)`
    pub fn postfix(left: Value, operator: Value) -> Value {
        Value::node(Node::new(Arc::clone(&POSTFIX), vec![left, operator]))
    }

    pub fn func(callable: impl Callable + 'static) -> Value {
        Value::Func(Arc::new(callable))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Node(_) => "node",
            Value::Func(_) => "function",
            Value::Parser(_) => "parser",
            Value::Error(_) => "error",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Truthiness as host expressions see it.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Node(_) | Value::Func(_) | Value::Parser(_) => true,
            Value::Error(_) => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Arc<Node>> {
        match self {
            Value::Node(node) => Some(node),
            _ => None,
        }
    }

    /// Identity comparison for shared values; scalars compare by value.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Node(a), Value::Node(b)) => Arc::ptr_eq(a, b),
            (Value::Func(a), Value::Func(b)) => Arc::ptr_eq(a, b),
            (Value::Parser(a), Value::Parser(b)) => Arc::ptr_eq(a, b),
            (Value::Str(a), Value::Str(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Bytes(a), Value::Bytes(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => self == other,
        }
    }

    /// The `str()` conversion: strings unquoted, everything else as repr.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            other => other.to_string(),
        }
    }

    /// Exports the value as JSON; nodes become objects with a `type` key.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::{json, Map};
        match self {
            Value::None | Value::Error(_) => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Int(i) => json!(i),
            Value::Float(x) => json!(x),
            Value::Str(s) => json!(s.as_ref()),
            Value::Bytes(b) => json!(b.as_ref()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Node(node) => {
                let mut map = Map::new();
                map.insert("type".to_string(), json!(node.class_name()));
                for (name, value) in node.fields().iter().zip(node.values()) {
                    map.insert(name.clone(), value.to_json());
                }
                serde_json::Value::Object(map)
            }
            Value::Func(f) => json!(format!("<function {}>", f.name())),
            Value::Parser(p) => json!(format!("<parser {}>", p.name)),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Node(a), Value::Node(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Func(a), Value::Func(b)) => Arc::ptr_eq(a, b),
            (Value::Parser(a), Value::Parser(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::list(items)
    }
}

impl From<Node> for Value {
    fn from(node: Node) -> Self {
        Value::node(node)
    }
}

// ============================================================================
// DISPLAY
// ============================================================================

/// Quotes a string the way the host language prints it.
pub(crate) fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

pub(crate) fn repr_bytes(bytes: &[u8]) -> String {
    let quote = if bytes.contains(&b'\'') && !bytes.contains(&b'"') { b'"' } else { b'\'' };
    let mut out = String::with_capacity(bytes.len() + 3);
    out.push('b');
    out.push(quote as char);
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b if b == quote => {
                out.push('\\');
                out.push(b as char);
            }
            0x20..=0x7e => out.push(b as char),
            b => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out.push(quote as char);
    out
}

fn format_float(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e16 {
        format!("{x:.1}")
    } else if x.is_nan() {
        "nan".to_string()
    } else if x.is_infinite() {
        if x > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else {
        format!("{x}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{}", format_float(*x)),
            Value::Str(s) => write!(f, "{}", repr_str(s)),
            Value::Bytes(b) => write!(f, "{}", repr_bytes(b)),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Node(node) => write!(f, "{node}"),
            Value::Func(func) => write!(f, "<function {}>", func.name()),
            Value::Parser(parser) => write!(f, "<parser {}>", parser.name),
            Value::Error(id) => write!(f, "<error {}>", id.0),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repr_matches_host_printing() {
        let value = Value::list(vec![
            Value::None,
            Value::Bool(true),
            Value::Int(3),
            Value::Float(2.0),
            Value::str("it's"),
            Value::bytes(b"a\x00"),
        ]);
        assert_eq!(value.to_string(), r#"[None, True, 3, 2.0, "it's", b'a\x00']"#);
    }

    #[test]
    fn test_node_equality_ignores_position_info() {
        let plain = Node::new(Arc::clone(&INFIX), vec![1i64.into(), "+".into(), 2i64.into()]);
        let located = plain.clone().with_position_info(PositionInfo::default());
        assert_eq!(plain, located);
        assert_eq!(plain.to_string(), "Infix(left=1, operator='+', right=2)");
    }

    #[test]
    fn test_node_accessors() {
        let class = Arc::new(NodeClass::new("Pair", &["a", "b"]));
        let node = Node::new(class, vec![Value::Int(7), Value::Int(42)]);
        assert_eq!(node.get("b"), Some(&Value::Int(42)));
        assert_eq!(node.get("c"), None);
        assert_eq!(node.as_dict()[0], ("a".to_string(), Value::Int(7)));
        assert!(node.replace(&[("c", Value::None)]).is_err());
    }

    #[test]
    fn test_class_constructor_checks_arity() {
        let class = NodeClass::new("Pair", &["a", "b"]);
        assert!(class.call(&[Value::Int(1)]).is_err());
        let built = class.call(&[Value::Int(1), Value::Int(2)]).unwrap();
        assert_eq!(built.to_string(), "Pair(a=1, b=2)");
    }

    #[test]
    fn test_truthiness_and_numeric_equality() {
        assert!(!Value::str("").is_truthy());
        assert!(Value::list(vec![Value::None]).is_truthy());
        assert_eq!(Value::Int(2), Value::Float(2.0));
    }

    #[test]
    fn test_json_export() {
        let node = Value::infix(1i64.into(), "+".into(), 2i64.into());
        assert_eq!(
            node.to_json(),
            serde_json::json!({"type": "Infix", "left": 1, "operator": "+", "right": 2})
        );
    }
}
