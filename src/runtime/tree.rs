//! Tree utilities: `visit`, `transform` and position resolution.
//!
//! Both walks are iterative, so arbitrarily deep parse trees never overflow
//! the Rust stack. Shared subtrees are recognized by pointer identity.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::runtime::text::{LineTable, Text};
use crate::value::{Node, PositionInfo, Value};

// ============================================================================
// VISIT
// ============================================================================

/// Iterator over every distinct node of a tree, parents before children.
pub struct Visit {
    pending: Vec<Value>,
    seen: HashSet<*const Node>,
}

impl Iterator for Visit {
    type Item = Arc<Node>;

    fn next(&mut self) -> Option<Arc<Node>> {
        while let Some(value) = self.pending.pop() {
            match value {
                Value::List(items) => self.pending.extend(items.iter().rev().cloned()),
                Value::Node(node) => {
                    if !self.seen.insert(Arc::as_ptr(&node)) {
                        continue;
                    }
                    self.pending.extend(node.values().iter().rev().cloned());
                    return Some(node);
                }
                _ => {}
            }
        }
        None
    }
}

/// Yields each node reachable from `tree` exactly once.
///
/// ```rust
/// use sourcer::{visit, Value};
/// let tree = Value::infix(Value::Int(1), "+".into(), Value::prefix("-".into(), Value::Int(2)));
/// let names: Vec<String> = visit(&tree).map(|n| n.class_name().to_string()).collect();
/// assert_eq!(names, ["Infix", "Prefix"]);
/// ```
pub fn visit(tree: &Value) -> Visit {
    Visit {
        pending: vec![tree.clone()],
        seen: HashSet::new(),
    }
}

// ============================================================================
// TRANSFORM
// ============================================================================

enum Task {
    Enter(Value),
    BuildList(Arc<Vec<Value>>),
    BuildNode(Arc<Node>),
}

/// Rebuilds a tree bottom-up, passing every node to `callback` after its
/// fields have been transformed.
///
/// Lists and nodes whose children all come back unchanged are reused rather
/// than copied, so an identity callback returns the same tree.
pub fn transform<F>(tree: &Value, mut callback: F) -> Value
where
    F: FnMut(Value) -> Value,
{
    let mut tasks = vec![Task::Enter(tree.clone())];
    let mut done: Vec<Value> = Vec::new();
    let mut memo: HashMap<*const Node, Value> = HashMap::new();

    while let Some(task) = tasks.pop() {
        match task {
            Task::Enter(Value::List(items)) => {
                tasks.push(Task::BuildList(Arc::clone(&items)));
                tasks.extend(items.iter().rev().cloned().map(Task::Enter));
            }
            Task::Enter(Value::Node(node)) => {
                if let Some(result) = memo.get(&Arc::as_ptr(&node)) {
                    done.push(result.clone());
                    continue;
                }
                tasks.push(Task::BuildNode(Arc::clone(&node)));
                tasks.extend(node.values().iter().rev().cloned().map(Task::Enter));
            }
            Task::Enter(other) => done.push(other),
            Task::BuildList(items) => {
                let children = done.split_off(done.len() - items.len());
                if unchanged(&items, &children) {
                    done.push(Value::List(items));
                } else {
                    done.push(Value::list(children));
                }
            }
            Task::BuildNode(node) => {
                let children = done.split_off(done.len() - node.values().len());
                let rebuilt = if unchanged(node.values(), &children) {
                    Value::Node(Arc::clone(&node))
                } else {
                    Value::node(node.with_values(children))
                };
                let result = callback(rebuilt);
                memo.insert(Arc::as_ptr(&node), result.clone());
                done.push(result);
            }
        }
    }
    done.pop().unwrap_or_default()
}

/// `transform` with several callbacks applied in order at each node.
pub fn transform_all(tree: &Value, callbacks: &mut [&mut dyn FnMut(Value) -> Value]) -> Value {
    transform(tree, |node| {
        callbacks.iter_mut().fold(node, |value, callback| callback(value))
    })
}

fn unchanged(before: &[Value], after: &[Value]) -> bool {
    before.len() == after.len() && before.iter().zip(after).all(|(a, b)| a.ptr_eq(b))
}

/// Fills in line and column numbers of class-node positions.
pub(crate) fn resolve_positions(tree: &Value, text: &Text, table: &LineTable) -> Value {
    transform(tree, |value| {
        let info = value.as_node().and_then(|node| node.position_info().copied());
        match (info, &value) {
            (Some(info), Value::Node(node)) if info.start.line == 0 => {
                let resolved = PositionInfo {
                    start: table.position(text, info.start.index),
                    end: table.position(text, info.end.index),
                };
                Value::node(node.as_ref().clone().with_position_info(resolved))
            }
            _ => value,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{NodeClass, Position};

    fn pair(a: Value, b: Value) -> Value {
        let class = Arc::new(NodeClass::new("Pair", &["a", "b"]));
        Value::node(Node::new(class, vec![a, b]))
    }

    #[test]
    fn test_visit_yields_shared_nodes_once() {
        let leaf = pair(Value::Int(1), Value::Int(2));
        let tree = Value::list(vec![leaf.clone(), pair(leaf.clone(), Value::None), leaf]);
        assert_eq!(visit(&tree).count(), 2);
    }

    #[test]
    fn test_visit_handles_deep_trees() {
        let mut tree = Value::Int(0);
        for i in 0..2_000 {
            tree = Value::prefix(Value::Int(i), tree);
        }
        assert_eq!(visit(&tree).count(), 2_000);
    }

    #[test]
    fn test_identity_transform_reuses_tree() {
        let tree = Value::list(vec![pair(Value::Int(1), Value::list(vec![Value::None]))]);
        let same = transform(&tree, |v| v);
        assert!(same.ptr_eq(&tree));
    }

    #[test]
    fn test_transform_rebuilds_only_changed_paths() {
        let untouched = pair(Value::Int(5), Value::Int(6));
        let tree = Value::list(vec![untouched.clone(), Value::infix(1i64.into(), "+".into(), 2i64.into())]);
        let folded = transform(&tree, |value| match value.as_node() {
            Some(node) if node.class_name() == "Infix" => {
                let left = node.get("left").and_then(Value::as_int).unwrap_or(0);
                let right = node.get("right").and_then(Value::as_int).unwrap_or(0);
                Value::Int(left + right)
            }
            _ => value,
        });
        let items = folded.as_list().unwrap();
        assert_eq!(items[1], Value::Int(3));
        assert!(items[0].ptr_eq(&untouched));
        assert!(!folded.ptr_eq(&tree));
    }

    #[test]
    fn test_transform_all_applies_callbacks_in_order() {
        let tree = Value::prefix("-".into(), Value::Int(4));
        let mut negate = |v: Value| match v.as_node() {
            Some(n) if n.class_name() == "Prefix" => Value::Int(-n.get("right").and_then(Value::as_int).unwrap_or(0)),
            _ => v,
        };
        let mut double = |v: Value| match v {
            Value::Int(i) => Value::Int(i * 2),
            other => other,
        };
        let result = transform_all(&tree, &mut [&mut negate, &mut double]);
        assert_eq!(result, Value::Int(-8));
    }

    #[test]
    fn test_resolve_positions() {
        let text = Text::from("ab\ncd");
        let table = LineTable::new(&text);
        let class = Arc::new(NodeClass::new("Word", &["text"]));
        let node = Node::new(class, vec![Value::str("cd")]).with_position_info(PositionInfo {
            start: Position::unresolved(3),
            end: Position::unresolved(5),
        });
        let resolved = resolve_positions(&Value::node(node), &text, &table);
        let info = *resolved.as_node().unwrap().position_info().unwrap();
        assert_eq!(info.start, Position::new(3, 2, 1));
        assert_eq!(info.end, Position::new(5, 2, 3));
    }
}
