//! `visit`, `transform` and JSON export on parsed trees.

mod common;

use common::{grammar, int, ARITH_PRELUDE};
use sourcer::{transform, transform_all, visit, ParserModule, Value};

fn calculator() -> ParserModule {
    grammar(&format!(
        r#"{ARITH_PRELUDE}
        start = OperatorPrecedence(
            int | "(" >> start << ")",
            LeftAssoc("*"),
            LeftAssoc("+", "-"),
        )"#
    ))
}

fn evaluate(value: Value) -> Value {
    let Some(node) = value.as_node() else {
        return value;
    };
    let operands = (
        node.get("left").and_then(Value::as_int),
        node.get("operator").and_then(Value::as_str),
        node.get("right").and_then(Value::as_int),
    );
    match operands {
        (Some(l), Some("+"), Some(r)) => int(l + r),
        (Some(l), Some("-"), Some(r)) => int(l - r),
        (Some(l), Some("*"), Some(r)) => int(l * r),
        _ => value,
    }
}

#[test]
fn test_transform_folds_a_parsed_expression() {
    let tree = calculator().parse("2 * (3 + 4) - 1").unwrap();
    assert_eq!(transform(&tree, evaluate), int(13));
}

#[test]
fn test_visit_yields_operator_nodes_parents_first() {
    let tree = calculator().parse("1 + 2 * 3").unwrap();
    let ops: Vec<String> = visit(&tree)
        .map(|node| node.get("operator").map(Value::to_display_string).unwrap_or_default())
        .collect();
    assert_eq!(ops, ["+", "*"]);
}

#[test]
fn test_visit_walks_class_fields_inside_lists() {
    let module = grammar(&format!(
        r#"{ARITH_PRELUDE}
        class Item {{ value: int }}
        start = Item+"#
    ));
    let tree = module.parse("1 2 3").unwrap();
    let values: Vec<Value> = visit(&tree)
        .filter_map(|node| node.get("value").cloned())
        .collect();
    assert_eq!(values, [int(1), int(2), int(3)]);
}

#[test]
fn test_transform_all_runs_callbacks_in_order() {
    let tree = calculator().parse("1 + 2").unwrap();
    let mut seen = Vec::new();
    let mut record = |value: Value| {
        seen.push(value.to_string());
        value
    };
    let mut fold = evaluate;
    let result = transform_all(&tree, &mut [&mut record, &mut fold]);
    assert_eq!(result, int(3));
    assert_eq!(seen.len(), 1);
}

#[test]
fn test_identity_transform_keeps_the_tree() {
    let tree = calculator().parse("1 + 2 * 3").unwrap();
    let same = transform(&tree, |value| value);
    assert!(same.ptr_eq(&tree));
}

#[test]
fn test_json_export_of_class_nodes() {
    let module = grammar(&format!(
        r#"{ARITH_PRELUDE}
        class Pair {{ a: int  b: "x" }}"#
    ));
    let tree = module.rule("Pair").unwrap().parse("5 x").unwrap();
    assert_eq!(
        tree.to_json(),
        serde_json::json!({ "type": "Pair", "a": 5, "b": "x" })
    );
}
