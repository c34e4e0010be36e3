//! End-to-end parses through the public API.

mod common;

use common::{grammar, int, ints, s, ARITH_PRELUDE};
use sourcer::{ErrorType, Value};

#[test]
fn test_arithmetic_precedence_and_associativity() {
    let module = grammar(&format!(
        r#"{ARITH_PRELUDE}
        start = OperatorPrecedence(
            int,
            LeftAssoc("*", "/"),
            LeftAssoc("+", "-"),
        )"#
    ));
    let tree = module.parse("1 + 2 * 3").unwrap();
    assert_eq!(tree, Value::infix(int(1), s("+"), Value::infix(int(2), s("*"), int(3))));

    let tree = module.parse("  8 - 4 - 2").unwrap();
    assert_eq!(tree, Value::infix(Value::infix(int(8), s("-"), int(4)), s("-"), int(2)));
}

#[test]
fn test_right_associative_operator() {
    let module = grammar(&format!(
        r#"{ARITH_PRELUDE}
        start = OperatorPrecedence(int, RightAssoc("^"))"#
    ));
    let tree = module.parse("2 ^ 3 ^ 4").unwrap();
    assert_eq!(tree, Value::infix(int(2), s("^"), Value::infix(int(3), s("^"), int(4))));
}

#[test]
fn test_separated_list_with_optional_trailer() {
    let module = grammar(
        r#"
        int = /[0-9]+/ |> `int`
        start = int /? ","
        "#,
    );
    assert_eq!(module.parse("1,2,3,").unwrap(), ints(&[1, 2, 3]));
    assert_eq!(module.parse("1,2,3").unwrap(), ints(&[1, 2, 3]));
    assert_eq!(module.parse("").unwrap(), ints(&[]));
    assert!(module.parse("1,,2").is_err());
}

#[test]
fn test_class_node_carries_position_info() {
    let module = grammar(&format!(
        r#"{ARITH_PRELUDE}
        class Pair {{ a: int  b: int }}"#
    ));
    let pair = module.rule("Pair").unwrap().parse("7 42").unwrap();
    let node = pair.as_node().unwrap();
    assert_eq!(node.class_name(), "Pair");
    assert_eq!(node.get("a"), Some(&int(7)));
    assert_eq!(node.get("b"), Some(&int(42)));
    assert_eq!(pair.to_string(), "Pair(a=7, b=42)");

    let info = node.position_info().unwrap();
    assert_eq!(info.start.index, 0);
    assert_eq!(info.end.index, 4);
    assert_eq!((info.start.line, info.start.column), (1, 1));
    assert_eq!((info.end.line, info.end.column), (1, 5));
}

#[test]
fn test_farthest_failure_is_reported() {
    let module = grammar(r#"start = ["foo", "bar"] | "fox""#);
    let err = module.parse("foobaz").unwrap_err();
    assert_eq!(err.error_type(), ErrorType::Parse);

    let parse_error = err.as_parse_error().unwrap();
    assert_eq!(parse_error.position.index, 3);
    assert_eq!(parse_error.position.column, 4);
    assert_eq!(parse_error.rule, "start");
    assert!(parse_error.message.starts_with("Error on line 1, column 4:\nfoobaz\n   ^\n"));
    assert!(parse_error.message.contains("Failed to parse the 'start' rule"));
    assert!(parse_error.message.ends_with("Expected to match the string 'bar'"));
}

/// `"foo" | "foobar"` on `foobaz`: ordered choice commits to `"foo"`, so the
/// leftover input is reported rather than a failure inside `"foobar"`. The
/// farthest-failure case is covered by `test_farthest_failure_is_reported`.
#[test]
fn test_shorter_alternative_leaves_input_unconsumed() {
    let module = grammar(r#"start = "foo" | "foobar""#);
    let err = module.parse("foobaz").unwrap_err();
    let partial = err.as_partial_parse_error().unwrap();
    assert_eq!(partial.last_position.index, 3);
    assert_eq!(partial.partial_result, s("foo"));
}

#[test]
fn test_equal_failure_positions_prefer_later_alternative() {
    let module = grammar(r#"start = ["a", "x"] | ["a", "y"]"#);
    let err = module.parse("az").unwrap_err();
    assert!(err.message().ends_with("Expected to match the string 'y'"));
}

#[test]
fn test_partial_parse() {
    let module = grammar(r#"start = "a""#);
    let err = module.parse("ab").unwrap_err();
    assert_eq!(err.error_type(), ErrorType::PartialParse);
    let partial = err.as_partial_parse_error().unwrap();
    assert_eq!(partial.last_position.index, 1);
    assert_eq!(partial.partial_result, s("a"));
    assert!(partial.message.starts_with("Incomplete parse. Unexpected input on line 1, column 2:"));

    assert_eq!(module.parse_with("ab", 0, false).unwrap(), s("a"));
}

#[test]
fn test_parse_from_offset() {
    let module = grammar(r#"start = "b"+"#);
    assert_eq!(module.parse_with("aabb", 2, true).unwrap(), Value::list(vec![s("b"), s("b")]));
    assert!(module.parse_with("ab", 5, true).is_err());
}

#[test]
fn test_binary_input() {
    let module = grammar(r#"start = [b"\x00GIF", b/[0-9]+/]"#);
    let tree = module.parse(&b"\x00GIF89"[..]).unwrap();
    assert_eq!(tree, Value::list(vec![Value::bytes(b"\x00GIF"), Value::bytes(b"89")]));

    let err = module.parse(&b"\x00GIX"[..]).unwrap_err();
    assert!(err.message().contains("b'\\x00G'"));
}

#[test]
fn test_case_insensitive_literals() {
    let module = grammar(r#"start = ["select"i, /[a-z]+/i]"#);
    assert_eq!(module.parse("SeLeCtFOO").unwrap(), Value::list(vec![s("SeLeCt"), s("FOO")]));
}

#[test]
fn test_bare_expression_becomes_start_rule() {
    let module = grammar(r#""x" | "y""#);
    let start = module.default_rule().unwrap();
    assert_eq!(start.name(), "start");
    assert_eq!(module.parse("y").unwrap(), s("y"));
}
