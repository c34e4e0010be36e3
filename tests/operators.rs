//! Operator-precedence rules.

mod common;

use common::{grammar, int, s, ARITH_PRELUDE};
use rstest::rstest;
use sourcer::{ParserModule, Value};

fn calculator() -> ParserModule {
    grammar(&format!(
        r#"{ARITH_PRELUDE}
        start = OperatorPrecedence(
            int | "(" >> start << ")",
            Prefix("-"),
            Postfix("!"),
            RightAssoc("^"),
            LeftAssoc("*", "/"),
            LeftAssoc("+", "-"),
        )"#
    ))
}

fn infix(left: Value, op: &str, right: Value) -> Value {
    Value::infix(left, s(op), right)
}

#[rstest]
#[case("7", int(7))]
#[case("-2 ^ 3", infix(Value::prefix(s("-"), int(2)), "^", int(3)))]
#[case("- - 4", Value::prefix(s("-"), Value::prefix(s("-"), int(4))))]
#[case("3!!", Value::postfix(Value::postfix(int(3), s("!")), s("!")))]
#[case("1 - 2 - 3", infix(infix(int(1), "-", int(2)), "-", int(3)))]
#[case("1 * (2 + 3)", infix(int(1), "*", infix(int(2), "+", int(3))))]
#[case("2 ^ 2 * 3", infix(infix(int(2), "^", int(2)), "*", int(3)))]
fn test_calculator_trees(#[case] input: &str, #[case] expected: Value) {
    assert_eq!(calculator().parse(input).unwrap(), expected);
}

#[test]
fn test_missing_operand_fails() {
    let err = calculator().parse("1 +").unwrap_err();
    let partial = err.as_partial_parse_error().unwrap();
    assert_eq!(partial.partial_result, int(1));
    assert_eq!(partial.last_position.index, 2);
}

#[test]
fn test_non_associative_level_stops_after_one_operator() {
    let module = grammar(&format!(
        r#"{ARITH_PRELUDE}
        start = OperatorPrecedence(int, NonAssoc("<"))"#
    ));
    assert_eq!(module.parse("1 < 2").unwrap(), infix(int(1), "<", int(2)));

    let err = module.parse("1 < 2 < 3").unwrap_err();
    let partial = err.as_partial_parse_error().unwrap();
    assert_eq!(partial.partial_result, infix(int(1), "<", int(2)));
    assert_eq!(partial.last_position.index, 6);
}

#[test]
fn test_operator_levels_accept_rule_references() {
    let module = grammar(&format!(
        r#"{ARITH_PRELUDE}
        add_op = "+" | "-"
        start = OperatorPrecedence(int, LeftAssoc(add_op))"#
    ));
    assert_eq!(module.parse("4 - 1").unwrap(), infix(int(4), "-", int(1)));
}

#[test]
fn test_operator_nodes_are_host_constructible() {
    let module = grammar(&format!(
        r#"{ARITH_PRELUDE}
        start = [int, "+", int] |> `lambda xs: Infix(xs[0], xs[1], xs[2])`"#
    ));
    assert_eq!(module.parse("1 + 2").unwrap(), infix(int(1), "+", int(2)));
}

#[test]
fn test_precedence_inside_parameterized_rule() {
    let module = grammar(&format!(
        r#"{ARITH_PRELUDE}
        expr(atom) = OperatorPrecedence(atom, LeftAssoc("+"))
        start = expr(int)"#
    ));
    assert_eq!(module.parse("1 + 2 + 3").unwrap(), infix(infix(int(1), "+", int(2)), "+", int(3)));
}
