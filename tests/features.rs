//! Parameterized rules, bindings, host code and module reflection.

mod common;

use common::{grammar, int, ints, s, ARITH_PRELUDE};
use sourcer::{ErrorType, Grammar, GrammarOptions, Value};

#[test]
fn test_parameterized_rule() {
    let module = grammar(&format!(
        r#"{ARITH_PRELUDE}
        list_of(item) = item // ","
        start = list_of(int)"#
    ));
    assert_eq!(module.parse("1, 2 ,3").unwrap(), ints(&[1, 2, 3]));

    let rule = module.rule("list_of").unwrap();
    assert_eq!(rule.params(), Some(&["item".to_string()][..]));
    let err = rule.parse("1").unwrap_err();
    assert_eq!(err.error_type(), ErrorType::Host);
}

#[test]
fn test_bound_rule_takes_parsers_and_values() {
    let module = grammar(
        r#"
        int = /[0-9]+/ |> `int`
        wrap(x) = ["<", x, ">"]
        "#,
    );
    let wrap = module.rule("wrap").unwrap();
    let int_parser = module.rule("int").unwrap().as_parser();

    let bound = wrap.bind(vec![int_parser]).unwrap();
    assert_eq!(bound.parse("<4>").unwrap(), Value::list(vec![s("<"), int(4), s(">")]));

    let constant = wrap.bind(vec![int(5)]).unwrap();
    assert_eq!(constant.parse("<>").unwrap(), Value::list(vec![s("<"), int(5), s(">")]));

    assert!(wrap.bind(Vec::new()).is_err());
}

#[test]
fn test_let_binds_a_result_for_host_code() {
    let module = grammar(
        r#"
        int = /[0-9]+/ |> `int`
        start = let n = int in ["-", `n * 2`]
        "#,
    );
    assert_eq!(module.parse("3-").unwrap(), Value::list(vec![s("-"), int(6)]));
}

#[test]
fn test_where_predicate_sees_earlier_fields() {
    let module = grammar(&format!(
        r#"{ARITH_PRELUDE}
        class Range {{
            lo: int
            hi: int where `lambda h: h >= lo`
        }}"#
    ));
    let range = module.rule("Range").unwrap();
    let node = range.parse("1 5").unwrap();
    assert_eq!(node.as_node().unwrap().get("hi"), Some(&int(5)));

    let err = range.parse("5 1").unwrap_err();
    assert_eq!(err.error_type(), ErrorType::Parse);
    assert!(err.message().contains("Expected to satisfy the predicate"));
}

#[test]
fn test_where_with_named_predicate() {
    let module = grammar(r#"start = (/[0-9]+/ |> `int`) where `bool`"#);
    assert_eq!(module.parse("7").unwrap(), int(7));

    let err = module.parse("0").unwrap_err();
    assert_eq!(err.error_type(), ErrorType::Parse);
    assert!(err.message().ends_with("Expected to satisfy the predicate: bool"));
}

#[test]
fn test_where_with_lambda_predicate() {
    let module = grammar(r#"start = (/[0-9]+/ |> `int`) where `lambda n: n > 5 and not n == 9`"#);
    assert_eq!(module.parse("6").unwrap(), int(6));
    assert!(module.parse("3").is_err());
    let err = module.parse("9").unwrap_err();
    assert!(err
        .message()
        .ends_with("Expected to satisfy the predicate: lambda n: n > 5 and not n == 9"));
}

#[test]
fn test_host_conditionals_and_boolean_operators() {
    let module = grammar(
        r#"
        ```
        sign = lambda n: "neg" if n < 0 else "zero" if n == 0 else "pos"
        ```
        start = /-?[0-9]+/ |> `lambda s: sign(int(s))`
        "#,
    );
    assert_eq!(module.parse("-4").unwrap(), s("neg"));
    assert_eq!(module.parse("0").unwrap(), s("zero"));
    assert_eq!(module.parse("12").unwrap(), s("pos"));
}

#[test]
fn test_left_recursion_is_reported() {
    let module = grammar(r#"start = [start, "a"]"#);
    let err = module.parse("aa").unwrap_err();
    assert_eq!(err.error_type(), ErrorType::Parse);
    assert!(err.message().ends_with("Left recursion is not supported"));
}

#[test]
fn test_left_recursive_alternative_falls_through() {
    let module = grammar(r#"start = [start, "a"] | "b""#);
    assert_eq!(module.parse("b").unwrap(), s("b"));
}

#[test]
fn test_host_section_definitions() {
    let module = grammar(
        r#"
        ```
        scale = 10
        times_scale = lambda x: x * scale
        ```
        start = /[0-9]+/ |> `lambda s: times_scale(int(s))`
        "#,
    );
    assert_eq!(module.parse("4").unwrap(), int(40));
    assert_eq!(module.global("scale"), Some(int(10)));
}

#[test]
fn test_host_section_errors_surface_at_build_time() {
    let err = Grammar::new(
        r#"
        ```
        broken = 1 // 0
        ```
        start = "a"
        "#,
    )
    .unwrap_err();
    assert!(err.message().contains("while loading 'broken'"));
}

#[test]
fn test_registered_host_function() {
    let module = Grammar::builder(r#"start = /[a-z]+/ |> `count`"#)
        .host_fn("count", |args| Ok(Value::Int(args[0].to_display_string().len() as i64)))
        .build()
        .unwrap();
    assert_eq!(module.parse("hello").unwrap(), int(5));
}

#[test]
fn test_host_errors_abort_the_parse() {
    let module = grammar(r#"start = /[a-z]+/ |> `int`"#);
    let err = module.parse("abc").unwrap_err();
    assert_eq!(err.error_type(), ErrorType::Host);
}

#[test]
fn test_expect_and_expect_not() {
    let module = grammar(r#"start = [Expect("ab"), /[a-z]+/]"#);
    assert_eq!(module.parse("abc").unwrap(), Value::list(vec![s("ab"), s("abc")]));
    assert!(module.parse("acb").is_err());

    let module = grammar(r#"start = [ExpectNot("x"), /[a-z]+/]"#);
    assert!(module.parse("abc").is_ok());
    let err = module.parse("xyz").unwrap_err();
    assert!(err.message().contains("Did not expect to match"));
}

#[test]
fn test_fail_reports_its_message() {
    let module = grammar(r#"start = Fail("nothing parses here")"#);
    let err = module.parse("").unwrap_err();
    assert!(err.message().ends_with("nothing parses here"));
}

#[test]
fn test_rule_reflection() {
    let module = grammar(&format!(
        r#"{ARITH_PRELUDE}
        class Point {{ x: int  y: int }}
        start = Point"#
    ));
    let names: Vec<String> = module.rules().iter().map(|r| r.name().to_string()).collect();
    assert_eq!(names, ["space", "int", "Point", "start"]);

    let space = module.rule("space").unwrap();
    assert!(space.is_ignored());
    assert!(module.rule("Point").unwrap().is_class());
    assert_eq!(module.rule("start").unwrap().definition(), "start = Point");
    assert!(module.rule("_ignored").is_none());
    assert!(module.source().is_none());
}

#[test]
fn test_builder_options() {
    let options = GrammarOptions::from_json(r#"{"name": "calc", "include_source": true}"#).unwrap();
    let module = Grammar::builder(r#"start = "a""#).options(options).build().unwrap();
    assert_eq!(module.name(), "calc");
    let listing = module.source().unwrap();
    assert!(listing.contains("# rules"));
    assert!(listing.contains("start"));
}
