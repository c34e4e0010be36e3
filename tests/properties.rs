//! Property tests over generated parsers.

mod common;

use common::{grammar, ints, ARITH_PRELUDE};
use once_cell::sync::Lazy;
use proptest::prelude::*;
use sourcer::{visit, Grammar, ParserModule, Value};

const CALCULATOR: &str = r#"
    start = OperatorPrecedence(
        int | "(" >> start << ")" | ["[", start // ",", "]"],
        Prefix("-"),
        RightAssoc("^"),
        LeftAssoc("*", "/"),
        LeftAssoc("+", "-"),
    )
"#;

fn calculator(max_blocks: usize) -> ParserModule {
    Grammar::builder(&format!("{ARITH_PRELUDE}{CALCULATOR}"))
        .max_blocks(max_blocks)
        .build()
        .unwrap()
}

static NESTED: Lazy<ParserModule> = Lazy::new(|| calculator(2));
static FLAT: Lazy<ParserModule> = Lazy::new(|| calculator(20));
static BOUNDED: Lazy<ParserModule> = Lazy::new(|| grammar(r#"start = "a"{2,4}"#));
static NUMBERS: Lazy<ParserModule> = Lazy::new(|| {
    grammar(&format!(
        r#"{ARITH_PRELUDE}
        start = int // ",""#
    ))
});
static LOOKAHEAD: Lazy<ParserModule> =
    Lazy::new(|| grammar(r#"start = [Expect(/[a-z]+/), /[a-z]+/, ExpectNot(/./)]"#));

fn outcome(module: &ParserModule, input: &str) -> Result<Value, String> {
    module.parse(input).map_err(|e| e.message())
}

fn token() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["1", "23", "+", "-", "*", "^", "(", ")", "[", "]", ",", " "])
}

proptest! {
    #[test]
    fn test_function_splitting_does_not_change_results(tokens in prop::collection::vec(token(), 0..24)) {
        let input = tokens.concat();
        prop_assert_eq!(outcome(&NESTED, &input), outcome(&FLAT, &input));
    }

    #[test]
    fn test_repetition_bounds(n in 0usize..8) {
        let input = "a".repeat(n);
        let result = BOUNDED.parse(input.as_str());
        prop_assert_eq!(result.is_ok(), (2..=4).contains(&n));
        if let Ok(Value::List(items)) = result {
            prop_assert_eq!(items.len(), n);
        }
    }

    #[test]
    fn test_separated_numbers(values in prop::collection::vec(0i64..100_000, 1..12)) {
        let input = values.iter().map(i64::to_string).collect::<Vec<_>>().join(" , ");
        prop_assert_eq!(NUMBERS.parse(input.as_str()).unwrap(), ints(&values));
    }

    #[test]
    fn test_lookahead_does_not_consume(word in "[a-z]{1,12}") {
        let tree = LOOKAHEAD.parse(word.as_str()).unwrap();
        let items = tree.as_list().unwrap();
        prop_assert_eq!(&items[0], &items[1]);
        prop_assert_eq!(items[1].as_str(), Some(word.as_str()));
    }

    #[test]
    fn test_sum_has_one_node_per_operator(values in prop::collection::vec(0i64..50, 1..16)) {
        let input = values.iter().map(i64::to_string).collect::<Vec<_>>().join("+");
        let tree = FLAT.parse(input.as_str()).unwrap();
        prop_assert_eq!(visit(&tree).count(), values.len() - 1);
    }
}
