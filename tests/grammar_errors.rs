//! Grammar descriptions that must be rejected at build time.

mod common;

use common::build_error;
use miette::Diagnostic;
use rstest::rstest;
use sourcer::ErrorType;

#[rstest]
#[case::duplicate_rule("a = \"x\"\na = \"y\"", "duplicate rule name 'a'")]
#[case::underscore_name("_hidden = \"x\"", "cannot start with an underscore")]
#[case::undefined_rule("start = missing", "undefined rule 'missing'")]
#[case::ignored_start("ignored start = \"a\"", "the start rule cannot be ignored")]
#[case::inverted_bounds("start = \"a\"{3,1}", "invalid repetition bounds")]
#[case::bad_regex("start = /[a/", "invalid regular expression")]
#[case::empty_description("   \n  ", "the grammar description is empty")]
#[case::syntax_error("start = [\"a\",", "invalid grammar description")]
#[case::undefined_host_name("start = \"a\" |> `nope`", "undefined name 'nope'")]
#[case::unknown_keyword("start = Sep(\"a\", \",\", bogus=\"b\")", "got an unexpected keyword argument 'bogus'")]
#[case::missing_rule_argument("pair(x) = [x, x]\nstart = pair()", "missing argument 'x'")]
fn test_rejected_grammars(#[case] description: &str, #[case] fragment: &str) {
    let err = build_error(description);
    assert_eq!(err.error_type(), ErrorType::Grammar, "{}", err.message());
    assert!(
        err.message().contains(fragment),
        "expected {:?} in {:?}",
        fragment,
        err.message()
    );
}

#[test]
fn test_grammar_errors_point_into_the_description() {
    let err = build_error("start = [\"a\", missing]");
    assert!(err.labels().is_some());
    let rendered = format!("{:?}", miette::Report::new(err));
    assert!(rendered.contains("missing"));
}

#[test]
fn test_invalid_options_are_rejected() {
    let err = sourcer::Grammar::builder("start = \"a\"").max_blocks(1).build().unwrap_err();
    assert!(err.message().contains("max_blocks"));
}
