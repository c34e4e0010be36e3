//! Shared helpers for the integration tests.
#![allow(dead_code)]

use sourcer::{Grammar, ParserModule, SourcerError, Value};

/// Builds a module, panicking with the rendered diagnostic on failure.
pub fn grammar(description: &str) -> ParserModule {
    match Grammar::new(description) {
        Ok(module) => module,
        Err(err) => panic!("grammar failed to build:\n{:?}", miette::Report::new(err)),
    }
}

pub fn int(i: i64) -> Value {
    Value::Int(i)
}

pub fn s(text: &str) -> Value {
    Value::str(text)
}

pub fn ints(items: &[i64]) -> Value {
    Value::list(items.iter().copied().map(Value::Int).collect())
}

/// Integer atoms with whitespace skipped between tokens.
pub const ARITH_PRELUDE: &str = r#"
    ignored space = /\s+/
    int = /[0-9]+/ |> `int`
"#;

pub fn build_error(description: &str) -> SourcerError {
    match Grammar::new(description) {
        Ok(_) => panic!("expected the grammar to be rejected:\n{description}"),
        Err(err) => err,
    }
}
