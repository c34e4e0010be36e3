//! Syntax module for grammar descriptions
//!
//! Reads the textual grammar language into the meta AST (`crate::ast`).

pub mod parser;

pub use parser::parse;
