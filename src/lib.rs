pub use crate::diagnostics::{to_error_source, ErrorContext, ErrorType, ParseError, PartialParseError, SourcerError};
pub use crate::grammar::{Grammar, GrammarBuilder};
pub use crate::options::GrammarOptions;
pub use crate::runtime::text::Text;
pub use crate::runtime::tree::{transform, transform_all, visit, Visit};
pub use crate::runtime::{BoundRule, ParserModule, Rule};
pub use crate::value::{Callable, NativeFn, Node, NodeClass, Position, PositionInfo, Value};

pub mod analysis;
pub mod ast;
pub mod diagnostics;
pub mod emit;
pub mod expr;
pub mod grammar;
pub mod host;
pub mod lowering;
pub mod options;
pub mod runtime;
pub mod syntax;
pub mod value;
