//! Sourcer Error Handling
//!
//! This module defines the unified, `miette`-based diagnostic system for the
//! generator and for every parser it produces. Three families of failure
//! reach callers:
//!
//! - **Grammar-construction errors** (`SourcerError::Grammar`), raised before
//!   any parser exists: malformed descriptions, duplicate or badly named
//!   rules, invalid repetition bounds, undefined names.
//! - **Parse failures** (`SourcerError::Parse`), raised by a generated parser
//!   when its root rule fails. They carry the farthest failure position and a
//!   rendered excerpt of the input.
//! - **Incomplete parses** (`SourcerError::PartialParse`), raised when a full
//!   parse was requested but input remained after the root rule succeeded.
//!
//! Host-expression evaluation problems surface as `SourcerError::Host`.
//!
//! # Error Construction Macros
//!
//! - `err_msg!(Grammar, "duplicate rule '{}'", name)` for message-only errors.
//! - `err_ctx!(Grammar, message, src, span)` when a source and span are known.
//!
//! Inside the parser runtime, failure is not exceptional: it travels through
//! the STATUS register. Only the public `parse` boundary converts a failed
//! root outcome into one of these errors.

use std::fmt;
use std::sync::Arc;

use miette::{Diagnostic, LabeledSpan, NamedSource, SourceCode};
use thiserror::Error;

use crate::ast::Span;
use crate::value::{Position, Value};

// ============================================================================
// SOURCE CONTEXT
// ============================================================================

pub type SourceArc = Arc<NamedSource<String>>;

/// Converts a source string into an `Arc<NamedSource<String>>` for error contexts.
pub fn to_error_source<S: AsRef<str>>(name: &str, source: S) -> SourceArc {
    Arc::new(NamedSource::new(name, source.as_ref().to_string()))
}

/// Type-safe error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// The grammar description could not be turned into a parser.
    Grammar,
    /// The root rule failed.
    Parse,
    /// The root rule succeeded without consuming all input.
    PartialParse,
    /// A host expression failed while parsing or while loading the module.
    Host,
    /// Broken generator invariants.
    Internal,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Grammar => "Grammar",
            ErrorType::Parse => "Parse",
            ErrorType::PartialParse => "PartialParse",
            ErrorType::Host => "Host",
            ErrorType::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Minimal, composable error context for diagnostics.
#[derive(Debug, Default, Clone)]
pub struct ErrorContext {
    /// The primary source for this error (if any).
    pub source: Option<SourceArc>,
    /// The primary span for this error (if any).
    pub span: Option<Span>,
    /// An optional help message.
    pub help: Option<String>,
}

impl ErrorContext {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_source_and_span(source: SourceArc, span: Span) -> Self {
        Self {
            source: Some(source),
            span: Some(span),
            help: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

// ============================================================================
// THE ERROR TYPE
// ============================================================================

/// Unified error type for the generator and the generated parsers.
#[derive(Debug, Error)]
pub enum SourcerError {
    #[error("Grammar error: {message}")]
    Grammar { message: String, ctx: ErrorContext },
    #[error("Host error: {message}")]
    Host { message: String, ctx: ErrorContext },
    #[error("Internal error: {message}")]
    Internal { message: String, ctx: ErrorContext },
    #[error(transparent)]
    Parse(Box<ParseError>),
    #[error(transparent)]
    PartialParse(Box<PartialParseError>),
}

impl SourcerError {
    fn ctx(&self) -> Option<&ErrorContext> {
        match self {
            SourcerError::Grammar { ctx, .. }
            | SourcerError::Host { ctx, .. }
            | SourcerError::Internal { ctx, .. } => Some(ctx),
            SourcerError::Parse(_) | SourcerError::PartialParse(_) => None,
        }
    }

    /// Returns the type-safe classification for this error.
    pub fn error_type(&self) -> ErrorType {
        match self {
            SourcerError::Grammar { .. } => ErrorType::Grammar,
            SourcerError::Host { .. } => ErrorType::Host,
            SourcerError::Internal { .. } => ErrorType::Internal,
            SourcerError::Parse(_) => ErrorType::Parse,
            SourcerError::PartialParse(_) => ErrorType::PartialParse,
        }
    }

    /// The bare message, without the classification prefix.
    pub fn message(&self) -> String {
        match self {
            SourcerError::Grammar { message, .. }
            | SourcerError::Host { message, .. }
            | SourcerError::Internal { message, .. } => message.clone(),
            SourcerError::Parse(err) => err.message.clone(),
            SourcerError::PartialParse(err) => err.message.clone(),
        }
    }

    /// Where in the parsed input the error occurred, for parse failures.
    pub fn position(&self) -> Option<Position> {
        match self {
            SourcerError::Parse(err) => Some(err.position),
            SourcerError::PartialParse(err) => Some(err.last_position),
            _ => None,
        }
    }

    pub fn as_parse_error(&self) -> Option<&ParseError> {
        match self {
            SourcerError::Parse(err) => Some(err),
            _ => None,
        }
    }

    pub fn as_partial_parse_error(&self) -> Option<&PartialParseError> {
        match self {
            SourcerError::PartialParse(err) => Some(err),
            _ => None,
        }
    }

    /// Attaches a grammar source and span when the error has none yet.
    pub fn with_context(mut self, source: &SourceArc, span: Span) -> Self {
        if let SourcerError::Grammar { ctx, .. } | SourcerError::Host { ctx, .. } = &mut self {
            if ctx.source.is_none() {
                ctx.source = Some(Arc::clone(source));
                ctx.span = Some(span);
            }
        }
        self
    }
}

impl Diagnostic for SourcerError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(format!("sourcer::{}", self.error_type().as_str().to_lowercase())))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        match self {
            SourcerError::Parse(err) => err.help(),
            SourcerError::PartialParse(err) => err.help(),
            _ => self
                .ctx()
                .and_then(|ctx| ctx.help.as_ref())
                .map(|h| Box::new(h) as Box<dyn fmt::Display + 'a>),
        }
    }

    fn source_code(&self) -> Option<&dyn SourceCode> {
        match self {
            SourcerError::Parse(err) => err.source_code(),
            SourcerError::PartialParse(err) => err.source_code(),
            _ => self
                .ctx()
                .and_then(|ctx| ctx.source.as_ref())
                .map(|s| s.as_ref() as &dyn SourceCode),
        }
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        match self {
            SourcerError::Parse(err) => err.labels(),
            SourcerError::PartialParse(err) => err.labels(),
            _ => {
                let ctx = self.ctx()?;
                let span = ctx.span?;
                ctx.source.as_ref()?;
                let len = span.end.saturating_sub(span.start).max(1);
                Some(Box::new(std::iter::once(LabeledSpan::new(
                    Some(self.message()),
                    span.start,
                    len,
                ))))
            }
        }
    }
}

impl From<ParseError> for SourcerError {
    fn from(err: ParseError) -> Self {
        SourcerError::Parse(Box::new(err))
    }
}

impl From<PartialParseError> for SourcerError {
    fn from(err: PartialParseError) -> Self {
        SourcerError::PartialParse(Box::new(err))
    }
}

// ============================================================================
// PARSE FAILURES
// ============================================================================

/// Raised when the root rule of a generated parser fails.
#[derive(Debug, Clone)]
pub struct ParseError {
    /// The full multi-line message: header, excerpt, rule, expression, diagnostic.
    pub message: String,
    /// Farthest failure position.
    pub position: Position,
    /// The rule whose expression produced the failure.
    pub rule: String,
    /// The excerpt with caret, as embedded in `message`.
    pub excerpt: String,
    pub(crate) source: Option<SourceArc>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseError {}

impl Diagnostic for ParseError {
    fn source_code(&self) -> Option<&dyn SourceCode> {
        self.source.as_ref().map(|s| s.as_ref() as &dyn SourceCode)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        self.source.as_ref()?;
        Some(Box::new(std::iter::once(LabeledSpan::new(
            Some(format!("while parsing '{}'", self.rule)),
            self.position.index,
            0,
        ))))
    }
}

/// Raised when a full parse was requested and the root rule stopped early.
#[derive(Debug, Clone)]
pub struct PartialParseError {
    pub message: String,
    /// The successful result of the root rule.
    pub partial_result: Value,
    /// Position of the first unconsumed character.
    pub last_position: Position,
    pub excerpt: String,
    pub(crate) source: Option<SourceArc>,
}

impl fmt::Display for PartialParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for PartialParseError {}

impl Diagnostic for PartialParseError {
    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new("pass fullparse = false to accept a prefix of the input"))
    }

    fn source_code(&self) -> Option<&dyn SourceCode> {
        self.source.as_ref().map(|s| s.as_ref() as &dyn SourceCode)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        self.source.as_ref()?;
        Some(Box::new(std::iter::once(LabeledSpan::new(
            Some("unexpected input".to_string()),
            self.last_position.index,
            0,
        ))))
    }
}

// ============================================================================
// CONSTRUCTION MACROS
// ============================================================================

/// Constructs a `SourcerError` variant with a formatted message and no context.
#[macro_export]
macro_rules! err_msg {
    ($variant:ident, $($arg:tt)+) => {
        $crate::SourcerError::$variant {
            message: format!($($arg)+),
            ctx: $crate::ErrorContext::none(),
        }
    };
}

/// Constructs a `SourcerError` variant with a message, a source and a span.
#[macro_export]
macro_rules! err_ctx {
    ($variant:ident, $msg:expr, $src:expr, $span:expr, $help:expr) => {
        $crate::SourcerError::$variant {
            message: $msg.to_string(),
            ctx: $crate::ErrorContext {
                source: Some(::std::sync::Arc::clone($src)),
                span: Some($span),
                help: Some(format!("{}", $help)),
            },
        }
    };
    ($variant:ident, $msg:expr, $src:expr, $span:expr) => {
        $crate::SourcerError::$variant {
            message: $msg.to_string(),
            ctx: $crate::ErrorContext::with_source_and_span(::std::sync::Arc::clone($src), $span),
        }
    };
}

#[cfg(test)]
mod tests {
    use miette::Report;

    use super::*;

    #[test]
    fn grammar_error_renders_label_and_help() {
        let src = to_error_source("grammar", "start = foo bar");
        let err = err_ctx!(
            Grammar,
            "undefined rule 'foo'",
            &src,
            Span { start: 8, end: 11 },
            "define the rule or fix the reference"
        );
        assert_eq!(err.error_type(), ErrorType::Grammar);
        let output = format!("{:?}", Report::new(err));
        assert!(output.contains("undefined rule 'foo'"));
        assert!(output.contains("define the rule"));
    }

    #[test]
    fn message_only_errors_have_no_labels() {
        let err = err_msg!(Host, "'{}' object is not callable", "int");
        assert_eq!(err.message(), "'int' object is not callable");
        assert!(err.labels().is_none());
        assert_eq!(err.to_string(), "Host error: 'int' object is not callable");
    }

    #[test]
    fn with_context_keeps_existing_source() {
        let first = to_error_source("a", "aaa");
        let second = to_error_source("b", "bbb");
        let err = err_ctx!(Grammar, "x", &first, Span { start: 0, end: 1 })
            .with_context(&second, Span { start: 2, end: 3 });
        match err {
            SourcerError::Grammar { ctx, .. } => assert_eq!(ctx.span, Some(Span { start: 0, end: 1 })),
            other => panic!("unexpected {other:?}"),
        }
    }
}
