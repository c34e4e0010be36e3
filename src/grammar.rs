//! Grammar Entry Point
//!
//! `Grammar` runs the whole generator pipeline over a description:
//! parse → lower → analyze → emit → load. Each stage either hands a richer
//! structure to the next or stops with a `SourcerError::Grammar` pointing at
//! the description.

use crate::analysis::analyze;
use crate::diagnostics::to_error_source;
use crate::expr::compile::generate;
use crate::lowering::lower;
use crate::options::GrammarOptions;
use crate::runtime::{load, ParserModule};
use crate::syntax;
use crate::value::{NativeFn, Value};
use crate::SourcerError;

/// Builds parsers from grammar descriptions.
///
/// ```rust
/// use sourcer::{Grammar, Value};
/// let module = Grammar::new(r#"
///     ignored space = /\s+/
///     start = "hello" >> /[a-z]+/
/// "#).unwrap();
/// assert_eq!(module.parse("hello world").unwrap(), Value::str("world"));
/// ```
pub struct Grammar;

impl Grammar {
    /// Builds a parser module with default options.
    pub fn new(description: &str) -> Result<ParserModule, SourcerError> {
        Self::builder(description).build()
    }

    pub fn builder(description: &str) -> GrammarBuilder {
        GrammarBuilder {
            description: description.to_string(),
            options: GrammarOptions::default(),
            host_fns: Vec::new(),
        }
    }
}

/// Configures one grammar build.
pub struct GrammarBuilder {
    description: String,
    options: GrammarOptions,
    host_fns: Vec<(String, Value)>,
}

impl GrammarBuilder {
    /// Module name shown in diagnostics.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = name.into();
        self
    }

    /// Keep the program listing available through `ParserModule::source`.
    pub fn include_source(mut self, include: bool) -> Self {
        self.options.include_source = include;
        self
    }

    /// Nesting budget before sub-expressions are moved into functions of
    /// their own.
    pub fn max_blocks(mut self, max_blocks: usize) -> Self {
        self.options.max_blocks = max_blocks;
        self
    }

    /// Replaces all options at once.
    pub fn options(mut self, options: GrammarOptions) -> Self {
        self.options = options;
        self
    }

    /// Exposes a Rust function to the grammar's host expressions.
    ///
    /// ```rust
    /// use sourcer::{Grammar, Value};
    /// let module = Grammar::builder(r#"start = /[a-z]+/ |> `shout`"#)
    ///     .host_fn("shout", |args| Ok(Value::from(args[0].to_display_string().to_uppercase())))
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(module.parse("hey").unwrap(), Value::str("HEY"));
    /// ```
    pub fn host_fn<F>(mut self, name: &str, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, SourcerError> + Send + Sync + 'static,
    {
        self.host_fns
            .push((name.to_string(), Value::func(NativeFn::new(name, func))));
        self
    }

    pub fn build(self) -> Result<ParserModule, SourcerError> {
        let GrammarBuilder {
            description,
            options,
            host_fns,
        } = self;
        options.validate()?;
        let source = to_error_source(&options.name, &description);

        let form = syntax::parse(&description, &source)?;
        log::debug!("parsed grammar '{}'", options.name);

        let tree = lower(form, &description, &source)?;
        log::debug!(
            "lowered grammar '{}' into {} definitions and {} host sections",
            options.name,
            tree.definitions.len(),
            tree.sections.len()
        );

        let names: Vec<String> = host_fns.iter().map(|(name, _)| name.clone()).collect();
        let tree = analyze(tree, &names, &source)?;
        log::debug!("analyzed grammar '{}'", options.name);

        let program = generate(&tree, &options)?;
        log::debug!(
            "emitted {} functions for grammar '{}'",
            program.functions.len(),
            options.name
        );

        load(program, &options, host_fns)
    }
}
