//! Parser Runtime
//!
//! Links a generated `Program` into a `ParserModule`: host sections are
//! evaluated into module globals, class constructors are registered, and one
//! `Rule` reflection record is exposed per grammar rule. Parsing runs the
//! program on the trampoline in `machine` and converts a failed or
//! incomplete root outcome into `ParseError` / `PartialParseError`.
//!
//! A module is immutable once loaded and cheap to clone; every parse owns its
//! own memo table and stack.

use std::fmt;
use std::sync::Arc;

use crate::diagnostics::{to_error_source, ParseError, PartialParseError};
use crate::emit::{FnId, Program, RuleEntry};
use crate::host::builtins::register_builtins;
use crate::host::{eval, Env};
use crate::options::GrammarOptions;
use crate::value::{Callable, ParserRef, Value, INFIX, POSTFIX, PREFIX};
use crate::{err_msg, SourcerError};

pub mod machine;
pub mod text;
pub mod tree;

use machine::{Machine, Outcome};
use text::{excerpt, LineTable, Text};

// ============================================================================
// MODULE
// ============================================================================

pub(crate) struct ModuleInner {
    name: String,
    pub(crate) program: Program,
    pub(crate) globals: Env,
    source: Option<String>,
    excerpt_width: usize,
    default_rule: Option<usize>,
}

/// A loaded parser: the program, its globals and its rules.
#[derive(Clone)]
pub struct ParserModule {
    inner: Arc<ModuleInner>,
}

/// Links `program` into a module.
///
/// Globals are layered so later entries win: registered host functions,
/// builtins, class constructors, then host-section assignments in order.
pub fn load(
    program: Program,
    options: &GrammarOptions,
    host_fns: Vec<(String, Value)>,
) -> Result<ParserModule, SourcerError> {
    let mut globals = Env::new();
    for (name, func) in host_fns {
        globals.insert(name, func);
    }
    register_builtins(&mut globals);
    for class in program.classes.iter().chain([&*INFIX, &*PREFIX, &*POSTFIX]) {
        let constructor: Arc<dyn Callable> = Arc::clone(class) as Arc<dyn Callable>;
        globals.insert(class.name.clone(), Value::Func(constructor));
    }
    for section in &program.sections {
        for assignment in &section.assignments {
            let value = eval(&assignment.value, &globals).map_err(|e| {
                err_msg!(Host, "while loading '{}': {}", assignment.name, e.message())
            })?;
            globals.insert(assignment.name.clone(), value);
        }
    }

    let default_rule = find_default_rule(&program.rules);
    let source = options.include_source.then(|| program.listing());
    log::debug!(
        "loaded module '{}': {} rules, {} functions, {} globals",
        options.name,
        program.rules.len(),
        program.functions.len(),
        globals.len()
    );

    Ok(ParserModule {
        inner: Arc::new(ModuleInner {
            name: options.name.clone(),
            program,
            globals,
            source,
            excerpt_width: options.excerpt_width,
            default_rule,
        }),
    })
}

/// The rule named `start` in any case, else the first ordinary rule.
fn find_default_rule(rules: &[RuleEntry]) -> Option<usize> {
    rules
        .iter()
        .position(|r| !r.is_synthetic && r.name.eq_ignore_ascii_case("start"))
        .or_else(|| rules.iter().position(|r| !r.is_synthetic && !r.is_ignored))
}

impl ParserModule {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Parses `text` from the start with the default rule, requiring all of
    /// the input to be consumed.
    ///
    /// ```rust
    /// use sourcer::{Grammar, Value};
    /// let module = Grammar::new(r#"start = "a" | "b""#).unwrap();
    /// assert_eq!(module.parse("b").unwrap(), Value::str("b"));
    /// assert!(module.parse("c").is_err());
    /// ```
    pub fn parse(&self, text: impl Into<Text>) -> Result<Value, SourcerError> {
        self.parse_with(text, 0, true)
    }

    pub fn parse_with(&self, text: impl Into<Text>, pos: usize, fullparse: bool) -> Result<Value, SourcerError> {
        let rule = self
            .default_rule()
            .ok_or_else(|| err_msg!(Grammar, "the grammar '{}' defines no rules", self.name()))?;
        rule.parse_with(text, pos, fullparse)
    }

    pub fn default_rule(&self) -> Option<Rule> {
        self.inner.default_rule.map(|index| self.rule_at(index))
    }

    /// Looks up a rule by its exact name.
    pub fn rule(&self, name: &str) -> Option<Rule> {
        self.inner
            .program
            .rules
            .iter()
            .position(|r| !r.is_synthetic && r.name == name)
            .map(|index| self.rule_at(index))
    }

    /// All user-visible rules, in declaration order.
    pub fn rules(&self) -> Vec<Rule> {
        self.inner
            .program
            .rules
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.is_synthetic)
            .map(|(index, _)| self.rule_at(index))
            .collect()
    }

    /// The program listing, present when the module was built with
    /// `include_source`.
    pub fn source(&self) -> Option<&str> {
        self.inner.source.as_deref()
    }

    /// A module global: a host-section definition, a class constructor, a
    /// builtin or a registered host function.
    pub fn global(&self, name: &str) -> Option<Value> {
        self.inner.globals.get(name).cloned()
    }

    pub fn program(&self) -> &Program {
        &self.inner.program
    }

    fn rule_at(&self, index: usize) -> Rule {
        Rule {
            module: self.clone(),
            index,
        }
    }

    fn run(
        &self,
        func: FnId,
        args: Vec<Value>,
        text: Text,
        pos: usize,
        fullparse: bool,
    ) -> Result<Value, SourcerError> {
        if pos > text.len() {
            return Err(err_msg!(
                Host,
                "start position {} is past the end of the input ({})",
                pos,
                text.len()
            ));
        }
        let inner = &*self.inner;
        let outcome = Machine::new(inner, &text).run(func, args, pos)?;
        let table = LineTable::new(&text);

        let Outcome { status, result, pos } = outcome;
        if !status {
            return Err(self.parse_error(&text, &table, &result, pos).into());
        }
        let result = tree::resolve_positions(&result, &text, &table);
        if fullparse && pos < text.len() {
            let last_position = table.position(&text, pos);
            let shown = excerpt(&text, &table, &last_position, inner.excerpt_width);
            return Err(PartialParseError {
                message: format!(
                    "Incomplete parse. Unexpected input on line {}, column {}:\n{}",
                    last_position.line, last_position.column, shown
                ),
                partial_result: result,
                last_position,
                excerpt: shown,
                source: error_source(inner, &text),
            }
            .into());
        }
        Ok(result)
    }

    fn parse_error(&self, text: &Text, table: &LineTable, result: &Value, pos: usize) -> SourcerError {
        let inner = &*self.inner;
        let Value::Error(id) = result else {
            return err_msg!(Internal, "failed parse left {} instead of an error", result);
        };
        let entry = inner.program.error(*id);
        let position = table.position(text, pos);
        let shown = excerpt(text, table, &position, inner.excerpt_width);
        let header = format!("Error on line {}, column {}:\n{}\n", position.line, position.column, shown);
        // The left-recursion entry belongs to no single expression.
        let message = if entry.rule.is_empty() {
            format!("{header}{}", entry.expectation)
        } else {
            format!(
                "{header}Failed to parse the '{}' rule, at the expression:\n    {}\n\n{}",
                entry.rule, entry.expr, entry.expectation
            )
        };
        ParseError {
            message,
            position,
            rule: entry.rule.clone(),
            excerpt: shown,
            source: error_source(inner, text),
        }
        .into()
    }
}

fn error_source(inner: &ModuleInner, text: &Text) -> Option<crate::diagnostics::SourceArc> {
    text.as_str().map(|s| to_error_source(&inner.name, s))
}

impl fmt::Debug for ParserModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserModule")
            .field("name", &self.inner.name)
            .field("rules", &self.rules().iter().map(Rule::name).collect::<Vec<_>>())
            .finish()
    }
}

// ============================================================================
// RULES
// ============================================================================

/// Reflection record and entry point for one grammar rule.
#[derive(Clone)]
pub struct Rule {
    module: ParserModule,
    index: usize,
}

impl Rule {
    fn entry(&self) -> &RuleEntry {
        &self.module.inner.program.rules[self.index]
    }

    pub fn name(&self) -> &str {
        &self.entry().name
    }

    /// The rule's definition as written in the grammar.
    pub fn definition(&self) -> &str {
        &self.entry().definition
    }

    /// Parameter names, for parameterized rules.
    pub fn params(&self) -> Option<&[String]> {
        self.entry().params.as_deref()
    }

    pub fn is_class(&self) -> bool {
        self.entry().is_class
    }

    pub fn is_ignored(&self) -> bool {
        self.entry().is_ignored
    }

    pub fn parse(&self, text: impl Into<Text>) -> Result<Value, SourcerError> {
        self.parse_with(text, 0, true)
    }

    pub fn parse_with(&self, text: impl Into<Text>, pos: usize, fullparse: bool) -> Result<Value, SourcerError> {
        if let Some(params) = self.params().filter(|p| !p.is_empty()) {
            return Err(err_msg!(
                Host,
                "rule '{}' takes arguments ({}); bind them before parsing",
                self.name(),
                params.join(", ")
            ));
        }
        self.module.run(self.entry().func, Vec::new(), text.into(), pos, fullparse)
    }

    /// Supplies the arguments of a parameterized rule.
    ///
    /// Arguments may be plain values or parser values such as
    /// `Rule::as_parser`.
    pub fn bind(&self, args: Vec<Value>) -> Result<BoundRule, SourcerError> {
        let expected = self.params().map_or(0, <[String]>::len);
        if args.len() != expected {
            return Err(err_msg!(
                Host,
                "rule '{}' takes {} arguments but {} were given",
                self.name(),
                expected,
                args.len()
            ));
        }
        Ok(BoundRule {
            rule: self.clone(),
            args,
        })
    }

    /// This rule as a parser value, for passing to parameterized rules.
    pub fn as_parser(&self) -> Value {
        Value::Parser(Arc::new(ParserRef {
            func: self.entry().func,
            captures: Vec::new(),
            name: self.name().to_string(),
        }))
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rule({:?})", self.definition().trim())
    }
}

/// A parameterized rule with its arguments supplied.
#[derive(Clone)]
pub struct BoundRule {
    rule: Rule,
    args: Vec<Value>,
}

impl BoundRule {
    pub fn parse(&self, text: impl Into<Text>) -> Result<Value, SourcerError> {
        self.parse_with(text, 0, true)
    }

    pub fn parse_with(&self, text: impl Into<Text>, pos: usize, fullparse: bool) -> Result<Value, SourcerError> {
        let func = self.rule.entry().func;
        self.rule
            .module
            .run(func, self.args.clone(), text.into(), pos, fullparse)
    }
}
