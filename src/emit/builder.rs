//! Program Builder
//!
//! `Emitter` owns the program under construction and a stack of function
//! builders, one per function currently being written. Expressions compile
//! themselves through it: they allocate locals and labels, emit
//! instructions, and use the structured helpers (`if_`, `if_else`, `loop_`,
//! `block`, `define`) that lower to jumps. Each helper consumes one block of
//! the nesting budget while its body is written.

use std::collections::HashMap;
use std::sync::Arc;

use regex_automata::meta::Regex;
use regex_automata::util::syntax;

use crate::emit::{
    ClassId, Cond, ErrorEntry, ErrorId, Expectation, FnId, Function, HostEntry, HostId, Instr,
    Label, Literal, LiteralId, Program, RegexEntry, RegexId, Var,
};
use crate::host::HostExpr;
use crate::value::NodeClass;
use crate::{err_msg, SourcerError};

pub type EmitResult<T = ()> = Result<T, SourcerError>;

/// Labels of the innermost loop being written.
#[derive(Debug, Clone, Copy)]
pub struct LoopLabels {
    /// Jump here to run the next iteration.
    pub top: Label,
    /// Jump here to leave the loop.
    pub exit: Label,
}

// ============================================================================
// FUNCTION BUILDER
// ============================================================================

struct FunctionBuilder {
    id: FnId,
    name: String,
    params: Vec<String>,
    num_locals: usize,
    code: Vec<Instr>,
    labels: Vec<Option<usize>>,
    scopes: Vec<Vec<(String, Var)>>,
    blocks_left: usize,
}

impl FunctionBuilder {
    fn new(id: FnId, name: String, params: Vec<String>, max_blocks: usize) -> Self {
        let bindings = params
            .iter()
            .enumerate()
            .map(|(i, p)| (p.clone(), Var(i)))
            .collect();
        Self {
            id,
            name,
            num_locals: params.len(),
            params,
            code: Vec::new(),
            labels: Vec::new(),
            scopes: vec![bindings],
            // The function body itself is the first block.
            blocks_left: max_blocks.saturating_sub(1),
        }
    }

    fn finish(self) -> EmitResult<Function> {
        let labels = self
            .labels
            .into_iter()
            .enumerate()
            .map(|(i, at)| at.ok_or_else(|| err_msg!(Internal, "label L{} in {} was never placed", i, self.name)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Function {
            name: self.name,
            params: self.params,
            num_locals: self.num_locals,
            code: self.code,
            labels,
        })
    }
}

// ============================================================================
// EMITTER
// ============================================================================

pub struct Emitter {
    program: Program,
    reserved: Vec<Option<Function>>,
    stack: Vec<FunctionBuilder>,
    max_blocks: usize,
    literal_ids: HashMap<Vec<u8>, LiteralId>,
    regex_ids: HashMap<(String, bool, bool), RegexId>,
    class_ids: HashMap<String, ClassId>,
    rule_fns: HashMap<String, FnId>,
    /// Rule whose body is being compiled, for error entries.
    current_rule: String,
}

impl Emitter {
    pub fn new(max_blocks: usize) -> Self {
        let mut program = Program::default();
        program.errors.push(ErrorEntry {
            rule: String::new(),
            expr: String::new(),
            expectation: Expectation::LeftRecursion,
        });
        Self {
            program,
            reserved: Vec::new(),
            stack: Vec::new(),
            max_blocks,
            literal_ids: HashMap::new(),
            regex_ids: HashMap::new(),
            class_ids: HashMap::new(),
            rule_fns: HashMap::new(),
            current_rule: String::new(),
        }
    }

    pub fn max_blocks(&self) -> usize {
        self.max_blocks
    }

    fn out(&mut self) -> EmitResult<&mut FunctionBuilder> {
        self.stack
            .last_mut()
            .ok_or_else(|| err_msg!(Internal, "no function is being emitted"))
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    /// Allocates a function ID before its body exists.
    pub fn reserve(&mut self) -> FnId {
        self.reserved.push(None);
        FnId(self.reserved.len() - 1)
    }

    /// Registers the implementation function of a rule.
    pub fn reserve_rule(&mut self, rule: &str) -> FnId {
        let id = self.reserve();
        self.rule_fns.insert(crate::expr::impl_name(rule), id);
        id
    }

    /// Looks up a rule function by implementation name, e.g. `_try_start`.
    pub fn rule_fn(&self, impl_name: &str) -> EmitResult<FnId> {
        self.rule_fns
            .get(impl_name)
            .copied()
            .ok_or_else(|| err_msg!(Internal, "no function for rule '{}'", impl_name))
    }

    pub fn set_current_rule(&mut self, rule: &str) {
        self.current_rule = rule.to_string();
    }

    /// Writes the body of a reserved function. Parameters become its first
    /// locals and are in scope for the body.
    pub fn define<F>(&mut self, id: FnId, name: impl Into<String>, params: Vec<String>, body: F) -> EmitResult
    where
        F: FnOnce(&mut Emitter) -> EmitResult,
    {
        let name = name.into();
        log::trace!("emitting function {} ({})", name, id);
        self.stack
            .push(FunctionBuilder::new(id, name, params, self.max_blocks));
        let written = body(self);
        let builder = self
            .stack
            .pop()
            .ok_or_else(|| err_msg!(Internal, "function stack underflow"))?;
        written?;
        let mut builder = builder;
        builder.code.push(Instr::Return);
        let slot = self
            .reserved
            .get_mut(builder.id.0)
            .ok_or_else(|| err_msg!(Internal, "function {} was never reserved", builder.id))?;
        *slot = Some(builder.finish()?);
        Ok(())
    }

    /// Reserves and writes a function in one go.
    pub fn define_new<F>(&mut self, name: impl Into<String>, params: Vec<String>, body: F) -> EmitResult<FnId>
    where
        F: FnOnce(&mut Emitter) -> EmitResult,
    {
        let id = self.reserve();
        self.define(id, name, params, body)?;
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Locals, labels and scopes
    // ------------------------------------------------------------------

    pub fn var(&mut self) -> EmitResult<Var> {
        let out = self.out()?;
        out.num_locals += 1;
        Ok(Var(out.num_locals - 1))
    }

    pub fn label(&mut self) -> EmitResult<Label> {
        let out = self.out()?;
        out.labels.push(None);
        Ok(Label(out.labels.len() - 1))
    }

    pub fn mark(&mut self, label: Label) -> EmitResult {
        let out = self.out()?;
        let at = out.code.len();
        match out.labels.get_mut(label.0) {
            Some(slot) => {
                *slot = Some(at);
                Ok(())
            }
            None => Err(err_msg!(Internal, "unknown label {}", label)),
        }
    }

    pub fn emit(&mut self, instr: Instr) -> EmitResult {
        self.out()?.code.push(instr);
        Ok(())
    }

    pub fn comment(&mut self, text: impl Into<String>) -> EmitResult {
        self.emit(Instr::Comment(text.into()))
    }

    pub fn push_scope(&mut self) -> EmitResult {
        self.out()?.scopes.push(Vec::new());
        Ok(())
    }

    pub fn pop_scope(&mut self) -> EmitResult {
        self.out()?.scopes.pop();
        Ok(())
    }

    pub fn bind(&mut self, name: &str, var: Var) -> EmitResult {
        let out = self.out()?;
        match out.scopes.last_mut() {
            Some(scope) => {
                scope.push((name.to_string(), var));
                Ok(())
            }
            None => Err(err_msg!(Internal, "no scope to bind '{}' in", name)),
        }
    }

    /// The local a name is bound to in the current function.
    pub fn lookup(&mut self, name: &str) -> EmitResult<Var> {
        let out = self.out()?;
        out.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
            .ok_or_else(|| err_msg!(Internal, "local '{}' is not in scope in {}", name, out.name))
    }

    pub fn blocks_left(&self) -> usize {
        self.stack.last().map(|f| f.blocks_left).unwrap_or(0)
    }

    fn enter_block(&mut self) -> EmitResult {
        let out = self.out()?;
        out.blocks_left = out.blocks_left.saturating_sub(1);
        Ok(())
    }

    fn exit_block(&mut self) -> EmitResult {
        self.out()?.blocks_left += 1;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Structured control flow
    // ------------------------------------------------------------------

    /// `if cond: body`
    pub fn if_<F>(&mut self, cond: Cond, body: F) -> EmitResult
    where
        F: FnOnce(&mut Emitter) -> EmitResult,
    {
        let end = self.label()?;
        self.emit(Instr::Branch {
            cond: cond.negate(),
            target: end,
        })?;
        self.enter_block()?;
        body(self)?;
        self.exit_block()?;
        self.mark(end)
    }

    /// `if cond: then else: otherwise`
    pub fn if_else<F, G>(&mut self, cond: Cond, then: F, otherwise: G) -> EmitResult
    where
        F: FnOnce(&mut Emitter) -> EmitResult,
        G: FnOnce(&mut Emitter) -> EmitResult,
    {
        let else_label = self.label()?;
        let end = self.label()?;
        self.emit(Instr::Branch {
            cond: cond.negate(),
            target: else_label,
        })?;
        self.enter_block()?;
        then(self)?;
        self.emit(Instr::Jump(end))?;
        self.mark(else_label)?;
        otherwise(self)?;
        self.exit_block()?;
        self.mark(end)
    }

    /// `while True: body`; the body leaves through `exit`.
    pub fn loop_<F>(&mut self, body: F) -> EmitResult
    where
        F: FnOnce(&mut Emitter, LoopLabels) -> EmitResult,
    {
        let labels = LoopLabels {
            top: self.label()?,
            exit: self.label()?,
        };
        self.mark(labels.top)?;
        self.enter_block()?;
        body(self, labels)?;
        self.exit_block()?;
        self.emit(Instr::Jump(labels.top))?;
        self.mark(labels.exit)
    }

    /// A block that can be left early by jumping to the given label.
    pub fn block<F>(&mut self, body: F) -> EmitResult
    where
        F: FnOnce(&mut Emitter, Label) -> EmitResult,
    {
        let exit = self.label()?;
        self.enter_block()?;
        body(self, exit)?;
        self.exit_block()?;
        self.mark(exit)
    }

    // ------------------------------------------------------------------
    // Pools
    // ------------------------------------------------------------------

    pub fn literal(&mut self, bytes: &[u8]) -> LiteralId {
        if let Some(id) = self.literal_ids.get(bytes) {
            return *id;
        }
        let id = LiteralId(self.program.literals.len());
        self.program.literals.push(Literal { bytes: bytes.to_vec() });
        self.literal_ids.insert(bytes.to_vec(), id);
        id
    }

    /// Compiles a pattern once per program.
    pub fn regex(&mut self, pattern: &str, ignore_case: bool, binary: bool) -> EmitResult<RegexId> {
        let key = (pattern.to_string(), ignore_case, binary);
        if let Some(id) = self.regex_ids.get(&key) {
            return Ok(*id);
        }
        let config = syntax::Config::new()
            .case_insensitive(ignore_case)
            .unicode(!binary)
            .utf8(!binary);
        let regex = Regex::builder()
            .syntax(config)
            .build(pattern)
            .map_err(|e| err_msg!(Grammar, "invalid regular expression /{}/: {}", pattern, e))?;
        let id = RegexId(self.program.regexes.len());
        self.program.regexes.push(RegexEntry {
            pattern: pattern.to_string(),
            regex,
        });
        self.regex_ids.insert(key, id);
        Ok(id)
    }

    pub fn host(&mut self, source: &str, expr: Arc<HostExpr>, locals: Vec<String>) -> HostId {
        let id = HostId(self.program.hosts.len());
        self.program.hosts.push(HostEntry {
            source: source.to_string(),
            expr,
            locals,
        });
        id
    }

    pub fn class(&mut self, name: &str, fields: &[String]) -> ClassId {
        if let Some(id) = self.class_ids.get(name) {
            return *id;
        }
        let id = ClassId(self.program.classes.len());
        self.program.classes.push(Arc::new(NodeClass {
            name: name.to_string(),
            fields: fields.to_vec(),
        }));
        self.class_ids.insert(name.to_string(), id);
        id
    }

    /// Adds an error entry for an expression of the current rule.
    pub fn error(&mut self, expr: String, expectation: Expectation) -> ErrorId {
        let id = ErrorId(self.program.errors.len());
        self.program.errors.push(ErrorEntry {
            rule: self.current_rule.clone(),
            expr,
            expectation,
        });
        id
    }

    pub fn program_mut(&mut self) -> &mut Program {
        &mut self.program
    }

    /// Closes the program; every reserved function must have a body.
    pub fn finish(mut self) -> EmitResult<Program> {
        if !self.stack.is_empty() {
            return Err(err_msg!(Internal, "unfinished function at end of program"));
        }
        self.program.functions = self
            .reserved
            .into_iter()
            .enumerate()
            .map(|(i, f)| f.ok_or_else(|| err_msg!(Internal, "function fn{} has no body", i)))
            .collect::<Result<_, _>>()?;
        Ok(self.program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::Operand;

    #[test]
    fn test_structured_helpers_place_labels() {
        let mut e = Emitter::new(20);
        let id = e
            .define_new("f", vec!["x".to_string()], |e| {
                let x = e.lookup("x")?;
                e.if_else(
                    Cond::Status,
                    |e| e.emit(Instr::Load(Operand::Var(x))),
                    |e| e.emit(Instr::SetStatus(false)),
                )?;
                e.loop_(|e, labels| e.emit(Instr::Jump(labels.exit)))
            })
            .unwrap();
        let program = e.finish().unwrap();
        let func = program.function(id);
        assert_eq!(func.params, vec!["x"]);
        assert!(matches!(func.code.last(), Some(Instr::Return)));
        assert!(func.labels.iter().all(|at| *at <= func.code.len()));
    }

    #[test]
    fn test_blocks_budget_tracks_nesting() {
        let mut e = Emitter::new(4);
        e.define_new("f", Vec::new(), |e| {
            assert_eq!(e.blocks_left(), 3);
            e.block(|e, _| {
                assert_eq!(e.blocks_left(), 2);
                Ok(())
            })?;
            assert_eq!(e.blocks_left(), 3);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_pools_are_interned() {
        let mut e = Emitter::new(20);
        assert_eq!(e.literal(b"a"), e.literal(b"a"));
        let first = e.regex("[0-9]+", false, false).unwrap();
        assert_eq!(first, e.regex("[0-9]+", false, false).unwrap());
        assert!(e.regex("(", false, false).is_err());
    }

    #[test]
    fn test_unknown_local_is_internal_error() {
        let mut e = Emitter::new(20);
        let result = e.define_new("f", Vec::new(), |e| e.lookup("nope").map(|_| ()));
        assert!(result.is_err());
    }
}
