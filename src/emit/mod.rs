//! Parser Programs
//!
//! The generator's output. A program is a set of parser functions made of
//! flat instructions, plus constant pools for literals, compiled regexes,
//! host snippets, node classes and error descriptions. The runtime links a
//! program into a `ParserModule` and runs its functions on a trampoline.
//!
//! Every function works on three registers: STATUS (did the last parse
//! succeed), RESULT (its value, or an error marker on failure) and POS (the
//! cursor into the input). Locals hold values; positions are stored in them
//! as integers.

use std::fmt::{self, Write as _};
use std::sync::Arc;

use regex_automata::meta::Regex;

use crate::host::{Assignment, HostExpr};
use crate::value::{repr_str, NodeClass, Value};

pub mod builder;

pub use builder::{Emitter, LoopLabels};

// ============================================================================
// IDS
// ============================================================================

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) usize);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Index of a function in the program.
    FnId, "fn"
);
id_type!(
    /// Index of an entry in the error table.
    ErrorId, "err"
);
id_type!(
    /// A local slot of the current function.
    Var, "v"
);
id_type!(
    /// A jump target inside one function.
    Label, "L"
);
id_type!(LiteralId, "lit");
id_type!(RegexId, "re");
id_type!(HostId, "host");
id_type!(ClassId, "class");

impl ErrorId {
    /// Reserved entry reported when a rule re-enters itself at the same position.
    pub const LEFT_RECURSION: ErrorId = ErrorId(0);
}

// ============================================================================
// INSTRUCTIONS
// ============================================================================

#[derive(Debug, Clone)]
pub enum Operand {
    Result,
    Pos,
    Var(Var),
    Const(Value),
}

#[derive(Debug, Clone, Copy)]
pub enum BoundRef {
    Const(usize),
    Var(Var),
}

/// Branch conditions. Position comparisons read the variable as an integer.
#[derive(Debug, Clone, Copy)]
pub enum Cond {
    Status,
    NotStatus,
    PosEq(Var),
    PosNe(Var),
    PosGe(Var),
    PosGt(Var),
    PosLt(Var),
    PosLe(Var),
    LenLt(Var, BoundRef),
    LenGe(Var, BoundRef),
}

impl Cond {
    pub fn negate(self) -> Cond {
        match self {
            Cond::Status => Cond::NotStatus,
            Cond::NotStatus => Cond::Status,
            Cond::PosEq(v) => Cond::PosNe(v),
            Cond::PosNe(v) => Cond::PosEq(v),
            Cond::PosGe(v) => Cond::PosLt(v),
            Cond::PosGt(v) => Cond::PosLe(v),
            Cond::PosLt(v) => Cond::PosGe(v),
            Cond::PosLe(v) => Cond::PosGt(v),
            Cond::LenLt(v, b) => Cond::LenGe(v, b),
            Cond::LenGe(v, b) => Cond::LenLt(v, b),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Callee {
    Func(FnId),
    /// A local holding a parser value, or any other value to return as is.
    Local(Var),
}

#[derive(Debug, Clone)]
pub enum Instr {
    Comment(String),
    /// Match a literal at POS; on success RESULT is the matched input.
    MatchLiteral { literal: LiteralId, error: ErrorId },
    MatchRegex { regex: RegexId, error: ErrorId },
    SetStatus(bool),
    /// RESULT = operand
    Load(Operand),
    Store(Var, Operand),
    /// POS = var
    RestorePos(Var),
    /// STATUS = false, RESULT = the error marker
    Fail(ErrorId),
    Jump(Label),
    Branch { cond: Cond, target: Label },
    NewList(Var),
    Push { list: Var, value: Operand },
    Pop(Var),
    /// Suspends the frame until the callee returns its (STATUS, RESULT, POS).
    Call { callee: Callee, args: Vec<Var> },
    /// RESULT = the snippet evaluated with the captured locals; STATUS = true
    Eval { host: HostId, captures: Vec<Var> },
    /// RESULT = func(arg); STATUS = true
    Apply { func: Var, arg: Var },
    /// Keeps RESULT = arg when func(arg) is truthy, fails with `error` otherwise.
    Test { func: Var, arg: Var, error: ErrorId },
    MakeList(Vec<Var>),
    /// Builds a class node whose span runs from `start` to POS.
    MakeNode { class: ClassId, fields: Vec<Var>, start: Var },
    /// RESULT = Infix(left, op, RESULT)
    MakeInfix { left: Var, op: Var },
    /// RESULT = Postfix(left, RESULT)
    MakePostfix { left: Var },
    /// RESULT = Prefix(op1, Prefix(op2, ... RESULT))
    FoldPrefix { ops: Var },
    /// Folds `[a1, op1, a2, ..., an]` to the right into Infix nodes.
    FoldRight { spine: Var },
    /// RESULT = a parser value for `func` closed over `captures`.
    MakeParser { func: FnId, captures: Vec<Var> },
    Return,
}

// ============================================================================
// POOLS
// ============================================================================

/// What a failing expression expected, rendered lazily into a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Expectation {
    Str(String),
    Regex(String),
    Unexpected,
    NotExpected(String),
    Predicate(String),
    Message(String),
    LeftRecursion,
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Str(s) => write!(f, "Expected to match the string {}", repr_str(s)),
            Expectation::Regex(p) => write!(f, "Expected to match the regular expression /{p}/"),
            Expectation::Unexpected => write!(f, "Unexpected input"),
            Expectation::NotExpected(e) => write!(f, "Did not expect to match: {e}"),
            Expectation::Predicate(p) => write!(f, "Expected to satisfy the predicate: {p}"),
            Expectation::Message(m) => write!(f, "{m}"),
            Expectation::LeftRecursion => write!(f, "Left recursion is not supported"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorEntry {
    /// The rule the failing expression belongs to.
    pub rule: String,
    /// The failing expression, in grammar syntax.
    pub expr: String,
    pub expectation: Expectation,
}

#[derive(Debug, Clone)]
pub struct Literal {
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RegexEntry {
    pub pattern: String,
    pub regex: Regex,
}

#[derive(Debug, Clone)]
pub struct HostEntry {
    pub source: String,
    pub expr: Arc<HostExpr>,
    /// Names the captured locals are bound to, in capture order.
    pub locals: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    /// Parameters occupy the first local slots.
    pub params: Vec<String>,
    pub num_locals: usize,
    pub code: Vec<Instr>,
    /// Instruction index of each label.
    pub labels: Vec<usize>,
}

/// Reflection data for a grammar rule.
#[derive(Debug, Clone)]
pub struct RuleEntry {
    pub name: String,
    pub func: FnId,
    pub params: Option<Vec<String>>,
    pub definition: String,
    pub is_class: bool,
    pub is_ignored: bool,
    pub is_synthetic: bool,
}

#[derive(Debug, Clone)]
pub struct HostSection {
    pub source: String,
    pub assignments: Vec<Assignment>,
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub functions: Vec<Function>,
    pub literals: Vec<Literal>,
    pub regexes: Vec<RegexEntry>,
    pub hosts: Vec<HostEntry>,
    pub classes: Vec<Arc<NodeClass>>,
    pub errors: Vec<ErrorEntry>,
    pub rules: Vec<RuleEntry>,
    pub sections: Vec<HostSection>,
}

impl Program {
    pub fn function(&self, id: FnId) -> &Function {
        &self.functions[id.0]
    }

    pub fn error(&self, id: ErrorId) -> &ErrorEntry {
        &self.errors[id.0]
    }

    /// Human-readable listing of the whole program.
    pub fn listing(&self) -> String {
        let mut out = String::new();
        self.write_listing(&mut out).unwrap_or_default();
        out
    }

    fn write_listing(&self, out: &mut String) -> fmt::Result {
        writeln!(out, "# rules")?;
        for rule in &self.rules {
            writeln!(out, "#   {} -> {}: {}", rule.name, rule.func, rule.definition.trim())?;
        }
        for section in &self.sections {
            writeln!(out, "\n```{}```", section.source)?;
        }
        writeln!(out)?;
        for (i, lit) in self.literals.iter().enumerate() {
            writeln!(out, "{} = {}", LiteralId(i), Value::bytes(&lit.bytes))?;
        }
        for (i, re) in self.regexes.iter().enumerate() {
            writeln!(out, "{} = /{}/", RegexId(i), re.pattern)?;
        }
        for (i, host) in self.hosts.iter().enumerate() {
            writeln!(out, "{} = `{}` ({})", HostId(i), host.source, host.locals.join(", "))?;
        }
        for (i, class) in self.classes.iter().enumerate() {
            writeln!(out, "{} = {}({})", ClassId(i), class.name, class.fields.join(", "))?;
        }
        for (i, err) in self.errors.iter().enumerate() {
            writeln!(out, "{} = [{}] {} : {}", ErrorId(i), err.rule, err.expr, err.expectation)?;
        }
        for (i, func) in self.functions.iter().enumerate() {
            writeln!(out, "\ndef {}({}):  # {}", func.name, func.params.join(", "), FnId(i))?;
            for (pc, instr) in func.code.iter().enumerate() {
                for (label, _) in func.labels.iter().enumerate().filter(|(_, at)| **at == pc) {
                    writeln!(out, "  {}:", Label(label))?;
                }
                writeln!(out, "    {}", InstrDisplay(instr))?;
            }
        }
        Ok(())
    }
}

struct InstrDisplay<'a>(&'a Instr);

fn vars(vs: &[Var]) -> String {
    vs.iter().map(Var::to_string).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Result => write!(f, "RESULT"),
            Operand::Pos => write!(f, "POS"),
            Operand::Var(v) => write!(f, "{v}"),
            Operand::Const(c) => write!(f, "{c}"),
        }
    }
}

impl fmt::Display for BoundRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundRef::Const(n) => write!(f, "{n}"),
            BoundRef::Var(v) => write!(f, "{v}"),
        }
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cond::Status => write!(f, "STATUS"),
            Cond::NotStatus => write!(f, "not STATUS"),
            Cond::PosEq(v) => write!(f, "POS == {v}"),
            Cond::PosNe(v) => write!(f, "POS != {v}"),
            Cond::PosGe(v) => write!(f, "POS >= {v}"),
            Cond::PosGt(v) => write!(f, "POS > {v}"),
            Cond::PosLt(v) => write!(f, "POS < {v}"),
            Cond::PosLe(v) => write!(f, "POS <= {v}"),
            Cond::LenLt(v, b) => write!(f, "len({v}) < {b}"),
            Cond::LenGe(v, b) => write!(f, "len({v}) >= {b}"),
        }
    }
}

impl fmt::Display for InstrDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Instr::Comment(text) => write!(f, "# {text}"),
            Instr::MatchLiteral { literal, error } => write!(f, "match {literal} else {error}"),
            Instr::MatchRegex { regex, error } => write!(f, "match {regex} else {error}"),
            Instr::SetStatus(b) => write!(f, "STATUS = {}", if *b { "True" } else { "False" }),
            Instr::Load(op) => write!(f, "RESULT = {op}"),
            Instr::Store(v, op) => write!(f, "{v} = {op}"),
            Instr::RestorePos(v) => write!(f, "POS = {v}"),
            Instr::Fail(err) => write!(f, "fail {err}"),
            Instr::Jump(l) => write!(f, "goto {l}"),
            Instr::Branch { cond, target } => write!(f, "if {cond}: goto {target}"),
            Instr::NewList(v) => write!(f, "{v} = []"),
            Instr::Push { list, value } => write!(f, "{list}.append({value})"),
            Instr::Pop(v) => write!(f, "{v}.pop()"),
            Instr::Call { callee, args } => match callee {
                Callee::Func(id) => write!(f, "yield CALL {id}({})", vars(args)),
                Callee::Local(v) => write!(f, "yield CALL {v}({})", vars(args)),
            },
            Instr::Eval { host, captures } => write!(f, "RESULT = eval {host}({})", vars(captures)),
            Instr::Apply { func, arg } => write!(f, "RESULT = {func}({arg})"),
            Instr::Test { func, arg, error } => write!(f, "test {func}({arg}) else {error}"),
            Instr::MakeList(vs) => write!(f, "RESULT = [{}]", vars(vs)),
            Instr::MakeNode { class, fields, start } => {
                write!(f, "RESULT = {class}({}) from {start}", vars(fields))
            }
            Instr::MakeInfix { left, op } => write!(f, "RESULT = Infix({left}, {op}, RESULT)"),
            Instr::MakePostfix { left } => write!(f, "RESULT = Postfix({left}, RESULT)"),
            Instr::FoldPrefix { ops } => write!(f, "RESULT = fold_prefix({ops}, RESULT)"),
            Instr::FoldRight { spine } => write!(f, "RESULT = fold_right({spine})"),
            Instr::MakeParser { func, captures } => {
                write!(f, "RESULT = parser {func}({})", vars(captures))
            }
            Instr::Return => write!(f, "return"),
        }
    }
}
