//! The trampoline that runs parser programs.
//!
//! Each active function is a frame on an explicit stack. A `Call`
//! instruction suspends the current frame and either answers it from the memo
//! table or pushes the callee; when a callee returns, its registers are copied
//! back into the suspended caller. Rule recursion therefore never grows the
//! Rust call stack.

use std::collections::HashMap;
use std::sync::Arc;

use regex_automata::{Anchored, Input};

use crate::emit::{BoundRef, Callee, Cond, ErrorId, FnId, Instr, Label, Operand, Var};
use crate::host::eval::{call_value, eval};
use crate::runtime::text::Text;
use crate::runtime::ModuleInner;
use crate::value::{Node, ParserRef, Position, PositionInfo, Value};
use crate::{err_msg, SourcerError};

/// The registers a function leaves behind when it returns.
#[derive(Debug, Clone)]
pub(crate) struct Outcome {
    pub status: bool,
    pub result: Value,
    pub pos: usize,
}

type MemoKey = (FnId, usize);

struct Frame {
    func: FnId,
    pc: usize,
    status: bool,
    result: Value,
    pos: usize,
    locals: Vec<Value>,
    memo_key: Option<MemoKey>,
}

enum Step {
    Next,
    Call { func: FnId, args: Vec<Value> },
    Return,
}

/// One parse: a memo table and a frame stack, both dropped when it ends.
pub(crate) struct Machine<'a> {
    module: &'a ModuleInner,
    text: &'a Text,
    memo: HashMap<MemoKey, Outcome>,
    stack: Vec<Frame>,
}

impl<'a> Machine<'a> {
    pub fn new(module: &'a ModuleInner, text: &'a Text) -> Self {
        Self {
            module,
            text,
            memo: HashMap::new(),
            stack: Vec::new(),
        }
    }

    /// Runs `func` at `pos` until it returns.
    pub fn run(mut self, func: FnId, args: Vec<Value>, pos: usize) -> Result<Outcome, SourcerError> {
        self.push(func, args, pos, None)?;
        loop {
            let module = self.module;
            let text = self.text;
            let frame = self
                .stack
                .last_mut()
                .ok_or_else(|| err_msg!(Internal, "parser stack is empty"))?;
            let function = module.program.function(frame.func);
            let instr = function
                .code
                .get(frame.pc)
                .ok_or_else(|| err_msg!(Internal, "{} ran past its last instruction", function.name))?;
            frame.pc += 1;

            match step(module, text, frame, instr)? {
                Step::Next => {}
                Step::Call { func, args } => {
                    let pos = frame.pos;
                    if !args.is_empty() {
                        self.push(func, args, pos, None)?;
                        continue;
                    }
                    let key = (func, pos);
                    if let Some(hit) = self.memo.get(&key) {
                        frame.status = hit.status;
                        frame.result = hit.result.clone();
                        frame.pos = hit.pos;
                        continue;
                    }
                    log::trace!("memo miss: {} at {}", module.program.function(func).name, pos);
                    self.memo.insert(
                        key,
                        Outcome {
                            status: false,
                            result: Value::Error(ErrorId::LEFT_RECURSION),
                            pos,
                        },
                    );
                    self.push(func, args, pos, Some(key))?;
                }
                Step::Return => {
                    let done = self
                        .stack
                        .pop()
                        .ok_or_else(|| err_msg!(Internal, "parser stack is empty"))?;
                    let outcome = Outcome {
                        status: done.status,
                        result: done.result,
                        pos: done.pos,
                    };
                    if let Some(key) = done.memo_key {
                        self.memo.insert(key, outcome.clone());
                    }
                    match self.stack.last_mut() {
                        Some(caller) => {
                            caller.status = outcome.status;
                            caller.result = outcome.result;
                            caller.pos = outcome.pos;
                        }
                        None => return Ok(outcome),
                    }
                }
            }
        }
    }

    fn push(&mut self, func: FnId, args: Vec<Value>, pos: usize, memo_key: Option<MemoKey>) -> Result<(), SourcerError> {
        let function = self.module.program.function(func);
        if args.len() != function.params.len() {
            return Err(err_msg!(
                Host,
                "{}() takes {} arguments but {} were given",
                function.name,
                function.params.len(),
                args.len()
            ));
        }
        let mut locals = args;
        locals.resize(function.num_locals.max(locals.len()), Value::None);
        self.stack.push(Frame {
            func,
            pc: 0,
            status: false,
            result: Value::None,
            pos,
            locals,
            memo_key,
        });
        Ok(())
    }
}

// ============================================================================
// INSTRUCTIONS
// ============================================================================

fn step(module: &ModuleInner, text: &Text, frame: &mut Frame, instr: &Instr) -> Result<Step, SourcerError> {
    let program = &module.program;
    match instr {
        Instr::Comment(_) => {}

        Instr::MatchLiteral { literal, error } => {
            let bytes = &program.literals[literal.0].bytes;
            if text.as_bytes()[frame.pos..].starts_with(bytes) {
                let end = frame.pos + bytes.len();
                frame.result = text.slice(frame.pos, end);
                frame.pos = end;
                frame.status = true;
            } else {
                fail(frame, *error);
            }
        }

        Instr::MatchRegex { regex, error } => {
            let input = Input::new(text.as_bytes())
                .range(frame.pos..)
                .anchored(Anchored::Yes);
            match program.regexes[regex.0].regex.search(&input) {
                Some(m) => {
                    frame.result = text.slice(m.start(), m.end());
                    frame.pos = m.end();
                    frame.status = true;
                }
                None => fail(frame, *error),
            }
        }

        Instr::SetStatus(status) => frame.status = *status,
        Instr::Load(operand) => frame.result = read(frame, operand),
        Instr::Store(var, operand) => {
            let value = read(frame, operand);
            frame.locals[var.0] = value;
        }
        Instr::RestorePos(var) => frame.pos = position(&frame.locals[var.0])?,
        Instr::Fail(error) => fail(frame, *error),

        Instr::Jump(label) => frame.pc = target(module, frame, *label),
        Instr::Branch { cond, target: label } => {
            if test(frame, *cond)? {
                frame.pc = target(module, frame, *label);
            }
        }

        Instr::NewList(var) => frame.locals[var.0] = Value::list(Vec::new()),
        Instr::Push { list, value } => {
            let value = read(frame, value);
            list_mut(frame, *list)?.push(value);
        }
        Instr::Pop(list) => {
            list_mut(frame, *list)?.pop();
        }

        Instr::Call { callee, args } => {
            let mut values: Vec<Value> = args.iter().map(|v| frame.locals[v.0].clone()).collect();
            return match callee {
                Callee::Func(func) => Ok(Step::Call { func: *func, args: values }),
                Callee::Local(var) => match &frame.locals[var.0] {
                    Value::Parser(parser) => {
                        let mut combined = parser.captures.clone();
                        combined.append(&mut values);
                        Ok(Step::Call {
                            func: parser.func,
                            args: combined,
                        })
                    }
                    other => {
                        frame.result = other.clone();
                        frame.status = true;
                        Ok(Step::Next)
                    }
                },
            };
        }

        Instr::Eval { host, captures } => {
            let entry = &program.hosts[host.0];
            let mut env = module.globals.clone();
            for (name, var) in entry.locals.iter().zip(captures) {
                env.insert(name.clone(), frame.locals[var.0].clone());
            }
            frame.result = eval(&entry.expr, &env)?;
            frame.status = true;
        }

        Instr::Apply { func, arg } => {
            frame.result = call_value(&frame.locals[func.0], &[frame.locals[arg.0].clone()])?;
            frame.status = true;
        }

        Instr::Test { func, arg, error } => {
            let arg = frame.locals[arg.0].clone();
            if call_value(&frame.locals[func.0], &[arg.clone()])?.is_truthy() {
                frame.result = arg;
                frame.status = true;
            } else {
                fail(frame, *error);
            }
        }

        Instr::MakeList(vars) => {
            frame.result = Value::list(vars.iter().map(|v| frame.locals[v.0].clone()).collect());
        }

        Instr::MakeNode { class, fields, start } => {
            let values = fields.iter().map(|v| frame.locals[v.0].clone()).collect();
            let info = PositionInfo {
                start: Position::unresolved(position(&frame.locals[start.0])?),
                end: Position::unresolved(frame.pos),
            };
            let node = Node::new(Arc::clone(&program.classes[class.0]), values).with_position_info(info);
            frame.result = Value::node(node);
        }

        Instr::MakeInfix { left, op } => {
            let right = std::mem::take(&mut frame.result);
            frame.result = Value::infix(frame.locals[left.0].clone(), frame.locals[op.0].clone(), right);
        }

        Instr::MakePostfix { left } => {
            let op = std::mem::take(&mut frame.result);
            frame.result = Value::postfix(frame.locals[left.0].clone(), op);
        }

        Instr::FoldPrefix { ops } => {
            let ops = list(frame, *ops)?.to_vec();
            let operand = std::mem::take(&mut frame.result);
            frame.result = ops
                .into_iter()
                .rev()
                .fold(operand, |right, op| Value::prefix(op, right));
        }

        Instr::FoldRight { spine } => {
            let spine = list(frame, *spine)?;
            let (last, rest) = spine
                .split_last()
                .ok_or_else(|| err_msg!(Internal, "cannot fold an empty operator chain"))?;
            frame.result = rest
                .chunks(2)
                .rev()
                .fold(last.clone(), |right, pair| Value::infix(pair[0].clone(), pair[1].clone(), right));
        }

        Instr::MakeParser { func, captures } => {
            frame.result = Value::Parser(Arc::new(ParserRef {
                func: *func,
                captures: captures.iter().map(|v| frame.locals[v.0].clone()).collect(),
                name: program.function(*func).name.clone(),
            }));
        }

        Instr::Return => return Ok(Step::Return),
    }
    Ok(Step::Next)
}

fn fail(frame: &mut Frame, error: ErrorId) {
    frame.status = false;
    frame.result = Value::Error(error);
}

fn read(frame: &Frame, operand: &Operand) -> Value {
    match operand {
        Operand::Result => frame.result.clone(),
        Operand::Pos => Value::Int(frame.pos as i64),
        Operand::Var(var) => frame.locals[var.0].clone(),
        Operand::Const(value) => value.clone(),
    }
}

fn target(module: &ModuleInner, frame: &Frame, label: Label) -> usize {
    module.program.function(frame.func).labels[label.0]
}

fn position(value: &Value) -> Result<usize, SourcerError> {
    match value {
        Value::Int(i) if *i >= 0 => Ok(*i as usize),
        other => Err(err_msg!(Internal, "expected a saved position, found {}", other)),
    }
}

fn list(frame: &Frame, var: Var) -> Result<&[Value], SourcerError> {
    frame.locals[var.0]
        .as_list()
        .ok_or_else(|| err_msg!(Internal, "{} does not hold a list", var))
}

fn list_mut(frame: &mut Frame, var: Var) -> Result<&mut Vec<Value>, SourcerError> {
    match &mut frame.locals[var.0] {
        Value::List(items) => Ok(Arc::make_mut(items)),
        _ => Err(err_msg!(Internal, "{} does not hold a list", var)),
    }
}

/// A repetition bound; `None` leaves that side open.
fn bound(frame: &Frame, bound: BoundRef) -> Result<Option<i64>, SourcerError> {
    match bound {
        BoundRef::Const(n) => Ok(Some(n as i64)),
        BoundRef::Var(var) => match &frame.locals[var.0] {
            Value::None => Ok(None),
            value => value
                .as_int()
                .map(Some)
                .ok_or_else(|| err_msg!(Host, "repetition bound must be an int, not {}", value.type_name())),
        },
    }
}

fn test(frame: &Frame, cond: Cond) -> Result<bool, SourcerError> {
    let pos = frame.pos as i64;
    let saved = |var: Var| frame.locals[var.0].as_int().unwrap_or(-1);
    Ok(match cond {
        Cond::Status => frame.status,
        Cond::NotStatus => !frame.status,
        Cond::PosEq(v) => pos == saved(v),
        Cond::PosNe(v) => pos != saved(v),
        Cond::PosGe(v) => pos >= saved(v),
        Cond::PosGt(v) => pos > saved(v),
        Cond::PosLt(v) => pos < saved(v),
        Cond::PosLe(v) => pos <= saved(v),
        Cond::LenLt(v, b) => match bound(frame, b)? {
            Some(n) => (list(frame, v)?.len() as i64) < n,
            None => false,
        },
        Cond::LenGe(v, b) => match bound(frame, b)? {
            Some(n) => (list(frame, v)?.len() as i64) >= n,
            None => false,
        },
    })
}
