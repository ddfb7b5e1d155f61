//! Compiled program form: a flat op list run by a stack evaluator.
//!
//! The parser lowers every expression to a `Vec<Op>`; evaluation walks it
//! against a scope plus a positional bindings slice and never re-parses
//! text. Short-circuit operators and safe navigation are forward jumps.
//!
//! # Invariants
//!
//! - Jumps are relative to the following op; compiled programs only jump
//!   forward, to a patched target inside the same program.
//! - A structurally balanced compile leaves exactly one value on the
//!   stack. Underflow reads `Undefined` rather than panicking, so a
//!   best-effort compile of malformed input still evaluates.
//! - Errors abort the current run only; they leave no shared state behind.

use std::rc::Rc;

use smallvec::SmallVec;
use weft_core::builtins;
use weft_core::reactive::{ReactiveList, ReactiveMap};
use weft_core::{EvalError, Scope, Value};

use crate::filters::FilterRegistry;

/// Unary operators with runtime evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// `-x`: numeric negation.
    Neg,
    /// `+x`: numeric coercion.
    Plus,
    /// `!x`: truthiness complement.
    Not,
    /// `~x`: 32-bit bitwise complement.
    BitNot,
    /// `new x`: grammatically accepted, evaluates to an error.
    New,
}

/// Binary operators with runtime evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    /// `==` loose equality.
    Eq,
    /// `!=` loose inequality.
    Ne,
    /// `===` strict identity.
    StrictEq,
    /// `!==` strict non-identity.
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    BitAnd,
    BitXor,
    Shl,
    Shr,
    /// Grammatically accepted, evaluates to an error.
    InstanceOf,
}

/// One instruction of a compiled expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    PushLit(Value),
    /// Tracked read resolving outward through the scope chain.
    ReadScope(Rc<str>),
    /// Tracked read against the write frame only; call targets bind here.
    ReadScopeForWrite(Rc<str>),
    /// Positional extra binding; out-of-range slots read `Undefined`.
    ReadBinding(usize),
    /// Builtin global (`Math`, `JSON`, ...).
    ReadBuiltin(Rc<str>),
    /// The write frame as a map value.
    ReadThis,
    GetProp(Rc<str>),
    /// Pops index then base.
    GetIndex,
    /// Pops value then base; pushes the value back as the result.
    SetProp(Rc<str>),
    /// Pops value, index, base; pushes the value back.
    SetIndex,
    /// Bare-name assignment into the write frame.
    SetScope(Rc<str>),
    /// Compound-assignment write-back to the owning frame.
    AssignScope(Rc<str>),
    DeleteProp(Rc<str>),
    /// Pops index then base.
    DeleteIndex,
    /// `delete name` on a bare identifier: removes it from its owning frame.
    DeleteScope(Rc<str>),
    /// `key in base`: pops base then key; tracked presence check.
    HasKey,
    /// Pops `argc` arguments then the callee.
    Call(usize),
    /// Like `Call`, but a non-callable callee yields `Undefined`.
    SafeCall(usize),
    /// Pops `argc` arguments then the receiver; dispatches native methods.
    CallMethod(Rc<str>, usize),
    /// Like `CallMethod`, but a nullish receiver or missing method yields
    /// `Undefined` instead of erroring.
    SafeCallMethod(Rc<str>, usize),
    Unary(UnOp),
    Binary(BinOp),
    TypeOf,
    Void,
    Jump(isize),
    /// Peeks; jumps when the top of stack is falsy.
    JumpIfFalsy(isize),
    /// Peeks; jumps when the top of stack is truthy.
    JumpIfTruthy(isize),
    /// Peeks; jumps when the top of stack is nullish.
    JumpIfNullish(isize),
    PopDiscard,
    Dup,
    /// Duplicates the top two entries, preserving order.
    Dup2,
    /// Pops `n` values and pushes their display forms joined.
    ConcatN(usize),
    MakeList(usize),
    /// Pops one value per key, in key order.
    MakeMap(Vec<Rc<str>>),
    /// Pops `argc` filter arguments then the piped value.
    ApplyFilter(Rc<str>, usize),
}

/// A compiled, immutable op sequence. Shared by every cached handle to the
/// same (expression, bindings) pair.
#[derive(Debug)]
pub struct Program {
    ops: Vec<Op>,
}

impl Program {
    pub(crate) fn new(ops: Vec<Op>) -> Self {
        Program { ops }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Runs the program against `scope` with positional `bindings`.
    pub fn run(
        &self,
        scope: &Scope,
        bindings: &[Value],
        filters: &FilterRegistry,
    ) -> Result<Value, EvalError> {
        let mut stack: SmallVec<[Value; 8]> = SmallVec::new();
        let mut ip = 0usize;

        while ip < self.ops.len() {
            match &self.ops[ip] {
                Op::PushLit(v) => stack.push(v.clone()),
                Op::ReadScope(name) => stack.push(scope.read(name)),
                Op::ReadScopeForWrite(name) => stack.push(scope.read_for_write(name)),
                Op::ReadBinding(slot) => {
                    stack.push(bindings.get(*slot).cloned().unwrap_or(Value::Undefined));
                }
                Op::ReadBuiltin(name) => {
                    stack.push(builtins::global(name).unwrap_or(Value::Undefined));
                }
                Op::ReadThis => stack.push(scope.this_value()),
                Op::GetProp(name) => {
                    let base = pop(&mut stack);
                    stack.push(base.get_member(name)?);
                }
                Op::GetIndex => {
                    let index = pop(&mut stack);
                    let base = pop(&mut stack);
                    stack.push(base.get_index(&index)?);
                }
                Op::SetProp(name) => {
                    let value = pop(&mut stack);
                    let base = pop(&mut stack);
                    base.set_member(name, value.clone())?;
                    stack.push(value);
                }
                Op::SetIndex => {
                    let value = pop(&mut stack);
                    let index = pop(&mut stack);
                    let base = pop(&mut stack);
                    base.set_index(&index, value.clone())?;
                    stack.push(value);
                }
                Op::SetScope(name) => {
                    let value = pop(&mut stack);
                    scope.write(name, value.clone());
                    stack.push(value);
                }
                Op::AssignScope(name) => {
                    let value = pop(&mut stack);
                    scope.assign_resolved(name, value.clone());
                    stack.push(value);
                }
                Op::DeleteProp(name) => {
                    let base = pop(&mut stack);
                    base.delete_member(name)?;
                    stack.push(Value::Bool(true));
                }
                Op::DeleteIndex => {
                    let index = pop(&mut stack);
                    let base = pop(&mut stack);
                    base.delete_member(&index.to_display())?;
                    stack.push(Value::Bool(true));
                }
                Op::DeleteScope(name) => {
                    match scope.lookup(name) {
                        Some((owner, key)) => {
                            owner.frame().delete(&key);
                        }
                        None => {
                            scope.write_scope().frame().delete(name);
                        }
                    }
                    stack.push(Value::Bool(true));
                }
                Op::HasKey => {
                    let base = pop(&mut stack);
                    let key = pop(&mut stack);
                    stack.push(Value::Bool(base.has_member(&key.to_display())?));
                }
                Op::Call(argc) => {
                    let args = pop_args(&mut stack, *argc);
                    let callee = pop(&mut stack);
                    stack.push(callee.call(&args)?);
                }
                Op::SafeCall(argc) => {
                    let args = pop_args(&mut stack, *argc);
                    let callee = pop(&mut stack);
                    match callee {
                        Value::Func(f) => stack.push(f.call(&args)?),
                        _ => stack.push(Value::Undefined),
                    }
                }
                Op::CallMethod(name, argc) => {
                    let args = pop_args(&mut stack, *argc);
                    let recv = pop(&mut stack);
                    stack.push(builtins::call_method(&recv, name, &args)?);
                }
                Op::SafeCallMethod(name, argc) => {
                    let args = pop_args(&mut stack, *argc);
                    let recv = pop(&mut stack);
                    if recv.is_nullish() || !builtins::has_method(&recv, name) {
                        stack.push(Value::Undefined);
                    } else {
                        stack.push(builtins::call_method(&recv, name, &args)?);
                    }
                }
                Op::Unary(op) => {
                    let v = pop(&mut stack);
                    stack.push(eval_unary(*op, &v)?);
                }
                Op::Binary(op) => {
                    let rhs = pop(&mut stack);
                    let lhs = pop(&mut stack);
                    stack.push(eval_binary(*op, &lhs, &rhs)?);
                }
                Op::TypeOf => {
                    let v = pop(&mut stack);
                    stack.push(Value::str(v.typeof_tag()));
                }
                Op::Void => {
                    let _ = pop(&mut stack);
                    stack.push(Value::Undefined);
                }
                Op::Jump(rel) => {
                    ip = jump_target(ip, *rel);
                    continue;
                }
                Op::JumpIfFalsy(rel) => {
                    if !peek(&stack).is_truthy() {
                        ip = jump_target(ip, *rel);
                        continue;
                    }
                }
                Op::JumpIfTruthy(rel) => {
                    if peek(&stack).is_truthy() {
                        ip = jump_target(ip, *rel);
                        continue;
                    }
                }
                Op::JumpIfNullish(rel) => {
                    if peek(&stack).is_nullish() {
                        ip = jump_target(ip, *rel);
                        continue;
                    }
                }
                Op::PopDiscard => {
                    let _ = stack.pop();
                }
                Op::Dup => {
                    let top = peek(&stack).clone();
                    stack.push(top);
                }
                Op::Dup2 => {
                    let len = stack.len();
                    let a = if len >= 2 {
                        stack[len - 2].clone()
                    } else {
                        Value::Undefined
                    };
                    let b = if len >= 1 {
                        stack[len - 1].clone()
                    } else {
                        Value::Undefined
                    };
                    stack.push(a);
                    stack.push(b);
                }
                Op::ConcatN(n) => {
                    let parts = pop_args(&mut stack, *n);
                    let mut out = String::new();
                    for part in &parts {
                        out.push_str(&part.to_display());
                    }
                    stack.push(Value::str(out));
                }
                Op::MakeList(n) => {
                    let items = pop_args(&mut stack, *n);
                    stack.push(Value::List(ReactiveList::from_values(items.into_vec())));
                }
                Op::MakeMap(keys) => {
                    let values = pop_args(&mut stack, keys.len());
                    let entries = keys
                        .iter()
                        .cloned()
                        .zip(values.into_iter());
                    stack.push(Value::Map(ReactiveMap::from_entries(entries)));
                }
                Op::ApplyFilter(name, argc) => {
                    let args = pop_args(&mut stack, *argc);
                    let value = pop(&mut stack);
                    let filter = filters.get(name).ok_or_else(|| EvalError::UnknownFilter {
                        name: name.to_string(),
                    })?;
                    stack.push(filter(&value, &args)?);
                }
            }
            ip += 1;
        }

        Ok(stack.pop().unwrap_or(Value::Undefined))
    }
}

fn pop(stack: &mut SmallVec<[Value; 8]>) -> Value {
    stack.pop().unwrap_or(Value::Undefined)
}

fn peek(stack: &SmallVec<[Value; 8]>) -> &Value {
    stack.last().unwrap_or(&Value::Undefined)
}

fn pop_args(stack: &mut SmallVec<[Value; 8]>, argc: usize) -> SmallVec<[Value; 8]> {
    let at = stack.len().saturating_sub(argc);
    stack.drain(at..).collect()
}

fn jump_target(ip: usize, rel: isize) -> usize {
    usize::try_from(ip as isize + 1 + rel).unwrap_or(usize::MAX)
}

fn eval_unary(op: UnOp, v: &Value) -> Result<Value, EvalError> {
    match op {
        UnOp::Neg => Ok(Value::Num(-v.to_number())),
        UnOp::Plus => Ok(Value::Num(v.to_number())),
        UnOp::Not => Ok(Value::Bool(!v.is_truthy())),
        UnOp::BitNot => Ok(Value::Num(f64::from(!to_i32(v.to_number())))),
        UnOp::New => Err(EvalError::Unsupported { op: "new" }),
    }
}

fn eval_binary(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    let out = match op {
        BinOp::Add => {
            if matches!(lhs, Value::Str(_)) || matches!(rhs, Value::Str(_)) {
                Value::str(format!("{}{}", lhs.to_display(), rhs.to_display()))
            } else {
                Value::Num(lhs.to_number() + rhs.to_number())
            }
        }
        BinOp::Sub => Value::Num(lhs.to_number() - rhs.to_number()),
        BinOp::Mul => Value::Num(lhs.to_number() * rhs.to_number()),
        BinOp::Div => Value::Num(lhs.to_number() / rhs.to_number()),
        BinOp::Rem => Value::Num(lhs.to_number() % rhs.to_number()),
        BinOp::Eq => Value::Bool(lhs.loose_eq(rhs)),
        BinOp::Ne => Value::Bool(!lhs.loose_eq(rhs)),
        BinOp::StrictEq => Value::Bool(lhs.identical(rhs)),
        BinOp::StrictNe => Value::Bool(!lhs.identical(rhs)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => compare(op, lhs, rhs),
        BinOp::BitAnd => Value::Num(f64::from(to_i32(lhs.to_number()) & to_i32(rhs.to_number()))),
        BinOp::BitXor => Value::Num(f64::from(to_i32(lhs.to_number()) ^ to_i32(rhs.to_number()))),
        BinOp::Shl => Value::Num(f64::from(
            to_i32(lhs.to_number()) << (to_i32(rhs.to_number()) as u32 & 31),
        )),
        BinOp::Shr => Value::Num(f64::from(
            to_i32(lhs.to_number()) >> (to_i32(rhs.to_number()) as u32 & 31),
        )),
        BinOp::InstanceOf => return Err(EvalError::Unsupported { op: "instanceof" }),
    };
    Ok(out)
}

/// Ordering comparisons: lexicographic when both sides are strings, else
/// numeric. NaN on either side compares false.
fn compare(op: BinOp, lhs: &Value, rhs: &Value) -> Value {
    let holds = match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => match op {
            BinOp::Lt => a < b,
            BinOp::Le => a <= b,
            BinOp::Gt => a > b,
            _ => a >= b,
        },
        _ => {
            let (a, b) = (lhs.to_number(), rhs.to_number());
            match op {
                BinOp::Lt => a < b,
                BinOp::Le => a <= b,
                BinOp::Gt => a > b,
                _ => a >= b,
            }
        }
    };
    Value::Bool(holds)
}

/// 32-bit wrap-around conversion backing the bitwise operators.
fn to_i32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let m = n.trunc().rem_euclid(4_294_967_296.0);
    let m = if m >= 2_147_483_648.0 {
        m - 4_294_967_296.0
    } else {
        m
    };
    m as i32
}
