// Copyright 2026 the Method Capsule Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The function shell: rebuild and invoke a relocated capsule.
//!
//! A [`FunctionShell`] pairs a capsule's declared signature with its patched
//! instruction stream and runs it on a stack machine. Execution is bounded
//! on three axes: the declared `max_stack` caps the evaluation stack, and
//! [`Limits`] caps total instructions (fuel) and call depth. Every failure
//! carries the byte offset of the faulting instruction in a [`FaultInfo`].
//!
//! Token operands are looked up in the invocation's [`TokenScope`] first and
//! the host module second; the module fallback is what lets a relocated
//! function call straight into host-resident bytecode.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use crate::capsule::{Capsule, MalformedCapsule};
use crate::member::{MemberKind, MethodBody, NativeError};
use crate::module::{MemberHandle, Module};
use crate::opcode::{ESCAPE, Opcode};
use crate::relocate::{RelocateError, patch_body};
use crate::resolve::{ResolveError, TokenScope, resolve_tokens};
use crate::value::{Value, type_names};

/// Execution budgets for one invocation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Limits {
    /// Total instructions across all frames.
    pub fuel: u64,
    /// Maximum call depth, counting the entry frame as 0.
    pub max_call_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            fuel: 1_000_000,
            max_call_depth: 64,
        }
    }
}

/// A runtime fault raised by the stack machine.
#[derive(Clone, Debug, PartialEq)]
pub enum ExecutionFault {
    /// A byte at an instruction boundary is not a cataloged opcode.
    UnknownOpcode {
        /// The offending byte.
        byte: u8,
    },
    /// The stream ended in the middle of an instruction.
    TruncatedStream,
    /// An instruction needed more stack values than were present.
    EvalStackUnderflow,
    /// A push exceeded the declared stack bound.
    EvalStackOverflow {
        /// The declared bound.
        max_stack: u32,
    },
    /// An argument slot index is out of range.
    BadArgSlot {
        /// The slot operand.
        slot: u8,
    },
    /// A local slot index is out of range.
    BadLocalSlot {
        /// The slot operand.
        slot: u8,
    },
    /// A branch target lies outside the stream.
    BranchOutOfRange {
        /// The absolute target.
        target: usize,
    },
    /// A token operand resolves in neither the scope nor the module.
    UnresolvedToken {
        /// The token value.
        token: u32,
    },
    /// A token resolved to a member of the wrong kind for the instruction.
    KindMismatch {
        /// The token value.
        token: u32,
    },
    /// A value had no lossless projection to the required type.
    TypeMismatch {
        /// The required type name.
        expected: String,
        /// The actual value's type name.
        actual: &'static str,
    },
    /// Integer division or remainder by zero.
    DivideByZero,
    /// An integer operation left the representable range.
    NumericOverflow,
    /// A native member body failed.
    Member(NativeError),
    /// The bound argument count does not match the parameter list.
    ArgumentCount {
        /// Declared parameter count.
        expected: usize,
        /// Supplied argument count.
        actual: usize,
    },
    /// The instruction budget ran out.
    FuelExhausted,
    /// The call-depth budget ran out.
    CallDepthExceeded {
        /// The configured limit.
        limit: usize,
    },
    /// Control fell off the end of the stream without `ret`.
    NoReturn,
}

impl fmt::Display for ExecutionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOpcode { byte } => write!(f, "unknown opcode byte {byte:#04x}"),
            Self::TruncatedStream => write!(f, "truncated instruction stream"),
            Self::EvalStackUnderflow => write!(f, "evaluation stack underflow"),
            Self::EvalStackOverflow { max_stack } => {
                write!(f, "evaluation stack exceeded the declared bound {max_stack}")
            }
            Self::BadArgSlot { slot } => write!(f, "argument slot {slot} out of range"),
            Self::BadLocalSlot { slot } => write!(f, "local slot {slot} out of range"),
            Self::BranchOutOfRange { target } => write!(f, "branch target {target} out of range"),
            Self::UnresolvedToken { token } => write!(f, "unresolved token {token:#010x}"),
            Self::KindMismatch { token } => {
                write!(f, "token {token:#010x} names a member of the wrong kind")
            }
            Self::TypeMismatch { expected, actual } => {
                write!(f, "expected a {expected}, got a {actual}")
            }
            Self::DivideByZero => write!(f, "integer division by zero"),
            Self::NumericOverflow => write!(f, "integer overflow"),
            Self::Member(e) => write!(f, "{e}"),
            Self::ArgumentCount { expected, actual } => {
                write!(f, "function takes {expected} argument(s), got {actual}")
            }
            Self::FuelExhausted => write!(f, "instruction budget exhausted"),
            Self::CallDepthExceeded { limit } => write!(f, "call depth exceeded {limit}"),
            Self::NoReturn => write!(f, "control fell off the end of the stream"),
        }
    }
}

impl core::error::Error for ExecutionFault {}

/// A fault plus the byte offset of the instruction that raised it.
#[derive(Clone, Debug, PartialEq)]
pub struct FaultInfo {
    /// Byte offset of the faulting instruction.
    pub offset: usize,
    /// The fault.
    pub fault: ExecutionFault,
}

impl fmt::Display for FaultInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fault at offset {}: {}", self.offset, self.fault)
    }
}

impl core::error::Error for FaultInfo {}

/// Any failure along the decode / resolve / relocate / invoke pipeline.
#[derive(Clone, Debug, PartialEq)]
pub enum ExecuteError {
    /// The capsule document failed to decode.
    Capsule(MalformedCapsule),
    /// A symbol failed to resolve on this host.
    Resolve(ResolveError),
    /// A patch fell outside the stream.
    Relocate(RelocateError),
    /// The rebuilt function faulted at runtime.
    Fault(FaultInfo),
}

impl fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capsule(e) => write!(f, "{e}"),
            Self::Resolve(e) => write!(f, "{e}"),
            Self::Relocate(e) => write!(f, "{e}"),
            Self::Fault(e) => write!(f, "{e}"),
        }
    }
}

impl core::error::Error for ExecuteError {}

impl From<MalformedCapsule> for ExecuteError {
    fn from(e: MalformedCapsule) -> Self {
        Self::Capsule(e)
    }
}

impl From<ResolveError> for ExecuteError {
    fn from(e: ResolveError) -> Self {
        Self::Resolve(e)
    }
}

impl From<RelocateError> for ExecuteError {
    fn from(e: RelocateError) -> Self {
        Self::Relocate(e)
    }
}

impl From<FaultInfo> for ExecuteError {
    fn from(e: FaultInfo) -> Self {
        Self::Fault(e)
    }
}

/// A reconstructed, invocable function.
#[derive(Clone, Debug)]
pub struct FunctionShell {
    max_stack: u32,
    return_type: String,
    local_types: Vec<String>,
    parameter_types: Vec<String>,
    body: Vec<u8>,
}

impl FunctionShell {
    /// Builds a shell from a capsule's signature and its patched stream.
    #[must_use]
    pub fn from_capsule(capsule: &Capsule, patched_body: Vec<u8>) -> Self {
        Self {
            max_stack: capsule.max_stack,
            return_type: capsule.return_type.clone(),
            local_types: capsule.local_types.clone(),
            parameter_types: capsule.parameter_types.clone(),
            body: patched_body,
        }
    }

    /// Invokes the function with `args`, positionally bound and coerced to
    /// the declared parameter types.
    pub fn invoke(
        &self,
        module: &Module,
        scope: &TokenScope,
        args: &[Value],
        limits: &Limits,
    ) -> Result<Value, FaultInfo> {
        let bound = bind_args(args, &self.parameter_types, 0)?;
        let mut machine = Machine {
            module,
            scope,
            fuel: limits.fuel,
            depth_limit: limits.max_call_depth,
        };
        machine.run(
            &self.body,
            self.max_stack,
            &self.local_types,
            bound,
            &self.return_type,
            0,
        )
    }
}

/// Runs the full pipeline over an already-decoded capsule.
pub fn execute(module: &Module, capsule: &Capsule, limits: &Limits) -> Result<Value, ExecuteError> {
    let (scope, patches) = resolve_tokens(module, capsule)?;
    let body = patch_body(&capsule.body, &patches)?;
    let shell = FunctionShell::from_capsule(capsule, body);
    Ok(shell.invoke(module, &scope, &capsule.arguments, limits)?)
}

/// Runs the full pipeline from the JSON wire form.
pub fn execute_json(module: &Module, json: &str, limits: &Limits) -> Result<Value, ExecuteError> {
    let capsule = Capsule::from_json(json)?;
    execute(module, &capsule, limits)
}

fn bind_args(args: &[Value], params: &[String], offset: usize) -> Result<Vec<Value>, FaultInfo> {
    if args.len() != params.len() {
        return Err(FaultInfo {
            offset,
            fault: ExecutionFault::ArgumentCount {
                expected: params.len(),
                actual: args.len(),
            },
        });
    }
    let mut bound = Vec::with_capacity(args.len());
    for (arg, param) in args.iter().zip(params) {
        let v = arg.coerce_to(param).ok_or_else(|| FaultInfo {
            offset,
            fault: ExecutionFault::TypeMismatch {
                expected: param.clone(),
                actual: arg.type_name(),
            },
        })?;
        bound.push(v);
    }
    Ok(bound)
}

struct Machine<'m> {
    module: &'m Module,
    scope: &'m TokenScope,
    fuel: u64,
    depth_limit: usize,
}

impl<'m> Machine<'m> {
    #[allow(clippy::too_many_lines)]
    fn run(
        &mut self,
        body: &[u8],
        max_stack: u32,
        local_types: &[String],
        args: Vec<Value>,
        return_type: &str,
        depth: usize,
    ) -> Result<Value, FaultInfo> {
        let module = self.module;
        let mut stack: Vec<Value> = Vec::new();
        let mut locals: Vec<Value> = local_types
            .iter()
            .map(|t| Value::default_for_type(t))
            .collect();
        let mut pc = 0usize;

        macro_rules! fault {
            ($offset:expr, $fault:expr) => {
                return Err(FaultInfo {
                    offset: $offset,
                    fault: $fault,
                })
            };
        }

        while pc < body.len() {
            let offset = pc;
            if self.fuel == 0 {
                fault!(offset, ExecutionFault::FuelExhausted);
            }
            self.fuel -= 1;

            let first = body[pc];
            pc += 1;
            let opcode = if first == ESCAPE {
                let Some(second) = body.get(pc).copied() else {
                    fault!(offset, ExecutionFault::TruncatedStream);
                };
                pc += 1;
                Opcode::from_extended_byte(second)
            } else {
                Opcode::from_byte(first)
            };
            let Some(op) = opcode else {
                fault!(offset, ExecutionFault::UnknownOpcode { byte: first });
            };

            let width = op.operand_class().width();
            let mut raw: u64 = 0;
            if width > 0 {
                let Some(bytes) = body.get(pc..pc + width) else {
                    fault!(offset, ExecutionFault::TruncatedStream);
                };
                for (i, b) in bytes.iter().enumerate() {
                    raw |= u64::from(*b) << (8 * i);
                }
                pc += width;
            }

            macro_rules! pop {
                () => {
                    match stack.pop() {
                        Some(v) => v,
                        None => fault!(offset, ExecutionFault::EvalStackUnderflow),
                    }
                };
            }
            macro_rules! push {
                ($v:expr) => {{
                    if stack.len() >= max_stack as usize {
                        fault!(offset, ExecutionFault::EvalStackOverflow { max_stack });
                    }
                    stack.push($v);
                }};
            }
            macro_rules! branch {
                ($target:expr) => {{
                    let target = $target;
                    if target > body.len() {
                        fault!(offset, ExecutionFault::BranchOutOfRange { target });
                    }
                    pc = target;
                }};
            }

            match op {
                Opcode::Nop => {}
                Opcode::LdArg => {
                    let slot = raw as u8;
                    match args.get(slot as usize) {
                        Some(v) => push!(v.clone()),
                        None => fault!(offset, ExecutionFault::BadArgSlot { slot }),
                    }
                }
                Opcode::LdLoc => {
                    let slot = raw as u8;
                    match locals.get(slot as usize) {
                        Some(v) => push!(v.clone()),
                        None => fault!(offset, ExecutionFault::BadLocalSlot { slot }),
                    }
                }
                Opcode::StLoc => {
                    let slot = raw as u8;
                    let v = pop!();
                    match locals.get_mut(slot as usize) {
                        Some(dst) => *dst = v,
                        None => fault!(offset, ExecutionFault::BadLocalSlot { slot }),
                    }
                }
                Opcode::LdcI4 => push!(Value::I32(raw as u32 as i32)),
                Opcode::LdcI8 => push!(Value::I64(raw as i64)),
                Opcode::LdcR4 => push!(Value::F32(f32::from_bits(raw as u32))),
                Opcode::LdcR8 => push!(Value::F64(f64::from_bits(raw))),
                Opcode::LdNull => push!(Value::Null),
                Opcode::Dup => {
                    let v = pop!();
                    push!(v.clone());
                    push!(v);
                }
                Opcode::Pop => {
                    let _ = pop!();
                }
                Opcode::Br => branch!(raw as usize),
                Opcode::BrS => branch!(raw as usize),
                Opcode::BrFalse | Opcode::BrFalseS => {
                    let v = pop!();
                    match truthy(&v) {
                        Some(false) => branch!(raw as usize),
                        Some(true) => {}
                        None => fault!(
                            offset,
                            ExecutionFault::TypeMismatch {
                                expected: type_names::BOOL.to_string(),
                                actual: v.type_name(),
                            }
                        ),
                    }
                }
                Opcode::BrTrue | Opcode::BrTrueS => {
                    let v = pop!();
                    match truthy(&v) {
                        Some(true) => branch!(raw as usize),
                        Some(false) => {}
                        None => fault!(
                            offset,
                            ExecutionFault::TypeMismatch {
                                expected: type_names::BOOL.to_string(),
                                actual: v.type_name(),
                            }
                        ),
                    }
                }
                Opcode::Switch => {
                    let v = pop!();
                    let Some(Value::I32(selector)) = v.coerce_to(type_names::I32) else {
                        fault!(
                            offset,
                            ExecutionFault::TypeMismatch {
                                expected: type_names::I32.to_string(),
                                actual: v.type_name(),
                            }
                        );
                    };
                    if selector != 0 {
                        branch!(raw as usize);
                    }
                }
                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Rem => {
                    let b = pop!();
                    let a = pop!();
                    match numeric_binop(op, &a, &b) {
                        Ok(v) => push!(v),
                        Err(f) => fault!(offset, f),
                    }
                }
                Opcode::Ceq => {
                    let b = pop!();
                    let a = pop!();
                    push!(Value::Bool(values_equal(&a, &b)));
                }
                Opcode::Cgt | Opcode::Clt => {
                    let b = pop!();
                    let a = pop!();
                    match numeric_compare(&a, &b) {
                        Some(ordering) => {
                            let res = if matches!(op, Opcode::Cgt) {
                                ordering.is_gt()
                            } else {
                                ordering.is_lt()
                            };
                            push!(Value::Bool(res));
                        }
                        None => fault!(
                            offset,
                            ExecutionFault::TypeMismatch {
                                expected: "number".to_string(),
                                actual: a.type_name(),
                            }
                        ),
                    }
                }
                Opcode::Call | Opcode::CallI => {
                    let token = raw as u32;
                    let Some(handle) = self.lookup(token) else {
                        fault!(offset, ExecutionFault::UnresolvedToken { token });
                    };
                    if handle.kind != MemberKind::Method {
                        fault!(offset, ExecutionFault::KindMismatch { token });
                    }
                    let Some(method) = module
                        .type_def(handle.type_ix)
                        .and_then(|t| t.methods.get(handle.member_ix))
                    else {
                        fault!(offset, ExecutionFault::UnresolvedToken { token });
                    };
                    let argc = method.params.len();
                    if stack.len() < argc {
                        fault!(offset, ExecutionFault::EvalStackUnderflow);
                    }
                    let call_args = stack.split_off(stack.len() - argc);
                    let bound = bind_args(&call_args, &method.params, offset)?;
                    let result = match &method.body {
                        MethodBody::Native(f) => match f(&bound, &handle.type_args) {
                            Ok(v) => v,
                            Err(e) => fault!(offset, ExecutionFault::Member(e)),
                        },
                        MethodBody::Bytecode(b) => {
                            if depth >= self.depth_limit {
                                fault!(
                                    offset,
                                    ExecutionFault::CallDepthExceeded {
                                        limit: self.depth_limit,
                                    }
                                );
                            }
                            self.run(
                                &b.bytes,
                                b.max_stack,
                                &b.local_types,
                                bound,
                                &method.ret,
                                depth + 1,
                            )?
                        }
                    };
                    if method.ret != type_names::VOID {
                        push!(result);
                    }
                }
                Opcode::NewObj => {
                    let token = raw as u32;
                    let Some(handle) = self.lookup(token) else {
                        fault!(offset, ExecutionFault::UnresolvedToken { token });
                    };
                    if handle.kind != MemberKind::Constructor {
                        fault!(offset, ExecutionFault::KindMismatch { token });
                    }
                    let Some(ctor) = module
                        .type_def(handle.type_ix)
                        .and_then(|t| t.ctors.get(handle.member_ix))
                    else {
                        fault!(offset, ExecutionFault::UnresolvedToken { token });
                    };
                    let argc = ctor.params.len();
                    if stack.len() < argc {
                        fault!(offset, ExecutionFault::EvalStackUnderflow);
                    }
                    let call_args = stack.split_off(stack.len() - argc);
                    let bound = bind_args(&call_args, &ctor.params, offset)?;
                    match (ctor.body)(&bound, &[]) {
                        Ok(v) => push!(v),
                        Err(e) => fault!(offset, ExecutionFault::Member(e)),
                    }
                }
                Opcode::Cast => {
                    let token = raw as u32;
                    let Some(handle) = self.lookup(token) else {
                        fault!(offset, ExecutionFault::UnresolvedToken { token });
                    };
                    if handle.kind != MemberKind::Type {
                        fault!(offset, ExecutionFault::KindMismatch { token });
                    }
                    let Some(ty) = module.type_def(handle.type_ix) else {
                        fault!(offset, ExecutionFault::UnresolvedToken { token });
                    };
                    let v = pop!();
                    match v.coerce_to(&ty.name) {
                        Some(converted) => push!(converted),
                        None => fault!(
                            offset,
                            ExecutionFault::TypeMismatch {
                                expected: ty.name.clone(),
                                actual: v.type_name(),
                            }
                        ),
                    }
                }
                Opcode::LdSFld => {
                    let token = raw as u32;
                    let Some(handle) = self.lookup(token) else {
                        fault!(offset, ExecutionFault::UnresolvedToken { token });
                    };
                    if handle.kind != MemberKind::Field {
                        fault!(offset, ExecutionFault::KindMismatch { token });
                    }
                    let Some(field) = module
                        .type_def(handle.type_ix)
                        .and_then(|t| t.fields.get(handle.member_ix))
                    else {
                        fault!(offset, ExecutionFault::UnresolvedToken { token });
                    };
                    push!(field.value.clone());
                }
                Opcode::LdText => {
                    let token = raw as u32;
                    match module.text(token) {
                        Some(s) => push!(Value::text(s)),
                        None => fault!(offset, ExecutionFault::UnresolvedToken { token }),
                    }
                }
                Opcode::Ret => {
                    if return_type == type_names::VOID {
                        return Ok(Value::Null);
                    }
                    let v = pop!();
                    match v.coerce_to(return_type) {
                        Some(out) => return Ok(out),
                        None => fault!(
                            offset,
                            ExecutionFault::TypeMismatch {
                                expected: return_type.to_string(),
                                actual: v.type_name(),
                            }
                        ),
                    }
                }
            }
        }
        Err(FaultInfo {
            offset: body.len(),
            fault: ExecutionFault::NoReturn,
        })
    }

    fn lookup(&self, token: u32) -> Option<MemberHandle> {
        self.scope
            .resolve(token)
            .or_else(|| self.module.resolve_member(token))
            .cloned()
    }
}

fn truthy(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::I32(i) => Some(*i != 0),
        Value::Null => Some(false),
        _ => None,
    }
}

fn as_int(v: &Value) -> Option<i128> {
    match v {
        Value::I32(x) => Some(i128::from(*x)),
        Value::I64(x) => Some(i128::from(*x)),
        Value::U32(x) => Some(i128::from(*x)),
        Value::U64(x) => Some(i128::from(*x)),
        _ => None,
    }
}

fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::F32(x) => Some(f64::from(*x)),
        Value::F64(x) => Some(*x),
        _ => as_int(v).map(|i| i as f64),
    }
}

fn is_float(v: &Value) -> bool {
    matches!(v, Value::F32(_) | Value::F64(_))
}

fn numeric_binop(op: Opcode, a: &Value, b: &Value) -> Result<Value, ExecutionFault> {
    if let (Value::I32(x), Value::I32(y)) = (a, b) {
        let out = match op {
            Opcode::Add => x.wrapping_add(*y),
            Opcode::Sub => x.wrapping_sub(*y),
            Opcode::Mul => x.wrapping_mul(*y),
            Opcode::Div => {
                if *y == 0 {
                    return Err(ExecutionFault::DivideByZero);
                }
                x.wrapping_div(*y)
            }
            Opcode::Rem => {
                if *y == 0 {
                    return Err(ExecutionFault::DivideByZero);
                }
                x.wrapping_rem(*y)
            }
            _ => unreachable!(),
        };
        return Ok(Value::I32(out));
    }
    if is_float(a) || is_float(b) {
        let (x, y) = match (as_float(a), as_float(b)) {
            (Some(x), Some(y)) => (x, y),
            _ => {
                return Err(ExecutionFault::TypeMismatch {
                    expected: "number".to_string(),
                    actual: if as_float(a).is_none() {
                        a.type_name()
                    } else {
                        b.type_name()
                    },
                });
            }
        };
        let out = match op {
            Opcode::Add => x + y,
            Opcode::Sub => x - y,
            Opcode::Mul => x * y,
            Opcode::Div => x / y,
            Opcode::Rem => x % y,
            _ => unreachable!(),
        };
        return Ok(if matches!((a, b), (Value::F32(_), Value::F32(_))) {
            #[allow(clippy::cast_possible_truncation)]
            Value::F32(out as f32)
        } else {
            Value::F64(out)
        });
    }
    let (x, y) = match (as_int(a), as_int(b)) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            return Err(ExecutionFault::TypeMismatch {
                expected: "number".to_string(),
                actual: if as_int(a).is_none() {
                    a.type_name()
                } else {
                    b.type_name()
                },
            });
        }
    };
    let out = match op {
        Opcode::Add => x + y,
        Opcode::Sub => x - y,
        Opcode::Mul => x.checked_mul(y).ok_or(ExecutionFault::NumericOverflow)?,
        Opcode::Div => {
            if y == 0 {
                return Err(ExecutionFault::DivideByZero);
            }
            x / y
        }
        Opcode::Rem => {
            if y == 0 {
                return Err(ExecutionFault::DivideByZero);
            }
            x % y
        }
        _ => unreachable!(),
    };
    i64::try_from(out)
        .map(Value::I64)
        .map_err(|_| ExecutionFault::NumericOverflow)
}

fn numeric_compare(a: &Value, b: &Value) -> Option<core::cmp::Ordering> {
    if is_float(a) || is_float(b) {
        return as_float(a)?.partial_cmp(&as_float(b)?);
    }
    Some(as_int(a)?.cmp(&as_int(b)?))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match numeric_compare(a, b) {
        Some(ordering) => ordering.is_eq(),
        None => a == b,
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::asm::BodyAsm;
    use crate::capture::capture;
    use crate::member::{MethodDef, TypeDef};

    fn host() -> Module {
        Module::with_builtins(0xBEEF)
    }

    fn define(
        m: &mut Module,
        name: &str,
        params: Vec<String>,
        ret: &str,
        locals: Vec<String>,
        build: impl FnOnce(&mut Module, &mut BodyAsm),
    ) {
        if m.type_by_name("demo.Math").is_none() {
            m.register_type(TypeDef::new("demo.Math")).unwrap();
        }
        let mut asm = BodyAsm::new();
        build(m, &mut asm);
        let body = asm.into_body(locals).unwrap();
        m.define_method(
            "demo.Math",
            MethodDef {
                name: name.into(),
                params,
                ret: ret.into(),
                type_params: 0,
                body: MethodBody::Bytecode(body),
            },
        )
        .unwrap();
    }

    fn run(m: &Module, name: &str, args: Vec<Value>) -> Result<Value, ExecuteError> {
        let capsule = capture(m, "demo.Math", name, args).unwrap();
        execute(m, &capsule, &Limits::default())
    }

    #[test]
    fn arithmetic_and_return_coercion() {
        let mut m = host();
        define(
            &mut m,
            "add",
            vec![type_names::I32.into(), type_names::I32.into()],
            type_names::I64,
            vec![],
            |_, asm| {
                asm.ld_arg(0);
                asm.ld_arg(1);
                asm.add();
                asm.ret();
            },
        );
        // I32 result coerces losslessly to the declared I64 return type.
        assert_eq!(run(&m, "add", vec![Value::I32(3), Value::I32(4)]).unwrap(), Value::I64(7));
    }

    #[test]
    fn branches_drive_a_countdown_loop() {
        let mut m = host();
        // sum = 0; while (n > 0) { sum += n; n -= 1 } return sum
        define(
            &mut m,
            "triangle",
            vec![type_names::I32.into()],
            type_names::I32,
            vec![type_names::I32.into(), type_names::I32.into()],
            |_, asm| {
                let top = asm.label();
                let done = asm.label();
                asm.ld_arg(0);
                asm.st_loc(0); // n
                asm.bind(top);
                asm.ld_loc(0);
                asm.ldc_i4(0);
                asm.cgt();
                asm.br_false(done);
                asm.ld_loc(1);
                asm.ld_loc(0);
                asm.add();
                asm.st_loc(1); // sum
                asm.ld_loc(0);
                asm.ldc_i4(1);
                asm.sub();
                asm.st_loc(0);
                asm.br(top);
                asm.bind(done);
                asm.ld_loc(1);
                asm.ret();
            },
        );
        assert_eq!(run(&m, "triangle", vec![Value::I32(5)]).unwrap(), Value::I32(15));
        assert_eq!(run(&m, "triangle", vec![Value::I32(0)]).unwrap(), Value::I32(0));
    }

    #[test]
    fn switch_branches_on_nonzero() {
        let mut m = host();
        define(
            &mut m,
            "pick",
            vec![type_names::I32.into()],
            type_names::I32,
            vec![],
            |_, asm| {
                let nonzero = asm.label();
                asm.ld_arg(0);
                asm.switch(nonzero);
                asm.ldc_i4(100);
                asm.ret();
                asm.bind(nonzero);
                asm.ldc_i4(200);
                asm.ret();
            },
        );
        assert_eq!(run(&m, "pick", vec![Value::I32(0)]).unwrap(), Value::I32(100));
        assert_eq!(run(&m, "pick", vec![Value::I32(3)]).unwrap(), Value::I32(200));
    }

    #[test]
    fn calls_reach_native_members_through_relocated_tokens() {
        let mut m = host();
        define(
            &mut m,
            "digest",
            vec![type_names::TEXT.into()],
            type_names::TEXT,
            vec![],
            |m, asm| {
                let hash = m.method_token("core.Fnv64", "hash_hex").unwrap();
                asm.ld_arg(0);
                asm.call(hash, 1, true);
                asm.ret();
            },
        );
        let out = run(&m, "digest", vec![Value::text("abc")]).unwrap();
        assert_eq!(out, Value::text("e71fa2190541574b"));
    }

    #[test]
    fn void_calls_push_nothing() {
        let mut m = host();
        define(
            &mut m,
            "build",
            vec![],
            type_names::I32,
            vec![type_names::SEQ.into()],
            |m, asm| {
                let ctor = m.ctor_token("core.Seq", 0).unwrap();
                let push = m.method_token("core.Seq", "push").unwrap();
                let len = m.method_token("core.Seq", "len").unwrap();
                asm.new_obj(ctor, 0);
                asm.st_loc(0);
                asm.ld_loc(0);
                asm.ldc_i4(9);
                asm.call(push, 2, false);
                asm.ld_loc(0);
                asm.call(len, 1, true);
                asm.ret();
            },
        );
        assert_eq!(run(&m, "build", vec![]).unwrap(), Value::I32(1));
    }

    #[test]
    fn divide_by_zero_faults_with_the_offset() {
        let mut m = host();
        define(
            &mut m,
            "divide",
            vec![type_names::I32.into(), type_names::I32.into()],
            type_names::I32,
            vec![],
            |_, asm| {
                asm.ld_arg(0);
                asm.ld_arg(1);
                asm.div();
                asm.ret();
            },
        );
        let err = run(&m, "divide", vec![Value::I32(1), Value::I32(0)]).unwrap_err();
        let ExecuteError::Fault(info) = err else {
            panic!("expected a fault");
        };
        assert_eq!(info.fault, ExecutionFault::DivideByZero);
        assert_eq!(info.offset, 4); // two 2-byte ldarg.s instructions first
    }

    #[test]
    fn fuel_runs_out_on_infinite_loops() {
        let mut m = host();
        define(
            &mut m,
            "spin",
            vec![],
            type_names::VOID,
            vec![],
            |_, asm| {
                let top = asm.label();
                asm.bind(top);
                asm.br(top);
            },
        );
        let capsule = capture(&m, "demo.Math", "spin", vec![]).unwrap();
        let limits = Limits {
            fuel: 100,
            ..Limits::default()
        };
        let err = execute(&m, &capsule, &limits).unwrap_err();
        assert!(matches!(
            err,
            ExecuteError::Fault(FaultInfo {
                fault: ExecutionFault::FuelExhausted,
                ..
            })
        ));
    }

    #[test]
    fn declared_max_stack_is_enforced() {
        let mut m = host();
        define(
            &mut m,
            "deep",
            vec![],
            type_names::I32,
            vec![],
            |_, asm| {
                asm.ldc_i4(1);
                asm.ldc_i4(2);
                asm.add();
                asm.ret();
            },
        );
        let mut capsule = capture(&m, "demo.Math", "deep", vec![]).unwrap();
        capsule.max_stack = 1;
        let err = execute(&m, &capsule, &Limits::default()).unwrap_err();
        assert!(matches!(
            err,
            ExecuteError::Fault(FaultInfo {
                fault: ExecutionFault::EvalStackOverflow { max_stack: 1 },
                ..
            })
        ));
    }

    #[test]
    fn falling_off_the_end_is_a_fault() {
        let mut m = host();
        define(
            &mut m,
            "drop",
            vec![],
            type_names::VOID,
            vec![],
            |_, asm| {
                asm.nop();
            },
        );
        let err = run(&m, "drop", vec![]).unwrap_err();
        assert!(matches!(
            err,
            ExecuteError::Fault(FaultInfo {
                fault: ExecutionFault::NoReturn,
                offset: 1,
            })
        ));
    }

    #[test]
    fn calli_through_an_unminted_signature_token_faults() {
        let mut m = host();
        define(
            &mut m,
            "indirect",
            vec![],
            type_names::VOID,
            vec![],
            |_, asm| {
                asm.call_i(0x1100_0001, 0, false);
                asm.ret();
            },
        );
        let err = run(&m, "indirect", vec![]).unwrap_err();
        assert!(matches!(
            err,
            ExecuteError::Fault(FaultInfo {
                fault: ExecutionFault::UnresolvedToken { token: 0x1100_0001 },
                offset: 0,
            })
        ));
    }

    #[test]
    fn arguments_bind_with_lossless_coercion() {
        let mut m = host();
        define(
            &mut m,
            "first",
            vec![type_names::CHAR.into()],
            type_names::CHAR,
            vec![],
            |_, asm| {
                asm.ld_arg(0);
                asm.ret();
            },
        );
        // A 1-character text argument (the wire form of a char) binds to the
        // declared core.Char parameter.
        assert_eq!(run(&m, "first", vec![Value::text("x")]).unwrap(), Value::Char('x'));
        let err = run(&m, "first", vec![Value::text("xy")]).unwrap_err();
        assert!(matches!(
            err,
            ExecuteError::Fault(FaultInfo {
                fault: ExecutionFault::TypeMismatch { .. },
                offset: 0,
            })
        ));
    }

    #[test]
    fn cast_converts_through_a_relocated_type_token() {
        let mut m = host();
        define(
            &mut m,
            "to_char",
            vec![type_names::I32.into()],
            type_names::CHAR,
            vec![],
            |m, asm| {
                let char_ty = m.type_token(type_names::CHAR).unwrap();
                asm.ld_arg(0);
                asm.cast(char_ty);
                asm.ret();
            },
        );
        assert_eq!(run(&m, "to_char", vec![Value::I32(97)]).unwrap(), Value::Char('a'));
    }

    #[test]
    fn static_fields_load_through_relocated_tokens() {
        let mut m = host();
        define(
            &mut m,
            "empty",
            vec![],
            type_names::TEXT,
            vec![],
            |m, asm| {
                let field = m.field_token("core.Text", "EMPTY").unwrap();
                asm.ld_sfld(field);
                asm.ret();
            },
        );
        assert_eq!(run(&m, "empty", vec![]).unwrap(), Value::text(""));
    }
}
