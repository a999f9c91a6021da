// Copyright 2026 the Method Capsule Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Member definitions held by a host module's symbol table.
//!
//! Types own static fields, constructors, and methods. A method body is
//! either native (a Rust function over boxed values) or bytecode (a method
//! body stream that the invoker interprets, and the only kind of body the
//! capture pipeline accepts).
//!
//! Identity across hosts is structural: members are keyed by a canonical
//! full signature (`declaring.name(Param,Param)` with simple parameter type
//! names), never by host-local tokens.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::value::Value;

/// The kind of a member a symbolic token denotes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MemberKind {
    /// A type reference.
    Type,
    /// A static field.
    Field,
    /// A constructor.
    Constructor,
    /// A method.
    Method,
}

impl MemberKind {
    /// Returns the literal wire string for this kind.
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Type => "RuntimeType",
            Self::Field => "RtFieldInfo",
            Self::Constructor => "Constructor",
            Self::Method => "Method",
        }
    }

    /// Parses a wire string; `None` for kinds outside the closed set.
    #[must_use]
    pub fn from_wire_name(s: &str) -> Option<Self> {
        match s {
            "RuntimeType" => Some(Self::Type),
            "RtFieldInfo" => Some(Self::Field),
            "Constructor" => Some(Self::Constructor),
            "Method" => Some(Self::Method),
            _ => None,
        }
    }
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// An error raised by a native member body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NativeError {
    /// Wrong number of arguments reached the body.
    ArgumentCount {
        /// Expected argument count.
        expected: usize,
        /// Actual argument count.
        actual: usize,
    },
    /// An argument had an unusable type.
    ArgumentType {
        /// Position of the offending argument.
        position: usize,
        /// Expected type name.
        expected: &'static str,
    },
    /// The body failed for a domain reason.
    Failed(String),
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArgumentCount { expected, actual } => {
                write!(f, "argument count mismatch (expected {expected}, got {actual})")
            }
            Self::ArgumentType { position, expected } => {
                write!(f, "argument {position} is not a {expected}")
            }
            Self::Failed(reason) => write!(f, "native member failed: {reason}"),
        }
    }
}

impl core::error::Error for NativeError {}

/// A native member body.
///
/// `type_args` carries the concrete type names a generic method was
/// instantiated over; it is empty for non-generic members.
pub type NativeFn = fn(args: &[Value], type_args: &[String]) -> Result<Value, NativeError>;

/// A bytecode method body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BodyDef {
    /// Upper bound on the evaluation-stack depth the stream requires.
    pub max_stack: u32,
    /// Declared local-variable types, in slot order.
    pub local_types: Vec<String>,
    /// The instruction stream.
    pub bytes: Vec<u8>,
}

/// A method body.
#[derive(Clone)]
pub enum MethodBody {
    /// A native Rust body.
    Native(NativeFn),
    /// An interpretable bytecode body (the capturable kind).
    Bytecode(BodyDef),
}

impl fmt::Debug for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native(_) => f.write_str("MethodBody::Native(..)"),
            Self::Bytecode(body) => f.debug_tuple("MethodBody::Bytecode").field(body).finish(),
        }
    }
}

/// A static field definition.
#[derive(Clone, Debug)]
pub struct FieldDef {
    /// Simple field name.
    pub name: String,
    /// Fully-qualified field type name.
    pub ty: String,
    /// The field value.
    pub value: Value,
}

/// A constructor definition.
#[derive(Clone, Debug)]
pub struct CtorDef {
    /// Fully-qualified parameter type names, in order.
    pub params: Vec<String>,
    /// The constructor body; returns the new instance.
    pub body: NativeFn,
}

/// A method definition.
#[derive(Clone, Debug)]
pub struct MethodDef {
    /// Simple method name.
    pub name: String,
    /// Fully-qualified parameter type names, in order.
    pub params: Vec<String>,
    /// Fully-qualified return type name (`core.Void` for none).
    pub ret: String,
    /// Number of generic type parameters; 0 for non-generic methods.
    pub type_params: usize,
    /// The body.
    pub body: MethodBody,
}

impl MethodDef {
    /// Returns `true` for generic method definitions.
    #[must_use]
    pub fn is_generic(&self) -> bool {
        self.type_params > 0
    }
}

/// A type definition registered in a module.
#[derive(Clone, Debug, Default)]
pub struct TypeDef {
    /// Fully-qualified type name.
    pub name: String,
    /// Static fields, in declaration order.
    pub fields: Vec<FieldDef>,
    /// Constructors, in declaration order.
    pub ctors: Vec<CtorDef>,
    /// Methods, in declaration order.
    pub methods: Vec<MethodDef>,
}

impl TypeDef {
    /// Creates an empty type definition.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Returns the simple (unqualified) form of a type name.
#[must_use]
pub fn simple_type_name(full: &str) -> &str {
    full.rsplit('.').next().unwrap_or(full)
}

/// Builds the canonical full signature of a method or constructor.
///
/// Shape: `declaring.name(Param,Param)` with simple parameter type names,
/// e.g. `core.Text.join(Text,Seq)`. Constructors use the name `.ctor`.
#[must_use]
pub fn full_signature(declaring: &str, name: &str, params: &[String]) -> String {
    let mut joined = String::new();
    for (i, p) in params.iter().enumerate() {
        if i > 0 {
            joined.push(',');
        }
        joined.push_str(simple_type_name(p));
    }
    format!("{declaring}.{name}({joined})")
}

/// The reserved constructor member name.
pub const CTOR_NAME: &str = ".ctor";
