// Copyright 2026 the Method Capsule Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The boxed, dynamically-typed value model.
//!
//! Arguments, locals, and evaluation-stack slots are described only by
//! fully-qualified type name strings in a capsule; at the host boundary they
//! are projected into this closed variant type. The capsule codec narrows
//! wire values into the tightest matching variant (see `capsule`).

use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;

/// Fully-qualified names of the primitive value types.
pub mod type_names {
    /// The null type.
    pub const NULL: &str = "core.Null";
    /// Boolean.
    pub const BOOL: &str = "core.Bool";
    /// Signed 32-bit integer.
    pub const I32: &str = "core.I32";
    /// Signed 64-bit integer.
    pub const I64: &str = "core.I64";
    /// Unsigned 32-bit integer.
    pub const U32: &str = "core.U32";
    /// Unsigned 64-bit integer.
    pub const U64: &str = "core.U64";
    /// 32-bit float.
    pub const F32: &str = "core.F32";
    /// 64-bit float.
    pub const F64: &str = "core.F64";
    /// A single character.
    pub const CHAR: &str = "core.Char";
    /// UTF-8 text.
    pub const TEXT: &str = "core.Text";
    /// A growable sequence.
    pub const SEQ: &str = "core.Seq";
    /// The void pseudo-type (a method with this return type pushes nothing).
    pub const VOID: &str = "core.Void";
    /// Wildcard accepted by built-in members that take any value.
    pub const ANY: &str = "core.Any";
}

/// A boxed runtime value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// The null value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 32-bit integer.
    I32(i32),
    /// Signed 64-bit integer.
    I64(i64),
    /// Unsigned 32-bit integer.
    U32(u32),
    /// Unsigned 64-bit integer.
    U64(u64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
    /// A single character.
    Char(char),
    /// UTF-8 text.
    Text(String),
    /// A growable sequence with shared-reference semantics.
    ///
    /// Sequences never cross the capsule wire; they exist only inside a host.
    Seq(Rc<RefCell<Vec<Value>>>),
}

impl Value {
    /// Creates an empty sequence.
    #[must_use]
    pub fn new_seq() -> Self {
        Self::Seq(Rc::new(RefCell::new(Vec::new())))
    }

    /// Creates a text value.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Returns the fully-qualified type name of this value.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => type_names::NULL,
            Self::Bool(_) => type_names::BOOL,
            Self::I32(_) => type_names::I32,
            Self::I64(_) => type_names::I64,
            Self::U32(_) => type_names::U32,
            Self::U64(_) => type_names::U64,
            Self::F32(_) => type_names::F32,
            Self::F64(_) => type_names::F64,
            Self::Char(_) => type_names::CHAR,
            Self::Text(_) => type_names::TEXT,
            Self::Seq(_) => type_names::SEQ,
        }
    }

    /// Returns the default value for a declared type name.
    ///
    /// Used to initialize local-variable slots. Unknown names default to
    /// null, matching reference-typed locals.
    #[must_use]
    pub fn default_for_type(type_name: &str) -> Self {
        match type_name {
            type_names::BOOL => Self::Bool(false),
            type_names::I32 => Self::I32(0),
            type_names::I64 => Self::I64(0),
            type_names::U32 => Self::U32(0),
            type_names::U64 => Self::U64(0),
            type_names::F32 => Self::F32(0.0),
            type_names::F64 => Self::F64(0.0),
            type_names::CHAR => Self::Char('\0'),
            type_names::TEXT => Self::Text(String::new()),
            type_names::SEQ => Self::new_seq(),
            _ => Self::Null,
        }
    }

    /// Projects this value into the declared type `type_name`, applying only
    /// lossless conversions.
    ///
    /// Returns `None` when no lossless projection exists. `core.Any` accepts
    /// every value unchanged; null passes through unchanged (reference
    /// semantics).
    #[must_use]
    pub fn coerce_to(&self, type_name: &str) -> Option<Self> {
        if type_name == type_names::ANY || *self == Self::Null {
            return Some(self.clone());
        }
        if self.type_name() == type_name {
            return Some(self.clone());
        }
        match (self, type_name) {
            (Self::I32(v), type_names::I64) => Some(Self::I64(i64::from(*v))),
            (Self::I32(v), type_names::U32) => u32::try_from(*v).ok().map(Self::U32),
            (Self::I32(v), type_names::U64) => u64::try_from(*v).ok().map(Self::U64),
            (Self::I32(v), type_names::F64) => Some(Self::F64(f64::from(*v))),
            (Self::I32(v), type_names::CHAR) => {
                u32::try_from(*v).ok().and_then(char::from_u32).map(Self::Char)
            }
            (Self::U32(v), type_names::I64) => Some(Self::I64(i64::from(*v))),
            (Self::U32(v), type_names::U64) => Some(Self::U64(u64::from(*v))),
            (Self::U32(v), type_names::CHAR) => char::from_u32(*v).map(Self::Char),
            (Self::I64(v), type_names::I32) => i32::try_from(*v).ok().map(Self::I32),
            (Self::U64(v), type_names::I64) => i64::try_from(*v).ok().map(Self::I64),
            (Self::F32(v), type_names::F64) => Some(Self::F64(f64::from(*v))),
            (Self::Char(c), type_names::TEXT) => Some(Self::Text(c.to_string())),
            (Self::Text(s), type_names::CHAR) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(Self::Char(c)),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Renders the value as display text (used by `core.Text.join`).
    #[must_use]
    pub fn display_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::I32(v) => v.to_string(),
            Self::I64(v) => v.to_string(),
            Self::U32(v) => v.to_string(),
            Self::U64(v) => v.to_string(),
            Self::F32(v) => v.to_string(),
            Self::F64(v) => v.to_string(),
            Self::Char(c) => c.to_string(),
            Self::Text(s) => s.clone(),
            Self::Seq(items) => {
                let items = items.borrow();
                let mut out = String::new();
                for item in items.iter() {
                    out.push_str(&item.display_text());
                }
                out
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_text())
    }
}
