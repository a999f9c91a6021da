// Copyright 2026 the Method Capsule Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The host-local symbol table.
//!
//! A [`Module`] stands for one host process's member catalog: it owns type
//! definitions and assigns each referenced member a 4-byte numeric token.
//! Tokens are kind-tagged and derived from a per-module seed, so two modules
//! holding the very same members hand out different numbers: the exact
//! property that makes raw tokens useless across hosts and forces the
//! descriptor-based relocation this crate implements.
//!
//! Token ranges:
//! - types `0x02xx_xxxx`, fields `0x04xx_xxxx`, methods/ctors `0x06xx_xxxx`
//! - literal text `0x7000_0000..0x7000_FFFF` (the module-private pool the
//!   capture pipeline refuses to relocate)

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use crate::member::{CTOR_NAME, MemberKind, MethodDef, TypeDef, full_signature};

const TYPE_TAG: u32 = 0x0200_0000;
const FIELD_TAG: u32 = 0x0400_0000;
const METHOD_TAG: u32 = 0x0600_0000;
const ROW_MASK: u32 = 0x00FF_FFFF;

const TEXT_BASE: u32 = 0x7000_0000;
const TEXT_END: u32 = 0x7000_FFFF;

/// An error raised by module registration or token minting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModuleError {
    /// A type with this name is already registered.
    DuplicateType {
        /// The offending type name.
        name: String,
    },
    /// No type with this name exists in the module.
    TypeNotFound {
        /// The requested type name.
        name: String,
    },
    /// No member with this name exists on the type.
    MemberNotFound {
        /// Declaring type name.
        type_name: String,
        /// Requested member name.
        name: String,
    },
    /// A generic method was referenced without (or with the wrong number of)
    /// type arguments.
    GenericArity {
        /// Canonical signature of the method.
        signature: String,
        /// Declared type-parameter count.
        expected: usize,
        /// Supplied type-argument count.
        actual: usize,
    },
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateType { name } => write!(f, "duplicate type '{name}'"),
            Self::TypeNotFound { name } => write!(f, "type '{name}' not found"),
            Self::MemberNotFound { type_name, name } => {
                write!(f, "member '{name}' not found on '{type_name}'")
            }
            Self::GenericArity {
                signature,
                expected,
                actual,
            } => write!(
                f,
                "'{signature}' takes {expected} type argument(s), got {actual}"
            ),
        }
    }
}

impl core::error::Error for ModuleError {}

/// A resolved member behind a token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberHandle {
    /// The member kind.
    pub kind: MemberKind,
    /// Index of the declaring type (or the referenced type for kind=Type).
    pub type_ix: usize,
    /// Index of the member within its kind's declaration list (0 for Type).
    pub member_ix: usize,
    /// Concrete type arguments a generic method is bound over; empty
    /// otherwise.
    pub type_args: Vec<String>,
}

type MintKey = (u8, usize, usize, String);

/// One host process's symbol table.
#[derive(Clone, Debug, Default)]
pub struct Module {
    seed: u32,
    types: Vec<TypeDef>,
    by_name: BTreeMap<String, usize>,
    // Types present in the catalog but deliberately absent from the by-name
    // index; resolvable only through the well-known list (see `resolve`).
    hidden: BTreeMap<String, usize>,
    tokens: BTreeMap<u32, MemberHandle>,
    minted: BTreeMap<MintKey, u32>,
    next_row: u32,
    texts: Vec<String>,
}

impl Module {
    /// Creates an empty module whose token numbering derives from `seed`.
    #[must_use]
    pub fn new(seed: u32) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    /// Creates a module with the built-in catalog installed.
    #[must_use]
    pub fn with_builtins(seed: u32) -> Self {
        let mut module = Self::new(seed);
        crate::builtins::install(&mut module);
        module
    }

    /// Registers a type.
    pub fn register_type(&mut self, def: TypeDef) -> Result<(), ModuleError> {
        if self.by_name.contains_key(&def.name) || self.hidden.contains_key(&def.name) {
            return Err(ModuleError::DuplicateType { name: def.name });
        }
        self.by_name.insert(def.name.clone(), self.types.len());
        self.types.push(def);
        Ok(())
    }

    /// Registers a type without adding it to the by-name index.
    pub(crate) fn register_hidden_type(&mut self, def: TypeDef) {
        self.hidden.insert(def.name.clone(), self.types.len());
        self.types.push(def);
    }

    /// Appends a method to an existing type.
    pub fn define_method(&mut self, type_name: &str, def: MethodDef) -> Result<(), ModuleError> {
        let ix = self.any_type_ix(type_name)?;
        self.types[ix].methods.push(def);
        Ok(())
    }

    /// Looks up a type index by name through the public index.
    #[must_use]
    pub fn type_by_name(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Looks up a type index in the full catalog, including types missing
    /// from the by-name index.
    #[must_use]
    pub fn builtin_type(&self, name: &str) -> Option<usize> {
        self.hidden.get(name).copied()
    }

    /// Returns the type definition at `ix`.
    #[must_use]
    pub fn type_def(&self, ix: usize) -> Option<&TypeDef> {
        self.types.get(ix)
    }

    fn any_type_ix(&self, name: &str) -> Result<usize, ModuleError> {
        self.type_by_name(name)
            .or_else(|| self.builtin_type(name))
            .ok_or_else(|| ModuleError::TypeNotFound {
                name: name.to_string(),
            })
    }

    /// Returns `true` when the type name resolves in this module, counting
    /// hidden catalog entries.
    #[must_use]
    pub fn knows_type(&self, name: &str) -> bool {
        self.by_name.contains_key(name) || self.hidden.contains_key(name)
    }

    fn mint(&mut self, tag: u32, key: MintKey, handle: MemberHandle) -> u32 {
        if let Some(token) = self.minted.get(&key) {
            return *token;
        }
        let row = self.next_row;
        self.next_row += 1;
        let token = tag | (self.seed.wrapping_add(row) & ROW_MASK);
        self.minted.insert(key, token);
        self.tokens.insert(token, handle);
        token
    }

    /// Mints (or reuses) the token for a type reference.
    pub fn type_token(&mut self, name: &str) -> Result<u32, ModuleError> {
        let type_ix = self.any_type_ix(name)?;
        Ok(self.mint(
            TYPE_TAG,
            (0, type_ix, 0, String::new()),
            MemberHandle {
                kind: MemberKind::Type,
                type_ix,
                member_ix: 0,
                type_args: Vec::new(),
            },
        ))
    }

    /// Mints (or reuses) the token for a static field.
    pub fn field_token(&mut self, type_name: &str, field_name: &str) -> Result<u32, ModuleError> {
        let type_ix = self.any_type_ix(type_name)?;
        let member_ix = self.types[type_ix]
            .fields
            .iter()
            .position(|field| field.name == field_name)
            .ok_or_else(|| ModuleError::MemberNotFound {
                type_name: type_name.to_string(),
                name: field_name.to_string(),
            })?;
        Ok(self.mint(
            FIELD_TAG,
            (1, type_ix, member_ix, String::new()),
            MemberHandle {
                kind: MemberKind::Field,
                type_ix,
                member_ix,
                type_args: Vec::new(),
            },
        ))
    }

    /// Mints (or reuses) the token for a constructor with `argc` parameters.
    pub fn ctor_token(&mut self, type_name: &str, argc: usize) -> Result<u32, ModuleError> {
        let type_ix = self.any_type_ix(type_name)?;
        let member_ix = self.types[type_ix]
            .ctors
            .iter()
            .position(|ctor| ctor.params.len() == argc)
            .ok_or_else(|| ModuleError::MemberNotFound {
                type_name: type_name.to_string(),
                name: CTOR_NAME.to_string(),
            })?;
        Ok(self.mint(
            METHOD_TAG,
            (2, type_ix, member_ix, String::new()),
            MemberHandle {
                kind: MemberKind::Constructor,
                type_ix,
                member_ix,
                type_args: Vec::new(),
            },
        ))
    }

    /// Mints (or reuses) the token for a non-generic method, found by name.
    pub fn method_token(&mut self, type_name: &str, method_name: &str) -> Result<u32, ModuleError> {
        self.method_token_with(type_name, method_name, &[])
    }

    /// Mints (or reuses) the token for a generic method bound over concrete
    /// type arguments.
    pub fn generic_method_token(
        &mut self,
        type_name: &str,
        method_name: &str,
        type_args: &[&str],
    ) -> Result<u32, ModuleError> {
        self.method_token_with(type_name, method_name, type_args)
    }

    fn method_token_with(
        &mut self,
        type_name: &str,
        method_name: &str,
        type_args: &[&str],
    ) -> Result<u32, ModuleError> {
        let type_ix = self.any_type_ix(type_name)?;
        let member_ix = self.types[type_ix]
            .methods
            .iter()
            .position(|m| m.name == method_name)
            .ok_or_else(|| ModuleError::MemberNotFound {
                type_name: type_name.to_string(),
                name: method_name.to_string(),
            })?;
        let method = &self.types[type_ix].methods[member_ix];
        if method.type_params != type_args.len() {
            return Err(ModuleError::GenericArity {
                signature: full_signature(type_name, method_name, &method.params),
                expected: method.type_params,
                actual: type_args.len(),
            });
        }
        let args: Vec<String> = type_args.iter().map(|s| (*s).to_string()).collect();
        Ok(self.mint(
            METHOD_TAG,
            (3, type_ix, member_ix, args.join(",")),
            MemberHandle {
                kind: MemberKind::Method,
                type_ix,
                member_ix,
                type_args: args,
            },
        ))
    }

    /// Interns literal text into the module-private pool.
    ///
    /// The returned token lives in the reserved text range; it is valid only
    /// inside this module and is precisely what capture refuses to ship.
    pub fn intern_text(&mut self, text: &str) -> u32 {
        let range = u64::from(TEXT_END - TEXT_BASE);
        let n = self.texts.len() as u64;
        self.texts.push(text.to_string());
        TEXT_BASE | (((u64::from(self.seed) + n) % range) as u32)
    }

    /// Returns `true` if `token` lies in the reserved literal-text range.
    #[must_use]
    pub fn is_text_token(token: u32) -> bool {
        (TEXT_BASE..TEXT_END).contains(&token)
    }

    /// Returns the interned text behind a text token, if any.
    #[must_use]
    pub fn text(&self, token: u32) -> Option<&str> {
        if !Self::is_text_token(token) {
            return None;
        }
        let range = u64::from(TEXT_END - TEXT_BASE);
        let slot = u64::from(token - TEXT_BASE);
        let offset = u64::from(self.seed) % range;
        let n = (slot + range - offset) % range;
        self.texts.get(n as usize).map(String::as_str)
    }

    /// Resolves a host-local token to its member handle.
    ///
    /// Returns `None` for values that merely look like tokens (numeric
    /// operands that coincide with the token ranges).
    #[must_use]
    pub fn resolve_member(&self, token: u32) -> Option<&MemberHandle> {
        self.tokens.get(&token)
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::member::{FieldDef, MethodBody, NativeError};
    use crate::value::{Value, type_names};

    fn nop_native(_args: &[Value], _type_args: &[String]) -> Result<Value, NativeError> {
        Ok(Value::Null)
    }

    fn sample_module(seed: u32) -> Module {
        let mut m = Module::new(seed);
        let mut t = TypeDef::new("demo.Widget");
        t.fields.push(FieldDef {
            name: "ZERO".into(),
            ty: type_names::I32.into(),
            value: Value::I32(0),
        });
        t.methods.push(MethodDef {
            name: "poke".into(),
            params: vec![type_names::I32.into()],
            ret: type_names::VOID.into(),
            type_params: 0,
            body: MethodBody::Native(nop_native),
        });
        m.register_type(t).unwrap();
        m
    }

    #[test]
    fn tokens_resolve_back_to_their_member() {
        let mut m = sample_module(7);
        let token = m.method_token("demo.Widget", "poke").unwrap();
        let handle = m.resolve_member(token).unwrap();
        assert_eq!(handle.kind, MemberKind::Method);
        assert_eq!(m.type_def(handle.type_ix).unwrap().name, "demo.Widget");
    }

    #[test]
    fn minting_is_memoized() {
        let mut m = sample_module(7);
        let a = m.field_token("demo.Widget", "ZERO").unwrap();
        let b = m.field_token("demo.Widget", "ZERO").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn token_numbering_differs_across_seeds() {
        let mut a = sample_module(1);
        let mut b = sample_module(9001);
        assert_ne!(
            a.method_token("demo.Widget", "poke").unwrap(),
            b.method_token("demo.Widget", "poke").unwrap()
        );
    }

    #[test]
    fn unknown_tokens_do_not_resolve() {
        let m = sample_module(3);
        assert_eq!(m.resolve_member(0x0600_0042), None);
        assert_eq!(m.resolve_member(0x1122_3344), None);
    }

    #[test]
    fn text_tokens_live_in_the_reserved_range() {
        let mut m = sample_module(5);
        let token = m.intern_text("hello");
        assert!(Module::is_text_token(token));
        assert_eq!(m.text(token), Some("hello"));
        assert!(!Module::is_text_token(m.method_token("demo.Widget", "poke").unwrap()));
    }

    #[test]
    fn duplicate_type_registration_is_rejected() {
        let mut m = sample_module(2);
        let err = m.register_type(TypeDef::new("demo.Widget")).unwrap_err();
        assert!(matches!(err, ModuleError::DuplicateType { .. }));
    }
}
