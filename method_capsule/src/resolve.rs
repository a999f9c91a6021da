// Copyright 2026 the Method Capsule Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Symbol resolution on the target host.
//!
//! For every descriptor in a capsule the resolver finds the matching member
//! in the target module by structural identity (type name plus canonical
//! full signature), mints a fresh scope-local token for it, and records a
//! patch: overwrite the 4 operand bytes at the descriptor's index with the
//! new token. Resolution is all-or-nothing; one missing symbol aborts before
//! any byte is touched.
//!
//! Generic methods are reinstantiated, not transplanted: the descriptor's
//! type-argument names are each resolved against the target module and bound
//! onto the new handle.
//!
//! Type lookup goes through the module's public index. The fixed well-known
//! list covers framework types that the index deliberately omits; without
//! it a capsule using `core.Seq` could never land anywhere.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use crate::builtins::WELL_KNOWN;
use crate::capsule::{Capsule, TokenDescriptor};
use crate::member::{CTOR_NAME, MemberKind, TypeDef, full_signature};
use crate::module::{MemberHandle, Module};

const SCOPE_TAG: u32 = 0x0A00_0000;

/// An error raised while re-resolving a capsule's symbols.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolveError {
    /// A descriptor names a type the target module does not have.
    TypeNotFound {
        /// The missing type name.
        name: String,
    },
    /// A descriptor's signature matches no member on the resolved type.
    MemberNotFound {
        /// The canonical signature that failed to match.
        signature: String,
    },
    /// A descriptor carries a member-kind string outside the closed set.
    UnsupportedMemberKind {
        /// The verbatim wire string.
        member_type: String,
    },
    /// A generic descriptor's type-argument count does not fit the target
    /// definition.
    GenericArity {
        /// Canonical signature of the matched definition.
        signature: String,
        /// Declared type-parameter count.
        expected: usize,
        /// Supplied type-argument count.
        actual: usize,
    },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeNotFound { name } => write!(f, "type '{name}' not found on this host"),
            Self::MemberNotFound { signature } => {
                write!(f, "no member matches signature '{signature}'")
            }
            Self::UnsupportedMemberKind { member_type } => {
                write!(f, "unsupported member kind '{member_type}'")
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

impl core::error::Error for ResolveError {}

/// One pending stream patch: write `token` at byte offset `offset`.
pub type Patch = (usize, u32);

/// An invocation-scoped token table.
///
/// Scope tokens are minted per resolution pass and mean nothing outside it;
/// they share no numbering with any module's tokens.
#[derive(Clone, Debug, Default)]
pub struct TokenScope {
    entries: Vec<MemberHandle>,
}

impl TokenScope {
    /// Creates an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a fresh scope token for `handle`.
    pub fn mint(&mut self, handle: MemberHandle) -> u32 {
        self.entries.push(handle);
        SCOPE_TAG | (self.entries.len() as u32)
    }

    /// Resolves a scope token minted by this scope.
    #[must_use]
    pub fn resolve(&self, token: u32) -> Option<&MemberHandle> {
        if token & 0xFF00_0000 != SCOPE_TAG {
            return None;
        }
        let ix = (token & 0x00FF_FFFF) as usize;
        self.entries.get(ix.checked_sub(1)?)
    }

    /// Returns the number of tokens minted so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no token has been minted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolves every descriptor in `capsule` against `module`.
///
/// On success returns the populated scope and the full patch list; the
/// capsule body itself is not modified.
pub fn resolve_tokens(
    module: &Module,
    capsule: &Capsule,
) -> Result<(TokenScope, Vec<Patch>), ResolveError> {
    let mut scope = TokenScope::new();
    let mut patches = Vec::with_capacity(capsule.tokens.len());
    for descriptor in &capsule.tokens {
        let handle = resolve_descriptor(module, descriptor)?;
        let token = scope.mint(handle);
        patches.push((descriptor.index, token));
    }
    Ok((scope, patches))
}

fn resolve_descriptor(
    module: &Module,
    d: &TokenDescriptor,
) -> Result<MemberHandle, ResolveError> {
    let kind = MemberKind::from_wire_name(&d.member_type).ok_or_else(|| {
        ResolveError::UnsupportedMemberKind {
            member_type: d.member_type.clone(),
        }
    })?;
    let type_ix = lookup_type(module, &d.type_name)?;
    // lookup_type only returns indices the module handed out.
    let ty = module
        .type_def(type_ix)
        .ok_or_else(|| ResolveError::TypeNotFound {
            name: d.type_name.clone(),
        })?;

    let not_found = || ResolveError::MemberNotFound {
        signature: d.full_name.clone(),
    };
    match kind {
        MemberKind::Type => {
            if d.full_name != ty.name {
                return Err(not_found());
            }
            Ok(MemberHandle {
                kind,
                type_ix,
                member_ix: 0,
                type_args: Vec::new(),
            })
        }
        MemberKind::Field => {
            let member_ix = ty
                .fields
                .iter()
                .position(|f| field_identity(ty, &f.name) == d.full_name)
                .ok_or_else(not_found)?;
            Ok(MemberHandle {
                kind,
                type_ix,
                member_ix,
                type_args: Vec::new(),
            })
        }
        MemberKind::Constructor => {
            let member_ix = ty
                .ctors
                .iter()
                .position(|c| full_signature(&ty.name, CTOR_NAME, &c.params) == d.full_name)
                .ok_or_else(not_found)?;
            Ok(MemberHandle {
                kind,
                type_ix,
                member_ix,
                type_args: Vec::new(),
            })
        }
        MemberKind::Method => {
            // Signature match plus the genericity triple: a generic
            // definition never satisfies a non-generic descriptor and
            // vice versa, even with identical parameter lists.
            let wanted = (
                d.is_generic_method,
                d.is_generic_method_definition,
                d.contains_generic_parameters,
            );
            let member_ix = ty
                .methods
                .iter()
                .position(|m| {
                    full_signature(&ty.name, &m.name, &m.params) == d.full_name
                        && (m.is_generic(), m.is_generic(), m.is_generic()) == wanted
                })
                .ok_or_else(not_found)?;
            let method = &ty.methods[member_ix];
            let type_args = if method.is_generic() {
                if d.generic_parameters.len() != method.type_params {
                    return Err(ResolveError::GenericArity {
                        signature: d.full_name.clone(),
                        expected: method.type_params,
                        actual: d.generic_parameters.len(),
                    });
                }
                // Reinstantiate over this host's types: every bound name
                // must exist here.
                for name in &d.generic_parameters {
                    if !module.knows_type(name) {
                        return Err(ResolveError::TypeNotFound { name: name.clone() });
                    }
                }
                d.generic_parameters.clone()
            } else {
                Vec::new()
            };
            Ok(MemberHandle {
                kind,
                type_ix,
                member_ix,
                type_args,
            })
        }
    }
}

fn lookup_type(module: &Module, name: &str) -> Result<usize, ResolveError> {
    if let Some(ix) = module.type_by_name(name) {
        return Ok(ix);
    }
    if WELL_KNOWN.contains(&name) {
        if let Some(ix) = module.builtin_type(name) {
            return Ok(ix);
        }
    }
    Err(ResolveError::TypeNotFound {
        name: name.to_string(),
    })
}

fn field_identity(ty: &TypeDef, field_name: &str) -> String {
    let mut s = ty.name.clone();
    s.push('.');
    s.push_str(field_name);
    s
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::value::type_names;

    fn descriptor(
        index: usize,
        full_name: &str,
        type_name: &str,
        member_type: &str,
    ) -> TokenDescriptor {
        TokenDescriptor {
            index,
            full_name: full_name.into(),
            type_name: type_name.into(),
            member_type: member_type.into(),
            is_generic_method: false,
            is_generic_method_definition: false,
            contains_generic_parameters: false,
            generic_parameters: vec![],
        }
    }

    fn capsule_with(tokens: Vec<TokenDescriptor>) -> Capsule {
        Capsule {
            max_stack: 2,
            return_type: type_names::VOID.into(),
            body: vec![0; 32],
            local_types: vec![],
            parameter_types: vec![],
            arguments: vec![],
            tokens,
        }
    }

    #[test]
    fn scope_tokens_resolve_back_in_mint_order() {
        let module = Module::with_builtins(42);
        let capsule = capsule_with(vec![
            descriptor(0, "core.Fnv64.hash_hex(Text)", "core.Fnv64", "Method"),
            descriptor(8, "core.Text.EMPTY", "core.Text", "RtFieldInfo"),
            descriptor(16, "core.Seq..ctor()", "core.Seq", "Constructor"),
        ]);
        let (scope, patches) = resolve_tokens(&module, &capsule).unwrap();
        assert_eq!(scope.len(), 3);
        assert_eq!(patches.len(), 3);
        assert_eq!(patches[0].0, 0);
        assert_eq!(patches[1].0, 8);

        let first = scope.resolve(patches[0].1).unwrap();
        assert_eq!(first.kind, MemberKind::Method);
        let second = scope.resolve(patches[1].1).unwrap();
        assert_eq!(second.kind, MemberKind::Field);
        let third = scope.resolve(patches[2].1).unwrap();
        assert_eq!(third.kind, MemberKind::Constructor);
        assert_eq!(scope.resolve(0x0600_0001), None);
    }

    #[test]
    fn well_known_list_reaches_hidden_types() {
        let module = Module::with_builtins(7);
        // core.Seq is invisible to the name index but on the well-known list.
        assert!(lookup_type(&module, "core.Seq").is_ok());
        // core.Fnv64 is public; an unknown name still fails.
        assert!(lookup_type(&module, "core.Fnv64").is_ok());
        assert_eq!(
            lookup_type(&module, "core.Hidden"),
            Err(ResolveError::TypeNotFound {
                name: "core.Hidden".into(),
            })
        );
    }

    #[test]
    fn signature_match_is_exact() {
        let module = Module::with_builtins(7);
        // Wrong parameter list: same name, no match.
        let capsule = capsule_with(vec![descriptor(
            0,
            "core.Fnv64.hash_hex(Text,Text)",
            "core.Fnv64",
            "Method",
        )]);
        let err = resolve_tokens(&module, &capsule).unwrap_err();
        assert!(matches!(err, ResolveError::MemberNotFound { .. }));
    }

    #[test]
    fn genericity_must_match_too() {
        let module = Module::with_builtins(7);
        // join is generic; a non-generic descriptor with the right signature
        // still fails.
        let capsule = capsule_with(vec![descriptor(
            0,
            "core.Text.join(Text,Seq)",
            "core.Text",
            "Method",
        )]);
        let err = resolve_tokens(&module, &capsule).unwrap_err();
        assert!(matches!(err, ResolveError::MemberNotFound { .. }));
    }

    #[test]
    fn generic_reinstantiation_validates_type_arguments() {
        let module = Module::with_builtins(7);
        let mut d = descriptor(0, "core.Text.join(Text,Seq)", "core.Text", "Method");
        d.is_generic_method = true;
        d.is_generic_method_definition = true;
        d.contains_generic_parameters = true;
        d.generic_parameters = vec!["demo.Missing".into()];
        let err = resolve_tokens(&module, &capsule_with(vec![d.clone()])).unwrap_err();
        assert_eq!(
            err,
            ResolveError::TypeNotFound {
                name: "demo.Missing".into(),
            }
        );

        d.generic_parameters = vec![type_names::CHAR.into()];
        let (scope, patches) = resolve_tokens(&module, &capsule_with(vec![d])).unwrap();
        let handle = scope.resolve(patches[0].1).unwrap();
        assert_eq!(handle.type_args, vec![String::from(type_names::CHAR)]);
    }

    #[test]
    fn unknown_member_kind_is_rejected() {
        let module = Module::with_builtins(7);
        let capsule = capsule_with(vec![descriptor(
            0,
            "core.Text.len(Text)",
            "core.Text",
            "Property",
        )]);
        let err = resolve_tokens(&module, &capsule).unwrap_err();
        assert_eq!(
            err,
            ResolveError::UnsupportedMemberKind {
                member_type: "Property".into(),
            }
        );
    }

    #[test]
    fn one_missing_symbol_aborts_the_whole_pass() {
        let module = Module::with_builtins(7);
        let capsule = capsule_with(vec![
            descriptor(0, "core.Fnv64.hash_hex(Text)", "core.Fnv64", "Method"),
            descriptor(8, "demo.Gone.run()", "demo.Gone", "Method"),
        ]);
        assert!(resolve_tokens(&module, &capsule).is_err());
    }
}
