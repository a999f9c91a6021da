// Copyright 2026 the Method Capsule Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Capture: snapshot a compiled function into a portable capsule.
//!
//! Capture walks the method body with the instruction scanner and builds one
//! [`TokenDescriptor`] per symbolic operand whose token resolves in the
//! source module. Tokens that merely look symbolic but resolve to nothing
//! (data coinciding with a token range) are left undescribed; the stream
//! bytes still travel, untouched.
//!
//! The one hard refusal is literal text: text-pool tokens name bytes that
//! live only inside the capture host's module, so no descriptor could ever
//! make them meaningful elsewhere. Capture fails rather than ship a stream
//! that would dangle on arrival.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use crate::capsule::{Capsule, MalformedCapsule, TokenDescriptor};
use crate::member::{CTOR_NAME, MemberKind, MethodBody, full_signature};
use crate::module::{MemberHandle, Module};
use crate::scan::InstructionScanner;
use crate::value::Value;

/// An error raised while capturing a function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureError {
    /// The requested method does not exist in the source module.
    MethodNotFound {
        /// Declaring type name.
        type_name: String,
        /// Method name.
        method_name: String,
    },
    /// The method exists but has a native body, which cannot be captured.
    NotBytecode {
        /// Canonical signature of the method.
        signature: String,
    },
    /// The bound argument count does not match the method's parameter count.
    ArgumentCount {
        /// Declared parameter count.
        expected: usize,
        /// Supplied argument count.
        actual: usize,
    },
    /// The body loads module-private literal text, which cannot travel.
    TextReference {
        /// The offending text-pool token.
        token: u32,
        /// Byte offset of the operand within the stream.
        offset: usize,
    },
    /// The capsule could not be encoded to JSON.
    Encode(MalformedCapsule),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MethodNotFound {
                type_name,
                method_name,
            } => write!(f, "method '{method_name}' not found on '{type_name}'"),
            Self::NotBytecode { signature } => {
                write!(f, "'{signature}' has a native body and cannot be captured")
            }
            Self::ArgumentCount { expected, actual } => {
                write!(f, "method takes {expected} argument(s), got {actual}")
            }
            Self::TextReference { token, offset } => write!(
                f,
                "literal text token {token:#010x} at offset {offset} cannot leave its module"
            ),
            Self::Encode(e) => write!(f, "{e}"),
        }
    }
}

impl core::error::Error for CaptureError {}

impl From<MalformedCapsule> for CaptureError {
    fn from(e: MalformedCapsule) -> Self {
        Self::Encode(e)
    }
}

/// Captures `type_name.method_name` from `module`, bound over `args`.
pub fn capture(
    module: &Module,
    type_name: &str,
    method_name: &str,
    args: Vec<Value>,
) -> Result<Capsule, CaptureError> {
    let not_found = || CaptureError::MethodNotFound {
        type_name: type_name.to_string(),
        method_name: method_name.to_string(),
    };
    let type_ix = module
        .type_by_name(type_name)
        .or_else(|| module.builtin_type(type_name))
        .ok_or_else(not_found)?;
    let ty = module.type_def(type_ix).ok_or_else(not_found)?;
    let method = ty
        .methods
        .iter()
        .find(|m| m.name == method_name)
        .ok_or_else(not_found)?;

    let MethodBody::Bytecode(body) = &method.body else {
        return Err(CaptureError::NotBytecode {
            signature: full_signature(type_name, method_name, &method.params),
        });
    };
    if args.len() != method.params.len() {
        return Err(CaptureError::ArgumentCount {
            expected: method.params.len(),
            actual: args.len(),
        });
    }

    let tokens = describe_tokens(module, &body.bytes)?;
    Ok(Capsule {
        max_stack: body.max_stack,
        return_type: method.ret.clone(),
        body: body.bytes.clone(),
        local_types: body.local_types.clone(),
        parameter_types: method.params.clone(),
        arguments: args,
        tokens,
    })
}

/// Captures a function and serializes it straight to the JSON wire form.
pub fn capture_to_json(
    module: &Module,
    type_name: &str,
    method_name: &str,
    args: Vec<Value>,
) -> Result<String, CaptureError> {
    Ok(capture(module, type_name, method_name, args)?.to_json()?)
}

fn describe_tokens(module: &Module, bytes: &[u8]) -> Result<Vec<TokenDescriptor>, CaptureError> {
    let mut tokens = Vec::new();
    for instr in InstructionScanner::new(bytes) {
        let Some(operand) = instr.operand else {
            continue;
        };
        if !operand.class.is_symbolic() {
            continue;
        }
        let token = operand.token();
        if Module::is_text_token(token) {
            return Err(CaptureError::TextReference {
                token,
                offset: operand.offset,
            });
        }
        let Some(handle) = module.resolve_member(token) else {
            continue;
        };
        tokens.push(describe_member(module, operand.offset, handle));
    }
    Ok(tokens)
}

fn describe_member(module: &Module, index: usize, handle: &MemberHandle) -> TokenDescriptor {
    // The handle came out of the module's own token map, so the indices are
    // in range by construction.
    let ty = module
        .type_def(handle.type_ix)
        .map(|t| t.name.clone())
        .unwrap_or_default();
    let (full_name, generic) = match handle.kind {
        MemberKind::Type => (ty.clone(), false),
        MemberKind::Field => {
            let name = module
                .type_def(handle.type_ix)
                .and_then(|t| t.fields.get(handle.member_ix))
                .map(|f| f.name.as_str())
                .unwrap_or_default();
            (format!("{ty}.{name}"), false)
        }
        MemberKind::Constructor => {
            let params = module
                .type_def(handle.type_ix)
                .and_then(|t| t.ctors.get(handle.member_ix))
                .map(|c| c.params.as_slice())
                .unwrap_or_default();
            (full_signature(&ty, CTOR_NAME, params), false)
        }
        MemberKind::Method => {
            let method = module
                .type_def(handle.type_ix)
                .and_then(|t| t.methods.get(handle.member_ix));
            let full = method
                .map(|m| full_signature(&ty, &m.name, &m.params))
                .unwrap_or_default();
            (full, method.is_some_and(crate::member::MethodDef::is_generic))
        }
    };
    TokenDescriptor {
        index,
        full_name,
        type_name: ty,
        member_type: handle.kind.wire_name().to_string(),
        // The three flags collapse to one question on this runtime: is the
        // definition generic. They stay separate on the wire.
        is_generic_method: generic,
        is_generic_method_definition: generic,
        contains_generic_parameters: generic,
        generic_parameters: handle.type_args.clone(),
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::asm::BodyAsm;
    use crate::member::{MethodDef, TypeDef};
    use crate::value::type_names;

    fn module_with_body(build: impl FnOnce(&mut Module, &mut BodyAsm)) -> Module {
        let mut m = Module::with_builtins(0x1000);
        m.register_type(TypeDef::new("demo.Job")).unwrap();
        let mut asm = BodyAsm::new();
        build(&mut m, &mut asm);
        let body = asm.into_body(vec![]).unwrap();
        m.define_method(
            "demo.Job",
            MethodDef {
                name: "run".into(),
                params: vec![type_names::TEXT.into()],
                ret: type_names::TEXT.into(),
                type_params: 0,
                body: MethodBody::Bytecode(body),
            },
        )
        .unwrap();
        m
    }

    #[test]
    fn capture_describes_each_symbolic_operand() {
        let m = module_with_body(|m, asm| {
            let hash = m.method_token("core.Fnv64", "hash_hex").unwrap();
            asm.ld_arg(0);
            asm.call(hash, 1, true);
            asm.ret();
        });
        let capsule = capture(&m, "demo.Job", "run", vec![Value::text("in")]).unwrap();
        assert_eq!(capsule.tokens.len(), 1);
        let d = &capsule.tokens[0];
        assert_eq!(d.full_name, "core.Fnv64.hash_hex(Text)");
        assert_eq!(d.type_name, "core.Fnv64");
        assert_eq!(d.member_type, "Method");
        assert!(!d.is_generic_method);
        // The operand sits right after ldarg.s (2 bytes) and the call byte.
        assert_eq!(d.index, 3);
    }

    #[test]
    fn generic_bindings_ride_in_the_descriptor() {
        let m = module_with_body(|m, asm| {
            let join = m
                .generic_method_token("core.Text", "join", &[type_names::CHAR])
                .unwrap();
            asm.ld_arg(0);
            asm.ld_null();
            asm.call(join, 2, true);
            asm.ret();
        });
        let capsule = capture(&m, "demo.Job", "run", vec![Value::text("-")]).unwrap();
        let d = &capsule.tokens[0];
        assert!(d.is_generic_method && d.is_generic_method_definition);
        assert!(d.contains_generic_parameters);
        assert_eq!(d.generic_parameters, vec![String::from(type_names::CHAR)]);
    }

    #[test]
    fn literal_text_refuses_to_travel() {
        let mut text_token = 0;
        let m = module_with_body(|m, asm| {
            text_token = m.intern_text("local only");
            asm.ld_text(text_token);
            asm.ret();
        });
        let err = capture(&m, "demo.Job", "run", vec![Value::text("x")]).unwrap_err();
        assert_eq!(
            err,
            CaptureError::TextReference {
                token: text_token,
                offset: 1,
            }
        );
    }

    #[test]
    fn unresolvable_tokens_are_skipped_not_fatal() {
        // A call operand whose token the module never minted: the stream
        // still travels, just without a descriptor.
        let m = module_with_body(|_, asm| {
            asm.call(0x0612_3456, 0, false);
            asm.ld_arg(0);
            asm.ret();
        });
        let capsule = capture(&m, "demo.Job", "run", vec![Value::text("x")]).unwrap();
        assert!(capsule.tokens.is_empty());
    }

    #[test]
    fn native_bodies_cannot_be_captured() {
        let m = Module::with_builtins(1);
        let err = capture(&m, "core.Fnv64", "hash_hex", vec![Value::text("x")]).unwrap_err();
        assert!(matches!(err, CaptureError::NotBytecode { .. }));
    }

    #[test]
    fn argument_count_is_checked_up_front() {
        let m = module_with_body(|_, asm| {
            asm.ld_arg(0);
            asm.ret();
        });
        let err = capture(&m, "demo.Job", "run", vec![]).unwrap_err();
        assert_eq!(
            err,
            CaptureError::ArgumentCount {
                expected: 1,
                actual: 0,
            }
        );
    }
}
