// Copyright 2026 the Method Capsule Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Capture a compiled function on one host, invoke it on another.
//!
//! Method bodies reference other members through 4-byte tokens that are
//! private to the module that minted them; the same member gets a different
//! number on every host. This crate makes such a function portable anyway:
//!
//! - [`capture`] snapshots the instruction stream, signature, locals, and
//!   bound arguments into a JSON [`Capsule`], describing each symbolic
//!   operand by structural identity (type name + canonical signature)
//!   instead of its token value.
//! - [`resolve_tokens`] re-finds every described member on the target host
//!   and mints fresh invocation-scoped tokens for them.
//! - [`patch_body`] overwrites the stale operand bytes in place.
//! - [`FunctionShell`] binds the arguments and runs the relocated stream on
//!   a bounded stack machine.
//!
//! ```
//! use method_capsule::asm::BodyAsm;
//! use method_capsule::member::{MethodBody, MethodDef, TypeDef};
//! use method_capsule::{Limits, Module, Value, capture_to_json, execute_json};
//!
//! // Source host: a function that hashes its argument.
//! let mut source = Module::with_builtins(0x1111);
//! source.register_type(TypeDef::new("demo.Job"))?;
//! let hash = source.method_token("core.Fnv64", "hash_hex")?;
//! let mut asm = BodyAsm::new();
//! asm.ld_arg(0);
//! asm.call(hash, 1, true);
//! asm.ret();
//! source.define_method(
//!     "demo.Job",
//!     MethodDef {
//!         name: "run".into(),
//!         params: vec!["core.Text".into()],
//!         ret: "core.Text".into(),
//!         type_params: 0,
//!         body: MethodBody::Bytecode(asm.into_body(vec![])?),
//!     },
//! )?;
//! let json = capture_to_json(&source, "demo.Job", "run", vec![Value::text("abc")])?;
//!
//! // Target host: same catalog, different token numbering.
//! let target = Module::with_builtins(0x9999);
//! let out = execute_json(&target, &json, &Limits::default())?;
//! assert_eq!(out, Value::text("e71fa2190541574b"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![no_std]

extern crate alloc;

pub mod asm;
pub mod builtins;
pub mod capsule;
pub mod capture;
pub mod format;
pub mod member;
pub mod module;
pub mod opcode;
pub mod relocate;
pub mod resolve;
pub mod scan;
pub mod shell;
pub mod value;

pub use capsule::{Capsule, MalformedCapsule, TokenDescriptor};
pub use capture::{CaptureError, capture, capture_to_json};
pub use module::{MemberHandle, Module, ModuleError};
pub use relocate::{RelocateError, patch_body};
pub use resolve::{ResolveError, TokenScope, resolve_tokens};
pub use shell::{
    ExecuteError, ExecutionFault, FaultInfo, FunctionShell, Limits, execute, execute_json,
};
pub use value::Value;
