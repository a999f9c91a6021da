// Copyright 2026 the Method Capsule Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The well-known built-in catalog.
//!
//! These are the framework members method bodies link against: text and
//! character helpers, the `core.Seq` container, and the FNV-1a content hash.
//! `core.Seq` is registered outside the by-name index on purpose: it models
//! the framework container types that a plain name lookup cannot find and
//! that the resolver reaches through its fixed well-known list.

use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::member::{CtorDef, FieldDef, MethodBody, MethodDef, NativeError, TypeDef};
use crate::module::Module;
use crate::value::{Value, type_names};

/// Type names the resolver may look up only through the built-in catalog.
pub const WELL_KNOWN: &[&str] = &[type_names::SEQ];

pub(crate) fn install(module: &mut Module) {
    for name in [
        type_names::BOOL,
        type_names::I32,
        type_names::I64,
        type_names::U32,
        type_names::U64,
        type_names::F32,
        type_names::F64,
    ] {
        let registered = module.register_type(TypeDef::new(name));
        debug_assert!(registered.is_ok());
    }

    let mut text = TypeDef::new(type_names::TEXT);
    text.fields.push(FieldDef {
        name: "EMPTY".into(),
        ty: type_names::TEXT.into(),
        value: Value::Text(String::new()),
    });
    text.methods.push(method(
        "concat",
        &[type_names::TEXT, type_names::TEXT],
        type_names::TEXT,
        0,
        text_concat,
    ));
    text.methods.push(method("len", &[type_names::TEXT], type_names::I32, 0, text_len));
    text.methods.push(method(
        "char_at",
        &[type_names::TEXT, type_names::I32],
        type_names::CHAR,
        0,
        text_char_at,
    ));
    text.methods.push(method(
        "join",
        &[type_names::TEXT, type_names::SEQ],
        type_names::TEXT,
        1,
        text_join,
    ));
    let registered = module.register_type(text);
    debug_assert!(registered.is_ok());

    let mut ch = TypeDef::new(type_names::CHAR);
    ch.methods.push(method(
        "eq",
        &[type_names::CHAR, type_names::CHAR],
        type_names::BOOL,
        0,
        char_eq,
    ));
    ch.methods.push(method("to_text", &[type_names::CHAR], type_names::TEXT, 0, char_to_text));
    let registered = module.register_type(ch);
    debug_assert!(registered.is_ok());

    let mut fnv = TypeDef::new("core.Fnv64");
    fnv.methods.push(method("hash_hex", &[type_names::TEXT], type_names::TEXT, 0, fnv64_hash_hex));
    let registered = module.register_type(fnv);
    debug_assert!(registered.is_ok());

    let mut seq = TypeDef::new(type_names::SEQ);
    seq.ctors.push(CtorDef {
        params: vec![],
        body: seq_new,
    });
    seq.methods.push(method(
        "push",
        &[type_names::SEQ, type_names::ANY],
        type_names::VOID,
        0,
        seq_push,
    ));
    seq.methods.push(method("len", &[type_names::SEQ], type_names::I32, 0, seq_len));
    seq.methods.push(method(
        "get",
        &[type_names::SEQ, type_names::I32],
        type_names::ANY,
        0,
        seq_get,
    ));
    module.register_hidden_type(seq);
}

fn method(
    name: &str,
    params: &[&str],
    ret: &str,
    type_params: usize,
    body: fn(&[Value], &[String]) -> Result<Value, NativeError>,
) -> MethodDef {
    MethodDef {
        name: name.into(),
        params: params.iter().map(|p| String::from(*p)).collect(),
        ret: ret.into(),
        type_params,
        body: MethodBody::Native(body),
    }
}

fn expect_argc(args: &[Value], expected: usize) -> Result<(), NativeError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(NativeError::ArgumentCount {
            expected,
            actual: args.len(),
        })
    }
}

fn text_arg<'a>(args: &'a [Value], position: usize) -> Result<&'a str, NativeError> {
    match args.get(position) {
        Some(Value::Text(s)) => Ok(s),
        _ => Err(NativeError::ArgumentType {
            position,
            expected: type_names::TEXT,
        }),
    }
}

fn char_arg(args: &[Value], position: usize) -> Result<char, NativeError> {
    match args.get(position) {
        Some(Value::Char(c)) => Ok(*c),
        _ => Err(NativeError::ArgumentType {
            position,
            expected: type_names::CHAR,
        }),
    }
}

fn i32_arg(args: &[Value], position: usize) -> Result<i32, NativeError> {
    match args.get(position) {
        Some(Value::I32(v)) => Ok(*v),
        _ => Err(NativeError::ArgumentType {
            position,
            expected: type_names::I32,
        }),
    }
}

fn seq_arg(args: &[Value], position: usize) -> Result<Vec<Value>, NativeError> {
    match args.get(position) {
        Some(Value::Seq(items)) => Ok(items.borrow().clone()),
        _ => Err(NativeError::ArgumentType {
            position,
            expected: type_names::SEQ,
        }),
    }
}

fn text_concat(args: &[Value], _type_args: &[String]) -> Result<Value, NativeError> {
    expect_argc(args, 2)?;
    let mut out = String::from(text_arg(args, 0)?);
    out.push_str(text_arg(args, 1)?);
    Ok(Value::Text(out))
}

fn text_len(args: &[Value], _type_args: &[String]) -> Result<Value, NativeError> {
    expect_argc(args, 1)?;
    let len = text_arg(args, 0)?.chars().count();
    Ok(Value::I32(len as i32))
}

fn text_char_at(args: &[Value], _type_args: &[String]) -> Result<Value, NativeError> {
    expect_argc(args, 2)?;
    let s = text_arg(args, 0)?;
    let ix = i32_arg(args, 1)?;
    usize::try_from(ix)
        .ok()
        .and_then(|ix| s.chars().nth(ix))
        .map(Value::Char)
        .ok_or_else(|| NativeError::Failed(format!("char index {ix} out of range")))
}

// join<T>(separator, items): every item must project to T.
fn text_join(args: &[Value], type_args: &[String]) -> Result<Value, NativeError> {
    expect_argc(args, 2)?;
    let separator = text_arg(args, 0)?;
    let items = seq_arg(args, 1)?;
    let element_type = type_args
        .first()
        .ok_or_else(|| NativeError::Failed("join used as an open generic definition".into()))?;

    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        let projected = item.coerce_to(element_type).ok_or_else(|| {
            NativeError::Failed(format!(
                "join<{element_type}> element {i} is a {}",
                item.type_name()
            ))
        })?;
        if i > 0 {
            out.push_str(separator);
        }
        out.push_str(&projected.display_text());
    }
    Ok(Value::Text(out))
}

fn char_eq(args: &[Value], _type_args: &[String]) -> Result<Value, NativeError> {
    expect_argc(args, 2)?;
    Ok(Value::Bool(char_arg(args, 0)? == char_arg(args, 1)?))
}

fn char_to_text(args: &[Value], _type_args: &[String]) -> Result<Value, NativeError> {
    expect_argc(args, 1)?;
    let mut out = String::new();
    out.push(char_arg(args, 0)?);
    Ok(Value::Text(out))
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv64_hash_hex(args: &[Value], _type_args: &[String]) -> Result<Value, NativeError> {
    expect_argc(args, 1)?;
    let mut h = FNV_OFFSET;
    for b in text_arg(args, 0)?.bytes() {
        h ^= u64::from(b);
        h = h.wrapping_mul(FNV_PRIME);
    }
    Ok(Value::Text(format!("{h:016x}")))
}

fn seq_new(args: &[Value], _type_args: &[String]) -> Result<Value, NativeError> {
    expect_argc(args, 0)?;
    Ok(Value::new_seq())
}

fn seq_push(args: &[Value], _type_args: &[String]) -> Result<Value, NativeError> {
    expect_argc(args, 2)?;
    match args.first() {
        Some(Value::Seq(items)) => {
            items.borrow_mut().push(args[1].clone());
            Ok(Value::Null)
        }
        _ => Err(NativeError::ArgumentType {
            position: 0,
            expected: type_names::SEQ,
        }),
    }
}

fn seq_len(args: &[Value], _type_args: &[String]) -> Result<Value, NativeError> {
    expect_argc(args, 1)?;
    Ok(Value::I32(seq_arg(args, 0)?.len() as i32))
}

fn seq_get(args: &[Value], _type_args: &[String]) -> Result<Value, NativeError> {
    expect_argc(args, 2)?;
    let items = seq_arg(args, 0)?;
    let ix = i32_arg(args, 1)?;
    usize::try_from(ix)
        .ok()
        .and_then(|ix| items.get(ix).cloned())
        .ok_or_else(|| NativeError::Failed(format!("seq index {ix} out of range")))
}
