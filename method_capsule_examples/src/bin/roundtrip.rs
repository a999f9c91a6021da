// Copyright 2026 the Method Capsule Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end demo: capture a function on a "source" host and invoke the
//! capsule on a "target" host with different token numbering.
//!
//! Usage: `roundtrip [input] [strip-char] [separator]`

use anyhow::{Context, Result, bail};
use method_capsule::asm::BodyAsm;
use method_capsule::member::{MethodBody, MethodDef, TypeDef};
use method_capsule::value::{Value, type_names};
use method_capsule::{Limits, Module, capture, execute_json};

/// Builds a host module carrying `demo.Pipeline.hash_strip_join`: hash the
/// input, drop one character from the hex digest, join the rest with a
/// separator.
fn host_module(seed: u32) -> Result<Module> {
    let mut m = Module::with_builtins(seed);
    m.register_type(TypeDef::new("demo.Pipeline"))?;

    let hash = m.method_token("core.Fnv64", "hash_hex")?;
    let len = m.method_token("core.Text", "len")?;
    let char_at = m.method_token("core.Text", "char_at")?;
    let char_eq = m.method_token("core.Char", "eq")?;
    let seq_ctor = m.ctor_token("core.Seq", 0)?;
    let seq_push = m.method_token("core.Seq", "push")?;
    let join = m.generic_method_token("core.Text", "join", &[type_names::CHAR])?;

    // locals: 0 digest, 1 kept, 2 i, 3 len, 4 c
    let mut asm = BodyAsm::new();
    let top = asm.label();
    let skip = asm.label();
    let done = asm.label();

    asm.ld_arg(0);
    asm.call(hash, 1, true);
    asm.st_loc(0);
    asm.new_obj(seq_ctor, 0);
    asm.st_loc(1);
    asm.ldc_i4(0);
    asm.st_loc(2);
    asm.ld_loc(0);
    asm.call(len, 1, true);
    asm.st_loc(3);

    asm.bind(top);
    asm.ld_loc(2);
    asm.ld_loc(3);
    asm.clt();
    asm.br_false(done);
    asm.ld_loc(0);
    asm.ld_loc(2);
    asm.call(char_at, 2, true);
    asm.st_loc(4);
    asm.ld_loc(4);
    asm.ld_arg(1);
    asm.call(char_eq, 2, true);
    asm.br_true(skip);
    asm.ld_loc(1);
    asm.ld_loc(4);
    asm.call(seq_push, 2, false);
    asm.bind(skip);
    asm.ld_loc(2);
    asm.ldc_i4(1);
    asm.add();
    asm.st_loc(2);
    asm.br(top);

    asm.bind(done);
    asm.ld_arg(2);
    asm.ld_loc(1);
    asm.call(join, 2, true);
    asm.ret();

    let body = asm.into_body(vec![
        type_names::TEXT.into(),
        type_names::SEQ.into(),
        type_names::I32.into(),
        type_names::I32.into(),
        type_names::CHAR.into(),
    ])?;
    m.define_method(
        "demo.Pipeline",
        MethodDef {
            name: "hash_strip_join".into(),
            params: vec![
                type_names::TEXT.into(),
                type_names::CHAR.into(),
                type_names::TEXT.into(),
            ],
            ret: type_names::TEXT.into(),
            type_params: 0,
            body: MethodBody::Bytecode(body),
        },
    )?;
    Ok(m)
}

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let input = args.next().unwrap_or_else(|| "hello capsule".to_string());
    let strip = args.next().unwrap_or_else(|| "0".to_string());
    let separator = args.next().unwrap_or_else(|| "-".to_string());
    let Some(strip) = strip.chars().next() else {
        bail!("strip-char must not be empty");
    };

    let source = host_module(0x0011_2233).context("building source host")?;
    let capsule = capture(
        &source,
        "demo.Pipeline",
        "hash_strip_join",
        vec![Value::text(input), Value::Char(strip), Value::text(separator)],
    )
    .context("capturing demo.Pipeline.hash_strip_join")?;
    let json = capsule.to_json()?;
    println!("capsule ({} bytes of body):\n{json}\n", capsule.body.len());

    let target = host_module(0x00AA_BBCC).context("building target host")?;
    let out = execute_json(&target, &json, &Limits::default())
        .context("executing the capsule on the target host")?;
    println!("target result: {out}");
    Ok(())
}
