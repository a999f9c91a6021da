// Copyright 2026 the Method Capsule Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A small method-body assembler.
//!
//! [`BodyAsm`] emits the instruction stream one opcode at a time, tracks the
//! worst-case evaluation-stack depth as it goes, and back-patches branch
//! targets at the end. Targets are absolute byte offsets; forward references
//! go through [`Label`]s.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::format::Writer;
use crate::member::BodyDef;
use crate::opcode::Opcode;

/// An assembly error, reported when the body is finished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AsmError {
    /// A label was referenced but never bound to an offset.
    UnboundLabel {
        /// The label's index.
        label: usize,
    },
    /// A short branch target does not fit in one byte.
    ShortTargetOutOfRange {
        /// The resolved absolute target.
        target: usize,
    },
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnboundLabel { label } => write!(f, "label {label} was never bound"),
            Self::ShortTargetOutOfRange { target } => {
                write!(f, "target {target} does not fit a short branch")
            }
        }
    }
}

impl core::error::Error for AsmError {}

/// A branch target, bound to an offset with [`BodyAsm::bind`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Label(usize);

struct Fixup {
    patch_offset: usize,
    label: Label,
    short: bool,
}

/// An incremental method-body builder.
#[derive(Default)]
pub struct BodyAsm {
    w: Writer,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
    depth: u32,
    max_depth: u32,
}

impl BodyAsm {
    /// Creates an empty body.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current stream offset.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.w.len()
    }

    /// Allocates an unbound label.
    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the current offset.
    pub fn bind(&mut self, label: Label) {
        self.labels[label.0] = Some(self.w.len());
    }

    fn emit(&mut self, opcode: Opcode, pops: u32, pushes: u32) {
        let mut bytes = Vec::new();
        opcode.encode_into(&mut bytes);
        for b in bytes {
            self.w.write_u8(b);
        }
        self.depth = self.depth.saturating_sub(pops) + pushes;
        self.max_depth = self.max_depth.max(self.depth);
    }

    fn emit_branch(&mut self, opcode: Opcode, label: Label, pops: u32) {
        self.emit(opcode, pops, 0);
        let short = opcode.operand_class().width() == 1;
        self.fixups.push(Fixup {
            patch_offset: self.w.len(),
            label,
            short,
        });
        if short {
            self.w.write_u8(0);
        } else {
            self.w.write_u32_le(0);
        }
    }

    /// `nop`
    pub fn nop(&mut self) {
        self.emit(Opcode::Nop, 0, 0);
    }

    /// `ldarg.s slot`
    pub fn ld_arg(&mut self, slot: u8) {
        self.emit(Opcode::LdArg, 0, 1);
        self.w.write_u8(slot);
    }

    /// `ldloc.s slot`
    pub fn ld_loc(&mut self, slot: u8) {
        self.emit(Opcode::LdLoc, 0, 1);
        self.w.write_u8(slot);
    }

    /// `stloc.s slot`
    pub fn st_loc(&mut self, slot: u8) {
        self.emit(Opcode::StLoc, 1, 0);
        self.w.write_u8(slot);
    }

    /// `ldc.i4 v`
    pub fn ldc_i4(&mut self, v: i32) {
        self.emit(Opcode::LdcI4, 0, 1);
        self.w.write_u32_le(v as u32);
    }

    /// `ldc.i8 v`
    pub fn ldc_i8(&mut self, v: i64) {
        self.emit(Opcode::LdcI8, 0, 1);
        self.w.write_u64_le(v as u64);
    }

    /// `ldc.r4 v`
    pub fn ldc_r4(&mut self, v: f32) {
        self.emit(Opcode::LdcR4, 0, 1);
        self.w.write_u32_le(v.to_bits());
    }

    /// `ldc.r8 v`
    pub fn ldc_r8(&mut self, v: f64) {
        self.emit(Opcode::LdcR8, 0, 1);
        self.w.write_u64_le(v.to_bits());
    }

    /// `ldnull`
    pub fn ld_null(&mut self) {
        self.emit(Opcode::LdNull, 0, 1);
    }

    /// `dup`
    pub fn dup(&mut self) {
        self.emit(Opcode::Dup, 1, 2);
    }

    /// `pop`
    pub fn pop(&mut self) {
        self.emit(Opcode::Pop, 1, 0);
    }

    /// `br label`
    pub fn br(&mut self, label: Label) {
        self.emit_branch(Opcode::Br, label, 0);
    }

    /// `brfalse label`
    pub fn br_false(&mut self, label: Label) {
        self.emit_branch(Opcode::BrFalse, label, 1);
    }

    /// `brtrue label`
    pub fn br_true(&mut self, label: Label) {
        self.emit_branch(Opcode::BrTrue, label, 1);
    }

    /// `br.s label`
    pub fn br_s(&mut self, label: Label) {
        self.emit_branch(Opcode::BrS, label, 0);
    }

    /// `brfalse.s label`
    pub fn br_false_s(&mut self, label: Label) {
        self.emit_branch(Opcode::BrFalseS, label, 1);
    }

    /// `brtrue.s label`
    pub fn br_true_s(&mut self, label: Label) {
        self.emit_branch(Opcode::BrTrueS, label, 1);
    }

    /// `switch label`
    pub fn switch(&mut self, label: Label) {
        self.emit_branch(Opcode::Switch, label, 1);
    }

    /// `add`
    pub fn add(&mut self) {
        self.emit(Opcode::Add, 2, 1);
    }

    /// `sub`
    pub fn sub(&mut self) {
        self.emit(Opcode::Sub, 2, 1);
    }

    /// `mul`
    pub fn mul(&mut self) {
        self.emit(Opcode::Mul, 2, 1);
    }

    /// `div`
    pub fn div(&mut self) {
        self.emit(Opcode::Div, 2, 1);
    }

    /// `rem`
    pub fn rem(&mut self) {
        self.emit(Opcode::Rem, 2, 1);
    }

    /// `ceq`
    pub fn ceq(&mut self) {
        self.emit(Opcode::Ceq, 2, 1);
    }

    /// `cgt`
    pub fn cgt(&mut self) {
        self.emit(Opcode::Cgt, 2, 1);
    }

    /// `clt`
    pub fn clt(&mut self) {
        self.emit(Opcode::Clt, 2, 1);
    }

    /// `call token`, consuming `argc` stack values.
    pub fn call(&mut self, token: u32, argc: usize, pushes_result: bool) {
        self.emit(Opcode::Call, argc as u32, u32::from(pushes_result));
        self.w.write_u32_le(token);
    }

    /// `calli token`, consuming `argc` stack values.
    pub fn call_i(&mut self, token: u32, argc: usize, pushes_result: bool) {
        self.emit(Opcode::CallI, argc as u32, u32::from(pushes_result));
        self.w.write_u32_le(token);
    }

    /// `ldtext token`
    pub fn ld_text(&mut self, token: u32) {
        self.emit(Opcode::LdText, 0, 1);
        self.w.write_u32_le(token);
    }

    /// `newobj token`, consuming `argc` stack values.
    pub fn new_obj(&mut self, token: u32, argc: usize) {
        self.emit(Opcode::NewObj, argc as u32, 1);
        self.w.write_u32_le(token);
    }

    /// `cast token`
    pub fn cast(&mut self, token: u32) {
        self.emit(Opcode::Cast, 1, 1);
        self.w.write_u32_le(token);
    }

    /// `ldsfld token`
    pub fn ld_sfld(&mut self, token: u32) {
        self.emit(Opcode::LdSFld, 0, 1);
        self.w.write_u32_le(token);
    }

    /// `ret`
    pub fn ret(&mut self) {
        self.emit(Opcode::Ret, 0, 0);
        self.depth = 0;
    }

    /// Resolves all fixups and returns the stream plus the tracked
    /// worst-case stack depth.
    pub fn finish(self) -> Result<(Vec<u8>, u32), AsmError> {
        let mut w = self.w;
        for fixup in &self.fixups {
            let target = self.labels[fixup.label.0].ok_or(AsmError::UnboundLabel {
                label: fixup.label.0,
            })?;
            if fixup.short {
                let byte = u8::try_from(target)
                    .map_err(|_| AsmError::ShortTargetOutOfRange { target })?;
                // Patch offsets point at operand slots we reserved ourselves.
                let _ = w.patch_u8(fixup.patch_offset, byte);
            } else {
                let _ = w.patch_u32_le(fixup.patch_offset, target as u32);
            }
        }
        Ok((w.into_vec(), self.max_depth.max(1)))
    }

    /// Finishes the stream and wraps it in a [`BodyDef`] with the given
    /// locals.
    pub fn into_body(self, local_types: Vec<String>) -> Result<BodyDef, AsmError> {
        let (bytes, max_stack) = self.finish()?;
        Ok(BodyDef {
            max_stack,
            local_types,
            bytes,
        })
    }
}
