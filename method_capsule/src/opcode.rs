// Copyright 2026 the Method Capsule Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The opcode catalog for method-body instruction streams.
//!
//! Instructions are variable length: a 1-byte opcode, or 2 bytes when the
//! first byte is the [`ESCAPE`] prefix, in which case the second byte selects
//! an opcode from the extended page. Extended opcodes carry negative catalog
//! values ([`EXTENDED_BIAS`] plus the second byte), so the full value space
//! fits an `i16`.
//!
//! Operand presence and width are a pure function of the opcode's
//! [`OperandClass`]. The lookup tables are process-wide static data, built
//! once at compile time from [`CATALOG`].

/// The escape prefix byte selecting the extended opcode page.
pub const ESCAPE: u8 = 0xFE;

/// Bias applied to the second byte of an escaped opcode to form its value.
pub const EXTENDED_BIAS: i16 = -512;

/// Operand class of an opcode.
///
/// The class fixes both the operand width and whether the operand is a
/// host-local symbolic token (subject to extraction and relocation) or a
/// plain numeric value (left untouched).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OperandClass {
    /// No operand.
    None,
    /// 4-byte symbolic token denoting a method or constructor.
    MemberRef,
    /// 4-byte symbolic token denoting a type.
    TypeRef,
    /// 4-byte symbolic token denoting a field.
    FieldRef,
    /// 4-byte symbolic token denoting a standalone signature.
    SigRef,
    /// 4-byte symbolic token denoting in-process literal text.
    TextRef,
    /// 4-byte signed integer immediate.
    I32Imm,
    /// 4-byte absolute branch target.
    BranchTarget,
    /// 4-byte multi-branch selector target.
    JumpTable,
    /// 4-byte `f32` immediate (raw IEEE bits).
    F32Imm,
    /// 8-byte signed integer immediate.
    I64Imm,
    /// 8-byte `f64` immediate (raw IEEE bits).
    F64Imm,
    /// 1-byte absolute branch target.
    ShortBranchTarget,
    /// 1-byte signed integer immediate.
    I8Imm,
    /// 1-byte argument/local slot index.
    LocalSlot,
}

impl OperandClass {
    /// Returns the operand width in bytes.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::None => 0,
            Self::MemberRef
            | Self::TypeRef
            | Self::FieldRef
            | Self::SigRef
            | Self::TextRef
            | Self::I32Imm
            | Self::BranchTarget
            | Self::JumpTable
            | Self::F32Imm => 4,
            Self::I64Imm | Self::F64Imm => 8,
            Self::ShortBranchTarget | Self::I8Imm | Self::LocalSlot => 1,
        }
    }

    /// Returns `true` if the operand is a host-local symbolic token.
    ///
    /// Only symbolic operands are handed to the symbol extractor; numeric and
    /// branch operands pass through relocation unchanged.
    #[must_use]
    pub const fn is_symbolic(self) -> bool {
        matches!(
            self,
            Self::MemberRef | Self::TypeRef | Self::FieldRef | Self::SigRef | Self::TextRef
        )
    }
}

/// Opcodes of the method-body instruction set.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Opcode {
    /// No operation.
    Nop,
    /// Push the argument in the 1-byte slot operand.
    LdArg,
    /// Push the local in the 1-byte slot operand.
    LdLoc,
    /// Pop into the local in the 1-byte slot operand.
    StLoc,
    /// Push a 4-byte `i32` immediate.
    LdcI4,
    /// Push an 8-byte `i64` immediate.
    LdcI8,
    /// Push a 4-byte `f32` immediate (raw bits).
    LdcR4,
    /// Push an 8-byte `f64` immediate (raw bits).
    LdcR8,
    /// Push the null value.
    LdNull,
    /// Duplicate the top of the evaluation stack.
    Dup,
    /// Discard the top of the evaluation stack.
    Pop,
    /// Unconditional branch to the 4-byte absolute target.
    Br,
    /// Branch to the 4-byte target if the popped boolean is false.
    BrFalse,
    /// Branch to the 4-byte target if the popped boolean is true.
    BrTrue,
    /// Unconditional branch, 1-byte absolute target.
    BrS,
    /// Conditional branch on false, 1-byte absolute target.
    BrFalseS,
    /// Conditional branch on true, 1-byte absolute target.
    BrTrueS,
    /// Pop an `i32` selector; branch to the 4-byte target when nonzero.
    Switch,
    /// Pop two numbers, push their sum.
    Add,
    /// Pop two numbers, push their difference.
    Sub,
    /// Pop two numbers, push their product.
    Mul,
    /// Pop two numbers, push their quotient.
    Div,
    /// Pop two numbers, push their remainder.
    Rem,
    /// Call the method denoted by the 4-byte member token.
    Call,
    /// Indirect call through a 4-byte standalone signature token.
    CallI,
    /// Return from the function.
    Ret,
    /// Push the text denoted by the 4-byte text token.
    LdText,
    /// Allocate via the constructor denoted by the 4-byte member token.
    NewObj,
    /// Convert the top of stack to the type denoted by the 4-byte type token.
    Cast,
    /// Push the value of the static field denoted by the 4-byte field token.
    LdSFld,
    /// Pop two values, push boolean equality. Extended page.
    Ceq,
    /// Pop two numbers, push `a > b`. Extended page.
    Cgt,
    /// Pop two numbers, push `a < b`. Extended page.
    Clt,
}

/// Catalog metadata for one opcode.
#[derive(Copy, Clone, Debug)]
pub struct OpcodeMeta {
    /// The opcode.
    pub opcode: Opcode,
    /// Assembly mnemonic.
    pub mnemonic: &'static str,
    /// Catalog value (byte value, or `EXTENDED_BIAS + second byte`).
    pub value: i16,
    /// Operand class.
    pub operand: OperandClass,
}

const fn meta(
    opcode: Opcode,
    mnemonic: &'static str,
    value: i16,
    operand: OperandClass,
) -> OpcodeMeta {
    OpcodeMeta {
        opcode,
        mnemonic,
        value,
        operand,
    }
}

/// The full opcode catalog.
pub const CATALOG: &[OpcodeMeta] = &[
    meta(Opcode::Nop, "nop", 0x00, OperandClass::None),
    meta(Opcode::LdArg, "ldarg.s", 0x01, OperandClass::LocalSlot),
    meta(Opcode::LdLoc, "ldloc.s", 0x02, OperandClass::LocalSlot),
    meta(Opcode::StLoc, "stloc.s", 0x03, OperandClass::LocalSlot),
    meta(Opcode::LdcI4, "ldc.i4", 0x04, OperandClass::I32Imm),
    meta(Opcode::LdcI8, "ldc.i8", 0x05, OperandClass::I64Imm),
    meta(Opcode::LdcR4, "ldc.r4", 0x06, OperandClass::F32Imm),
    meta(Opcode::LdcR8, "ldc.r8", 0x07, OperandClass::F64Imm),
    meta(Opcode::LdNull, "ldnull", 0x08, OperandClass::None),
    meta(Opcode::Dup, "dup", 0x0A, OperandClass::None),
    meta(Opcode::Pop, "pop", 0x0B, OperandClass::None),
    meta(Opcode::Br, "br", 0x10, OperandClass::BranchTarget),
    meta(Opcode::BrFalse, "brfalse", 0x11, OperandClass::BranchTarget),
    meta(Opcode::BrTrue, "brtrue", 0x12, OperandClass::BranchTarget),
    meta(Opcode::BrS, "br.s", 0x13, OperandClass::ShortBranchTarget),
    meta(Opcode::BrFalseS, "brfalse.s", 0x14, OperandClass::ShortBranchTarget),
    meta(Opcode::BrTrueS, "brtrue.s", 0x15, OperandClass::ShortBranchTarget),
    meta(Opcode::Switch, "switch", 0x16, OperandClass::JumpTable),
    meta(Opcode::Add, "add", 0x20, OperandClass::None),
    meta(Opcode::Sub, "sub", 0x21, OperandClass::None),
    meta(Opcode::Mul, "mul", 0x22, OperandClass::None),
    meta(Opcode::Div, "div", 0x23, OperandClass::None),
    meta(Opcode::Rem, "rem", 0x24, OperandClass::None),
    meta(Opcode::Call, "call", 0x28, OperandClass::MemberRef),
    meta(Opcode::CallI, "calli", 0x29, OperandClass::SigRef),
    meta(Opcode::Ret, "ret", 0x2A, OperandClass::None),
    meta(Opcode::LdText, "ldtext", 0x72, OperandClass::TextRef),
    meta(Opcode::NewObj, "newobj", 0x73, OperandClass::MemberRef),
    meta(Opcode::Cast, "cast", 0x74, OperandClass::TypeRef),
    meta(Opcode::LdSFld, "ldsfld", 0x7E, OperandClass::FieldRef),
    meta(Opcode::Ceq, "ceq", EXTENDED_BIAS + 0x01, OperandClass::None),
    meta(Opcode::Cgt, "cgt", EXTENDED_BIAS + 0x02, OperandClass::None),
    meta(Opcode::Clt, "clt", EXTENDED_BIAS + 0x04, OperandClass::None),
];

// Built once from the catalog; never mutated afterwards.
static BASE_PAGE: [Option<Opcode>; 256] = build_page(false);
static EXTENDED_PAGE: [Option<Opcode>; 256] = build_page(true);

const fn build_page(extended: bool) -> [Option<Opcode>; 256] {
    let mut page = [None; 256];
    let mut i = 0;
    while i < CATALOG.len() {
        let m = &CATALOG[i];
        if extended {
            if m.value < 0 {
                page[(m.value - EXTENDED_BIAS) as usize] = Some(m.opcode);
            }
        } else if m.value >= 0 {
            page[m.value as usize] = Some(m.opcode);
        }
        i += 1;
    }
    page
}

impl Opcode {
    /// Returns the catalog value.
    #[must_use]
    pub const fn value(self) -> i16 {
        let mut i = 0;
        while i < CATALOG.len() {
            // Compare via discriminants; `Opcode` is field-less.
            if CATALOG[i].opcode as u8 == self as u8 {
                return CATALOG[i].value;
            }
            i += 1;
        }
        // Every variant appears in the catalog.
        0
    }

    /// Returns the operand class.
    #[must_use]
    pub const fn operand_class(self) -> OperandClass {
        let mut i = 0;
        while i < CATALOG.len() {
            if CATALOG[i].opcode as u8 == self as u8 {
                return CATALOG[i].operand;
            }
            i += 1;
        }
        OperandClass::None
    }

    /// Returns the assembly mnemonic.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        let mut i = 0;
        while i < CATALOG.len() {
            if CATALOG[i].opcode as u8 == self as u8 {
                return CATALOG[i].mnemonic;
            }
            i += 1;
        }
        "?"
    }

    /// Returns `true` if the opcode lives on the extended page.
    #[must_use]
    pub const fn is_extended(self) -> bool {
        self.value() < 0
    }

    /// Parses a single-byte opcode.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        if b == ESCAPE {
            return None;
        }
        BASE_PAGE[b as usize]
    }

    /// Parses the second byte of an escaped opcode.
    #[must_use]
    pub fn from_extended_byte(b: u8) -> Option<Self> {
        EXTENDED_PAGE[b as usize]
    }

    /// Parses an opcode from its catalog value.
    #[must_use]
    pub fn from_value(v: i16) -> Option<Self> {
        if v < 0 {
            let ix = v.checked_sub(EXTENDED_BIAS)?;
            EXTENDED_PAGE.get(ix as usize).copied().flatten()
        } else {
            BASE_PAGE.get(v as usize).copied().flatten()
        }
    }

    /// Writes the encoded opcode (1 or 2 bytes) into `out`.
    pub fn encode_into(self, out: &mut alloc::vec::Vec<u8>) {
        let v = self.value();
        if v < 0 {
            out.push(ESCAPE);
            out.push((v - EXTENDED_BIAS) as u8);
        } else {
            out.push(v as u8);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_values_are_stable() {
        assert_eq!(Opcode::Call.value(), 0x28);
        assert_eq!(Opcode::NewObj.value(), 0x73);
        assert_eq!(Opcode::LdSFld.value(), 0x7E);
        assert_eq!(Opcode::LdText.value(), 0x72);
        assert_eq!(Opcode::Ceq.value(), EXTENDED_BIAS + 0x01);
    }

    #[test]
    fn catalog_has_no_duplicate_values() {
        let mut seen = alloc::vec::Vec::new();
        for m in CATALOG {
            assert!(!seen.contains(&m.value), "duplicate value {}", m.value);
            seen.push(m.value);
        }
    }

    #[test]
    fn pages_round_trip_every_opcode() {
        for m in CATALOG {
            let back = Opcode::from_value(m.value).unwrap();
            assert_eq!(back, m.opcode);
            if m.value >= 0 {
                assert_eq!(Opcode::from_byte(m.value as u8), Some(m.opcode));
            } else {
                let second = (m.value - EXTENDED_BIAS) as u8;
                assert_eq!(Opcode::from_extended_byte(second), Some(m.opcode));
            }
        }
    }

    #[test]
    fn escape_byte_is_never_a_base_opcode() {
        assert_eq!(Opcode::from_byte(ESCAPE), None);
    }

    #[test]
    fn operand_widths_match_classes() {
        assert_eq!(Opcode::Call.operand_class().width(), 4);
        assert_eq!(Opcode::LdcI8.operand_class().width(), 8);
        assert_eq!(Opcode::LdArg.operand_class().width(), 1);
        assert_eq!(Opcode::Ret.operand_class().width(), 0);
        assert!(Opcode::Call.operand_class().is_symbolic());
        assert!(Opcode::LdText.operand_class().is_symbolic());
        assert!(!Opcode::LdcI4.operand_class().is_symbolic());
        assert!(!Opcode::Switch.operand_class().is_symbolic());
    }

    #[test]
    fn encode_into_uses_escape_for_extended() {
        let mut out = alloc::vec::Vec::new();
        Opcode::Clt.encode_into(&mut out);
        assert_eq!(out, [ESCAPE, 0x04]);
        out.clear();
        Opcode::Ret.encode_into(&mut out);
        assert_eq!(out, [0x2A]);
    }
}
