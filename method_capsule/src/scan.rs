// Copyright 2026 the Method Capsule Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Single-pass instruction-stream scanner.
//!
//! The scanner walks a method body and yields one item per instruction:
//! the opcode (when the catalog recognizes it) and the raw operand with its
//! byte offset and width. It is lazy and restartable: [`InstructionScanner`]
//! is a plain `Clone` iterator over a borrowed buffer.
//!
//! The scanner never fails. Bytes that do not decode to a cataloged opcode
//! (plain data that happens to sit at an instruction boundary, or a
//! truncated trailing operand) are reported as [`ScannedInstr`] items with
//! no opcode or no operand; whether such an item matters is the symbol
//! extractor's call, not ours.

use crate::format::Reader;
use crate::opcode::{ESCAPE, Opcode, OperandClass};

/// A raw operand attached to a scanned instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ScannedOperand {
    /// Byte offset of the operand within the stream.
    pub offset: usize,
    /// Operand class (fixes the width).
    pub class: OperandClass,
    /// Raw little-endian value, widened to `u64`.
    pub raw: u64,
}

impl ScannedOperand {
    /// Returns the raw value truncated to a 4-byte token.
    ///
    /// Only meaningful for symbolic operand classes, which are always 4 bytes
    /// wide.
    #[must_use]
    pub fn token(&self) -> u32 {
        self.raw as u32
    }
}

/// One scanned instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ScannedInstr {
    /// Byte offset of the opcode within the stream.
    pub offset: usize,
    /// The opcode, or `None` when the byte(s) at `offset` are not cataloged.
    pub opcode: Option<Opcode>,
    /// The first opcode byte as it appeared in the stream.
    pub raw_byte: u8,
    /// The operand, if the opcode declares one and the stream holds it fully.
    pub operand: Option<ScannedOperand>,
}

/// A lazy scanner over a method-body instruction stream.
#[derive(Clone, Debug)]
pub struct InstructionScanner<'a> {
    bytes: &'a [u8],
    reader: Reader<'a>,
}

impl<'a> InstructionScanner<'a> {
    /// Creates a scanner over `bytes`.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            reader: Reader::new(bytes),
        }
    }

    /// Returns the underlying stream.
    #[must_use]
    pub fn stream(&self) -> &'a [u8] {
        self.bytes
    }
}

impl Iterator for InstructionScanner<'_> {
    type Item = ScannedInstr;

    fn next(&mut self) -> Option<ScannedInstr> {
        let offset = self.reader.offset();
        let first = self.reader.read_u8().ok()?;

        let opcode = if first == ESCAPE {
            // Extended page: the second byte is looked up with the negative
            // bias applied. A truncated or unknown escape still consumes the
            // prefix pair when present.
            match self.reader.read_u8() {
                Ok(second) => Opcode::from_extended_byte(second),
                Err(_) => None,
            }
        } else {
            Opcode::from_byte(first)
        };

        let Some(opcode) = opcode else {
            return Some(ScannedInstr {
                offset,
                opcode: None,
                raw_byte: first,
                operand: None,
            });
        };

        let class = opcode.operand_class();
        let operand = if class.width() == 0 {
            None
        } else {
            let operand_offset = self.reader.offset();
            match self.reader.read_uint_le(class.width()) {
                Ok(raw) => Some(ScannedOperand {
                    offset: operand_offset,
                    class,
                    raw,
                }),
                // Truncated trailing operand: report the instruction without
                // it and end the scan.
                Err(_) => {
                    while self.reader.read_u8().is_ok() {}
                    None
                }
            }
        };

        Some(ScannedInstr {
            offset,
            opcode: Some(opcode),
            raw_byte: first,
            operand,
        })
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    #[test]
    fn scans_operand_widths_and_offsets() {
        // ldc.i4 0x11223344; ldarg.s 2; ldc.i8 1; ret
        let mut bytes = Vec::new();
        bytes.push(Opcode::LdcI4.value() as u8);
        bytes.extend_from_slice(&0x1122_3344_u32.to_le_bytes());
        bytes.push(Opcode::LdArg.value() as u8);
        bytes.push(2);
        bytes.push(Opcode::LdcI8.value() as u8);
        bytes.extend_from_slice(&1_u64.to_le_bytes());
        bytes.push(Opcode::Ret.value() as u8);

        let items: Vec<ScannedInstr> = InstructionScanner::new(&bytes).collect();
        assert_eq!(items.len(), 4);

        assert_eq!(items[0].opcode, Some(Opcode::LdcI4));
        let op0 = items[0].operand.unwrap();
        assert_eq!((op0.offset, op0.raw), (1, 0x1122_3344));

        assert_eq!(items[1].opcode, Some(Opcode::LdArg));
        let op1 = items[1].operand.unwrap();
        assert_eq!((op1.offset, op1.raw), (6, 2));

        assert_eq!(items[2].opcode, Some(Opcode::LdcI8));
        assert_eq!(items[2].operand.unwrap().offset, 8);

        assert_eq!(items[3].opcode, Some(Opcode::Ret));
        assert_eq!(items[3].operand, None);
    }

    #[test]
    fn scans_extended_opcodes_through_the_escape_prefix() {
        let bytes = [ESCAPE, 0x01, Opcode::Ret.value() as u8];
        let items: Vec<ScannedInstr> = InstructionScanner::new(&bytes).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].opcode, Some(Opcode::Ceq));
        assert_eq!(items[0].offset, 0);
        assert_eq!(items[1].opcode, Some(Opcode::Ret));
        assert_eq!(items[1].offset, 2);
    }

    #[test]
    fn unknown_bytes_are_yielded_not_errors() {
        // 0xC0 is not in the catalog; the scanner advances one byte.
        let bytes = [0xC0, Opcode::Nop.value() as u8];
        let items: Vec<ScannedInstr> = InstructionScanner::new(&bytes).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].opcode, None);
        assert_eq!(items[0].raw_byte, 0xC0);
        assert_eq!(items[1].opcode, Some(Opcode::Nop));
    }

    #[test]
    fn unknown_extended_byte_consumes_the_pair() {
        let bytes = [ESCAPE, 0xEE, Opcode::Nop.value() as u8];
        let items: Vec<ScannedInstr> = InstructionScanner::new(&bytes).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].opcode, None);
        assert_eq!(items[1].offset, 2);
    }

    #[test]
    fn truncated_operand_ends_the_scan() {
        let bytes = [Opcode::LdcI4.value() as u8, 0x01, 0x02];
        let items: Vec<ScannedInstr> = InstructionScanner::new(&bytes).collect();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].opcode, Some(Opcode::LdcI4));
        assert_eq!(items[0].operand, None);
    }

    #[test]
    fn scanner_is_restartable() {
        let bytes = [Opcode::Nop.value() as u8, Opcode::Ret.value() as u8];
        let scanner = InstructionScanner::new(&bytes);
        let first: Vec<_> = scanner.clone().collect();
        let second: Vec<_> = scanner.collect();
        assert_eq!(first, second);
    }
}
