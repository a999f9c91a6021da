// Copyright 2026 the Method Capsule Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Byte-level primitives for instruction streams.
//!
//! Operands in a method body are fixed-width little-endian values (1, 4, or
//! 8 bytes). This module provides a bounds-checked [`Reader`] over a stream
//! and a [`Writer`] used by the assembler.

use alloc::vec::Vec;
use core::fmt;

/// A decode error for instruction-stream primitives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended unexpectedly.
    UnexpectedEof,
    /// A length/offset was out of bounds.
    OutOfBounds,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of input"),
            Self::OutOfBounds => write!(f, "out of bounds"),
        }
    }
}

impl core::error::Error for DecodeError {}

/// A simple byte reader with bounds checks.
#[derive(Clone, Debug)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    /// Creates a reader over `bytes`.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    /// Returns the current cursor offset.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Returns the number of bytes left in the stream.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .offset
            .checked_add(len)
            .ok_or(DecodeError::OutOfBounds)?;
        let slice = self
            .bytes
            .get(self.offset..end)
            .ok_or(DecodeError::UnexpectedEof)?;
        self.offset = end;
        Ok(slice)
    }

    /// Reads a `u8`.
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    /// Reads a little-endian `u32`.
    pub fn read_u32_le(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a little-endian `u64`.
    pub fn read_u64_le(&mut self) -> Result<u64, DecodeError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Reads a little-endian unsigned integer of `width` bytes (1, 4, or 8),
    /// widened to `u64`.
    pub fn read_uint_le(&mut self, width: usize) -> Result<u64, DecodeError> {
        let b = self.take(width)?;
        let mut v: u64 = 0;
        for (i, byte) in b.iter().enumerate() {
            v |= u64::from(*byte) << (8 * i);
        }
        Ok(v)
    }
}

/// A simple byte writer.
#[derive(Clone, Debug, Default)]
pub struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Returns the number of bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns a reference to the written bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the writer and returns the underlying byte buffer.
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }

    /// Appends a `u8`.
    pub fn write_u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    /// Appends a little-endian `u32`.
    pub fn write_u32_le(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    /// Appends a little-endian `u64`.
    pub fn write_u64_le(&mut self, v: u64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    /// Overwrites 4 bytes at `offset` with the little-endian encoding of `v`.
    ///
    /// Returns [`DecodeError::OutOfBounds`] if `offset + 4` exceeds the
    /// written length.
    pub fn patch_u32_le(&mut self, offset: usize, v: u32) -> Result<(), DecodeError> {
        let slot = self
            .bytes
            .get_mut(offset..offset + 4)
            .ok_or(DecodeError::OutOfBounds)?;
        slot.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    /// Overwrites 1 byte at `offset`.
    pub fn patch_u8(&mut self, offset: usize, v: u8) -> Result<(), DecodeError> {
        let slot = self
            .bytes
            .get_mut(offset)
            .ok_or(DecodeError::OutOfBounds)?;
        *slot = v;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_reads_little_endian_widths() {
        let bytes = [0x2D, 0x01, 0x02, 0x03, 0x04, 0xFF];
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_u8().unwrap(), 0x2D);
        assert_eq!(r.read_u32_le().unwrap(), 0x0403_0201);
        assert_eq!(r.offset(), 5);
        assert_eq!(r.remaining(), 1);
    }

    #[test]
    fn reader_reports_eof() {
        let mut r = Reader::new(&[0x01, 0x02]);
        assert_eq!(r.read_u32_le(), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn read_uint_le_widens() {
        let bytes = [0xEF, 0xBE, 0xAD, 0xDE];
        assert_eq!(Reader::new(&bytes).read_uint_le(1).unwrap(), 0xEF);
        assert_eq!(Reader::new(&bytes).read_uint_le(4).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn writer_patches_in_place() {
        let mut w = Writer::new();
        w.write_u8(0xAA);
        w.write_u32_le(0);
        w.patch_u32_le(1, 0x0403_0201).unwrap();
        assert_eq!(w.as_slice(), &[0xAA, 0x01, 0x02, 0x03, 0x04]);
        assert!(w.patch_u32_le(2, 0).is_err());
    }
}
