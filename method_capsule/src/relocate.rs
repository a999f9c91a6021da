// Copyright 2026 the Method Capsule Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! In-place token relocation.
//!
//! Patching is the dumb final step: each resolved symbol is written back as
//! 4 little-endian bytes at the exact offset its descriptor named. All other
//! bytes of the stream are preserved verbatim, including numeric operands
//! that happen to look like tokens.

use alloc::vec::Vec;
use core::fmt;

use crate::resolve::Patch;

/// An error raised while patching a method body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelocateError {
    /// A patch does not fit inside the stream.
    PatchOutOfBounds {
        /// Byte offset of the patch.
        offset: usize,
        /// Length of the stream.
        len: usize,
    },
}

impl fmt::Display for RelocateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PatchOutOfBounds { offset, len } => {
                write!(f, "patch at offset {offset} outside a {len}-byte stream")
            }
        }
    }
}

impl core::error::Error for RelocateError {}

/// Returns a copy of `bytes` with every patch applied.
pub fn patch_body(bytes: &[u8], patches: &[Patch]) -> Result<Vec<u8>, RelocateError> {
    let mut out = bytes.to_vec();
    for &(offset, token) in patches {
        let slot = out
            .get_mut(offset..offset.saturating_add(4))
            .ok_or(RelocateError::PatchOutOfBounds {
                offset,
                len: bytes.len(),
            })?;
        slot.copy_from_slice(&token.to_le_bytes());
    }
    Ok(out)
}
