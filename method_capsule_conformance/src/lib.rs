// Copyright 2026 the Method Capsule Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Cross-host conformance suite for `method_capsule`.
//!
//! The tests live in `tests/conformance.rs`; this crate intentionally
//! exports nothing.
