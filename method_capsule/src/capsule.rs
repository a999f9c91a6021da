// Copyright 2026 the Method Capsule Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The portable capsule and its JSON wire codec.
//!
//! A [`Capsule`] is everything a target host needs to rebuild and invoke a
//! captured function: the raw instruction stream, the declared signature and
//! locals, the bound arguments, and one [`TokenDescriptor`] per symbolic
//! operand. Descriptors carry structural identity only (canonical signatures
//! and type names); the 4-byte token values still sitting in the stream are
//! capture-host garbage that the resolver overwrites.
//!
//! Wire field names are part of the format and never change; the body
//! travels base64-encoded inside the JSON document.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A capsule document that failed to encode or decode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MalformedCapsule {
    /// Human-readable failure reason.
    pub reason: String,
}

impl MalformedCapsule {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for MalformedCapsule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed capsule: {}", self.reason)
    }
}

impl core::error::Error for MalformedCapsule {}

/// Structural identity of one symbolic operand in the instruction stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenDescriptor {
    /// Byte offset of the 4-byte operand within the stream.
    pub index: usize,
    /// Canonical identity: the full type name for type references, the
    /// qualified field name for fields, the canonical full signature for
    /// methods and constructors.
    pub full_name: String,
    /// Fully-qualified declaring type name.
    pub type_name: String,
    /// Member-kind wire string, carried verbatim; validated by the resolver,
    /// not the codec.
    pub member_type: String,
    /// Whether the member is a generic method.
    pub is_generic_method: bool,
    /// Whether the member is an open generic method definition.
    pub is_generic_method_definition: bool,
    /// Whether the member still contains unbound generic parameters.
    pub contains_generic_parameters: bool,
    /// Concrete type-argument names a generic method was bound over.
    pub generic_parameters: Vec<String>,
}

/// A portable snapshot of one compiled function plus its bound arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct Capsule {
    /// Upper bound on the evaluation-stack depth the stream requires.
    pub max_stack: u32,
    /// Fully-qualified return type name (`core.Void` for none).
    pub return_type: String,
    /// The raw instruction stream, with capture-host tokens still in place.
    pub body: Vec<u8>,
    /// Declared local-variable types, in slot order.
    pub local_types: Vec<String>,
    /// Declared parameter types, in order.
    pub parameter_types: Vec<String>,
    /// The argument values the capsule was bound with.
    pub arguments: Vec<Value>,
    /// One descriptor per symbolic operand, in stream order.
    pub tokens: Vec<TokenDescriptor>,
}

#[derive(Serialize, Deserialize)]
struct WireToken {
    #[serde(rename = "Index")]
    index: usize,
    #[serde(rename = "FullName")]
    full_name: String,
    #[serde(rename = "TypeName")]
    type_name: String,
    #[serde(rename = "MemberType")]
    member_type: String,
    #[serde(rename = "IsGenericMethod")]
    is_generic_method: bool,
    #[serde(rename = "IsGenericMethodDefinition")]
    is_generic_method_definition: bool,
    #[serde(rename = "ContainsGenericParameters")]
    contains_generic_parameters: bool,
    #[serde(rename = "GenericParameters", default)]
    generic_parameters: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct WireCapsule {
    #[serde(rename = "MaxStackSize")]
    max_stack: u32,
    #[serde(rename = "ReturnType")]
    return_type: String,
    #[serde(rename = "B64MethodBody")]
    body_b64: String,
    #[serde(rename = "LocalVarTypes")]
    local_types: Vec<String>,
    #[serde(rename = "ParameterTypes")]
    parameter_types: Vec<String>,
    #[serde(rename = "ExecutionParameters")]
    arguments: Vec<serde_json::Value>,
    #[serde(rename = "InlineTokenInfos", default)]
    tokens: Vec<WireToken>,
}

impl Capsule {
    /// Serializes the capsule to its JSON wire form.
    pub fn to_json(&self) -> Result<String, MalformedCapsule> {
        let mut arguments = Vec::with_capacity(self.arguments.len());
        for (i, arg) in self.arguments.iter().enumerate() {
            arguments.push(encode_argument(arg).ok_or_else(|| {
                MalformedCapsule::new(format!(
                    "argument {i} of type {} cannot cross the wire",
                    arg.type_name()
                ))
            })?);
        }
        let wire = WireCapsule {
            max_stack: self.max_stack,
            return_type: self.return_type.clone(),
            body_b64: B64.encode(&self.body),
            local_types: self.local_types.clone(),
            parameter_types: self.parameter_types.clone(),
            arguments,
            tokens: self
                .tokens
                .iter()
                .map(|t| WireToken {
                    index: t.index,
                    full_name: t.full_name.clone(),
                    type_name: t.type_name.clone(),
                    member_type: t.member_type.clone(),
                    is_generic_method: t.is_generic_method,
                    is_generic_method_definition: t.is_generic_method_definition,
                    contains_generic_parameters: t.contains_generic_parameters,
                    generic_parameters: t.generic_parameters.clone(),
                })
                .collect(),
        };
        serde_json::to_string(&wire).map_err(|e| MalformedCapsule::new(e.to_string()))
    }

    /// Parses a capsule from its JSON wire form.
    ///
    /// Arguments are narrowed into the tightest matching [`Value`] variant.
    /// Descriptor indices are checked against the decoded body; member-kind
    /// strings are not validated here.
    pub fn from_json(json: &str) -> Result<Self, MalformedCapsule> {
        let wire: WireCapsule =
            serde_json::from_str(json).map_err(|e| MalformedCapsule::new(e.to_string()))?;
        let body = B64
            .decode(&wire.body_b64)
            .map_err(|e| MalformedCapsule::new(format!("bad body base64: {e}")))?;

        let mut arguments = Vec::with_capacity(wire.arguments.len());
        for (i, raw) in wire.arguments.iter().enumerate() {
            arguments.push(
                narrow_argument(raw)
                    .ok_or_else(|| MalformedCapsule::new(format!("argument {i} is not a scalar")))?,
            );
        }

        let mut tokens = Vec::with_capacity(wire.tokens.len());
        for t in wire.tokens {
            if t.index.checked_add(4).is_none_or(|end| end > body.len()) {
                return Err(MalformedCapsule::new(format!(
                    "token index {} outside a {}-byte body",
                    t.index,
                    body.len()
                )));
            }
            tokens.push(TokenDescriptor {
                index: t.index,
                full_name: t.full_name,
                type_name: t.type_name,
                member_type: t.member_type,
                is_generic_method: t.is_generic_method,
                is_generic_method_definition: t.is_generic_method_definition,
                contains_generic_parameters: t.contains_generic_parameters,
                generic_parameters: t.generic_parameters,
            });
        }

        Ok(Self {
            max_stack: wire.max_stack,
            return_type: wire.return_type,
            body,
            local_types: wire.local_types,
            parameter_types: wire.parameter_types,
            arguments,
            tokens,
        })
    }
}

/// Encodes one argument to its JSON form; `None` for values that cannot
/// cross the wire (sequences, and floats with no JSON representation).
fn encode_argument(value: &Value) -> Option<serde_json::Value> {
    use serde_json::{Number, Value as Json};
    match value {
        Value::Null => Some(Json::Null),
        Value::Bool(b) => Some(Json::Bool(*b)),
        Value::I32(v) => Some(Json::Number((*v).into())),
        Value::I64(v) => Some(Json::Number((*v).into())),
        Value::U32(v) => Some(Json::Number((*v).into())),
        Value::U64(v) => Some(Json::Number((*v).into())),
        Value::F32(v) => Number::from_f64(f64::from(*v)).map(Json::Number),
        Value::F64(v) => Number::from_f64(*v).map(Json::Number),
        // A char is a 1-character string on the wire; the invoker narrows it
        // back through the declared parameter type.
        Value::Char(c) => Some(Json::String(c.to_string())),
        Value::Text(s) => Some(Json::String(s.clone())),
        Value::Seq(_) => None,
    }
}

/// Narrows a JSON value into the tightest matching [`Value`] variant.
///
/// Non-negative integers prefer `I32`, then `U32`, then `I64`, then `U64`;
/// negative integers prefer `I32` then `I64`. A float becomes `F32` only
/// when the round trip through `f32` is exact.
fn narrow_argument(raw: &serde_json::Value) -> Option<Value> {
    use serde_json::Value as Json;
    match raw {
        Json::Null => Some(Value::Null),
        Json::Bool(b) => Some(Value::Bool(*b)),
        Json::String(s) => Some(Value::text(s.clone())),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                if !n.is_f64() {
                    return Some(narrow_integer(i));
                }
            }
            if let Some(u) = n.as_u64() {
                if !n.is_f64() {
                    return Some(Value::U64(u));
                }
            }
            let f = n.as_f64()?;
            #[allow(clippy::cast_possible_truncation)]
            let narrowed = f as f32;
            if f64::from(narrowed) == f {
                Some(Value::F32(narrowed))
            } else {
                Some(Value::F64(f))
            }
        }
        Json::Array(_) | Json::Object(_) => None,
    }
}

fn narrow_integer(i: i64) -> Value {
    if let Ok(v) = i32::try_from(i) {
        Value::I32(v)
    } else if let Ok(v) = u32::try_from(i) {
        Value::U32(v)
    } else {
        Value::I64(i)
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::value::type_names;

    fn sample_capsule() -> Capsule {
        Capsule {
            max_stack: 4,
            return_type: type_names::TEXT.into(),
            body: vec![0x28, 0xAA, 0xBB, 0xCC, 0x06, 0x2A],
            local_types: vec![type_names::I32.into()],
            parameter_types: vec![type_names::TEXT.into(), type_names::CHAR.into()],
            arguments: vec![Value::text("hi"), Value::Char('x')],
            tokens: vec![TokenDescriptor {
                index: 1,
                full_name: "core.Fnv64.hash_hex(Text)".into(),
                type_name: "core.Fnv64".into(),
                member_type: "Method".into(),
                is_generic_method: false,
                is_generic_method_definition: false,
                contains_generic_parameters: false,
                generic_parameters: vec![],
            }],
        }
    }

    #[test]
    fn json_round_trip_preserves_everything() {
        let capsule = sample_capsule();
        let json = capsule.to_json().unwrap();
        let back = Capsule::from_json(&json).unwrap();
        // The char argument narrows to text on the wire; everything else is
        // preserved exactly.
        assert_eq!(back.body, capsule.body);
        assert_eq!(back.tokens, capsule.tokens);
        assert_eq!(back.max_stack, capsule.max_stack);
        assert_eq!(back.parameter_types, capsule.parameter_types);
        assert_eq!(back.arguments[0], Value::text("hi"));
        assert_eq!(back.arguments[1], Value::text("x"));
    }

    #[test]
    fn wire_uses_the_fixed_field_names() {
        let json = sample_capsule().to_json().unwrap();
        for field in [
            "\"MaxStackSize\"",
            "\"ReturnType\"",
            "\"B64MethodBody\"",
            "\"LocalVarTypes\"",
            "\"ParameterTypes\"",
            "\"ExecutionParameters\"",
            "\"InlineTokenInfos\"",
            "\"FullName\"",
            "\"MemberType\"",
            "\"GenericParameters\"",
        ] {
            assert!(json.contains(field), "missing {field} in {json}");
        }
    }

    #[test]
    fn missing_body_is_rejected() {
        let json = r#"{
            "MaxStackSize": 1,
            "ReturnType": "core.Void",
            "LocalVarTypes": [],
            "ParameterTypes": [],
            "ExecutionParameters": [],
            "InlineTokenInfos": []
        }"#;
        let err = Capsule::from_json(json).unwrap_err();
        assert!(err.reason.contains("B64MethodBody"), "{}", err.reason);
    }

    #[test]
    fn token_index_must_fit_the_body() {
        let mut capsule = sample_capsule();
        capsule.tokens[0].index = 3; // 3 + 4 > 6
        let json = capsule.to_json().unwrap();
        assert!(Capsule::from_json(&json).is_err());
    }

    #[test]
    fn arguments_narrow_to_the_tightest_variant() {
        let cases = [
            ("1", Value::I32(1)),
            ("-5", Value::I32(-5)),
            ("2147483648", Value::U32(2_147_483_648)),
            ("4294967296", Value::I64(4_294_967_296)),
            ("18446744073709551615", Value::U64(u64::MAX)),
            ("-4294967296", Value::I64(-4_294_967_296)),
            ("1.5", Value::F32(1.5)),
            ("0.1", Value::F64(0.1)),
            ("true", Value::Bool(true)),
            ("null", Value::Null),
            ("\"ok\"", Value::text("ok")),
        ];
        for (raw, expected) in cases {
            let json: serde_json::Value = serde_json::from_str(raw).unwrap();
            assert_eq!(narrow_argument(&json), Some(expected), "case {raw}");
        }
        let arr: serde_json::Value = serde_json::from_str("[1]").unwrap();
        assert_eq!(narrow_argument(&arr), None);
    }

    #[test]
    fn sequences_do_not_cross_the_wire() {
        let mut capsule = sample_capsule();
        capsule.arguments.push(Value::new_seq());
        assert!(capsule.to_json().is_err());
    }
}
