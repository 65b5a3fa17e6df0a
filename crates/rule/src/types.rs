//! The type lattice and typed constant values.
//!
//! Four concrete types carry data: `Bool`, `String`, `Int64`, and
//! `Float64`. Two abstract types exist only inside operator contracts:
//! `Number` accepts either numeric type, `Any` accepts everything.
//! Values store their canonical textual encoding rather than native
//! binary, so that equal values always encode to equal bytes and
//! persisted rulesets hash deterministically.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EvalError;

/// A type known to operator contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Type {
    Bool,
    String,
    Int64,
    Float64,
    Number,
    Any,
}

impl Type {
    /// The wire name used in persisted trees and signatures.
    pub fn name(self) -> &'static str {
        match self {
            Type::Bool => "bool",
            Type::String => "string",
            Type::Int64 => "int64",
            Type::Float64 => "float64",
            Type::Number => "number",
            Type::Any => "any",
        }
    }

    /// Parses a concrete wire name. Abstract types never appear on the
    /// wire, so "number" and "any" are rejected.
    pub fn from_name(name: &str) -> Option<Type> {
        match name {
            "bool" => Some(Type::Bool),
            "string" => Some(Type::String),
            "int64" => Some(Type::Int64),
            "float64" => Some(Type::Float64),
            _ => None,
        }
    }

    /// Whether an expression of type `actual` can fill a slot declared
    /// with this type.
    pub fn accepts(self, actual: Type) -> bool {
        match self {
            Type::Any => true,
            Type::Number => matches!(actual, Type::Int64 | Type::Float64),
            expected => expected == actual,
        }
    }

    pub fn is_concrete(self) -> bool {
        matches!(self, Type::Bool | Type::String | Type::Int64 | Type::Float64)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::Bool => "Boolean",
            Type::String => "String",
            Type::Int64 => "Integer",
            Type::Float64 => "Float",
            Type::Number => "Number",
            Type::Any => "Any",
        };
        f.write_str(name)
    }
}

/// A typed constant holding its canonical textual encoding.
///
/// Construct through the typed constructors; they fix the encoding:
/// floats render with exactly six fractional digits, booleans as
/// `true`/`false`, integers in base 10. [`Value::new`] exists for
/// decoding persisted data and trusts its input to already be canonical.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Value {
    ty: Type,
    data: String,
}

impl Value {
    pub fn new(ty: Type, data: impl Into<String>) -> Value {
        Value {
            ty,
            data: data.into(),
        }
    }

    pub fn string(v: impl Into<String>) -> Value {
        Value::new(Type::String, v)
    }

    pub fn bool(v: bool) -> Value {
        Value::new(Type::Bool, if v { "true" } else { "false" })
    }

    pub fn int64(v: i64) -> Value {
        Value::new(Type::Int64, v.to_string())
    }

    pub fn float64(v: f64) -> Value {
        Value::new(Type::Float64, format!("{:.6}", v))
    }

    pub fn ty(&self) -> Type {
        self.ty
    }

    /// The canonical textual encoding.
    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn as_bool(&self) -> Result<bool, EvalError> {
        self.data.parse().map_err(|_| EvalError::Domain {
            reason: format!("value {:?} is not a boolean", self.data),
        })
    }

    pub fn as_int64(&self) -> Result<i64, EvalError> {
        self.data.parse().map_err(|_| EvalError::Domain {
            reason: format!("value {:?} is not an integer", self.data),
        })
    }

    pub fn as_float64(&self) -> Result<f64, EvalError> {
        self.data.parse().map_err(|_| EvalError::Domain {
            reason: format!("value {:?} is not a float", self.data),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.ty.name(), self.data)
    }
}

/// FNV-1 32-bit (multiply then XOR, not FNV-1a). Deployed rulesets rely
/// on these exact hashes for percentile grouping, so the variant is fixed.
pub(crate) fn fnv1_32(data: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 2_166_136_261;
    const PRIME: u32 = 16_777_619;
    let mut hash = OFFSET_BASIS;
    for byte in data {
        hash = hash.wrapping_mul(PRIME);
        hash ^= u32::from(*byte);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_match_error_grammar() {
        assert_eq!(Type::Bool.to_string(), "Boolean");
        assert_eq!(Type::String.to_string(), "String");
        assert_eq!(Type::Int64.to_string(), "Integer");
        assert_eq!(Type::Float64.to_string(), "Float");
        assert_eq!(Type::Number.to_string(), "Number");
        assert_eq!(Type::Any.to_string(), "Any");
    }

    #[test]
    fn wire_names_round_trip_for_concrete_types() {
        for ty in [Type::Bool, Type::String, Type::Int64, Type::Float64] {
            assert_eq!(Type::from_name(ty.name()), Some(ty));
        }
        assert_eq!(Type::from_name("number"), None);
        assert_eq!(Type::from_name("any"), None);
        assert_eq!(Type::from_name("decimal"), None);
    }

    #[test]
    fn number_accepts_both_numeric_types() {
        assert!(Type::Number.accepts(Type::Int64));
        assert!(Type::Number.accepts(Type::Float64));
        assert!(!Type::Number.accepts(Type::String));
        assert!(!Type::Number.accepts(Type::Bool));
    }

    #[test]
    fn any_accepts_everything() {
        for ty in [Type::Bool, Type::String, Type::Int64, Type::Float64] {
            assert!(Type::Any.accepts(ty));
        }
    }

    #[test]
    fn concrete_types_accept_only_themselves() {
        assert!(Type::Int64.accepts(Type::Int64));
        assert!(!Type::Int64.accepts(Type::Float64));
        assert!(!Type::Float64.accepts(Type::Int64));
    }

    #[test]
    fn float_encoding_has_six_fractional_digits() {
        assert_eq!(Value::float64(1.5).data(), "1.500000");
        assert_eq!(Value::float64(0.0).data(), "0.000000");
        assert_eq!(Value::float64(-2.25).data(), "-2.250000");
        assert_eq!(Value::float64(10.0).data(), "10.000000");
    }

    #[test]
    fn bool_and_int_encodings() {
        assert_eq!(Value::bool(true).data(), "true");
        assert_eq!(Value::bool(false).data(), "false");
        assert_eq!(Value::int64(42).data(), "42");
        assert_eq!(Value::int64(-7).data(), "-7");
    }

    #[test]
    fn equal_values_encode_identically() {
        assert_eq!(Value::float64(1.5), Value::float64(1.5));
        assert_eq!(Value::float64(1.5).data(), Value::float64(1.50).data());
    }

    #[test]
    fn accessors_parse_canonical_data() {
        assert_eq!(Value::bool(true).as_bool().unwrap(), true);
        assert_eq!(Value::int64(-3).as_int64().unwrap(), -3);
        assert_eq!(Value::float64(2.5).as_float64().unwrap(), 2.5);
        assert!(Value::string("x").as_int64().is_err());
    }

    #[test]
    fn fnv1_32_reference_vectors() {
        // Offset basis for the empty input, then the classic single-byte
        // vectors for the FNV-1 (not 1a) variant.
        assert_eq!(fnv1_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1_32(b"a"), 0x050c_5d7e);
        assert_eq!(fnv1_32(b"b"), 0x050c_5d7d);
        assert_eq!(fnv1_32(b"foobar"), 0x31f0_b262);
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&Type::Float64).unwrap();
        assert_eq!(json, "\"float64\"");
        let back: Type = serde_json::from_str("\"int64\"").unwrap();
        assert_eq!(back, Type::Int64);
    }
}
