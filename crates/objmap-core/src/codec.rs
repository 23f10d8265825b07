//! Scalar value codec — text encoding for keys and values
//!
//! Every key and value travels as UTF-8 text inside changelog records, so the
//! supported scalar domains are exactly the ones with an unambiguous text
//! form: strings, unsigned 64-bit integers, and IEEE-754 single/double
//! floats. Floats render in fixed six-fractional-digit notation (the
//! `printf("%f", ...)` form), integers as plain decimal.
//!
//! Records are whitespace-delimited, so encoded text must not contain ASCII
//! whitespace or line terminators. [`validate_token`] enforces that at the
//! encoding boundary; anything that would not survive the wire is rejected
//! with a codec error before any remote traffic happens.

use crate::error::{MapError, MapResult};

/// Type tag a map handle is opened against.
///
/// Keys must be [`TypeTag::Text`]; values may carry any tag. The gate lives
/// at open time, not in the codec paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    /// UTF-8 text
    Text,
    /// Unsigned 64-bit integer
    U64,
    /// IEEE-754 single precision
    F32,
    /// IEEE-754 double precision
    F64,
}

impl TypeTag {
    /// True if the tag is allowed in the key position.
    #[must_use]
    pub fn is_key_tag(self) -> bool {
        matches!(self, TypeTag::Text)
    }

    /// True if the tag is allowed in the value position.
    #[must_use]
    pub fn is_value_tag(self) -> bool {
        matches!(self, TypeTag::Text | TypeTag::U64 | TypeTag::F32 | TypeTag::F64)
    }
}

/// A runtime value in one of the supported scalar domains.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// UTF-8 text
    Text(String),
    /// Unsigned 64-bit integer
    U64(u64),
    /// IEEE-754 single precision
    F32(f32),
    /// IEEE-754 double precision
    F64(f64),
}

impl Value {
    /// The tag of this value's domain.
    #[must_use]
    pub fn tag(&self) -> TypeTag {
        match self {
            Value::Text(_) => TypeTag::Text,
            Value::U64(_) => TypeTag::U64,
            Value::F32(_) => TypeTag::F32,
            Value::F64(_) => TypeTag::F64,
        }
    }

    /// Render the value as changelog text.
    ///
    /// Strings are identity, integers plain decimal, floats fixed notation
    /// with six fractional digits so the forms round-trip through
    /// [`Value::from_text`].
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::U64(v) => v.to_string(),
            Value::F32(v) => format!("{:.6}", v),
            Value::F64(v) => format!("{:.6}", v),
        }
    }

    /// Parse changelog text back into the given domain.
    pub fn from_text(text: &str, tag: TypeTag) -> MapResult<Value> {
        match tag {
            TypeTag::Text => Ok(Value::Text(text.to_string())),
            TypeTag::U64 => {
                // The encoder never emits a sign, so reject one on the way in.
                if text.starts_with('+') || text.starts_with('-') {
                    return Err(MapError::codec(format!(
                        "invalid unsigned integer text: {:?}",
                        text
                    )));
                }
                text.parse::<u64>().map(Value::U64).map_err(|e| {
                    MapError::codec(format!("invalid unsigned integer text {:?}: {}", text, e))
                })
            }
            TypeTag::F32 => text.parse::<f32>().map(Value::F32).map_err(|e| {
                MapError::codec(format!("invalid single-precision text {:?}: {}", text, e))
            }),
            TypeTag::F64 => text.parse::<f64>().map(Value::F64).map_err(|e| {
                MapError::codec(format!("invalid double-precision text {:?}: {}", text, e))
            }),
        }
    }
}

/// Reject text that cannot be framed in a whitespace-delimited record.
///
/// `role` names the slot being validated ("key" or "value") for error
/// context. Empty text, ASCII whitespace of any kind, and line terminators
/// are all fatal: the record grammar has no escaping.
pub fn validate_token(role: &str, text: &str) -> MapResult<()> {
    if text.is_empty() {
        return Err(MapError::codec(format!("empty {}", role)));
    }
    // is_ascii_whitespace misses vertical tab (0x0B); check it explicitly.
    if text
        .bytes()
        .any(|b| b.is_ascii_whitespace() || b == 0x0B)
    {
        return Err(MapError::codec(format!(
            "{} contains whitespace or line terminator: {:?}",
            role, text
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_identity() {
        let v = Value::Text("replica".to_string());
        assert_eq!(v.to_text(), "replica");
        assert_eq!(Value::from_text("replica", TypeTag::Text).unwrap(), v);
    }

    #[test]
    fn test_u64_max_round_trip() {
        let v = Value::U64(u64::MAX);
        assert_eq!(v.to_text(), "18446744073709551615");
        assert_eq!(
            Value::from_text("18446744073709551615", TypeTag::U64).unwrap(),
            v
        );
    }

    #[test]
    fn test_f64_of_u64_max_renders_fixed() {
        // u64::MAX rounds up to 2^64 in double precision
        let v = Value::F64(u64::MAX as f64);
        assert_eq!(v.to_text(), "18446744073709551616.000000");
        assert_eq!(
            Value::from_text("18446744073709551616.000000", TypeTag::F64).unwrap(),
            v
        );
    }

    #[test]
    fn test_f32_of_u32_max_renders_fixed() {
        // u32::MAX rounds up to 2^32 in single precision
        let v = Value::F32(u32::MAX as f32);
        assert_eq!(v.to_text(), "4294967296.000000");
        assert_eq!(
            Value::from_text("4294967296.000000", TypeTag::F32).unwrap(),
            v
        );
    }

    #[test]
    fn test_small_float_round_trip() {
        let v = Value::F64(3.5);
        assert_eq!(v.to_text(), "3.500000");
        assert_eq!(Value::from_text("3.500000", TypeTag::F64).unwrap(), v);
    }

    #[test]
    fn test_u64_rejects_sign_and_garbage() {
        assert!(Value::from_text("+42", TypeTag::U64).is_err());
        assert!(Value::from_text("-1", TypeTag::U64).is_err());
        assert!(Value::from_text("12x", TypeTag::U64).is_err());
        assert!(Value::from_text("", TypeTag::U64).is_err());
    }

    #[test]
    fn test_u64_rejects_out_of_range() {
        // one past u64::MAX
        assert!(Value::from_text("18446744073709551616", TypeTag::U64).is_err());
    }

    #[test]
    fn test_float_rejects_garbage() {
        assert!(Value::from_text("not_a_number", TypeTag::F64).is_err());
        assert!(Value::from_text("", TypeTag::F32).is_err());
    }

    #[test]
    fn test_key_tag_gate() {
        assert!(TypeTag::Text.is_key_tag());
        assert!(!TypeTag::U64.is_key_tag());
        assert!(!TypeTag::F32.is_key_tag());
        assert!(!TypeTag::F64.is_key_tag());
    }

    #[test]
    fn test_validate_token_rejects_whitespace() {
        assert!(validate_token("key", "plain").is_ok());
        assert!(validate_token("key", "has space").is_err());
        assert!(validate_token("key", "has\ttab").is_err());
        assert!(validate_token("key", "has\nnewline").is_err());
        assert!(validate_token("key", "has\rreturn").is_err());
        assert!(validate_token("key", "has\x0bvtab").is_err());
        assert!(validate_token("key", "has\x0cformfeed").is_err());
        assert!(validate_token("key", "").is_err());
    }
}
