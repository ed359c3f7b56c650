//! Tagged SQL scalar and parameter values.
//!
//! [`SqlScalar`] is the engine-side value an adapter reads out of a result
//! row; it is never serialized. [`SqlArg`] is the wire-side bind parameter
//! carried inside a patch document. Both are closed sums with the same
//! shape: `Null`, `Int64`, `Real`, `Text`, `Blob`.
//!
//! On the wire an argument is a tagged object, discriminator field `type`,
//! payload field `v`:
//!
//! ```json
//! {"type":"Int64","v":7}
//! {"type":"Blob","v":"AQID"}
//! ```
//!
//! Blobs are Base64 (RFC 4648, standard alphabet). `Int64.v` must be a JSON
//! integer: a float in that position is a decode error, so 64-bit values
//! above 2^53 survive the round trip bit-exactly.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::error::PatchError;

/// A scalar value read from the database.
///
/// Produced by [`Engine::query_scalar`](crate::engine::Engine::query_scalar)
/// and consumed by condition evaluation via [`SqlScalar::as_long`].
#[derive(Debug, Clone, PartialEq)]
pub enum SqlScalar {
    /// SQL NULL, also used as the absence value for zero-row results.
    Null,
    /// A 64-bit integer column.
    Int64(i64),
    /// A floating-point column.
    Real(f64),
    /// A text column.
    Text(String),
    /// A binary column.
    Blob(Vec<u8>),
}

impl SqlScalar {
    /// Coerces the scalar to an integer for condition comparison.
    ///
    /// `Int64` yields its value, `Real` truncates toward zero, `Text`
    /// parses as a decimal integer (0 when unparsable), `Null` and `Blob`
    /// yield 0.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_long(&self) -> i64 {
        match self {
            Self::Int64(value) => *value,
            Self::Real(value) => *value as i64,
            Self::Text(value) => value.parse::<i64>().unwrap_or(0),
            Self::Null | Self::Blob(_) => 0,
        }
    }
}

/// A wire-serialized bind parameter.
///
/// Bound positionally (1-based) into `?` placeholders of a
/// [`ParameterizedSqlAction`](crate::model::ParameterizedSqlAction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SqlArgWire", into = "SqlArgWire")]
pub enum SqlArg {
    /// Binds SQL NULL.
    Null,
    /// Binds a text value.
    Text(String),
    /// Binds a 64-bit integer.
    Int64(i64),
    /// Binds a floating-point value.
    Real(f64),
    /// Binds a binary value.
    Blob(Vec<u8>),
}

/// Strict wire shape of an argument: `{"type": ..., "v": ...}`.
///
/// Decoding goes through this struct so unknown keys are rejected, `Int64`
/// only accepts JSON integers, and Base64 failures surface at parse time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SqlArgWire {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    v: Option<serde_json::Value>,
}

impl TryFrom<SqlArgWire> for SqlArg {
    type Error = PatchError;

    fn try_from(wire: SqlArgWire) -> Result<Self, Self::Error> {
        let invalid = |message: String| PatchError::InvalidValue {
            context: "sql argument",
            message,
        };

        match wire.kind.as_str() {
            "Null" => match wire.v {
                None | Some(serde_json::Value::Null) => Ok(Self::Null),
                Some(other) => Err(invalid(format!("Null argument carries a value: {other}"))),
            },
            "Text" => match wire.v {
                Some(serde_json::Value::String(text)) => Ok(Self::Text(text)),
                other => Err(invalid(format!("Text argument requires a string, got {other:?}"))),
            },
            "Int64" => match wire.v {
                // Number::as_i64 refuses floats, preserving the full 64-bit
                // range instead of silently truncating above 2^53.
                Some(serde_json::Value::Number(number)) => number
                    .as_i64()
                    .map(Self::Int64)
                    .ok_or_else(|| invalid(format!("Int64 argument requires an integer, got {number}"))),
                other => Err(invalid(format!("Int64 argument requires an integer, got {other:?}"))),
            },
            "Real" => match wire.v {
                Some(serde_json::Value::Number(number)) => number
                    .as_f64()
                    .map(Self::Real)
                    .ok_or_else(|| invalid(format!("Real argument requires a number, got {number}"))),
                other => Err(invalid(format!("Real argument requires a number, got {other:?}"))),
            },
            "Blob" => match wire.v {
                Some(serde_json::Value::String(encoded)) => BASE64
                    .decode(encoded.as_bytes())
                    .map(Self::Blob)
                    .map_err(|e| invalid(format!("Blob argument is not valid Base64: {e}"))),
                other => Err(invalid(format!("Blob argument requires a Base64 string, got {other:?}"))),
            },
            other => Err(invalid(format!("unknown argument type {other:?}"))),
        }
    }
}

impl From<SqlArg> for SqlArgWire {
    fn from(arg: SqlArg) -> Self {
        let (kind, v) = match arg {
            SqlArg::Null => ("Null", None),
            SqlArg::Text(text) => ("Text", Some(serde_json::Value::String(text))),
            SqlArg::Int64(value) => ("Int64", Some(serde_json::Value::from(value))),
            // Non-finite reals have no JSON representation; they degrade to
            // null, which the strict decoder then rejects.
            SqlArg::Real(value) => ("Real", Some(serde_json::Value::from(value))),
            SqlArg::Blob(bytes) => (
                "Blob",
                Some(serde_json::Value::String(BASE64.encode(&bytes))),
            ),
        };
        Self {
            kind: kind.to_string(),
            v,
        }
    }
}
