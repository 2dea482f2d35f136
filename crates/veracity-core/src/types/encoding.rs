//! Hex and quantity helpers for JSON-RPC values.
//!
//! Servers are inconsistent about how they spell numbers (`"0x1a"`, `"26"`,
//! `26`), so everything numeric goes through [`parse_quantity`].

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{de, Deserialize, Deserializer, Serializer};
use serde_json::Value;
use thiserror::Error;

/// Errors while reading typed fields out of JSON-RPC objects.
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("Missing field `{0}`")]
    MissingField(&'static str),

    #[error("Invalid hex in `{field}`: {reason}")]
    InvalidHex { field: &'static str, reason: String },

    #[error("Invalid quantity in `{field}`: {value}")]
    InvalidQuantity { field: &'static str, value: String },

    #[error("Field `{field}` has {got} bytes, expected {expected}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Unsupported transaction type {0}")]
    UnsupportedType(u64),

    #[error("Invalid RLP: {0}")]
    Rlp(#[from] alloy_rlp::Error),
}

/// Decode a hex string with or without `0x` prefix. Odd-length input is
/// left-padded with a zero nibble.
pub fn hex_to_bytes(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.len() % 2 == 1 {
        hex::decode(format!("0{s}"))
    } else {
        hex::decode(s)
    }
}

/// Parse a JSON quantity: `0x` hex string, decimal string or JSON number.
pub fn parse_quantity(value: &Value) -> Option<U256> {
    match value {
        Value::Number(n) => n.as_u64().map(U256::from),
        Value::String(s) => match s.strip_prefix("0x") {
            Some("") => Some(U256::ZERO),
            Some(digits) => U256::from_str_radix(digits, 16).ok(),
            None => U256::from_str_radix(s, 10).ok(),
        },
        _ => None,
    }
}

/// Minimal big-endian bytes of a number, as RLP wants them.
pub fn quantity_bytes(value: U256) -> Vec<u8> {
    let bytes = value.to_be_bytes::<32>();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(32);
    bytes[start..].to_vec()
}

/// Big-endian bytes (at most 8) to u64.
pub fn bytes_to_u64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

/// Look up a non-null field of a JSON object.
pub fn field<'a>(obj: &'a Value, name: &'static str) -> Result<&'a Value, EncodingError> {
    match obj.get(name) {
        Some(Value::Null) | None => Err(EncodingError::MissingField(name)),
        Some(value) => Ok(value),
    }
}

pub fn field_quantity(obj: &Value, name: &'static str) -> Result<U256, EncodingError> {
    let value = field(obj, name)?;
    parse_quantity(value).ok_or_else(|| EncodingError::InvalidQuantity {
        field: name,
        value: value.to_string(),
    })
}

pub fn field_u64(obj: &Value, name: &'static str) -> Result<u64, EncodingError> {
    let value = field_quantity(obj, name)?;
    u64::try_from(value).map_err(|_| EncodingError::InvalidQuantity {
        field: name,
        value: value.to_string(),
    })
}

pub fn field_bytes(obj: &Value, name: &'static str) -> Result<Vec<u8>, EncodingError> {
    let value = field(obj, name)?;
    let s = value.as_str().ok_or_else(|| EncodingError::InvalidHex {
        field: name,
        reason: format!("expected a string, got {value}"),
    })?;
    hex_to_bytes(s).map_err(|e| EncodingError::InvalidHex {
        field: name,
        reason: e.to_string(),
    })
}

pub fn field_fixed<const N: usize>(
    obj: &Value,
    name: &'static str,
) -> Result<[u8; N], EncodingError> {
    let bytes = field_bytes(obj, name)?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| EncodingError::InvalidLength {
        field: name,
        expected: N,
        got: bytes.len(),
    })
}

pub fn field_b256(obj: &Value, name: &'static str) -> Result<B256, EncodingError> {
    field_fixed::<32>(obj, name).map(B256::from)
}

pub fn field_address(obj: &Value, name: &'static str) -> Result<Address, EncodingError> {
    field_fixed::<20>(obj, name).map(Address::from)
}

/// Parse a hex byte string that is not wrapped in an object.
pub fn value_bytes(value: &Value, name: &'static str) -> Result<Bytes, EncodingError> {
    let s = value.as_str().ok_or(EncodingError::MissingField(name))?;
    hex_to_bytes(s)
        .map(Bytes::from)
        .map_err(|e| EncodingError::InvalidHex {
            field: name,
            reason: e.to_string(),
        })
}

/// Serde adapter for `u64` quantities spelled as hex, decimal or number.
pub mod quantity {
    use super::*;

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{value:#x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let value = Value::deserialize(deserializer)?;
        parse_quantity(&value)
            .and_then(|q| u64::try_from(q).ok())
            .ok_or_else(|| de::Error::custom(format!("invalid quantity {value}")))
    }

    /// Same as the parent module for optional fields.
    pub mod opt {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<u64>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => serializer.serialize_str(&format!("{v:#x}")),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<u64>, D::Error> {
            let value = Value::deserialize(deserializer)?;
            if value.is_null() {
                return Ok(None);
            }
            parse_quantity(&value)
                .and_then(|q| u64::try_from(q).ok())
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid quantity {value}")))
        }
    }
}
