//! Hex-encoded quantities as used by the Ethereum JSON-RPC API.

use crate::error::DecodeError;

/// Parse a `0x`-prefixed hex quantity. The prefix is optional.
pub fn parse_quantity(value: &str) -> Result<u64, DecodeError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);

    if digits.is_empty() {
        return Err(DecodeError::Hex {
            value: value.to_string(),
            reason: "no digits".to_string(),
        });
    }

    u64::from_str_radix(digits, 16).map_err(|e| DecodeError::Hex {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

pub fn format_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

/// `#[serde(with = ...)]` adapter for `u64` fields carried as hex quantities
pub mod serde_u64 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_quantity(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_quantity(&raw).map_err(de::Error::custom)
    }
}
