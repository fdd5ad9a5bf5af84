//! Hex helpers for JSON-RPC quantities and fixed-width hashes.
//!
//! Node responses encode integers as `0x`-prefixed "quantities" without leading zeros and
//! hashes as fixed-width `0x`-prefixed byte strings. These helpers parse and format both, and
//! the [`quantity`] / [`opt_quantity`] modules plug them into serde field attributes.

/// Parses a `0x`-prefixed hex quantity into a `u64`.
///
/// Returns `None` for missing prefix, empty digits, or overflow.
#[must_use]
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let digits = strip_prefix(s)?;
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Parses a `0x`-prefixed hex quantity into a `u128`. Balances and gas prices use this width.
#[must_use]
pub fn parse_hex_u128(s: &str) -> Option<u128> {
    let digits = strip_prefix(s)?;
    if digits.is_empty() {
        return None;
    }
    u128::from_str_radix(digits, 16).ok()
}

/// Parses a `0x`-prefixed 32-byte hash.
#[must_use]
pub fn parse_hash32(s: &str) -> Option<[u8; 32]> {
    let digits = strip_prefix(s)?;
    let mut out = [0u8; 32];
    hex::decode_to_slice(digits, &mut out).ok()?;
    Some(out)
}

/// Formats a `u64` as a quantity. Zero is formatted as `0x0`.
#[must_use]
pub fn format_hex_u64(value: u64) -> String {
    format!("0x{value:x}")
}

#[must_use]
pub fn format_hex_u128(value: u128) -> String {
    format!("0x{value:x}")
}

/// Formats a 32-byte hash with `0x` prefix.
#[must_use]
pub fn format_hash32(hash: &[u8; 32]) -> String {
    let mut out = String::with_capacity(66);
    out.push_str("0x");
    out.push_str(&hex::encode(hash));
    out
}

/// Returns true when `s` is `0x` followed by exactly `digits` hex characters.
#[must_use]
pub fn is_prefixed_hex(s: &str, digits: usize) -> bool {
    strip_prefix(s).is_some_and(|rest| rest.len() == digits && rest.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Lowercases a hex identifier so cache keys for `0xAbC..` and `0xabc..` collide.
#[must_use]
pub fn normalize_hex(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}

fn strip_prefix(s: &str) -> Option<&str> {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
}

/// Serde adapter for required `u64` quantity fields.
pub mod quantity {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_hex_u64(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_hex_u64(&raw).ok_or_else(|| D::Error::custom(format!("invalid quantity: {raw}")))
    }
}

/// Serde adapter for optional `u64` quantity fields (pending transactions have no block number).
pub mod opt_quantity {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&super::format_hex_u64(*v)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|s| {
            super::parse_hex_u64(&s).ok_or_else(|| D::Error::custom(format!("invalid quantity: {s}")))
        })
        .transpose()
    }
}

/// Serde adapter for `u128` quantities (wei amounts).
pub mod quantity_u128 {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_hex_u128(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_hex_u128(&raw).ok_or_else(|| D::Error::custom(format!("invalid quantity: {raw}")))
    }
}
