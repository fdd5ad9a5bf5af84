pub mod hex;

pub use hex::{
    format_hash32, format_hex_u128, format_hex_u64, is_prefixed_hex, normalize_hex,
    parse_hash32, parse_hex_u128, parse_hex_u64,
};
