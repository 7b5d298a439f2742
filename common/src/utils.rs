//! Common Utilities
//!
//! Provides utility functions used across the RLC subsystem

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hex-format at most `max` leading bytes, marking truncation
pub fn bytes_to_hex_prefix(data: &[u8], max: usize) -> String {
    if data.len() <= max {
        bytes_to_hex(data)
    } else {
        format!("{} .. ({} B total)", bytes_to_hex(&data[..max]), data.len())
    }
}
