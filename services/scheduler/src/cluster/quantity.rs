//! Kubernetes resource quantity parsing.
//!
//! Handles the forms node `allocatable` figures come in: plain or decimal
//! numbers, millicores (`3500m`), binary suffixes (`Ki` through `Ei`) and
//! decimal suffixes (`k` through `E`). Negative quantities are rejected.

use super::ClusterError;

const MEMORY_SUFFIXES: &[(&str, u64)] = &[
    ("Ki", 1 << 10),
    ("Mi", 1 << 20),
    ("Gi", 1 << 30),
    ("Ti", 1 << 40),
    ("Pi", 1 << 50),
    ("Ei", 1 << 60),
    ("k", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
    ("P", 1_000_000_000_000_000),
    ("E", 1_000_000_000_000_000_000),
];

fn non_negative(raw: &str) -> Option<f64> {
    let value: f64 = raw.parse().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// Parse a CPU quantity into cores.
pub fn parse_cpu(quantity: &str) -> Result<f64, ClusterError> {
    let q = quantity.trim();
    let invalid = || ClusterError::InvalidQuantity(quantity.to_string());

    match q.strip_suffix('m') {
        Some(milli) => non_negative(milli).map(|v| v / 1000.0).ok_or_else(invalid),
        None => non_negative(q).ok_or_else(invalid),
    }
}

/// Parse a memory quantity into bytes. Fractional byte counts round up.
pub fn parse_memory(quantity: &str) -> Result<u64, ClusterError> {
    let q = quantity.trim();
    let invalid = || ClusterError::InvalidQuantity(quantity.to_string());

    let (digits, multiplier) = MEMORY_SUFFIXES
        .iter()
        .find_map(|(suffix, mult)| q.strip_suffix(suffix).map(|d| (d, *mult)))
        .unwrap_or((q, 1));

    if let Ok(whole) = digits.parse::<u64>() {
        return whole.checked_mul(multiplier).ok_or_else(invalid);
    }

    let bytes = (non_negative(digits).ok_or_else(invalid)? * multiplier as f64).ceil();
    if bytes >= u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(bytes as u64)
}

/// Parse a plain integer count, such as the `pods` allocatable.
pub fn parse_count(quantity: &str) -> Result<u32, ClusterError> {
    quantity
        .trim()
        .parse()
        .map_err(|_| ClusterError::InvalidQuantity(quantity.to_string()))
}

/// Render cores as a CPU quantity.
pub fn format_cpu(cores: f64) -> String {
    format!("{}m", (cores * 1000.0).round() as i64)
}
