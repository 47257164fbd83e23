// Copyright (c) 2025 rust-fortis contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::ChainError;

/// Convert a decimal amount ("1.5") to integer base units, rounding half up
/// on the first digit past `decimals`.
pub fn parse_amount(amount: &str, decimals: u8) -> Result<u128, ChainError> {
    let invalid = |msg: &str| ChainError::InvalidAmount(format!("{amount}: {msg}"));
    let amount_str = amount.trim();
    let (whole, fraction) = match amount_str.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (amount_str, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid("empty amount"));
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return Err(invalid("not a decimal number"));
    }

    let decimals = decimals as usize;
    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid("amount overflow"))?
    };
    let (kept, dropped) = fraction.split_at(fraction.len().min(decimals));
    let padded = format!("{kept:0<decimals$}");
    let mut fraction: u128 = if padded.is_empty() {
        0
    } else {
        padded.parse().map_err(|_| invalid("amount overflow"))?
    };
    if dropped.as_bytes().first().is_some_and(|d| *d >= b'5') {
        fraction += 1;
    }

    whole
        .checked_mul(10u128.pow(decimals as u32))
        .and_then(|w| w.checked_add(fraction))
        .ok_or_else(|| invalid("amount overflow"))
}

/// Format base units as a whole-unit decimal string without trailing zeros.
pub fn format_amount(amount: u128, decimals: u8) -> String {
    let divisor = 10u128.pow(decimals as u32);
    let whole = amount / divisor;
    let remainder = amount % divisor;

    if remainder == 0 {
        return whole.to_string();
    }
    let decimal_str = format!("{:0>width$}", remainder, width = decimals as usize);
    format!("{}.{}", whole, decimal_str.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1", 8).unwrap(), 100_000_000);
        assert_eq!(parse_amount("0.0001", 8).unwrap(), 10_000);
        assert_eq!(parse_amount(".5", 8).unwrap(), 50_000_000);
        assert_eq!(parse_amount("1.5", 18).unwrap(), 1_500_000_000_000_000_000);
        // rounds to the nearest unit
        assert_eq!(parse_amount("0.000000015", 8).unwrap(), 2);
        assert_eq!(parse_amount("0.000000014999", 8).unwrap(), 1);
        assert!(parse_amount("", 8).is_err());
        assert!(parse_amount("1.2.3", 8).is_err());
        assert!(parse_amount("-1", 8).is_err());
        assert!(parse_amount("abc", 8).is_err());
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(0, 8), "0");
        assert_eq!(format_amount(100_000_000, 8), "1");
        assert_eq!(format_amount(2_820, 8), "0.0000282");
        assert_eq!(format_amount(20 * 21_000, 18), "0.00000000000042");
        assert_eq!(format_amount(20 * 21_000 * 1_000_000_000, 18), "0.00042");
    }
}
