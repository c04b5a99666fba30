use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default ERC-20 decimals when a watcher does not override them
pub const DEFAULT_DECIMALS: u8 = 18;

/// Largest decimals value whose scale factor still fits in a u128
pub const MAX_DECIMALS: u8 = 36;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AmountError {
    #[error("Invalid decimal amount: {0}")]
    InvalidDecimal(String),
    #[error("Invalid raw amount: {0}")]
    InvalidRaw(String),
    #[error("Amount out of range: {0}")]
    Overflow(String),
    #[error("Unsupported decimals: {0}")]
    UnsupportedDecimals(u8),
}

/// A token quantity held as integer base units plus the token's decimals.
///
/// All comparisons happen on base units, so no precision is lost between the
/// on-chain value and the watcher threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    base_units: u128,
    decimals: u8,
}

impl TokenAmount {
    pub fn from_base_units(base_units: u128, decimals: u8) -> Result<Self, AmountError> {
        if decimals > MAX_DECIMALS {
            return Err(AmountError::UnsupportedDecimals(decimals));
        }
        Ok(Self { base_units, decimals })
    }

    /// Parse a human decimal such as `"1.5"` into base units for `decimals`
    pub fn parse_decimal(value: &str, decimals: u8) -> Result<Self, AmountError> {
        if decimals > MAX_DECIMALS {
            return Err(AmountError::UnsupportedDecimals(decimals));
        }
        let value = value.trim();
        let (int_part, frac_part) = match value.split_once('.') {
            Some((i, f)) => (i, f),
            None => (value, ""),
        };
        let valid_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        if (int_part.is_empty() && frac_part.is_empty()) || !valid_digits(int_part) || !valid_digits(frac_part) {
            return Err(AmountError::InvalidDecimal(value.to_string()));
        }

        // Trailing zeros never change the value, so "1.000" works for a 0-decimal token
        let frac_part = frac_part.trim_end_matches('0');
        if frac_part.len() > decimals as usize {
            return Err(AmountError::InvalidDecimal(format!(
                "{} has more than {} fractional digits",
                value, decimals
            )));
        }

        let scale = pow10(decimals);
        let int_units = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse::<u128>()
                .map_err(|_| AmountError::Overflow(value.to_string()))?
        };
        let frac_units = if frac_part.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", frac_part, width = decimals as usize);
            padded
                .parse::<u128>()
                .map_err(|_| AmountError::InvalidDecimal(value.to_string()))?
        };

        let base_units = int_units
            .checked_mul(scale)
            .and_then(|v| v.checked_add(frac_units))
            .ok_or_else(|| AmountError::Overflow(value.to_string()))?;

        Ok(Self { base_units, decimals })
    }

    pub fn base_units(&self) -> u128 {
        self.base_units
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    /// Full-precision decimal string with trailing zeros removed
    pub fn to_decimal_string(&self) -> String {
        let scale = pow10(self.decimals);
        let int_part = self.base_units / scale;
        let frac_part = self.base_units % scale;
        if frac_part == 0 {
            return int_part.to_string();
        }
        let frac = format!("{:0>width$}", frac_part, width = self.decimals as usize);
        format!("{}.{}", int_part, frac.trim_end_matches('0'))
    }

    /// Decimal string rounded half-up to exactly `places` fractional digits
    pub fn format_fixed(&self, places: u8) -> String {
        let scale = pow10(self.decimals);
        let mut int_part = self.base_units / scale;
        let frac_part = self.base_units % scale;

        if places == 0 {
            if frac_part * 2 >= scale && self.decimals > 0 {
                int_part += 1;
            }
            return int_part.to_string();
        }

        let frac_digits = if places >= self.decimals {
            let digits = if self.decimals == 0 {
                String::new()
            } else {
                format!("{:0>width$}", frac_part, width = self.decimals as usize)
            };
            format!("{:0<width$}", digits, width = places as usize)
        } else {
            let divisor = pow10(self.decimals - places);
            let mut scaled = frac_part / divisor;
            let remainder = frac_part % divisor;
            if remainder * 2 >= divisor {
                scaled += 1;
            }
            if scaled == pow10(places) {
                scaled = 0;
                int_part += 1;
            }
            format!("{:0>width$}", scaled, width = places as usize)
        };

        format!("{}.{}", int_part, frac_digits)
    }

    /// Lossy conversion for USD estimates
    pub fn to_f64(&self) -> f64 {
        self.base_units as f64 / 10f64.powi(self.decimals as i32)
    }

    /// `self >= other`, rescaling when decimals differ
    pub fn meets(&self, other: &TokenAmount) -> bool {
        if self.decimals == other.decimals {
            return self.base_units >= other.base_units;
        }
        // Compare on the finer scale; fall back to f64 only if that overflows
        let target = self.decimals.max(other.decimals);
        match (self.rescaled(target), other.rescaled(target)) {
            (Some(a), Some(b)) => a >= b,
            _ => self.to_f64() >= other.to_f64(),
        }
    }

    fn rescaled(&self, decimals: u8) -> Option<u128> {
        self.base_units.checked_mul(pow10(decimals - self.decimals))
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal_string())
    }
}

/// Re-format a stored decimal string to `places` fractional digits.
///
/// Strings that fail to parse are returned unchanged.
pub fn format_decimal_str(value: &str, places: u8) -> String {
    let frac_len = value
        .split_once('.')
        .map(|(_, f)| f.len())
        .unwrap_or(0)
        .min(MAX_DECIMALS as usize) as u8;
    let decimals = frac_len.max(places).min(MAX_DECIMALS);
    match TokenAmount::parse_decimal(value, decimals) {
        Ok(amount) => amount.format_fixed(places),
        Err(_) => value.to_string(),
    }
}

pub(crate) fn pow10(exp: u8) -> u128 {
    10u128.pow(exp as u32)
}

/// Base units of a raw on-chain amount: `0x`-prefixed hex (as in log data) or decimal digits.
///
/// Values above `u128::MAX` are reported as [`AmountError::Overflow`].
pub fn parse_raw_units(raw: &str) -> Result<u128, AmountError> {
    let raw = raw.trim();
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AmountError::InvalidRaw(raw.to_string()));
        }
        let digits = hex.trim_start_matches('0');
        if digits.is_empty() {
            return Ok(0);
        }
        if digits.len() > 32 {
            return Err(AmountError::Overflow(raw.to_string()));
        }
        return u128::from_str_radix(digits, 16).map_err(|_| AmountError::InvalidRaw(raw.to_string()));
    }

    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(AmountError::InvalidRaw(raw.to_string()));
    }
    raw.parse::<u128>().map_err(|_| AmountError::Overflow(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_raw_units_hex_and_decimal() {
        assert_eq!(
            parse_raw_units("0x0000000000000000000000000000000000000000000000000de0b6b3a7640000").unwrap(),
            1_000_000_000_000_000_000
        );
        assert_eq!(parse_raw_units("2500000000000000000").unwrap(), 2_500_000_000_000_000_000);
        assert_eq!(parse_raw_units("0x0").unwrap(), 0);
        assert_eq!(parse_raw_units(&format!("0x{:x}", u128::MAX)).unwrap(), u128::MAX);

        assert!(parse_raw_units("0x").is_err());
        assert!(parse_raw_units("12ab").is_err());
        assert!(matches!(
            parse_raw_units("0x1ffffffffffffffffffffffffffffffff"),
            Err(AmountError::Overflow(_))
        ));
        assert!(matches!(
            parse_raw_units("340282366920938463463374607431768211456"),
            Err(AmountError::Overflow(_))
        ));
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(TokenAmount::parse_decimal("1", 18).unwrap().base_units(), 10u128.pow(18));
        assert_eq!(TokenAmount::parse_decimal("1.0", 18).unwrap().base_units(), 10u128.pow(18));
        assert_eq!(TokenAmount::parse_decimal("0.5", 18).unwrap().base_units(), 5 * 10u128.pow(17));
        assert_eq!(TokenAmount::parse_decimal(".25", 2).unwrap().base_units(), 25);
        assert_eq!(TokenAmount::parse_decimal("100.000", 0).unwrap().base_units(), 100);

        assert!(TokenAmount::parse_decimal("", 18).is_err());
        assert!(TokenAmount::parse_decimal(".", 18).is_err());
        assert!(TokenAmount::parse_decimal("-1", 18).is_err());
        assert!(TokenAmount::parse_decimal("1e5", 18).is_err());
        assert!(TokenAmount::parse_decimal("0.123", 2).is_err());
        assert!(TokenAmount::parse_decimal("1", 40).is_err());
    }

    #[test]
    fn test_threshold_boundary_is_exact() {
        let threshold = TokenAmount::parse_decimal("1.0", 18).unwrap();
        let equal = TokenAmount::from_base_units(parse_raw_units("1000000000000000000").unwrap(), 18).unwrap();
        let just_below = TokenAmount::from_base_units(parse_raw_units("999999999999999999").unwrap(), 18).unwrap();

        assert!(equal.meets(&threshold));
        assert!(!just_below.meets(&threshold));
    }

    #[test]
    fn test_meets_with_different_decimals() {
        let six = TokenAmount::parse_decimal("2", 6).unwrap();
        let eighteen = TokenAmount::parse_decimal("1.5", 18).unwrap();
        assert!(six.meets(&eighteen));
        assert!(!eighteen.meets(&six));
    }

    #[test]
    fn test_format_fixed() {
        let amount = TokenAmount::parse_decimal("2", 18).unwrap();
        assert_eq!(amount.format_fixed(4), "2.0000");

        let amount = TokenAmount::parse_decimal("1.23456", 18).unwrap();
        assert_eq!(amount.format_fixed(4), "1.2346");

        let amount = TokenAmount::parse_decimal("9.99996", 18).unwrap();
        assert_eq!(amount.format_fixed(4), "10.0000");

        let amount = TokenAmount::parse_decimal("12.5", 1).unwrap();
        assert_eq!(amount.format_fixed(4), "12.5000");

        let amount = TokenAmount::parse_decimal("7", 0).unwrap();
        assert_eq!(amount.format_fixed(2), "7.00");
    }

    #[test]
    fn test_format_decimal_str() {
        assert_eq!(format_decimal_str("2", 4), "2.0000");
        assert_eq!(format_decimal_str("1234.567891", 4), "1234.5679");
        assert_eq!(format_decimal_str("not-a-number", 4), "not-a-number");
    }
}
