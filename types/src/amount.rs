//! Credit amount type.
//!
//! Amounts are signed fixed-point integers (i128) with 18 decimal places,
//! so wei-scale values fit without floating-point error. Debits are
//! negative additions.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Neg;

use crate::TypeError;

/// Number of decimal places in one whole credit unit.
pub const UNIT_DECIMALS: u32 = 18;

const UNIT: i128 = 10i128.pow(UNIT_DECIMALS);

/// A signed credit amount in raw (10^-18) units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i128);

impl Amount {
    pub const ZERO: Self = Self(0);

    pub fn from_raw(raw: i128) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> i128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn checked_mul(self, factor: i128) -> Option<Self> {
        self.0.checked_mul(factor).map(Self)
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Parse a decimal string in whole units, e.g. `"0.005"` → 5×10^15 raw.
    ///
    /// Accepts an optional leading `-` and at most [`UNIT_DECIMALS`]
    /// fractional digits.
    pub fn parse_units(s: &str) -> Result<Self, TypeError> {
        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(TypeError::InvalidAmount(s.to_string()));
        }
        if frac_part.len() > UNIT_DECIMALS as usize {
            return Err(TypeError::InvalidAmount(format!(
                "{s}: more than {UNIT_DECIMALS} decimal places"
            )));
        }
        let parse_digits = |d: &str| -> Result<i128, TypeError> {
            if d.is_empty() {
                return Ok(0);
            }
            if !d.bytes().all(|b| b.is_ascii_digit()) {
                return Err(TypeError::InvalidAmount(s.to_string()));
            }
            d.parse().map_err(|_| TypeError::InvalidAmount(s.to_string()))
        };
        let whole = parse_digits(int_part)?;
        let mut frac = parse_digits(frac_part)?;
        for _ in frac_part.len()..UNIT_DECIMALS as usize {
            frac *= 10;
        }
        let raw = whole
            .checked_mul(UNIT)
            .and_then(|w| w.checked_add(frac))
            .ok_or_else(|| TypeError::InvalidAmount(s.to_string()))?;
        Ok(Self(if negative { -raw } else { raw }))
    }
}

impl Neg for Amount {
    type Output = Self;
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Raw i128 exceeds the interoperable JSON number range, so amounts cross
// every serde boundary as decimal strings.
impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<i128>()
            .map(Self)
            .map_err(|_| serde::de::Error::custom(format!("invalid amount: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_whole_units() {
        assert_eq!(Amount::parse_units("1").expect("parse"), Amount::from_raw(UNIT));
        assert_eq!(Amount::parse_units("0").expect("parse"), Amount::ZERO);
    }

    #[test]
    fn parse_fractional_units() {
        assert_eq!(
            Amount::parse_units("0.005").expect("parse"),
            Amount::from_raw(5_000_000_000_000_000)
        );
        assert_eq!(
            Amount::parse_units("0.0025").expect("parse"),
            Amount::from_raw(2_500_000_000_000_000)
        );
    }

    #[test]
    fn parse_negative() {
        assert_eq!(
            Amount::parse_units("-0.5").expect("parse"),
            Amount::from_raw(-UNIT / 2)
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Amount::parse_units("").is_err());
        assert!(Amount::parse_units(".").is_err());
        assert!(Amount::parse_units("1.2.3").is_err());
        assert!(Amount::parse_units("abc").is_err());
        // 19 decimal places
        assert!(Amount::parse_units("0.0000000000000000001").is_err());
    }

    #[test]
    fn serde_round_trips_as_string() {
        let amount = Amount::from_raw(-1_000_000_000_000_000_000);
        let json = serde_json::to_string(&amount).expect("serialize");
        assert_eq!(json, "\"-1000000000000000000\"");
        let back: Amount = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, amount);
    }

    #[test]
    fn checked_arithmetic() {
        let a = Amount::from_raw(10);
        assert_eq!(a.checked_add(Amount::from_raw(5)), Some(Amount::from_raw(15)));
        assert_eq!(a.checked_sub(Amount::from_raw(25)), Some(Amount::from_raw(-15)));
        assert_eq!(a.checked_mul(3), Some(Amount::from_raw(30)));
        assert_eq!(Amount::from_raw(i128::MAX).checked_add(a), None);
    }
}
