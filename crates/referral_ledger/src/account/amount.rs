//! Fixed-point monetary amounts (6 decimal places).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const DECIMALS: u32 = 6;
const BPS_DENOMINATOR: u128 = 10_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("not a non-negative decimal amount: {0}")]
    Malformed(String),
    #[error("more than 6 decimal places: {0}")]
    TooPrecise(String),
    #[error("amount out of range: {0}")]
    OutOfRange(String),
    #[error("amount overflow")]
    Overflow,
}

/// Non-negative amount stored as integer micro-units.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);
    /// Micro-units per whole unit.
    pub const SCALE: u64 = 10u64.pow(DECIMALS);

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub fn from_units(units: u64) -> Result<Self, AmountError> {
        units
            .checked_mul(Self::SCALE)
            .map(Self)
            .ok_or(AmountError::Overflow)
    }

    pub const fn micros(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Result<Amount, AmountError> {
        self.0
            .checked_add(other.0)
            .map(Amount)
            .ok_or(AmountError::Overflow)
    }

    /// `self * bps / 10000`, rounded down to the micro-unit.
    pub fn apply_bps(self, bps: u32) -> Amount {
        let scaled = self.0 as u128 * bps as u128 / BPS_DENOMINATOR;
        // bps are validated <= 10000 so the product never exceeds self.
        Amount(u64::try_from(scaled).unwrap_or(u64::MAX))
    }

    /// Number of whole `unit`s contained in this amount.
    pub fn units_of(self, unit: Amount) -> u64 {
        if unit.is_zero() {
            return 0;
        }
        self.0 / unit.0
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    /// Format with exactly `places` decimals, rounding half up.
    pub fn format_fixed(self, places: u32) -> String {
        let places = places.min(DECIMALS);
        let divisor = 10u128.pow(DECIMALS - places);
        let rounded = (self.0 as u128 + divisor / 2) / divisor;
        if places == 0 {
            return rounded.to_string();
        }
        let frac_base = 10u128.pow(places);
        format!(
            "{}.{:0width$}",
            rounded / frac_base,
            rounded % frac_base,
            width = places as usize
        )
    }

    /// Parse a decimal string such as `"100"`, `"0.25"` or `"12.000001"`.
    pub fn parse(raw: &str) -> Result<Self, AmountError> {
        let s = raw.trim();
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && frac.is_empty()) || !all_digits(whole) || !all_digits(frac) {
            return Err(AmountError::Malformed(raw.to_string()));
        }
        if frac.len() > DECIMALS as usize {
            return Err(AmountError::TooPrecise(raw.to_string()));
        }
        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| AmountError::OutOfRange(raw.to_string()))?
        };
        let frac_micros: u64 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", frac, width = DECIMALS as usize);
            padded
                .parse()
                .map_err(|_| AmountError::Malformed(raw.to_string()))?
        };
        whole
            .checked_mul(Self::SCALE)
            .and_then(|m| m.checked_add(frac_micros))
            .map(Self)
            .ok_or_else(|| AmountError::OutOfRange(raw.to_string()))
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_fixed(DECIMALS))
    }
}

/// A decimal amount as written in JSON: a string or a number.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Text(String),
    Number(serde_json::Number),
}

impl AmountInput {
    pub fn to_amount(&self) -> Result<Amount, AmountError> {
        match self {
            AmountInput::Text(s) => Amount::parse(s),
            AmountInput::Number(n) => Amount::parse(&n.to_string()),
        }
    }
}

/// `#[serde(with = "decimal")]` for amounts written as decimals (`1.0`, `"0.5"`)
/// instead of raw micro-units.
pub mod decimal {
    use super::{Amount, AmountInput};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(amount: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(amount)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        AmountInput::deserialize(deserializer)?
            .to_amount()
            .map_err(serde::de::Error::custom)
    }
}
