//! Human-readable currency amount parsing.
//!
//! [`MoneyAmount`] turns whatever the checkout front-end sent as an amount into a
//! positive decimal, and renders it the way the gateway expects it: a plain number
//! with exactly two decimal places.
//!
//! # Supported Formats
//!
//! - Plain numbers: `"100"`, `"0.5"`
//! - With currency symbols: `"R10.50"`, `"$20"`
//! - With thousand separators: `"1,000"`, `"1 000.50"`
//!
//! ```rust
//! use payfast_rs::money::MoneyAmount;
//!
//! let amount = MoneyAmount::parse("R1,250.5").unwrap();
//! assert_eq!(amount.to_gateway_string(), "1250.50");
//! ```

use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::LazyLock;

/// A parsed, positive monetary amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MoneyAmount(Decimal);

/// Errors that can occur when parsing a monetary amount.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MoneyAmountParseError {
    /// The input string could not be parsed as a number.
    #[error("Invalid number format")]
    InvalidFormat,
    /// The value is outside the allowed range.
    #[error(
        "Amount must be between {} and {}",
        constants::MIN_STR,
        constants::MAX_STR
    )]
    OutOfRange,
    /// Negative values are not allowed.
    #[error("Negative value is not allowed")]
    Negative,
}

mod constants {
    use super::*;

    pub const MIN_STR: &str = "0.01";
    pub const MAX_STR: &str = "999999999";

    pub static MIN: LazyLock<Decimal> =
        LazyLock::new(|| Decimal::from_str(MIN_STR).expect("valid decimal"));
    pub static MAX: LazyLock<Decimal> =
        LazyLock::new(|| Decimal::from_str(MAX_STR).expect("valid decimal"));
    pub static NOISE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^\d\.\-]+").expect("valid regex"));
}

impl MoneyAmount {
    /// Parses a human-readable currency string.
    ///
    /// Currency symbols, thousand separators and whitespace are stripped before
    /// parsing. The result must be positive and within the allowed range.
    pub fn parse(input: &str) -> Result<Self, MoneyAmountParseError> {
        let cleaned = constants::NOISE.replace_all(input, "");
        let parsed =
            Decimal::from_str(&cleaned).map_err(|_| MoneyAmountParseError::InvalidFormat)?;
        Self::try_from(parsed)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Renders the amount with exactly two decimals, rounding half away from zero.
    pub fn to_gateway_string(&self) -> String {
        let mut rounded = self
            .0
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        rounded.rescale(2);
        rounded.to_string()
    }
}

impl TryFrom<Decimal> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(MoneyAmountParseError::Negative);
        }
        if value < *constants::MIN || value > *constants::MAX {
            return Err(MoneyAmountParseError::OutOfRange);
        }
        Ok(MoneyAmount(value))
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoneyAmount::parse(s)
    }
}

impl TryFrom<&str> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        MoneyAmount::from_str(value)
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_gateway_string())
    }
}
