// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Exact decimal money amounts.
//!
//! [`Money`] wraps a [`Decimal`] and is the only type used for balances and
//! amounts. Text is the canonical representation for storage and the wire:
//! serde writes a string and only accepts a string, so a JSON float can never
//! sneak in.
//!
//! # Example
//!
//! ```
//! use wallet_ledger::Money;
//!
//! let balance: Money = "100.00".parse().unwrap();
//! let amount: Money = "30.00".parse().unwrap();
//! assert_eq!((balance - amount).to_string(), "70.00");
//! assert!("1e3".parse::<Money>().is_err());
//! ```

use crate::error::LedgerError;
use rust_decimal::Decimal;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

/// An exact decimal amount of money.
///
/// Arithmetic is exact. The `+` and `-` operators panic on overflow like
/// [`Decimal`]; ledger code uses [`Money::checked_add`] and
/// [`Money::checked_sub`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(Decimal);

impl Money {
    /// Maximum number of fractional digits accepted when parsing.
    pub const MAX_SCALE: u32 = 4;

    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Builds an amount from an integer mantissa and a scale, e.g.
    /// `Money::new(12_345, 2)` is `123.45`.
    pub fn new(mantissa: i64, scale: u32) -> Self {
        Money(Decimal::new(mantissa, scale))
    }

    pub fn from_decimal(value: Decimal) -> Self {
        Money(value)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Returns `true` for amounts strictly greater than zero.
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Returns `true` for amounts strictly less than zero.
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }
}

/// Checks the textual shape `-?digits(.digits)?` without allocating.
fn is_plain_decimal(text: &str) -> bool {
    let unsigned = text.strip_prefix('-').unwrap_or(text);
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (unsigned, None),
    };

    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    match frac_part {
        Some(frac) => !frac.is_empty() && frac.bytes().all(|b| b.is_ascii_digit()),
        None => true,
    }
}

impl FromStr for Money {
    type Err = LedgerError;

    /// Parses untrusted text into an exact amount.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidAmount`] when the text is not a plain
    /// decimal, carries more than [`Money::MAX_SCALE`] fractional digits, or
    /// does not fit a [`Decimal`].
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        if !is_plain_decimal(text) {
            return Err(LedgerError::InvalidAmount(format!(
                "{text:?} is not a decimal number"
            )));
        }

        let value = Decimal::from_str_exact(text)
            .map_err(|e| LedgerError::InvalidAmount(format!("{text:?}: {e}")))?;
        if value.scale() > Money::MAX_SCALE {
            return Err(LedgerError::InvalidAmount(format!(
                "{text:?} has more than {} decimal places",
                Money::MAX_SCALE
            )));
        }
        Ok(Money(value))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// # Panics
///
/// On overflow. Use [`Money::checked_add`] for sums of stored balances.
impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

/// # Panics
///
/// On overflow. Use [`Money::checked_sub`] for stored balances.
impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Money(value)
    }
}

/// Serialized as a string with its scale kept, e.g. `"123.4500"`.
impl Serialize for Money {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        Serialize::serialize(&self.0, serializer)
    }
}

/// Deserialized only from strings, through [`Money::from_str`], so the
/// [`Money::MAX_SCALE`] limit applies to every decoded amount.
impl<'de> Deserialize<'de> for Money {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct MoneyVisitor;

        impl Visitor<'_> for MoneyVisitor {
            type Value = Money;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal amount encoded as a string")
            }

            fn visit_str<E>(self, value: &str) -> Result<Money, E>
            where
                E: de::Error,
            {
                value.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_str(MoneyVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn money(text: &str) -> Money {
        text.parse().unwrap()
    }

    #[test]
    fn parses_plain_decimals() {
        assert_eq!(money("100.00").as_decimal(), dec!(100.00));
        assert_eq!(money("0.0001").as_decimal(), dec!(0.0001));
        assert_eq!(money(" 42 ").as_decimal(), dec!(42));
        assert_eq!(money("-5.00").as_decimal(), dec!(-5.00));
    }

    #[test]
    fn rejects_malformed_text() {
        for text in ["", "-", "abc", "1e3", "1_000", "1.", ".5", "+5", "1.2.3", "0x10", "NaN"] {
            let result = text.parse::<Money>();
            assert!(
                matches!(result, Err(LedgerError::InvalidAmount(_))),
                "{text:?} should be rejected, got {result:?}"
            );
        }
    }

    #[test]
    fn rejects_excess_scale_instead_of_rounding() {
        assert!(matches!(
            "1.23456".parse::<Money>(),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert_eq!(money("1.2345").as_decimal(), dec!(1.2345));
    }

    #[test]
    fn display_keeps_scale() {
        assert_eq!(money("70.00").to_string(), "70.00");
        assert_eq!((money("100.00") - money("30.00")).to_string(), "70.00");
        assert_eq!((money("10.5") + money("0.25")).to_string(), "10.75");
    }

    #[test]
    fn equality_ignores_trailing_zeros() {
        assert_eq!(money("70.00"), money("70"));
        assert!(money("0.10") < money("0.2"));
    }

    #[test]
    fn sign_helpers() {
        assert!(money("0.0001").is_positive());
        assert!(!Money::ZERO.is_positive());
        assert!(!Money::ZERO.is_negative());
        assert!(money("-1").is_negative());
    }

    #[test]
    fn checked_arithmetic_reports_overflow() {
        let max = Money::from_decimal(Decimal::MAX);
        assert_eq!(max.checked_add(money("1")), None);
        assert_eq!(money("1").checked_sub(money("3")), Some(money("-2")));
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&money("123.4500")).unwrap();
        assert_eq!(json, "\"123.4500\"");
    }

    #[test]
    fn deserializes_only_from_string() {
        let parsed: Money = serde_json::from_str("\"19.99\"").unwrap();
        assert_eq!(parsed, money("19.99"));

        assert!(serde_json::from_str::<Money>("19.99").is_err());
        assert!(serde_json::from_str::<Money>("\"19.99x\"").is_err());
        assert!(serde_json::from_str::<Money>("\"1.23456\"").is_err());
    }
}
