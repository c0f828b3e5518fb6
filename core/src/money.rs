//! Monetary amounts.
//!
//! Amounts are held as integer cents. On the wire they travel as JSON numbers
//! in dollars (`20.0`, `99.99`), so serde goes through `f64` and rounds to the
//! nearest cent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;

/// Represents money in cents to avoid floating-point arithmetic errors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates a `Money` value from a dollar amount, rounded to the nearest cent.
    ///
    /// Returns `None` for negative, non-finite or out-of-range amounts.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn from_dollars(dollars: f64) -> Option<Self> {
        if !dollars.is_finite() || dollars < 0.0 {
            return None;
        }
        let cents = (dollars * 100.0).round();
        if cents > u64::MAX as f64 {
            return None;
        }
        Some(Self(cents as u64))
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Returns the amount in dollars
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_dollars(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts, saturating at the maximum
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Multiplies money by a quantity, saturating at the maximum
    #[must_use]
    pub const fn saturating_multiply(self, quantity: u32) -> Self {
        Self(self.0.saturating_mul(quantity as u64))
    }
}

impl TryFrom<f64> for Money {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::from_dollars(value).ok_or_else(|| format!("invalid monetary amount: {value}"))
    }
}

impl From<Money> for f64 {
    fn from(value: Money) -> Self {
        value.as_dollars()
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Self::saturating_add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_dollars_to_nearest_cent() {
        assert_eq!(Money::from_dollars(99.99), Some(Money::from_cents(9999)));
        assert_eq!(Money::from_dollars(0.1 + 0.2), Some(Money::from_cents(30)));
        assert_eq!(Money::from_dollars(-1.0), None);
        assert_eq!(Money::from_dollars(f64::NAN), None);
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Test code
    fn travels_as_dollars_on_the_wire() {
        let money = Money::from_cents(2000);
        assert_eq!(serde_json::to_string(&money).unwrap(), "20.0");

        let parsed: Money = serde_json::from_str("10").unwrap();
        assert_eq!(parsed, Money::from_cents(1000));

        assert!(serde_json::from_str::<Money>("-3.5").is_err());
    }

    #[test]
    fn sums_and_multiplies() {
        let total: Money = [Money::from_cents(150), Money::from_cents(250)]
            .into_iter()
            .sum();
        assert_eq!(total, Money::from_cents(400));
        assert_eq!(Money::from_cents(1000).saturating_multiply(2), Money::from_cents(2000));
        assert_eq!(total.to_string(), "$4.00");
    }
}
