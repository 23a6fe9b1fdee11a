//! Metric-tonne quantities backed by rust_decimal.
//!
//! Contract tonnage is summed across many contracts and compared for
//! staleness hashing, so it stays exact instead of going through f64.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal as RustDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::str::FromStr;

/// Exact quantity in metric tonnes.
///
/// Serializes to a JSON number.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Tonnes(#[serde(with = "rust_decimal::serde::float")] RustDecimal);

impl Tonnes {
    pub fn new(value: RustDecimal) -> Self {
        Tonnes(value)
    }

    /// Parse tonnage from a string losslessly.
    pub fn parse(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s.trim()).map(Tonnes)
    }

    /// Canonical text form: trailing zeros removed, never exponent notation.
    ///
    /// Used for storage and for content hashing, so `1500.0` and `1500`
    /// produce the same text.
    pub fn to_canonical_string(&self) -> String {
        format!("{}", self.0.normalize())
    }

    pub fn zero() -> Self {
        Tonnes(RustDecimal::ZERO)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.0.is_sign_negative()
    }

    /// Clamp negative quantities to zero.
    pub fn non_negative(self) -> Self {
        if self.is_negative() {
            Tonnes::zero()
        } else {
            self
        }
    }

    /// Lossy conversion for handing constraint bounds to the solver.
    pub fn to_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }
}

impl fmt::Display for Tonnes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Tonnes {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<i64> for Tonnes {
    fn from(value: i64) -> Self {
        Tonnes(RustDecimal::from(value))
    }
}

impl std::ops::Add for Tonnes {
    type Output = Tonnes;

    fn add(self, rhs: Tonnes) -> Tonnes {
        Tonnes(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for Tonnes {
    fn add_assign(&mut self, rhs: Tonnes) {
        self.0 += rhs.0;
    }
}

impl std::ops::Sub for Tonnes {
    type Output = Tonnes;

    fn sub(self, rhs: Tonnes) -> Tonnes {
        Tonnes(self.0 - rhs.0)
    }
}

impl Sum for Tonnes {
    fn sum<I: Iterator<Item = Tonnes>>(iter: I) -> Self {
        iter.fold(Tonnes::zero(), |acc, t| acc + t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_string_drops_trailing_zeros() {
        let t = Tonnes::parse("1500.000").unwrap();
        assert_eq!(t.to_canonical_string(), "1500");
        assert_eq!(Tonnes::parse("0.50").unwrap().to_canonical_string(), "0.5");
    }

    #[test]
    fn test_non_negative_clamps() {
        let over_delivered = Tonnes::from(100) - Tonnes::from(120);
        assert!(over_delivered.is_negative());
        assert_eq!(over_delivered.non_negative(), Tonnes::zero());
    }

    #[test]
    fn test_sum_and_json() {
        let total: Tonnes = ["10.5", "2.5", "7"]
            .iter()
            .map(|s| Tonnes::parse(s).unwrap())
            .sum();
        assert_eq!(total.to_string(), "20");
        let json = serde_json::to_value(total).unwrap();
        assert!(json.is_number());
    }
}
