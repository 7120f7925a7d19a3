use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, Mul},
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

pub const CURRENCY_CODE: &str = "IDR";

//--------------------------------------       Rupiah        ---------------------------------------------------------
/// A whole-rupiah amount. The storefront only trades in IDR, so there is no currency field and no FX handling.
#[derive(Debug, Clone, Copy, Default, Type, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct Rupiah(i64);

op!(binary Rupiah, Add, add);
op!(binary Rupiah, Sub, sub);
op!(inplace Rupiah, AddAssign, add_assign);
op!(inplace Rupiah, SubAssign, sub_assign);
op!(unary Rupiah, Neg, neg);

impl Mul<i64> for Rupiah {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self::from(self.value() * rhs)
    }
}

impl Sum for Rupiah {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

impl<'a> Sum<&'a Rupiah> for Rupiah {
    fn sum<I: Iterator<Item = &'a Rupiah>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented in rupiah: {0}")]
pub struct RupiahConversionError(String);

impl From<i64> for Rupiah {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl TryFrom<u64> for Rupiah {
    type Error = RupiahConversionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        i64::try_from(value)
            .map(Self)
            .map_err(|_| RupiahConversionError(format!("Value {value} is too large to convert to Rupiah")))
    }
}

impl TryFrom<&str> for Rupiah {
    type Error = RupiahConversionError;

    /// Gateways report amounts as decimal strings ("215000.00"). Fractional rupiah are not a thing, so anything
    /// other than zeroes after the decimal point is rejected.
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let value = value.trim();
        let (whole, frac) = value.split_once('.').unwrap_or((value, ""));
        if !frac.chars().all(|c| c == '0') {
            return Err(RupiahConversionError(format!("{value} has a fractional rupiah component")));
        }
        whole.parse::<i64>().map(Self).map_err(|e| RupiahConversionError(format!("{value}: {e}")))
    }
}

impl Display for Rupiah {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let digits = self.0.unsigned_abs().to_string();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, c) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push('.');
            }
            grouped.push(c);
        }
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{sign}Rp{grouped}")
    }
}

impl Rupiah {
    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Gateways want the gross amount as a two-decimal string, and sign it that way too.
    pub fn to_gateway_string(&self) -> String {
        format!("{}.00", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(Rupiah::from(0).to_string(), "Rp0");
        assert_eq!(Rupiah::from(999).to_string(), "Rp999");
        assert_eq!(Rupiah::from(15_000).to_string(), "Rp15.000");
        assert_eq!(Rupiah::from(215_000).to_string(), "Rp215.000");
        assert_eq!(Rupiah::from(-1_250_000).to_string(), "-Rp1.250.000");
    }

    #[test]
    fn arithmetic() {
        let mut a = Rupiah::from(100_000) * 2 + Rupiah::from(15_000);
        assert_eq!(a, Rupiah::from(215_000));
        a -= Rupiah::from(15_000);
        assert_eq!(a.value(), 200_000);
        let total: Rupiah = [Rupiah::from(1), Rupiah::from(2), Rupiah::from(3)].iter().sum();
        assert_eq!(total, Rupiah::from(6));
        assert_eq!(-Rupiah::from(5), Rupiah::from(-5));
    }

    #[test]
    fn gateway_strings() {
        assert_eq!(Rupiah::try_from("215000.00").unwrap(), Rupiah::from(215_000));
        assert_eq!(Rupiah::try_from("215000").unwrap(), Rupiah::from(215_000));
        assert!(Rupiah::try_from("215000.50").is_err());
        assert!(Rupiah::try_from("lots").is_err());
        assert_eq!(Rupiah::from(215_000).to_gateway_string(), "215000.00");
    }

    #[test]
    fn serializes_as_plain_integer() {
        let json = serde_json::to_string(&Rupiah::from(300_000)).unwrap();
        assert_eq!(json, "300000");
    }
}
