use serde::de::Error as SerdeError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::iter::Sum;
use std::str::FromStr;

use crate::config::COIN_PRECISION;
use crate::serializer::{Reader, ReaderError, Serializer, Writer};

// Monetary amount in base units. 128 bits gives enough headroom for payout
// arithmetic (price * size * duration) without overflow in practice, but all
// arithmetic is still checked and surfaces `None` on overflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Currency(u128);

impl Currency {
    pub const ZERO: Currency = Currency(0);

    pub const fn new(value: u128) -> Self {
        Currency(value)
    }

    // whole coins -> base units
    pub const fn from_coins(coins: u64) -> Self {
        Currency(coins as u128 * COIN_PRECISION)
    }

    pub const fn value(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(&self, other: Currency) -> Option<Currency> {
        self.0.checked_add(other.0).map(Currency)
    }

    pub fn checked_sub(&self, other: Currency) -> Option<Currency> {
        self.0.checked_sub(other.0).map(Currency)
    }

    pub fn checked_mul_u64(&self, factor: u64) -> Option<Currency> {
        self.0.checked_mul(factor as u128).map(Currency)
    }

    pub fn checked_div_u64(&self, divisor: u64) -> Option<Currency> {
        if divisor == 0 {
            return None;
        }
        Some(Currency(self.0 / divisor as u128))
    }

    pub fn saturating_sub(&self, other: Currency) -> Currency {
        Currency(self.0.saturating_sub(other.0))
    }
}

impl Sum for Currency {
    // saturates instead of panicking; balance arithmetic that must detect
    // overflow uses checked_add explicitly
    fn sum<I: Iterator<Item = Currency>>(iter: I) -> Currency {
        iter.fold(Currency::ZERO, |acc, c| {
            Currency(acc.0.saturating_add(c.0))
        })
    }
}

impl Display for Currency {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Currency {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u128>()
            .map(Currency)
            .map_err(|_| "Invalid currency value")
    }
}

impl Serializer for Currency {
    fn write(&self, writer: &mut Writer) {
        writer.write_u128(self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Currency(reader.read_u128()?))
    }

    fn size(&self) -> usize {
        16
    }
}

// JSON carries amounts as decimal strings so clients never hit 64-bit
// number limits
impl Serialize for Currency {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'a> Deserialize<'a> for Currency {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(SerdeError::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_arithmetic() {
        let a = Currency::new(100);
        let b = Currency::new(42);
        assert_eq!(a.checked_add(b), Some(Currency::new(142)));
        assert_eq!(a.checked_sub(b), Some(Currency::new(58)));
        assert_eq!(b.checked_sub(a), None);
        assert_eq!(Currency::new(u128::MAX).checked_add(Currency::new(1)), None);
    }

    #[test]
    fn test_json_round_trip() {
        let c = Currency::from_coins(10_000);
        let json = serde_json::to_string(&c).unwrap();
        let back: Currency = serde_json::from_str(&json).unwrap();
        assert_eq!(c, back);
    }
}
