//! Play-money amounts held as integer cents.

use std::fmt;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use super::error::PapertradeError;

/// A money amount in whole cents.
///
/// Both recorded trade prices and cash balances use this type, so the cash
/// change of a trade is always exactly `-share_delta * price`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Round a floating point dollar price to the nearest cent, halves away
    /// from zero.
    ///
    /// Returns `None` for NaN, infinities and values outside the cent range.
    pub fn from_dollars(dollars: f64) -> Option<Self> {
        let rounded = Decimal::from_f64_retain(dollars)?
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        Self::from_decimal(rounded)
    }

    /// Exact conversion; `None` if `amount` has sub-cent digits or does not fit.
    pub fn from_decimal(amount: Decimal) -> Option<Self> {
        if amount.scale() > 2 {
            return None;
        }
        amount
            .checked_mul(Decimal::ONE_HUNDRED)?
            .to_i64()
            .map(Money)
    }

    /// The amount in dollars with exactly two decimal places, e.g. `1250.00`.
    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    pub fn checked_mul(self, factor: i64) -> Option<Money> {
        self.0.checked_mul(factor).map(Money)
    }

    /// Parse a user or config supplied dollar amount such as `1000`, `12.5`,
    /// `$1,250.00`. At most two decimal places are accepted.
    pub fn parse(input: &str) -> Result<Money, PapertradeError> {
        let invalid = || PapertradeError::invalid_input(format!("invalid amount: {input:?}"));

        let trimmed = input.trim();
        let (negative, rest) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let rest = rest.strip_prefix('$').unwrap_or(rest);
        let mut digits: String = rest.chars().filter(|c| *c != ',').collect();

        // Decimal::from_str also takes signs and `_` separators; only plain
        // digits with one optional point get this far.
        if !digits.chars().any(|c| c.is_ascii_digit())
            || !digits.chars().all(|c| c.is_ascii_digit() || c == '.')
            || digits.matches('.').count() > 1
        {
            return Err(invalid());
        }
        if digits.starts_with('.') {
            digits.insert(0, '0');
        }
        if digits.ends_with('.') {
            digits.pop();
        }

        let amount = Decimal::from_str(&digits).map_err(|_| invalid())?;
        let money = Money::from_decimal(amount).ok_or_else(invalid)?;
        Ok(if negative { Money(-money.0) } else { money })
    }
}

impl FromStr for Money {
    type Err = PapertradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::parse(s)
    }
}

/// Formats as US dollars with thousands separators, e.g. `$1,234.56`.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let dollars = (abs / 100).to_string();
        let cents = abs % 100;

        let mut grouped = String::with_capacity(dollars.len() + dollars.len() / 3);
        for (i, ch) in dollars.chars().enumerate() {
            if i > 0 && (dollars.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }

        write!(f, "{sign}${grouped}.{cents:02}")
    }
}
