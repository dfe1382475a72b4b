use serde::{Deserialize, Serialize};

/// Money amount represented in cents to avoid floating point issues.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Money {
    /// Amount in cents (e.g., 1000 = 10.00)
    cents: i64,
}

impl Money {
    /// Creates a new Money amount from cents.
    pub const fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Creates a Money amount from a whole-unit value.
    pub const fn from_units(units: i64) -> Self {
        Self { cents: units * 100 }
    }

    /// Returns zero money.
    pub const fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.cents == 0
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.cents < 0
    }

    /// Multiplies by a quantity.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money {
            cents: self.cents * i64::from(quantity),
        }
    }

    /// Clamps negative amounts to zero.
    pub fn non_negative(self) -> Money {
        Money {
            cents: self.cents.max(0),
        }
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money {
            cents: self.cents + rhs.cents,
        }
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money {
            cents: self.cents - rhs.cents,
        }
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.cents += rhs.cents;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_display() {
        assert_eq!(Money::from_cents(150000).to_string(), "1500.00");
        assert_eq!(Money::from_cents(6005).to_string(), "60.05");
        assert_eq!(Money::from_cents(-250).to_string(), "-2.50");
    }

    #[test]
    fn test_money_arithmetic() {
        let a = Money::from_units(10);
        let b = Money::from_cents(250);
        assert_eq!((a + b).cents(), 1250);
        assert_eq!((a - b).cents(), 750);
        assert_eq!(b.multiply(3).cents(), 750);
    }

    #[test]
    fn test_non_negative_clamps() {
        assert_eq!((Money::from_cents(100) - Money::from_cents(300)).non_negative(), Money::zero());
        assert_eq!(Money::from_cents(5).non_negative().cents(), 5);
    }

    #[test]
    fn test_sum() {
        let total: Money = [100, 200, 300].into_iter().map(Money::from_cents).sum();
        assert_eq!(total.cents(), 600);
    }
}
