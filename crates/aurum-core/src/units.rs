//! # Unit-Tagged Exact Decimals
//!
//! Provides the `Weight`, `Money`, and `Rate` types used for every
//! quantity in the ledger.
//!
//! ## Why Unit Tags?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  THE UNIT MIX-UP PROBLEM                                            │
//! │                                                                     │
//! │  With bare decimals:                                                │
//! │    grams + lira = nonsense that compiles  ❌                        │
//! │                                                                     │
//! │  With unit tags:                                                    │
//! │    Weight + Weight = Weight               ✓                         │
//! │    Weight × Money (per gram) = Money      ✓                         │
//! │    Weight × Rate (percent) = Weight       ✓                         │
//! │    Weight + Money = DOES NOT COMPILE      ✓                         │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Why Exact Decimals?
//! All three types wrap `rust_decimal::Decimal`. Native floats never
//! touch metal or money math: `0.1 + 0.2` is exactly `0.3` here, and a
//! running stock balance reconstructed from thousands of entries matches
//! the signed sum to the last fractional digit.
//!
//! ## Canonical Scales
//! - `Weight`: 6 fractional digits (grams)
//! - `Money`: 4 fractional digits internally, 2 for display
//! - `Rate`: 4 fractional digits (a percentage, e.g. `1.5` = 1.5%)
//!
//! Rounding, where explicitly requested, is round-half-up at the
//! canonical scale.

use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Canonical fractional digits for weights (grams).
pub const WEIGHT_SCALE: u32 = 6;

/// Canonical fractional digits for money amounts (internal).
pub const MONEY_SCALE: u32 = 4;

/// Fractional digits for money display.
pub const MONEY_DISPLAY_SCALE: u32 = 2;

/// Canonical fractional digits for rates (percentages).
pub const RATE_SCALE: u32 = 4;

/// Fixed-scale canonical string: round-half-up, then pad to `scale`.
fn canonical(value: Decimal, scale: u32) -> String {
    let mut rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(scale);
    rounded.to_string()
}

fn parse_decimal(kind: &'static str, value: &str) -> Result<Decimal, ValidationError> {
    value
        .trim()
        .parse::<Decimal>()
        .map_err(|_| ValidationError::InvalidDecimal {
            kind,
            value: value.to_string(),
        })
}

// =============================================================================
// Weight
// =============================================================================

/// A metal weight in grams, canonical scale 6.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Weight(Decimal);

impl Weight {
    /// Parses a weight from a decimal string.
    ///
    /// Fails with [`ValidationError::InvalidDecimal`] when the input is
    /// not an exact decimal.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        parse_decimal("weight", value).map(Weight)
    }

    /// Creates a weight from a whole number of grams.
    pub fn from_grams(grams: i64) -> Self {
        Weight(Decimal::from(grams))
    }

    /// Wraps a raw decimal. The only crossing point from untyped math.
    pub fn from_decimal(value: Decimal) -> Self {
        Weight(value)
    }

    /// Zero grams.
    pub fn zero() -> Self {
        Weight(Decimal::ZERO)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Absolute value.
    pub fn abs(&self) -> Self {
        Weight(self.0.abs())
    }

    /// Explicit round-half-up at the canonical scale.
    pub fn rounded(&self) -> Self {
        Weight(
            self.0
                .round_dp_with_strategy(WEIGHT_SCALE, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Fixed-scale string for persistence, e.g. `"9.700000"`.
    pub fn to_canonical_string(&self) -> String {
        canonical(self.0, WEIGHT_SCALE)
    }
}

impl Add for Weight {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Weight(self.0 + other.0)
    }
}

impl AddAssign for Weight {
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Weight {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Weight(self.0 - other.0)
    }
}

impl SubAssign for Weight {
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Weight {
    type Output = Self;

    fn neg(self) -> Self {
        Weight(-self.0)
    }
}

/// Weight × price-per-gram = amount.
impl Mul<Money> for Weight {
    type Output = Money;

    fn mul(self, price_per_gram: Money) -> Money {
        Money(self.0 * price_per_gram.0)
    }
}

/// Weight × percentage = weight (e.g. a 0.5% manufacturing loss).
impl Mul<Rate> for Weight {
    type Output = Weight;

    fn mul(self, rate: Rate) -> Weight {
        Weight(self.0 * rate.0 / Decimal::ONE_HUNDRED)
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical_string())
    }
}

impl FromStr for Weight {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Weight::parse(s)
    }
}

// =============================================================================
// Money
// =============================================================================

/// A currency amount, canonical scale 4 (2 for display).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Parses an amount from a decimal string.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        parse_decimal("money", value).map(Money)
    }

    /// Creates an amount from a whole number of currency units.
    pub fn from_major(units: i64) -> Self {
        Money(Decimal::from(units))
    }

    /// Wraps a raw decimal. The only crossing point from untyped math.
    pub fn from_decimal(value: Decimal) -> Self {
        Money(value)
    }

    /// Zero amount.
    pub fn zero() -> Self {
        Money(Decimal::ZERO)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Absolute value.
    pub fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Explicit round-half-up at the canonical scale.
    pub fn rounded(&self) -> Self {
        Money(
            self.0
                .round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Fixed-scale string for persistence, e.g. `"1250.0000"`.
    pub fn to_canonical_string(&self) -> String {
        canonical(self.0, MONEY_SCALE)
    }

    /// Two-digit string for display, e.g. `"1250.00"`.
    pub fn to_display_string(&self) -> String {
        canonical(self.0, MONEY_DISPLAY_SCALE)
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical_string())
    }
}

impl FromStr for Money {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::parse(s)
    }
}

// =============================================================================
// Rate
// =============================================================================

/// A percentage, canonical scale 4. `Rate` of `1.5` means 1.5%.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Rate(Decimal);

impl Rate {
    /// Parses a rate from a decimal string.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        parse_decimal("rate", value).map(Rate)
    }

    /// Creates a rate from a whole-number percentage.
    pub fn from_percent(percent: i64) -> Self {
        Rate(Decimal::from(percent))
    }

    /// Zero percent.
    pub fn zero() -> Self {
        Rate(Decimal::ZERO)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Fixed-scale string for persistence, e.g. `"0.5000"`.
    pub fn to_canonical_string(&self) -> String {
        canonical(self.0, RATE_SCALE)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical_string())
    }
}

impl FromStr for Rate {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rate::parse(s)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_canonical_string() {
        let w = Weight::parse("9.7").unwrap();
        assert_eq!(w.to_canonical_string(), "9.700000");

        let m = Money::parse("1250").unwrap();
        assert_eq!(m.to_canonical_string(), "1250.0000");
        assert_eq!(m.to_display_string(), "1250.00");

        let r = Rate::parse("0.5").unwrap();
        assert_eq!(r.to_canonical_string(), "0.5000");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            Weight::parse("9.7g"),
            Err(ValidationError::InvalidDecimal { .. })
        ));
        assert!(Money::parse("").is_err());
        assert!(Rate::parse("half").is_err());
    }

    #[test]
    fn same_unit_arithmetic() {
        let a = Weight::parse("10.000000").unwrap();
        let b = Weight::parse("0.300000").unwrap();
        assert_eq!((a - b).to_canonical_string(), "9.700000");
        assert_eq!((a + b).to_canonical_string(), "10.300000");
        assert_eq!((-b).to_canonical_string(), "-0.300000");
        assert_eq!((a - b - a).abs().to_canonical_string(), "0.300000");
    }

    #[test]
    fn exactness_survives_accumulation() {
        // 0.1 added ten times is exactly 1, the float trap this type exists
        // to avoid.
        let step = Weight::parse("0.1").unwrap();
        let mut total = Weight::zero();
        for _ in 0..10 {
            total += step;
        }
        assert_eq!(total, Weight::from_grams(1));
    }

    #[test]
    fn weight_times_price_is_money() {
        let weight = Weight::parse("2.500000").unwrap();
        let price = Money::parse("1000.0000").unwrap();
        let total: Money = weight * price;
        assert_eq!(total.to_canonical_string(), "2500.0000");
    }

    #[test]
    fn weight_times_rate_is_weight() {
        // 0.5% of 100 g = 0.5 g
        let weight = Weight::from_grams(100);
        let rate = Rate::parse("0.5").unwrap();
        let loss: Weight = weight * rate;
        assert_eq!(loss.to_canonical_string(), "0.500000");
    }

    #[test]
    fn round_half_up() {
        // 0.0000005 at scale 6 rounds up to 0.000001
        let w = Weight::parse("0.0000005").unwrap();
        assert_eq!(w.rounded().to_canonical_string(), "0.000001");

        let m = Money::parse("19.99995").unwrap();
        assert_eq!(m.rounded().to_canonical_string(), "20.0000");
    }

    #[test]
    fn comparison_ignores_trailing_zeros() {
        assert_eq!(Weight::parse("1.5").unwrap(), Weight::parse("1.500000").unwrap());
        assert!(Money::parse("100.0001").unwrap() > Money::from_major(100));
    }
}
