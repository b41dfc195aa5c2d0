//! # Business Rule Validation
//!
//! Pure validation rules applied before any write. Every check is exact
//! decimal comparison: no epsilon tolerances.

use crate::error::{ValidationError, ValidationResult};
use crate::units::{Money, Weight};

/// A price pair must satisfy `sell >= buy`. Equal prices are allowed.
pub fn validate_price_pair(buy: Money, sell: Money) -> ValidationResult<()> {
    if sell < buy {
        return Err(ValidationError::SellBelowBuy {
            buy: buy.to_canonical_string(),
            sell: sell.to_canonical_string(),
        });
    }
    Ok(())
}

/// Production conservation: `output == input - fire`, exactly.
pub fn validate_fire_balance(
    input: Weight,
    fire: Weight,
    output: Weight,
) -> ValidationResult<()> {
    let expected = input - fire;
    if output != expected {
        return Err(ValidationError::FireImbalance {
            input: input.to_canonical_string(),
            output: output.to_canonical_string(),
            fire: fire.to_canonical_string(),
            expected: expected.to_canonical_string(),
        });
    }
    Ok(())
}

/// Quantities that move stock must be strictly positive.
pub fn validate_positive_weight(field: &'static str, value: Weight) -> ValidationResult<()> {
    if !value.is_positive() {
        return Err(ValidationError::MustBePositive { field });
    }
    Ok(())
}

/// Fire loss may be zero but never negative.
pub fn validate_non_negative_weight(field: &'static str, value: Weight) -> ValidationResult<()> {
    if value.is_negative() {
        return Err(ValidationError::MustNotBeNegative { field });
    }
    Ok(())
}

/// Amounts (labor, unit prices) must not be negative.
pub fn validate_non_negative_money(field: &'static str, value: Money) -> ValidationResult<()> {
    if value.is_negative() {
        return Err(ValidationError::MustNotBeNegative { field });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sell_below_buy_is_rejected() {
        let buy = Money::parse("100").unwrap();
        let sell = Money::parse("99").unwrap();
        assert!(matches!(
            validate_price_pair(buy, sell),
            Err(ValidationError::SellBelowBuy { .. })
        ));
    }

    #[test]
    fn equal_prices_are_allowed() {
        let p = Money::parse("100").unwrap();
        assert!(validate_price_pair(p, p).is_ok());
    }

    #[test]
    fn fire_balance_must_be_exact() {
        let input = Weight::parse("10").unwrap();
        let fire = Weight::parse("0.3").unwrap();
        let good = Weight::parse("9.7").unwrap();
        let off = Weight::parse("9.700001").unwrap();

        assert!(validate_fire_balance(input, fire, good).is_ok());
        assert!(matches!(
            validate_fire_balance(input, fire, off),
            Err(ValidationError::FireImbalance { .. })
        ));
    }

    #[test]
    fn positive_weight_rejects_zero_and_negative() {
        assert!(validate_positive_weight("quantity_g", Weight::zero()).is_err());
        assert!(validate_positive_weight("quantity_g", Weight::parse("-1").unwrap()).is_err());
        assert!(validate_positive_weight("quantity_g", Weight::parse("0.000001").unwrap()).is_ok());
    }

    #[test]
    fn non_negative_allows_zero() {
        assert!(validate_non_negative_weight("fire_quantity_g", Weight::zero()).is_ok());
        assert!(validate_non_negative_money("labor_amount", Money::zero()).is_ok());
        assert!(validate_non_negative_money("labor_amount", Money::parse("-1").unwrap()).is_err());
    }
}
