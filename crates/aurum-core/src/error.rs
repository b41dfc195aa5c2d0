//! # Domain Error Types
//!
//! Validation errors raised by the pure domain layer.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          Error Types                                │
//! │                                                                     │
//! │  aurum-core errors (this file)                                      │
//! │  └── ValidationError  - malformed or rule-violating input           │
//! │                                                                     │
//! │  aurum-db errors (separate crate)                                   │
//! │  └── LedgerError      - NotFound / Conflict / Storage, and wraps    │
//! │                         ValidationError                             │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (values, ids)
//! 3. Errors are enum variants, never bare strings

use thiserror::Error;

/// Input validation failures.
///
/// Always recoverable: reported to the caller, never committed, never a
/// partial write.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Value cannot be parsed as an exact decimal.
    #[error("invalid {kind} value: {value:?} is not an exact decimal")]
    InvalidDecimal { kind: &'static str, value: String },

    /// A stored or supplied enum label is not recognized.
    #[error("unknown {kind} value: {value:?}")]
    UnknownValue { kind: &'static str, value: String },

    /// Sell price below buy price on a price record.
    #[error("sell price {sell} must be >= buy price {buy}")]
    SellBelowBuy { buy: String, sell: String },

    /// Production output does not equal input minus fire loss.
    #[error("output quantity {output} must equal input {input} - fire {fire} (expected {expected})")]
    FireImbalance {
        input: String,
        output: String,
        fire: String,
        expected: String,
    },

    /// Weight correction with no change: a no-op is rejected, not
    /// silently accepted.
    #[error("weight correction for item {item_id} has zero delta")]
    ZeroDelta { item_id: String },

    /// Quantity or amount must be strictly positive.
    #[error("{field} must be positive")]
    MustBePositive { field: &'static str },

    /// Quantity or amount must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: &'static str },
}

/// Convenience type alias for Results with ValidationError.
pub type ValidationResult<T> = Result<T, ValidationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_carry_context() {
        let err = ValidationError::SellBelowBuy {
            buy: "100.0000".to_string(),
            sell: "99.0000".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "sell price 99.0000 must be >= buy price 100.0000"
        );

        let err = ValidationError::MustBePositive { field: "quantity_g" };
        assert_eq!(err.to_string(), "quantity_g must be positive");
    }
}
