//! # aurum-core: Pure Domain Logic for Aurum Ledger
//!
//! This crate is the **heart** of Aurum Ledger. It contains the exact
//! decimal value model and the domain types shared by every storage
//! operation, with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     Aurum Ledger Architecture                       │
//! │                                                                     │
//! │  Caller (HTTP layer / jobs - out of scope)                          │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  aurum-db ── price ledger, stock ledger, orchestrator,              │
//! │       │      reconciliation, audit sink                            │
//! │       ▼                                                             │
//! │  ★ aurum-core (THIS CRATE) ★                                        │
//! │                                                                     │
//! │   ┌───────────┐  ┌───────────┐  ┌───────────┐                       │
//! │   │   units   │  │   types   │  │ validation│                       │
//! │   │  Weight   │  │  records  │  │   rules   │                       │
//! │   │  Money    │  │  enums    │  │   checks  │                       │
//! │   │  Rate     │  │  inputs   │  │           │                       │
//! │   └───────────┘  └───────────┘  └───────────┘                       │
//! │                                                                     │
//! │   NO I/O • NO DATABASE • NO FLOATS • PURE FUNCTIONS                 │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`units`] - Unit-tagged exact decimals (no floating point!)
//! - [`types`] - Domain records, enums, and operation inputs
//! - [`error`] - Domain error types
//! - [`validation`] - Business rule validation
//!
//! ## Design Principles
//!
//! 1. **Exact decimals**: all weight/money math goes through
//!    `rust_decimal`; an `f64` never appears on the math path
//! 2. **Unit tags**: `Weight`, `Money`, and `Rate` are distinct nominal
//!    types; cross-unit arithmetic does not compile
//! 3. **Explicit errors**: all errors are typed, never strings or panics

pub mod error;
pub mod types;
pub mod units;
pub mod validation;

pub use error::ValidationError;
pub use types::*;
pub use units::{Money, Rate, Weight};

use rust_decimal::Decimal;

/// Large-cash reporting threshold, in currency units.
///
/// A cash transaction whose exact-decimal total reaches this amount is
/// flagged for compliance reporting. The comparison is done in exact
/// decimal arithmetic, never through a float.
pub fn cash_report_threshold() -> Money {
    Money::from_major(20_000)
}

/// Weight discrepancy threshold for returns, in grams (0.01 g).
///
/// A returned item whose re-weighed quantity differs from the originally
/// sold quantity by more than this is recorded as an audit observation.
/// The return itself still proceeds.
pub fn weight_discrepancy_threshold() -> Weight {
    Weight::from_decimal(Decimal::new(1, 2))
}
