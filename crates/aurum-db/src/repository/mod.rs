//! # Repository Layer
//!
//! Repository implementations for ledger storage.
//!
//! ## Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Repository Pattern                             │
//! │                                                                     │
//! │  Caller                                                             │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  db.transactions()  ──►  TransactionRepository (owns a pool clone)  │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  pool.begin()  ──►  one sqlx transaction per business operation     │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  pub(crate) free fns taking &mut SqliteConnection                   │
//! │  (price::current_price, stock::append_entry, ...) compose inside    │
//! │  the open transaction; commit happens in exactly one place          │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Public repository methods own the transaction boundary. The
//! `pub(crate)` free functions never begin or commit; they run on the
//! caller's connection so multi-step operations stay atomic.

pub mod audit;
pub mod fire_rate;
pub mod item;
pub mod price;
pub mod reconciliation;
pub mod stock;
pub mod transaction;
pub mod transfer;

use std::str::FromStr;

use crate::error::{LedgerError, LedgerResult};

/// Generates a new v4 UUID string id.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Decodes a stored canonical string back into a domain type.
///
/// A failure here means the column holds something no code path ever
/// writes, so it surfaces as a storage error, not a validation error.
pub(crate) fn decode<T: FromStr>(what: &'static str, raw: &str) -> LedgerResult<T> {
    raw.parse::<T>()
        .map_err(|_| LedgerError::Storage(format!("corrupt {what} column: {raw:?}")))
}

// =============================================================================
// Shared Test Harness
// =============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use aurum_core::{
        GoldItem, MetalGrade, Money, NewGoldItem, NewPrice, PriceRecord, Weight,
    };

    use crate::pool::{Database, DbConfig};

    /// Fresh isolated in-memory database with all migrations applied.
    pub(crate) async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    pub(crate) fn w(value: &str) -> Weight {
        Weight::parse(value).unwrap()
    }

    pub(crate) fn m(value: &str) -> Money {
        Money::parse(value).unwrap()
    }

    pub(crate) async fn seed_price(
        db: &Database,
        grade: MetalGrade,
        buy: &str,
        sell: &str,
    ) -> PriceRecord {
        db.prices()
            .record(NewPrice {
                grade,
                buy_price_g: m(buy),
                sell_price_g: m(sell),
                source: "test".to_string(),
                recorded_by: Some("tester".to_string()),
            })
            .await
            .unwrap()
    }

    pub(crate) async fn seed_item(
        db: &Database,
        branch_id: &str,
        product_id: &str,
        weight: &str,
        acquisition_price: &str,
    ) -> GoldItem {
        db.gold_items()
            .intake(NewGoldItem {
                product_id: product_id.to_string(),
                branch_id: branch_id.to_string(),
                actual_weight_g: w(weight),
                acquisition_price_g: m(acquisition_price),
            })
            .await
            .unwrap()
    }
}
