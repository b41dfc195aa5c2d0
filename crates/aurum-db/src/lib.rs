//! # aurum-db: Storage Layer for Aurum Ledger
//!
//! This crate provides all persistence for Aurum Ledger. It uses SQLite
//! for local storage with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Aurum Ledger Data Flow                         │
//! │                                                                     │
//! │  Caller (HTTP layer / jobs - out of scope)                          │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  ┌───────────────────────────────────────────────────────────────┐  │
//! │  │                   aurum-db (THIS CRATE)                       │  │
//! │  │                                                               │  │
//! │  │   ┌───────────────┐   ┌────────────────┐   ┌──────────────┐  │  │
//! │  │   │   Database    │   │  Repositories  │   │  Migrations  │  │  │
//! │  │   │   (pool.rs)   │   │                │   │  (embedded)  │  │  │
//! │  │   │               │   │ price  stock   │   │              │  │  │
//! │  │   │ SqlitePool    │◄──│ transaction    │   │ 001_init.sql │  │  │
//! │  │   │ WAL + timeout │   │ item  transfer │   │              │  │  │
//! │  │   │               │   │ reconciliation │   │              │  │  │
//! │  │   │               │   │ fire_rate audit│   │              │  │  │
//! │  │   └───────────────┘   └────────────────┘   └──────────────┘  │  │
//! │  └───────────────────────────────────────────────────────────────┘  │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  SQLite database (append-only price + stock ledgers)                │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Atomicity
//!
//! Every business operation runs in exactly one sqlx transaction. The
//! orchestrator ([`repository::transaction`]) composes crate-internal
//! helpers (price lock, ledger append, item transition) on the open
//! connection; any error path drops the transaction and sqlx rolls it
//! back. Partial writes are impossible by construction.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use aurum_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/aurum.db")).await?;
//!
//! let price = db.prices().record(new_price).await?;
//! let sale = db.transactions().create_sale(input, "user-1").await?;
//! let balance = db.stock_ledger().balance("branch-1", "ring-22k").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{LedgerError, LedgerResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::audit::AuditLogRepository;
pub use repository::fire_rate::FireRateRepository;
pub use repository::item::GoldItemRepository;
pub use repository::price::PriceRepository;
pub use repository::audit::AuditEvent;
pub use repository::fire_rate::{FireRateRecord, FireRateScope};
pub use repository::reconciliation::{
    AlertResolution, ReconciliationRepository, SnapshotDiff, TransferReconciliationStatus,
};
pub use repository::stock::StockLedgerRepository;
pub use repository::transaction::TransactionRepository;
pub use repository::transfer::TransferRepository;
