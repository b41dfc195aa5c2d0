//! # Storage Error Types
//!
//! Error types for ledger storage operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                │
//! │                                                                     │
//! │  SQLite Error (sqlx::Error)                                         │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  LedgerError (this module) ← Adds context and categorization        │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  Caller maps to its own surface (HTTP layer, job runner, ...)       │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every orchestrator operation runs inside one SQL transaction; any
//! `LedgerError` means the transaction rolled back and nothing was
//! written.

use thiserror::Error;

use aurum_core::ValidationError;

/// Ledger storage errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Input failed a domain rule before any write.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Entity not found, or found but not in a usable state (an item
    /// that is not available for sale reports NotFound, matching what a
    /// guarded lookup can observe).
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// State conflict: a concurrent writer got there first, or the
    /// entity is in the wrong lifecycle state for this operation.
    #[error("conflict: {reason}")]
    Conflict { reason: String },

    /// Database connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution or row decoding failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        LedgerError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a Conflict error.
    pub fn conflict(reason: impl Into<String>) -> Self {
        LedgerError::Conflict {
            reason: reason.into(),
        }
    }
}

/// Convert sqlx errors to LedgerError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → LedgerError::NotFound
/// sqlx::Error::Database       → Analyze message for constraint type
/// Other                       → LedgerError::Storage
/// ```
impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => LedgerError::NotFound {
                entity: "record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // SQLite constraint messages:
                // UNIQUE: "UNIQUE constraint failed: <table>.<column>"
                // FK:     "FOREIGN KEY constraint failed"
                if msg.contains("UNIQUE constraint failed") {
                    LedgerError::Conflict {
                        reason: msg.to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    LedgerError::Conflict {
                        reason: msg.to_string(),
                    }
                } else {
                    LedgerError::Storage(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => {
                LedgerError::ConnectionFailed("pool timed out".to_string())
            }

            sqlx::Error::PoolClosed => LedgerError::ConnectionFailed("pool is closed".to_string()),

            _ => LedgerError::Storage(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for LedgerError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        LedgerError::MigrationFailed(err.to_string())
    }
}

/// Result type for storage operations.
pub type LedgerResult<T> = Result<T, LedgerError>;
