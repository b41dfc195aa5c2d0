//! # Stock Ledger Repository
//!
//! Append-only double-entry stock movements per (branch, product).
//!
//! ## Running Balance vs Ground Truth
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Stock Ledger                                   │
//! │                                                                     │
//! │  seq  type    qty        running_balance                            │
//! │  ───  ──────  ─────────  ──────────────                             │
//! │   1   debit   10.000000     10.000000                               │
//! │   2   credit   2.500000      7.500000                               │
//! │   3   debit    0.100000      7.600000                               │
//! │                                                                     │
//! │  running_balance_g = previous balance ± quantity, materialized at   │
//! │  append time inside the same transaction.                           │
//! │                                                                     │
//! │  balance() recomputes SUM(debit) − SUM(credit) over the whole log   │
//! │  in exact decimal arithmetic - the ground truth the materialized    │
//! │  chain must always equal.                                           │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Appends are crate-internal: only the orchestrator writes here, on an
//! open transaction it owns.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use aurum_core::validation::validate_positive_weight;
use aurum_core::{EntryType, LedgerEntry, LedgerReason, Money, Weight};

use crate::error::LedgerResult;
use crate::repository::{decode, new_id};

/// Repository for stock ledger reads.
#[derive(Debug, Clone)]
pub struct StockLedgerRepository {
    pool: SqlitePool,
}

impl StockLedgerRepository {
    /// Creates a new StockLedgerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StockLedgerRepository { pool }
    }

    /// Ground-truth balance for (branch, product): the exact signed sum
    /// over every ledger row. SQL-side SUM would go through floating
    /// point on TEXT decimals, so the fold happens in Rust.
    pub async fn balance(&self, branch_id: &str, product_id: &str) -> LedgerResult<Weight> {
        let mut conn = self.pool.acquire().await?;
        signed_sum(&mut conn, branch_id, product_id).await
    }

    /// Returns ledger entries for (branch, product), newest first.
    pub async fn entries(
        &self,
        branch_id: &str,
        product_id: &str,
        limit: i64,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, branch_id, product_id, item_id, entry_type,
                   quantity_g, unit_price_g, transaction_id, reason,
                   running_balance_g, created_at
            FROM stock_ledger
            WHERE branch_id = ?1 AND product_id = ?2
            ORDER BY seq DESC
            LIMIT ?3
            "#,
        )
        .bind(branch_id)
        .bind(product_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    /// Returns all entries written by one transaction, in append order.
    pub async fn entries_for_transaction(
        &self,
        transaction_id: &str,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, branch_id, product_id, item_id, entry_type,
                   quantity_g, unit_price_g, transaction_id, reason,
                   running_balance_g, created_at
            FROM stock_ledger
            WHERE transaction_id = ?1
            ORDER BY seq
            "#,
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }
}

/// A ledger append, built by the orchestrator inside its transaction.
pub(crate) struct AppendEntry<'a> {
    pub branch_id: &'a str,
    pub product_id: &'a str,
    pub item_id: Option<&'a str>,
    pub entry_type: EntryType,
    pub quantity_g: Weight,
    pub unit_price_g: Money,
    pub transaction_id: &'a str,
    pub reason: LedgerReason,
}

/// Appends one entry on the caller's open transaction.
///
/// Reads the latest materialized balance for the pair, applies the
/// signed quantity exactly, and inserts the new row with the updated
/// balance. Atomic with everything else in the caller's transaction.
pub(crate) async fn append_entry(
    conn: &mut SqliteConnection,
    entry: &AppendEntry<'_>,
) -> LedgerResult<LedgerEntry> {
    validate_positive_weight("quantity_g", entry.quantity_g)?;

    let previous = last_running_balance(conn, entry.branch_id, entry.product_id).await?;
    let running_balance = match entry.entry_type {
        EntryType::Debit => previous + entry.quantity_g,
        EntryType::Credit => previous - entry.quantity_g,
    };

    let record = LedgerEntry {
        id: new_id(),
        branch_id: entry.branch_id.to_string(),
        product_id: entry.product_id.to_string(),
        item_id: entry.item_id.map(str::to_string),
        entry_type: entry.entry_type,
        quantity_g: entry.quantity_g,
        unit_price_g: entry.unit_price_g,
        transaction_id: entry.transaction_id.to_string(),
        reason: entry.reason,
        running_balance_g: running_balance,
        created_at: Utc::now(),
    };

    sqlx::query(
        r#"
        INSERT INTO stock_ledger (
            id, branch_id, product_id, item_id, entry_type,
            quantity_g, unit_price_g, transaction_id, reason,
            running_balance_g, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&record.id)
    .bind(&record.branch_id)
    .bind(&record.product_id)
    .bind(record.item_id.as_deref())
    .bind(record.entry_type.as_str())
    .bind(record.quantity_g.to_canonical_string())
    .bind(record.unit_price_g.to_canonical_string())
    .bind(&record.transaction_id)
    .bind(record.reason.as_str())
    .bind(record.running_balance_g.to_canonical_string())
    .bind(record.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(record)
}

/// Latest materialized balance for (branch, product), zero when the
/// pair has no history yet.
async fn last_running_balance(
    conn: &mut SqliteConnection,
    branch_id: &str,
    product_id: &str,
) -> LedgerResult<Weight> {
    let raw: Option<String> = sqlx::query_scalar(
        r#"
        SELECT running_balance_g
        FROM stock_ledger
        WHERE branch_id = ?1 AND product_id = ?2
        ORDER BY seq DESC
        LIMIT 1
        "#,
    )
    .bind(branch_id)
    .bind(product_id)
    .fetch_optional(&mut *conn)
    .await?;

    match raw {
        Some(raw) => decode("running_balance_g", &raw),
        None => Ok(Weight::zero()),
    }
}

/// Ground-truth signed sum for (branch, product) on the caller's
/// connection. Used by the reconciliation engine inside its own
/// transaction.
pub(crate) async fn signed_sum(
    conn: &mut SqliteConnection,
    branch_id: &str,
    product_id: &str,
) -> LedgerResult<Weight> {
    let rows = sqlx::query(
        r#"
        SELECT entry_type, quantity_g
        FROM stock_ledger
        WHERE branch_id = ?1 AND product_id = ?2
        ORDER BY seq
        "#,
    )
    .bind(branch_id)
    .bind(product_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut total = Weight::zero();
    for row in &rows {
        let entry_type: String = row.try_get("entry_type")?;
        let quantity: String = row.try_get("quantity_g")?;

        let entry_type: EntryType = decode("entry_type", &entry_type)?;
        let quantity: Weight = decode("quantity_g", &quantity)?;

        match entry_type {
            EntryType::Debit => total += quantity,
            EntryType::Credit => total -= quantity,
        }
    }

    Ok(total)
}

fn row_to_entry(row: &SqliteRow) -> LedgerResult<LedgerEntry> {
    let entry_type: String = row.try_get("entry_type")?;
    let quantity: String = row.try_get("quantity_g")?;
    let unit_price: String = row.try_get("unit_price_g")?;
    let reason: String = row.try_get("reason")?;
    let running_balance: String = row.try_get("running_balance_g")?;

    Ok(LedgerEntry {
        id: row.try_get("id")?,
        branch_id: row.try_get("branch_id")?,
        product_id: row.try_get("product_id")?,
        item_id: row.try_get("item_id")?,
        entry_type: decode("entry_type", &entry_type)?,
        quantity_g: decode("quantity_g", &quantity)?,
        unit_price_g: decode("unit_price_g", &unit_price)?,
        transaction_id: row.try_get("transaction_id")?,
        reason: decode("reason", &reason)?,
        running_balance_g: decode("running_balance_g", &running_balance)?,
        created_at: row.try_get("created_at")?,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
