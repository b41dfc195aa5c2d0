//! # Reconciliation Repository
//!
//! Snapshots of computed stock, drift detection, and alert resolution.
//!
//! ## Reconciliation Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                   Reconciliation Cycle                              │
//! │                                                                     │
//! │  1. take_snapshot(date)                                             │
//! │     one row per (branch, product) with ledger history               │
//! │     balance = ground-truth signed sum                               │
//! │     value   = balance × latest reference-grade sell price           │
//! │                                                                     │
//! │  2. compare_snapshot_vs_ledger(branch, date)                        │
//! │     diff = current ledger balance − snapshot balance                │
//! │     diff ≠ 0 ──► pending alert (at most one per scope per date)     │
//! │                                                                     │
//! │  3. resolve_alert(alert, unit_price, approved, by)                  │
//! │     rejected ──► status only                                        │
//! │     approved ──► one adjustment through the orchestrator            │
//! │                  (debit when diff > 0, credit when diff < 0),       │
//! │                  transaction linked on the alert                    │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use aurum_core::{
    AdjustmentInput, AlertStatus, EntryType, Money, ReconciliationAlert, StockSnapshot, Weight,
    REFERENCE_GRADE,
};

use crate::error::{LedgerError, LedgerResult};
use crate::repository::{decode, new_id, stock, transaction};

/// One (branch, product) comparison result.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotDiff {
    pub branch_id: String,
    pub product_id: String,
    pub snapshot_balance_g: Weight,
    pub ledger_balance_g: Weight,
    /// Signed: current ledger − snapshot.
    pub diff_g: Weight,
    /// Set when the diff raised (or matched) a pending alert.
    pub alert_id: Option<String>,
}

/// Outcome of an alert resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertResolution {
    Rejected,
    Resolved {
        /// The correcting adjustment, absent for a zero diff.
        transaction_id: Option<String>,
    },
}

/// Transfer handshake health counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReconciliationStatus {
    /// Requests approved by the source but not yet received: metal in
    /// flight, on neither branch's shelf.
    pub approved_pending_receive: i64,
    pub received_today: i64,
}

/// Repository for reconciliation operations.
#[derive(Debug, Clone)]
pub struct ReconciliationRepository {
    pool: SqlitePool,
}

impl ReconciliationRepository {
    /// Creates a new ReconciliationRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ReconciliationRepository { pool }
    }

    /// Captures one snapshot row per (branch, product) with ledger
    /// history, valued at the latest reference-grade sell price (zero
    /// when no price exists). Re-taking the same date replaces the
    /// previous capture.
    pub async fn take_snapshot(&self, snapshot_date: NaiveDate) -> LedgerResult<Vec<StockSnapshot>> {
        let mut tx = self.pool.begin().await?;

        let sell_price = match crate::repository::price::current_price(&mut tx, REFERENCE_GRADE)
            .await
        {
            Ok(price) => Some(price.sell_price_g),
            Err(LedgerError::NotFound { .. }) => None,
            Err(err) => return Err(err),
        };

        let pairs: Vec<(String, String)> = sqlx::query(
            r#"
            SELECT DISTINCT branch_id, product_id
            FROM stock_ledger
            ORDER BY branch_id, product_id
            "#,
        )
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|row| -> LedgerResult<(String, String)> {
            Ok((row.try_get("branch_id")?, row.try_get("product_id")?))
        })
        .collect::<LedgerResult<_>>()?;

        let now = Utc::now();
        let mut snapshots = Vec::with_capacity(pairs.len());

        for (branch_id, product_id) in pairs {
            let balance = stock::signed_sum(&mut tx, &branch_id, &product_id).await?;
            let value = match sell_price {
                Some(sell) => balance * sell,
                None => Money::zero(),
            };

            sqlx::query(
                r#"
                INSERT INTO stock_snapshot (
                    id, branch_id, product_id, snapshot_date,
                    balance_g, value_amount, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT (branch_id, product_id, snapshot_date) DO UPDATE SET
                    balance_g = excluded.balance_g,
                    value_amount = excluded.value_amount,
                    created_at = excluded.created_at
                "#,
            )
            .bind(new_id())
            .bind(&branch_id)
            .bind(&product_id)
            .bind(snapshot_date)
            .bind(balance.to_canonical_string())
            .bind(value.to_canonical_string())
            .bind(now)
            .execute(&mut *tx)
            .await?;

            // The upsert may have kept the original row id.
            let row = sqlx::query(
                r#"
                SELECT id, branch_id, product_id, snapshot_date,
                       balance_g, value_amount, created_at
                FROM stock_snapshot
                WHERE branch_id = ?1 AND product_id = ?2 AND snapshot_date = ?3
                "#,
            )
            .bind(&branch_id)
            .bind(&product_id)
            .bind(snapshot_date)
            .fetch_one(&mut *tx)
            .await?;

            snapshots.push(row_to_snapshot(&row)?);
        }

        tx.commit().await?;
        info!(date = %snapshot_date, count = snapshots.len(), "Snapshot taken");
        Ok(snapshots)
    }

    /// Recomputes the current ledger balance for every snapshot row of
    /// (branch, date) and raises a pending alert per non-zero diff:
    /// at most one open alert per scope per date, however often the
    /// comparison runs. Returns the full diff list.
    pub async fn compare_snapshot_vs_ledger(
        &self,
        branch_id: &str,
        snapshot_date: NaiveDate,
    ) -> LedgerResult<Vec<SnapshotDiff>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, branch_id, product_id, snapshot_date,
                   balance_g, value_amount, created_at
            FROM stock_snapshot
            WHERE branch_id = ?1 AND snapshot_date = ?2
            ORDER BY product_id
            "#,
        )
        .bind(branch_id)
        .bind(snapshot_date)
        .fetch_all(&mut *tx)
        .await?;
        let snapshots: Vec<StockSnapshot> =
            rows.iter().map(row_to_snapshot).collect::<LedgerResult<_>>()?;

        let mut diffs = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            let ledger = stock::signed_sum(&mut tx, &snapshot.branch_id, &snapshot.product_id)
                .await?;
            let diff = ledger - snapshot.balance_g;

            let alert_id = if diff.is_zero() {
                None
            } else {
                let existing: Option<String> = sqlx::query_scalar(
                    r#"
                    SELECT id FROM reconciliation_alert
                    WHERE branch_id = ?1 AND product_id = ?2
                      AND snapshot_date = ?3 AND status = 'pending'
                    "#,
                )
                .bind(&snapshot.branch_id)
                .bind(&snapshot.product_id)
                .bind(snapshot_date)
                .fetch_optional(&mut *tx)
                .await?;

                match existing {
                    Some(id) => Some(id),
                    None => {
                        let id = new_id();
                        debug!(
                            branch_id = %snapshot.branch_id,
                            product_id = %snapshot.product_id,
                            diff = %diff,
                            "Stock drift detected"
                        );
                        sqlx::query(
                            r#"
                            INSERT INTO reconciliation_alert (
                                id, branch_id, product_id, snapshot_date,
                                ledger_balance_g, snapshot_balance_g, diff_g,
                                status, created_at
                            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8)
                            "#,
                        )
                        .bind(&id)
                        .bind(&snapshot.branch_id)
                        .bind(&snapshot.product_id)
                        .bind(snapshot_date)
                        .bind(ledger.to_canonical_string())
                        .bind(snapshot.balance_g.to_canonical_string())
                        .bind(diff.to_canonical_string())
                        .bind(Utc::now())
                        .execute(&mut *tx)
                        .await?;
                        Some(id)
                    }
                }
            };

            diffs.push(SnapshotDiff {
                branch_id: snapshot.branch_id,
                product_id: snapshot.product_id,
                snapshot_balance_g: snapshot.balance_g,
                ledger_balance_g: ledger,
                diff_g: diff,
                alert_id,
            });
        }

        tx.commit().await?;
        Ok(diffs)
    }

    /// Lists open alerts for a branch, oldest first.
    pub async fn pending_alerts(&self, branch_id: &str) -> LedgerResult<Vec<ReconciliationAlert>> {
        let rows = sqlx::query(
            r#"
            SELECT id, branch_id, product_id, snapshot_date,
                   ledger_balance_g, snapshot_balance_g, diff_g, status,
                   resolution_transaction_id, resolved_by, resolved_at, created_at
            FROM reconciliation_alert
            WHERE branch_id = ?1 AND status = 'pending'
            ORDER BY created_at, id
            "#,
        )
        .bind(branch_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_alert).collect()
    }

    /// Gets an alert by ID.
    pub async fn get_alert(&self, id: &str) -> LedgerResult<ReconciliationAlert> {
        let row = sqlx::query(
            r#"
            SELECT id, branch_id, product_id, snapshot_date,
                   ledger_balance_g, snapshot_balance_g, diff_g, status,
                   resolution_transaction_id, resolved_by, resolved_at, created_at
            FROM reconciliation_alert
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_alert(&row),
            None => Err(LedgerError::not_found("reconciliation alert", id)),
        }
    }

    /// Resolves a pending alert.
    ///
    /// Rejection only flips the status. Approval with a non-zero diff
    /// books one correcting adjustment: debit for a gain (diff > 0),
    /// credit for a loss, linked on the alert row. The claim, the
    /// adjustment, and the link are one unit of work: the alert is
    /// flipped with a guarded update before anything is booked, so a
    /// concurrent resolver loses with `Conflict` and no ledger write
    /// can ever outlive a rejection.
    pub async fn resolve_alert(
        &self,
        alert_id: &str,
        unit_price_g: Money,
        approved: bool,
        resolved_by: &str,
    ) -> LedgerResult<AlertResolution> {
        let mut tx = self.pool.begin().await?;

        let alert = get_alert_in(&mut tx, alert_id).await?;
        if alert.status != AlertStatus::Pending {
            return Err(LedgerError::conflict(format!(
                "alert {} is not pending (status: {})",
                alert_id, alert.status
            )));
        }

        let status = if approved {
            AlertStatus::Resolved
        } else {
            AlertStatus::Rejected
        };
        claim_alert(&mut tx, alert_id, status, resolved_by).await?;

        if !approved {
            tx.commit().await?;
            info!(id = %alert_id, "Alert rejected");
            return Ok(AlertResolution::Rejected);
        }

        let record = if alert.diff_g.is_zero() {
            None
        } else {
            let entry_type = if alert.diff_g.is_positive() {
                EntryType::Debit
            } else {
                EntryType::Credit
            };
            let record = transaction::adjustment_in(
                &mut tx,
                &AdjustmentInput {
                    branch_id: alert.branch_id.clone(),
                    product_id: alert.product_id.clone(),
                    entry_type,
                    quantity_g: alert.diff_g.abs(),
                    unit_price_g,
                    client_request_id: Some(format!("reconciliation:{alert_id}")),
                    notes: Some(format!(
                        "reconciliation: snapshot {} diff {}",
                        alert.snapshot_date,
                        alert.diff_g.to_canonical_string()
                    )),
                },
                resolved_by,
            )
            .await?;

            sqlx::query(
                "UPDATE reconciliation_alert SET resolution_transaction_id = ?1 WHERE id = ?2",
            )
            .bind(&record.id)
            .bind(alert_id)
            .execute(&mut *tx)
            .await?;

            Some(record)
        };

        tx.commit().await?;

        let transaction_id = record.as_ref().map(|r| r.id.clone());
        info!(id = %alert_id, transaction_id = ?transaction_id, "Alert resolved");
        if let Some(record) = &record {
            transaction::audit_created(&self.pool, record).await;
        }
        Ok(AlertResolution::Resolved { transaction_id })
    }

    /// Transfer handshake health: requests stuck between approve and
    /// receive, and requests received today.
    pub async fn transfer_reconciliation_status(
        &self,
    ) -> LedgerResult<TransferReconciliationStatus> {
        let approved_pending_receive: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM transfer_request WHERE status = 'approved'",
        )
        .fetch_one(&self.pool)
        .await?;

        // Timestamps are stored as UTC text starting with the date.
        let today = Utc::now().date_naive().to_string();
        let received_today: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM transfer_request
            WHERE status = 'received' AND substr(received_at, 1, 10) = ?1
            "#,
        )
        .bind(&today)
        .fetch_one(&self.pool)
        .await?;

        Ok(TransferReconciliationStatus {
            approved_pending_receive,
            received_today,
        })
    }
}

/// Alert lookup on the caller's open transaction.
async fn get_alert_in(
    conn: &mut SqliteConnection,
    id: &str,
) -> LedgerResult<ReconciliationAlert> {
    let row = sqlx::query(
        r#"
        SELECT id, branch_id, product_id, snapshot_date,
               ledger_balance_g, snapshot_balance_g, diff_g, status,
               resolution_transaction_id, resolved_by, resolved_at, created_at
        FROM reconciliation_alert
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => row_to_alert(&row),
        None => Err(LedgerError::not_found("reconciliation alert", id)),
    }
}

/// Claims a pending alert with a guarded status flip. The loser of a
/// concurrent resolution sees zero rows updated and gets `Conflict`
/// before any ledger write happens.
async fn claim_alert(
    conn: &mut SqliteConnection,
    alert_id: &str,
    status: AlertStatus,
    resolved_by: &str,
) -> LedgerResult<()> {
    let updated = sqlx::query(
        r#"
        UPDATE reconciliation_alert
        SET status = ?1, resolved_by = ?2, resolved_at = ?3
        WHERE id = ?4 AND status = 'pending'
        "#,
    )
    .bind(status.as_str())
    .bind(resolved_by)
    .bind(Utc::now())
    .bind(alert_id)
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(LedgerError::conflict(format!(
            "alert {alert_id} was resolved concurrently"
        )));
    }
    Ok(())
}

fn row_to_snapshot(row: &SqliteRow) -> LedgerResult<StockSnapshot> {
    let balance: String = row.try_get("balance_g")?;
    let value: String = row.try_get("value_amount")?;

    Ok(StockSnapshot {
        id: row.try_get("id")?,
        branch_id: row.try_get("branch_id")?,
        product_id: row.try_get("product_id")?,
        snapshot_date: row.try_get("snapshot_date")?,
        balance_g: decode("balance_g", &balance)?,
        value_amount: decode("value_amount", &value)?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_alert(row: &SqliteRow) -> LedgerResult<ReconciliationAlert> {
    let ledger: String = row.try_get("ledger_balance_g")?;
    let snapshot: String = row.try_get("snapshot_balance_g")?;
    let diff: String = row.try_get("diff_g")?;
    let status: String = row.try_get("status")?;

    Ok(ReconciliationAlert {
        id: row.try_get("id")?,
        branch_id: row.try_get("branch_id")?,
        product_id: row.try_get("product_id")?,
        snapshot_date: row.try_get("snapshot_date")?,
        ledger_balance_g: decode("ledger_balance_g", &ledger)?,
        snapshot_balance_g: decode("snapshot_balance_g", &snapshot)?,
        diff_g: decode("diff_g", &diff)?,
        status: decode("status", &status)?,
        resolution_transaction_id: row.try_get("resolution_transaction_id")?,
        resolved_by: row.try_get("resolved_by")?,
        resolved_at: row.try_get("resolved_at")?,
        created_at: row.try_get("created_at")?,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
