//! # Gold Item Repository
//!
//! Discrete physical stock pieces and their lifecycle.
//!
//! ## Status Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     Gold Item Lifecycle                             │
//! │                                                                     │
//! │                    ┌──────────────┐                                 │
//! │     intake ───────►│   in_stock   │◄────── transfer receive         │
//! │                    └──────┬───────┘        (at target branch)       │
//! │                           │                                         │
//! │          ┌────────────────┼────────────────┐                        │
//! │          ▼                ▼                ▼                        │
//! │     ┌────────┐      ┌──────────┐    ┌─────────────┐                 │
//! │     │  sold  │      │ scrapped │    │ transferred │                 │
//! │     └────┬───┘      └──────────┘    └─────────────┘                 │
//! │          │ return                                                   │
//! │          ▼                                                          │
//! │     ┌──────────┐                                                    │
//! │     │ returned │                                                    │
//! │     └──────────┘                                                    │
//! │                                                                     │
//! │  Every edge is a guarded UPDATE: `WHERE id = ? AND status = ?`.     │
//! │  Zero rows affected means a concurrent writer won - the loser sees  │
//! │  "not available", it never blocks past the busy timeout.            │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use aurum_core::validation::validate_positive_weight;
use aurum_core::{
    EntryType, GoldItem, ItemStatus, LedgerReason, Money, NewGoldItem, TransactionRecord,
    TransactionType, ValidationError, Weight, REFERENCE_GRADE,
};

use crate::error::{LedgerError, LedgerResult};
use crate::repository::{decode, new_id, price, stock, transaction};

/// Repository for gold item operations.
#[derive(Debug, Clone)]
pub struct GoldItemRepository {
    pool: SqlitePool,
}

impl GoldItemRepository {
    /// Creates a new GoldItemRepository.
    pub fn new(pool: SqlitePool) -> Self {
        GoldItemRepository { pool }
    }

    /// Registers a new item as `in_stock`.
    ///
    /// Intake carries no ledger logic of its own; the purchase that
    /// brought the metal in is recorded by the orchestrator.
    pub async fn intake(&self, input: NewGoldItem) -> LedgerResult<GoldItem> {
        validate_positive_weight("actual_weight_g", input.actual_weight_g)?;

        let now = Utc::now();
        let item = GoldItem {
            id: new_id(),
            product_id: input.product_id,
            branch_id: input.branch_id,
            actual_weight_g: input.actual_weight_g,
            acquisition_price_g: input.acquisition_price_g,
            status: ItemStatus::InStock,
            created_at: now,
            updated_at: now,
        };

        debug!(id = %item.id, product_id = %item.product_id, "Registering gold item");

        sqlx::query(
            r#"
            INSERT INTO gold_item (
                id, product_id, branch_id, actual_weight_g,
                acquisition_price_g, status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&item.id)
        .bind(&item.product_id)
        .bind(&item.branch_id)
        .bind(item.actual_weight_g.to_canonical_string())
        .bind(item.acquisition_price_g.to_canonical_string())
        .bind(item.status.as_str())
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(item)
    }

    /// Gets an item by ID.
    pub async fn get(&self, id: &str) -> LedgerResult<GoldItem> {
        let mut conn = self.pool.acquire().await?;
        get_in(&mut conn, id).await
    }

    /// Lists in-stock items for a branch.
    pub async fn list_in_stock(&self, branch_id: &str) -> LedgerResult<Vec<GoldItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, product_id, branch_id, actual_weight_g,
                   acquisition_price_g, status, created_at, updated_at
            FROM gold_item
            WHERE branch_id = ?1 AND status = 'in_stock'
            ORDER BY created_at, id
            "#,
        )
        .bind(branch_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_item).collect()
    }

    /// Corrects an item's stored weight after a physical re-weigh.
    ///
    /// Records an adjustment transaction (notes
    /// `gram_correction: <old> -> <new>`) with one ledger entry for the
    /// delta at the item's acquisition price, then updates the stored
    /// weight. A zero delta is rejected as `Validation(ZeroDelta)`.
    pub async fn correct_weight(
        &self,
        item_id: &str,
        new_weight: Weight,
        corrected_by: &str,
    ) -> LedgerResult<TransactionRecord> {
        validate_positive_weight("actual_weight_g", new_weight)?;

        let mut tx = self.pool.begin().await?;

        // Corrections only apply to shelf stock.
        let item = get_available(&mut tx, item_id, None, ItemStatus::InStock).await?;

        let delta = new_weight - item.actual_weight_g;
        if delta.is_zero() {
            return Err(ValidationError::ZeroDelta {
                item_id: item_id.to_string(),
            }
            .into());
        }

        // Corrections anchor to the reference-grade price row.
        let price = price::current_price(&mut tx, REFERENCE_GRADE).await?;

        let entry_type = if delta.is_positive() {
            EntryType::Debit
        } else {
            EntryType::Credit
        };
        let quantity = delta.abs();
        let notes = format!(
            "gram_correction: {} -> {}",
            item.actual_weight_g.to_canonical_string(),
            new_weight.to_canonical_string()
        );

        let record = transaction::insert_row(
            &mut tx,
            &transaction::NewTransactionRow {
                branch_id: &item.branch_id,
                kind: TransactionType::Adjustment,
                item_id: Some(item_id),
                customer_id: None,
                quantity_g: quantity,
                unit_price_g: item.acquisition_price_g,
                labor_amount: Money::zero(),
                total_amount: quantity * item.acquisition_price_g,
                price_id: &price.id,
                payment_method: None,
                client_request_id: None,
                cash_report_flagged: false,
                fire_cost: None,
                parent_transaction_id: None,
                notes: Some(&notes),
                created_by: corrected_by,
            },
        )
        .await?;

        stock::append_entry(
            &mut tx,
            &stock::AppendEntry {
                branch_id: &item.branch_id,
                product_id: &item.product_id,
                item_id: Some(item_id),
                entry_type,
                quantity_g: quantity,
                unit_price_g: item.acquisition_price_g,
                transaction_id: &record.id,
                reason: LedgerReason::Adjustment,
            },
        )
        .await?;

        // CAS on the old weight: a concurrent correction loses here.
        let updated = sqlx::query(
            r#"
            UPDATE gold_item
            SET actual_weight_g = ?1, updated_at = ?2
            WHERE id = ?3 AND actual_weight_g = ?4
            "#,
        )
        .bind(new_weight.to_canonical_string())
        .bind(Utc::now())
        .bind(item_id)
        .bind(item.actual_weight_g.to_canonical_string())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(LedgerError::conflict(format!(
                "gold item {item_id} was modified concurrently"
            )));
        }

        tx.commit().await?;

        transaction::audit_created(&self.pool, &record).await;
        Ok(record)
    }
}

/// Plain lookup on the caller's connection.
pub(crate) async fn get_in(conn: &mut SqliteConnection, id: &str) -> LedgerResult<GoldItem> {
    let row = sqlx::query(
        r#"
        SELECT id, product_id, branch_id, actual_weight_g,
               acquisition_price_g, status, created_at, updated_at
        FROM gold_item
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => row_to_item(&row),
        None => Err(LedgerError::not_found("gold item", id)),
    }
}

/// Guarded lookup: the item must exist, be in `status`, and (when
/// given) belong to `branch_id`. Anything else reads as not available;
/// deliberately indistinguishable from absent, per the no-blocking
/// contention contract.
pub(crate) async fn get_available(
    conn: &mut SqliteConnection,
    id: &str,
    branch_id: Option<&str>,
    status: ItemStatus,
) -> LedgerResult<GoldItem> {
    let row = sqlx::query(
        r#"
        SELECT id, product_id, branch_id, actual_weight_g,
               acquisition_price_g, status, created_at, updated_at
        FROM gold_item
        WHERE id = ?1
          AND status = ?2
          AND (?3 IS NULL OR branch_id = ?3)
        "#,
    )
    .bind(id)
    .bind(status.as_str())
    .bind(branch_id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => row_to_item(&row),
        None => Err(LedgerError::not_found(
            format!("gold item ({})", status.as_str()),
            id,
        )),
    }
}

/// Guarded status transition on the caller's open transaction. Zero
/// rows affected means a concurrent writer took the item first.
pub(crate) async fn set_status(
    conn: &mut SqliteConnection,
    id: &str,
    from: ItemStatus,
    to: ItemStatus,
) -> LedgerResult<()> {
    let updated = sqlx::query(
        r#"
        UPDATE gold_item
        SET status = ?1, updated_at = ?2
        WHERE id = ?3 AND status = ?4
        "#,
    )
    .bind(to.as_str())
    .bind(Utc::now())
    .bind(id)
    .bind(from.as_str())
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(LedgerError::not_found(
            format!("gold item ({})", from.as_str()),
            id,
        ));
    }
    Ok(())
}

/// Guarded transfer-receive transition: reassigns the branch and
/// restores `in_stock` in one statement.
pub(crate) async fn move_to_branch(
    conn: &mut SqliteConnection,
    id: &str,
    target_branch_id: &str,
    from: ItemStatus,
    to: ItemStatus,
) -> LedgerResult<()> {
    let updated = sqlx::query(
        r#"
        UPDATE gold_item
        SET branch_id = ?1, status = ?2, updated_at = ?3
        WHERE id = ?4 AND status = ?5
        "#,
    )
    .bind(target_branch_id)
    .bind(to.as_str())
    .bind(Utc::now())
    .bind(id)
    .bind(from.as_str())
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(LedgerError::not_found(
            format!("gold item ({})", from.as_str()),
            id,
        ));
    }
    Ok(())
}

fn row_to_item(row: &SqliteRow) -> LedgerResult<GoldItem> {
    let weight: String = row.try_get("actual_weight_g")?;
    let price: String = row.try_get("acquisition_price_g")?;
    let status: String = row.try_get("status")?;

    Ok(GoldItem {
        id: row.try_get("id")?,
        product_id: row.try_get("product_id")?,
        branch_id: row.try_get("branch_id")?,
        actual_weight_g: decode("actual_weight_g", &weight)?,
        acquisition_price_g: decode("acquisition_price_g", &price)?,
        status: decode("status", &status)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use aurum_core::{EntryType, ItemStatus, MetalGrade, TransactionType, ValidationError};

    use crate::error::LedgerError;
    use crate::repository::testing::{m, seed_item, seed_price, test_db, w};

    #[tokio::test]
    async fn intake_and_lookup() {
        let db = test_db().await;

        let item = seed_item(&db, "branch-1", "ring-22k", "12.345678", "2400").await;
        assert_eq!(item.status, ItemStatus::InStock);

        let fetched = db.gold_items().get(&item.id).await.unwrap();
        assert_eq!(fetched, item);

        let listed = db.gold_items().list_in_stock("branch-1").await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn weight_correction_writes_adjustment_and_entry() {
        let db = test_db().await;
        seed_price(&db, MetalGrade::Has, "2400", "2450").await;
        let item = seed_item(&db, "branch-1", "ring-22k", "10.000000", "2400").await;

        let record = db
            .gold_items()
            .correct_weight(&item.id, w("10.250000"), "user-1")
            .await
            .unwrap();

        assert_eq!(record.kind, TransactionType::Adjustment);
        assert_eq!(record.quantity_g, w("0.25"));
        assert_eq!(record.total_amount, m("600")); // 0.25 g × 2400
        assert_eq!(
            record.notes.as_deref(),
            Some("gram_correction: 10.000000 -> 10.250000")
        );
        assert_eq!(record.payment_method, None);

        // Upward correction debits stock.
        let entries = db.stock_ledger().entries_for_transaction(&record.id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_type, EntryType::Debit);
        assert_eq!(entries[0].quantity_g, w("0.25"));

        let updated = db.gold_items().get(&item.id).await.unwrap();
        assert_eq!(updated.actual_weight_g, w("10.25"));
    }

    #[tokio::test]
    async fn downward_correction_credits_stock() {
        let db = test_db().await;
        seed_price(&db, MetalGrade::Has, "2400", "2450").await;
        let item = seed_item(&db, "branch-1", "ring-22k", "10.000000", "2400").await;

        let record = db
            .gold_items()
            .correct_weight(&item.id, w("9.900000"), "user-1")
            .await
            .unwrap();

        let entries = db.stock_ledger().entries_for_transaction(&record.id).await.unwrap();
        assert_eq!(entries[0].entry_type, EntryType::Credit);
        assert_eq!(entries[0].quantity_g, w("0.1"));
    }

    #[tokio::test]
    async fn zero_delta_correction_is_rejected() {
        let db = test_db().await;
        seed_price(&db, MetalGrade::Has, "2400", "2450").await;
        let item = seed_item(&db, "branch-1", "ring-22k", "10.000000", "2400").await;

        // Trailing zeros don't make a new value.
        let err = db
            .gold_items()
            .correct_weight(&item.id, w("10.0"), "user-1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Validation(ValidationError::ZeroDelta { .. })
        ));

        // Nothing was written.
        let record = db.gold_items().get(&item.id).await.unwrap();
        assert_eq!(record, item);
    }

    #[tokio::test]
    async fn correction_requires_reference_grade_price() {
        let db = test_db().await;
        let item = seed_item(&db, "branch-1", "ring-22k", "10.000000", "2400").await;

        let err = db
            .gold_items()
            .correct_weight(&item.id, w("10.5"), "user-1")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));
    }
}
