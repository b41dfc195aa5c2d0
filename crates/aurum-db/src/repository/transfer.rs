//! # Transfer Repository
//!
//! Inter-branch item movement as a three-step handshake, each step its
//! own unit of work.
//!
//! ## Handshake
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                  Inter-Branch Transfer                              │
//! │                                                                     │
//! │  1. REQUEST (any actor)                                             │
//! │     item in_stock at source ──► request `pending`                   │
//! │     (weight snapshotted, no ledger effect)                          │
//! │                                                                     │
//! │  2. APPROVE (source-branch actor)                                   │
//! │     credit `transfer_out` at acquisition price                      │
//! │     item ──► `transferred`, request ──► `approved`                  │
//! │                                                                     │
//! │  3. RECEIVE (target-branch actor)                                   │
//! │     debit `transfer_in` at acquisition price                        │
//! │     item ──► `in_stock` at target, request ──► `received`           │
//! │                                                                     │
//! │  Between approve and receive the metal is on neither branch's       │
//! │  shelf: source already credited, target not yet debited. The        │
//! │  reconciliation status surface counts requests stuck in that gap.   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use serde_json::json;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::info;

use aurum_core::{
    EntryType, ItemStatus, LedgerReason, Money, TransactionType, TransferRequest,
    TransferRequestInput, TransferStatus, REFERENCE_GRADE,
};

use crate::error::{LedgerError, LedgerResult};
use crate::repository::{audit, decode, item, new_id, price, stock, transaction};

/// Repository for inter-branch transfer operations.
#[derive(Debug, Clone)]
pub struct TransferRepository {
    pool: SqlitePool,
}

impl TransferRepository {
    /// Creates a new TransferRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TransferRepository { pool }
    }

    /// Gets a transfer request by ID.
    pub async fn get(&self, id: &str) -> LedgerResult<TransferRequest> {
        let mut conn = self.pool.acquire().await?;
        get_in(&mut conn, id).await
    }

    /// Opens a transfer request for one in-stock item at the source
    /// branch. Snapshots the item weight; no ledger effect yet.
    pub async fn request(
        &self,
        input: TransferRequestInput,
        created_by: &str,
    ) -> LedgerResult<TransferRequest> {
        if input.source_branch_id == input.target_branch_id {
            return Err(LedgerError::conflict(
                "source and target branch must differ".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let moved = item::get_available(
            &mut tx,
            &input.item_id,
            Some(&input.source_branch_id),
            ItemStatus::InStock,
        )
        .await?;

        let record = TransferRequest {
            id: new_id(),
            source_branch_id: input.source_branch_id,
            target_branch_id: input.target_branch_id,
            item_id: input.item_id,
            quantity_g: moved.actual_weight_g,
            status: TransferStatus::Pending,
            created_by: created_by.to_string(),
            created_at: Utc::now(),
            approved_by: None,
            approved_at: None,
            received_by: None,
            received_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO transfer_request (
                id, source_branch_id, target_branch_id, item_id,
                quantity_g, status, created_by, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&record.id)
        .bind(&record.source_branch_id)
        .bind(&record.target_branch_id)
        .bind(&record.item_id)
        .bind(record.quantity_g.to_canonical_string())
        .bind(record.status.as_str())
        .bind(&record.created_by)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(id = %record.id, item = %record.item_id, "Transfer requested");

        audit::record_event(
            &self.pool,
            "transfer_requested",
            "transfer",
            &record.id,
            Some(created_by),
            Some(json!({ "item_id": record.item_id })),
        )
        .await;
        Ok(record)
    }

    /// Approves a pending request. The actor must act for the source
    /// branch. Credits `transfer_out` and parks the item as
    /// `transferred`.
    pub async fn approve(
        &self,
        transfer_id: &str,
        actor_branch_id: &str,
        approved_by: &str,
    ) -> LedgerResult<TransferRequest> {
        let mut tx = self.pool.begin().await?;

        let request = get_in(&mut tx, transfer_id).await?;
        if request.status != TransferStatus::Pending {
            return Err(LedgerError::conflict(format!(
                "transfer {} is not pending (status: {})",
                transfer_id, request.status
            )));
        }
        if actor_branch_id != request.source_branch_id {
            return Err(LedgerError::conflict(format!(
                "transfer {} can only be approved by the source branch",
                transfer_id
            )));
        }

        let moved = item::get_available(
            &mut tx,
            &request.item_id,
            Some(&request.source_branch_id),
            ItemStatus::InStock,
        )
        .await?;

        let price = price::current_price(&mut tx, REFERENCE_GRADE).await?;

        let record = transaction::insert_row(
            &mut tx,
            &transaction::NewTransactionRow {
                branch_id: &request.source_branch_id,
                kind: TransactionType::Transfer,
                item_id: Some(&request.item_id),
                customer_id: None,
                quantity_g: request.quantity_g,
                unit_price_g: moved.acquisition_price_g,
                labor_amount: Money::zero(),
                total_amount: request.quantity_g * moved.acquisition_price_g,
                price_id: &price.id,
                payment_method: None,
                client_request_id: None,
                cash_report_flagged: false,
                fire_cost: None,
                parent_transaction_id: None,
                notes: None,
                created_by: approved_by,
            },
        )
        .await?;

        stock::append_entry(
            &mut tx,
            &stock::AppendEntry {
                branch_id: &request.source_branch_id,
                product_id: &moved.product_id,
                item_id: Some(&request.item_id),
                entry_type: EntryType::Credit,
                quantity_g: request.quantity_g,
                unit_price_g: moved.acquisition_price_g,
                transaction_id: &record.id,
                reason: LedgerReason::TransferOut,
            },
        )
        .await?;

        item::set_status(
            &mut tx,
            &request.item_id,
            ItemStatus::InStock,
            ItemStatus::Transferred,
        )
        .await?;

        let now = Utc::now();
        let updated = sqlx::query(
            r#"
            UPDATE transfer_request
            SET status = 'approved', approved_by = ?1, approved_at = ?2
            WHERE id = ?3 AND status = 'pending'
            "#,
        )
        .bind(approved_by)
        .bind(now)
        .bind(transfer_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(LedgerError::conflict(format!(
                "transfer {transfer_id} was approved concurrently"
            )));
        }

        tx.commit().await?;
        info!(id = %transfer_id, "Transfer approved");

        audit::record_event(
            &self.pool,
            "transfer_approved",
            "transfer",
            transfer_id,
            Some(approved_by),
            Some(json!({ "transaction_id": record.id })),
        )
        .await;

        self.get(transfer_id).await
    }

    /// Receives an approved request. The actor must act for the target
    /// branch. Debits `transfer_in` and restores the item `in_stock` at
    /// the target.
    pub async fn receive(
        &self,
        transfer_id: &str,
        actor_branch_id: &str,
        received_by: &str,
    ) -> LedgerResult<TransferRequest> {
        let mut tx = self.pool.begin().await?;

        let request = get_in(&mut tx, transfer_id).await?;
        if request.status != TransferStatus::Approved {
            return Err(LedgerError::conflict(format!(
                "transfer {} is not approved (status: {})",
                transfer_id, request.status
            )));
        }
        if actor_branch_id != request.target_branch_id {
            return Err(LedgerError::conflict(format!(
                "transfer {} can only be received by the target branch",
                transfer_id
            )));
        }

        let moved =
            item::get_available(&mut tx, &request.item_id, None, ItemStatus::Transferred).await?;

        let price = price::current_price(&mut tx, REFERENCE_GRADE).await?;

        let record = transaction::insert_row(
            &mut tx,
            &transaction::NewTransactionRow {
                branch_id: &request.target_branch_id,
                kind: TransactionType::Transfer,
                item_id: Some(&request.item_id),
                customer_id: None,
                quantity_g: request.quantity_g,
                unit_price_g: moved.acquisition_price_g,
                labor_amount: Money::zero(),
                total_amount: request.quantity_g * moved.acquisition_price_g,
                price_id: &price.id,
                payment_method: None,
                client_request_id: None,
                cash_report_flagged: false,
                fire_cost: None,
                parent_transaction_id: None,
                notes: None,
                created_by: received_by,
            },
        )
        .await?;

        stock::append_entry(
            &mut tx,
            &stock::AppendEntry {
                branch_id: &request.target_branch_id,
                product_id: &moved.product_id,
                item_id: Some(&request.item_id),
                entry_type: EntryType::Debit,
                quantity_g: request.quantity_g,
                unit_price_g: moved.acquisition_price_g,
                transaction_id: &record.id,
                reason: LedgerReason::TransferIn,
            },
        )
        .await?;

        item::move_to_branch(
            &mut tx,
            &request.item_id,
            &request.target_branch_id,
            ItemStatus::Transferred,
            ItemStatus::InStock,
        )
        .await?;

        let now = Utc::now();
        let updated = sqlx::query(
            r#"
            UPDATE transfer_request
            SET status = 'received', received_by = ?1, received_at = ?2
            WHERE id = ?3 AND status = 'approved'
            "#,
        )
        .bind(received_by)
        .bind(now)
        .bind(transfer_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(LedgerError::conflict(format!(
                "transfer {transfer_id} was received concurrently"
            )));
        }

        tx.commit().await?;
        info!(id = %transfer_id, "Transfer received");

        audit::record_event(
            &self.pool,
            "transfer_received",
            "transfer",
            transfer_id,
            Some(received_by),
            Some(json!({ "transaction_id": record.id })),
        )
        .await;

        self.get(transfer_id).await
    }
}

pub(crate) async fn get_in(
    conn: &mut SqliteConnection,
    id: &str,
) -> LedgerResult<TransferRequest> {
    let row = sqlx::query(
        r#"
        SELECT id, source_branch_id, target_branch_id, item_id, quantity_g,
               status, created_by, created_at, approved_by, approved_at,
               received_by, received_at
        FROM transfer_request
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => row_to_transfer(&row),
        None => Err(LedgerError::not_found("transfer", id)),
    }
}

fn row_to_transfer(row: &SqliteRow) -> LedgerResult<TransferRequest> {
    let quantity: String = row.try_get("quantity_g")?;
    let status: String = row.try_get("status")?;

    Ok(TransferRequest {
        id: row.try_get("id")?,
        source_branch_id: row.try_get("source_branch_id")?,
        target_branch_id: row.try_get("target_branch_id")?,
        item_id: row.try_get("item_id")?,
        quantity_g: decode("quantity_g", &quantity)?,
        status: decode("status", &status)?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        approved_by: row.try_get("approved_by")?,
        approved_at: row.try_get("approved_at")?,
        received_by: row.try_get("received_by")?,
        received_at: row.try_get("received_at")?,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use aurum_core::{ItemStatus, MetalGrade, TransferRequestInput, TransferStatus, Weight};

    use crate::error::LedgerError;
    use crate::repository::testing::{seed_item, seed_price, test_db, w};

    fn request_input(item_id: &str) -> TransferRequestInput {
        TransferRequestInput {
            source_branch_id: "branch-1".to_string(),
            target_branch_id: "branch-2".to_string(),
            item_id: item_id.to_string(),
        }
    }

    #[tokio::test]
    async fn full_handshake_moves_stock_between_branches() {
        let db = test_db().await;
        seed_price(&db, MetalGrade::Has, "2400", "2450").await;
        let item = seed_item(&db, "branch-1", "ring-22k", "10", "2400").await;

        let request = db.transfers().request(request_input(&item.id), "clerk-1").await.unwrap();
        assert_eq!(request.status, TransferStatus::Pending);
        assert_eq!(request.quantity_g, w("10"));

        let approved = db
            .transfers()
            .approve(&request.id, "branch-1", "manager-1")
            .await
            .unwrap();
        assert_eq!(approved.status, TransferStatus::Approved);
        assert_eq!(approved.approved_by.as_deref(), Some("manager-1"));
        assert!(approved.approved_at.is_some());

        // Metal already off the source shelf, not yet on the target's.
        let source = db.stock_ledger().balance("branch-1", "ring-22k").await.unwrap();
        assert_eq!(source, -w("10"));
        let target = db.stock_ledger().balance("branch-2", "ring-22k").await.unwrap();
        assert_eq!(target, Weight::zero());
        let parked = db.gold_items().get(&item.id).await.unwrap();
        assert_eq!(parked.status, ItemStatus::Transferred);

        let received = db
            .transfers()
            .receive(&request.id, "branch-2", "manager-2")
            .await
            .unwrap();
        assert_eq!(received.status, TransferStatus::Received);
        assert_eq!(received.received_by.as_deref(), Some("manager-2"));

        let target = db.stock_ledger().balance("branch-2", "ring-22k").await.unwrap();
        assert_eq!(target, w("10"));

        let arrived = db.gold_items().get(&item.id).await.unwrap();
        assert_eq!(arrived.status, ItemStatus::InStock);
        assert_eq!(arrived.branch_id, "branch-2");
    }

    #[tokio::test]
    async fn wrong_branch_actor_is_rejected() {
        let db = test_db().await;
        seed_price(&db, MetalGrade::Has, "2400", "2450").await;
        let item = seed_item(&db, "branch-1", "ring-22k", "10", "2400").await;

        let request = db.transfers().request(request_input(&item.id), "clerk-1").await.unwrap();

        let err = db
            .transfers()
            .approve(&request.id, "branch-2", "manager-2")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { .. }));

        db.transfers().approve(&request.id, "branch-1", "manager-1").await.unwrap();

        let err = db
            .transfers()
            .receive(&request.id, "branch-1", "manager-1")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { .. }));
    }

    #[tokio::test]
    async fn handshake_steps_enforce_status_order() {
        let db = test_db().await;
        seed_price(&db, MetalGrade::Has, "2400", "2450").await;
        let item = seed_item(&db, "branch-1", "ring-22k", "10", "2400").await;

        let request = db.transfers().request(request_input(&item.id), "clerk-1").await.unwrap();

        // Receive before approve.
        let err = db
            .transfers()
            .receive(&request.id, "branch-2", "manager-2")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { .. }));

        db.transfers().approve(&request.id, "branch-1", "manager-1").await.unwrap();

        // Approve twice.
        let err = db
            .transfers()
            .approve(&request.id, "branch-1", "manager-1")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { .. }));
    }

    #[tokio::test]
    async fn request_guards_item_location_and_branches() {
        let db = test_db().await;
        let item = seed_item(&db, "branch-3", "ring-22k", "10", "2400").await;

        // Item is not at the source branch.
        let err = db.transfers().request(request_input(&item.id), "clerk-1").await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));

        // Source == target.
        let err = db
            .transfers()
            .request(
                aurum_core::TransferRequestInput {
                    source_branch_id: "branch-3".to_string(),
                    target_branch_id: "branch-3".to_string(),
                    item_id: item.id.clone(),
                },
                "clerk-1",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { .. }));
    }
}
