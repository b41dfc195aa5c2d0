//! # Transaction Orchestrator
//!
//! Every business operation runs through here, in exactly one sqlx
//! transaction.
//!
//! ## Operation Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                 One Business Operation, One Transaction             │
//! │                                                                     │
//! │  pool.begin()                                                       │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  1. idempotency lookup (branch_id, client_request_id)               │
//! │       │        └── hit? return the original row, write nothing      │
//! │       ▼                                                             │
//! │  2. pin the price row (current non-backdated for the grade)         │
//! │       ▼                                                             │
//! │  3. guarded item read (id + branch + status)                        │
//! │       ▼                                                             │
//! │  4. invariant checks (exact decimal, no tolerances)                 │
//! │       ▼                                                             │
//! │  5. INSERT ledger_transaction row                                   │
//! │       ▼                                                             │
//! │  6. append stock_ledger entries                                     │
//! │       ▼                                                             │
//! │  7. guarded item / request transition (CAS via rows_affected)       │
//! │       ▼                                                             │
//! │  tx.commit()                                                        │
//! │       ▼                                                             │
//! │  8. best-effort audit events (outside the atomic unit)              │
//! │                                                                     │
//! │  Any error before commit drops the transaction - sqlx rolls it      │
//! │  back, partial writes are impossible.                               │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use serde_json::json;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use aurum_core::validation::{
    validate_fire_balance, validate_non_negative_money, validate_non_negative_weight,
    validate_positive_weight,
};
use aurum_core::{
    cash_report_threshold, weight_discrepancy_threshold, AdjustmentInput, EntryType, ItemStatus,
    LedgerReason, Money, PaymentMethod, ProductionFireInput, PurchaseInput, ReturnInput,
    SaleInput, ScrapInput, TransactionRecord, TransactionType, Weight, REFERENCE_GRADE,
};

use crate::error::{LedgerError, LedgerResult};
use crate::repository::{audit, decode, fire_rate, item, new_id, price, stock};

/// Repository orchestrating all business operations.
#[derive(Debug, Clone)]
pub struct TransactionRepository {
    pool: SqlitePool,
}

impl TransactionRepository {
    /// Creates a new TransactionRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TransactionRepository { pool }
    }

    /// Gets a transaction by ID.
    pub async fn get(&self, id: &str) -> LedgerResult<TransactionRecord> {
        let mut conn = self.pool.acquire().await?;
        get_in(&mut conn, id).await
    }

    /// Sells one in-stock item at the current sell price for the grade.
    ///
    /// total = weight × sell price + labor. When the product carries an
    /// effective fire rate, `fire_cost = weight × rate × acquisition
    /// price` is recorded on the row but never added to the total. A
    /// cash settlement whose exact-decimal total reaches the reporting
    /// threshold is flagged.
    pub async fn create_sale(
        &self,
        input: SaleInput,
        created_by: &str,
    ) -> LedgerResult<TransactionRecord> {
        validate_non_negative_money("labor_amount", input.labor_amount)?;

        let mut tx = self.pool.begin().await?;

        if let Some(key) = input.client_request_id.as_deref() {
            if let Some(existing) = find_by_dedup_key(&mut tx, &input.branch_id, key).await? {
                debug!(id = %existing.id, key, "Sale replay, returning original");
                return Ok(existing);
            }
        }

        let price = price::current_price(&mut tx, input.grade).await?;
        let sold = item::get_available(
            &mut tx,
            &input.item_id,
            Some(&input.branch_id),
            ItemStatus::InStock,
        )
        .await?;

        let total = sold.actual_weight_g * price.sell_price_g + input.labor_amount;
        let fire_cost =
            match fire_rate::effective_rate_at(&mut tx, &sold.product_id, input.grade, Utc::now())
                .await?
            {
                Some(rate) => Some((sold.actual_weight_g * rate) * sold.acquisition_price_g),
                None => None,
            };

        let record = insert_row(
            &mut tx,
            &NewTransactionRow {
                branch_id: &input.branch_id,
                kind: TransactionType::Sale,
                item_id: Some(&input.item_id),
                customer_id: input.customer_id.as_deref(),
                quantity_g: sold.actual_weight_g,
                unit_price_g: price.sell_price_g,
                labor_amount: input.labor_amount,
                total_amount: total,
                price_id: &price.id,
                payment_method: Some(input.payment_method),
                client_request_id: input.client_request_id.as_deref(),
                cash_report_flagged: flag_large_cash(Some(input.payment_method), total),
                fire_cost,
                parent_transaction_id: None,
                notes: input.notes.as_deref(),
                created_by,
            },
        )
        .await?;

        stock::append_entry(
            &mut tx,
            &stock::AppendEntry {
                branch_id: &input.branch_id,
                product_id: &sold.product_id,
                item_id: Some(&input.item_id),
                entry_type: EntryType::Credit,
                quantity_g: sold.actual_weight_g,
                unit_price_g: price.sell_price_g,
                transaction_id: &record.id,
                reason: LedgerReason::Sale,
            },
        )
        .await?;

        item::set_status(&mut tx, &input.item_id, ItemStatus::InStock, ItemStatus::Sold).await?;

        tx.commit().await?;
        info!(id = %record.id, total = %record.total_amount, "Sale recorded");

        audit_created(&self.pool, &record).await;
        Ok(record)
    }

    /// Records a gram-based purchase (stock in, no discrete item).
    ///
    /// The unit price is the negotiated one; the current price row for
    /// the grade is pinned as `price_id` to anchor the market rate at
    /// the instant of purchase.
    pub async fn create_purchase(
        &self,
        input: PurchaseInput,
        created_by: &str,
    ) -> LedgerResult<TransactionRecord> {
        validate_positive_weight("quantity_g", input.quantity_g)?;
        validate_non_negative_money("unit_price_g", input.unit_price_g)?;
        validate_non_negative_money("labor_amount", input.labor_amount)?;

        let mut tx = self.pool.begin().await?;

        if let Some(key) = input.client_request_id.as_deref() {
            if let Some(existing) = find_by_dedup_key(&mut tx, &input.branch_id, key).await? {
                debug!(id = %existing.id, key, "Purchase replay, returning original");
                return Ok(existing);
            }
        }

        let price = price::current_price(&mut tx, input.grade).await?;
        let total = input.quantity_g * input.unit_price_g + input.labor_amount;

        let record = insert_row(
            &mut tx,
            &NewTransactionRow {
                branch_id: &input.branch_id,
                kind: TransactionType::Purchase,
                item_id: None,
                customer_id: None,
                quantity_g: input.quantity_g,
                unit_price_g: input.unit_price_g,
                labor_amount: input.labor_amount,
                total_amount: total,
                price_id: &price.id,
                payment_method: Some(input.payment_method),
                client_request_id: input.client_request_id.as_deref(),
                cash_report_flagged: flag_large_cash(Some(input.payment_method), total),
                fire_cost: None,
                parent_transaction_id: None,
                notes: input.notes.as_deref(),
                created_by,
            },
        )
        .await?;

        stock::append_entry(
            &mut tx,
            &stock::AppendEntry {
                branch_id: &input.branch_id,
                product_id: &input.product_id,
                item_id: None,
                entry_type: EntryType::Debit,
                quantity_g: input.quantity_g,
                unit_price_g: input.unit_price_g,
                transaction_id: &record.id,
                reason: LedgerReason::Purchase,
            },
        )
        .await?;

        tx.commit().await?;
        info!(id = %record.id, quantity = %record.quantity_g, "Purchase recorded");

        audit_created(&self.pool, &record).await;
        Ok(record)
    }

    /// Returns a previously sold item against its sale.
    ///
    /// The unit price is inherited from the parent sale; the returned
    /// quantity is the re-weighed one. A discrepancy beyond the
    /// threshold between sold and returned weight is recorded as an
    /// audit observation after commit: informational, never blocking.
    pub async fn create_return(
        &self,
        input: ReturnInput,
        created_by: &str,
    ) -> LedgerResult<TransactionRecord> {
        validate_positive_weight("quantity_g", input.quantity_g)?;
        validate_non_negative_money("labor_refund_amount", input.labor_refund_amount)?;

        let mut tx = self.pool.begin().await?;

        if let Some(key) = input.client_request_id.as_deref() {
            if let Some(existing) = find_by_dedup_key(&mut tx, &input.branch_id, key).await? {
                debug!(id = %existing.id, key, "Return replay, returning original");
                return Ok(existing);
            }
        }

        let parent = get_in(&mut tx, &input.parent_transaction_id).await?;
        if parent.kind != TransactionType::Sale {
            return Err(LedgerError::conflict(format!(
                "parent transaction {} is not a sale",
                parent.id
            )));
        }
        if parent.branch_id != input.branch_id {
            return Err(LedgerError::conflict(format!(
                "parent sale {} belongs to another branch",
                parent.id
            )));
        }
        if parent.item_id.as_deref() != Some(input.item_id.as_str()) {
            return Err(LedgerError::conflict(format!(
                "item {} does not match parent sale {}",
                input.item_id, parent.id
            )));
        }

        let returns: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM ledger_transaction WHERE parent_transaction_id = ?1 AND type = 'return'",
        )
        .bind(&parent.id)
        .fetch_one(&mut *tx)
        .await?;
        if returns > 0 {
            return Err(LedgerError::conflict(format!(
                "sale {} has already been returned",
                parent.id
            )));
        }

        let returned = item::get_available(
            &mut tx,
            &input.item_id,
            Some(&input.branch_id),
            ItemStatus::Sold,
        )
        .await?;

        let discrepancy = (input.quantity_g - parent.quantity_g).abs();
        let total = input.quantity_g * parent.unit_price_g + input.labor_refund_amount;

        let record = insert_row(
            &mut tx,
            &NewTransactionRow {
                branch_id: &input.branch_id,
                kind: TransactionType::Return,
                item_id: Some(&input.item_id),
                customer_id: parent.customer_id.as_deref(),
                quantity_g: input.quantity_g,
                unit_price_g: parent.unit_price_g,
                labor_amount: input.labor_refund_amount,
                total_amount: total,
                price_id: &parent.price_id,
                payment_method: Some(input.payment_method),
                client_request_id: input.client_request_id.as_deref(),
                cash_report_flagged: false,
                fire_cost: None,
                parent_transaction_id: Some(&parent.id),
                notes: input.notes.as_deref(),
                created_by,
            },
        )
        .await?;

        stock::append_entry(
            &mut tx,
            &stock::AppendEntry {
                branch_id: &input.branch_id,
                product_id: &returned.product_id,
                item_id: Some(&input.item_id),
                entry_type: EntryType::Debit,
                quantity_g: input.quantity_g,
                unit_price_g: parent.unit_price_g,
                transaction_id: &record.id,
                reason: LedgerReason::Return,
            },
        )
        .await?;

        item::set_status(&mut tx, &input.item_id, ItemStatus::Sold, ItemStatus::Returned).await?;

        tx.commit().await?;
        info!(id = %record.id, parent = %parent.id, "Return recorded");

        audit_created(&self.pool, &record).await;
        if discrepancy > weight_discrepancy_threshold() {
            audit::record_event(
                &self.pool,
                "weight_discrepancy",
                "transaction",
                &record.id,
                Some(created_by),
                Some(json!({
                    "sold_g": parent.quantity_g.to_canonical_string(),
                    "returned_g": input.quantity_g.to_canonical_string(),
                    "discrepancy_g": discrepancy.to_canonical_string(),
                })),
            )
            .await;
        }
        Ok(record)
    }

    /// Records a manual stock adjustment.
    ///
    /// The caller supplies entry type, quantity, and price; the row is
    /// anchored to the latest reference-grade price.
    pub async fn create_adjustment(
        &self,
        input: AdjustmentInput,
        created_by: &str,
    ) -> LedgerResult<TransactionRecord> {
        let mut tx = self.pool.begin().await?;

        if let Some(key) = input.client_request_id.as_deref() {
            if let Some(existing) = find_by_dedup_key(&mut tx, &input.branch_id, key).await? {
                debug!(id = %existing.id, key, "Adjustment replay, returning original");
                return Ok(existing);
            }
        }

        let record = adjustment_in(&mut tx, &input, created_by).await?;

        tx.commit().await?;
        info!(id = %record.id, "Adjustment recorded");

        audit_created(&self.pool, &record).await;
        Ok(record)
    }

    /// Scraps one in-stock item at its acquisition price.
    pub async fn create_scrap(
        &self,
        input: ScrapInput,
        created_by: &str,
    ) -> LedgerResult<TransactionRecord> {
        let mut tx = self.pool.begin().await?;

        if let Some(key) = input.client_request_id.as_deref() {
            if let Some(existing) = find_by_dedup_key(&mut tx, &input.branch_id, key).await? {
                debug!(id = %existing.id, key, "Scrap replay, returning original");
                return Ok(existing);
            }
        }

        let price = price::current_price(&mut tx, REFERENCE_GRADE).await?;
        let scrapped = item::get_available(
            &mut tx,
            &input.item_id,
            Some(&input.branch_id),
            ItemStatus::InStock,
        )
        .await?;

        let record = insert_row(
            &mut tx,
            &NewTransactionRow {
                branch_id: &input.branch_id,
                kind: TransactionType::Scrap,
                item_id: Some(&input.item_id),
                customer_id: None,
                quantity_g: scrapped.actual_weight_g,
                unit_price_g: scrapped.acquisition_price_g,
                labor_amount: Money::zero(),
                total_amount: scrapped.actual_weight_g * scrapped.acquisition_price_g,
                price_id: &price.id,
                payment_method: None,
                client_request_id: input.client_request_id.as_deref(),
                cash_report_flagged: false,
                fire_cost: None,
                parent_transaction_id: None,
                notes: input.notes.as_deref(),
                created_by,
            },
        )
        .await?;

        stock::append_entry(
            &mut tx,
            &stock::AppendEntry {
                branch_id: &input.branch_id,
                product_id: &scrapped.product_id,
                item_id: Some(&input.item_id),
                entry_type: EntryType::Credit,
                quantity_g: scrapped.actual_weight_g,
                unit_price_g: scrapped.acquisition_price_g,
                transaction_id: &record.id,
                reason: LedgerReason::Scrap,
            },
        )
        .await?;

        item::set_status(&mut tx, &input.item_id, ItemStatus::InStock, ItemStatus::Scrapped)
            .await?;

        tx.commit().await?;
        info!(id = %record.id, "Scrap recorded");

        audit_created(&self.pool, &record).await;
        Ok(record)
    }

    /// Records a production run with fire loss.
    ///
    /// Conservation is checked exactly before any write:
    /// `output == input − fire`. Ledger effect: the input product is
    /// credited for the full input (split into the converted output and
    /// the fire loss), the output product is debited for the output.
    pub async fn create_production_fire(
        &self,
        input: ProductionFireInput,
        created_by: &str,
    ) -> LedgerResult<TransactionRecord> {
        validate_positive_weight("input_quantity_g", input.input_quantity_g)?;
        validate_positive_weight("output_quantity_g", input.output_quantity_g)?;
        validate_non_negative_weight("fire_quantity_g", input.fire_quantity_g)?;
        validate_non_negative_money("unit_price_g", input.unit_price_g)?;
        validate_fire_balance(
            input.input_quantity_g,
            input.fire_quantity_g,
            input.output_quantity_g,
        )?;

        let mut tx = self.pool.begin().await?;

        if let Some(key) = input.client_request_id.as_deref() {
            if let Some(existing) = find_by_dedup_key(&mut tx, &input.branch_id, key).await? {
                debug!(id = %existing.id, key, "Production replay, returning original");
                return Ok(existing);
            }
        }

        let price = price::current_price(&mut tx, input.grade).await?;

        let fire_cost = if input.fire_quantity_g.is_positive() {
            Some(input.fire_quantity_g * input.unit_price_g)
        } else {
            None
        };

        let generated = format!(
            "production_fire: input={} output={} fire={}",
            input.input_quantity_g.to_canonical_string(),
            input.output_quantity_g.to_canonical_string(),
            input.fire_quantity_g.to_canonical_string()
        );
        let notes = match input.notes.as_deref() {
            Some(extra) => format!("{generated}; {extra}"),
            None => generated,
        };

        let record = insert_row(
            &mut tx,
            &NewTransactionRow {
                branch_id: &input.branch_id,
                kind: TransactionType::Adjustment,
                item_id: None,
                customer_id: None,
                quantity_g: input.input_quantity_g,
                unit_price_g: input.unit_price_g,
                labor_amount: Money::zero(),
                total_amount: Money::zero(),
                price_id: &price.id,
                payment_method: None,
                client_request_id: input.client_request_id.as_deref(),
                cash_report_flagged: false,
                fire_cost,
                parent_transaction_id: None,
                notes: Some(&notes),
                created_by,
            },
        )
        .await?;

        // Input product gives up the converted quantity...
        stock::append_entry(
            &mut tx,
            &stock::AppendEntry {
                branch_id: &input.branch_id,
                product_id: &input.input_product_id,
                item_id: None,
                entry_type: EntryType::Credit,
                quantity_g: input.output_quantity_g,
                unit_price_g: input.unit_price_g,
                transaction_id: &record.id,
                reason: LedgerReason::Adjustment,
            },
        )
        .await?;

        // ...and the fire loss, explicitly on the ledger.
        if input.fire_quantity_g.is_positive() {
            stock::append_entry(
                &mut tx,
                &stock::AppendEntry {
                    branch_id: &input.branch_id,
                    product_id: &input.input_product_id,
                    item_id: None,
                    entry_type: EntryType::Credit,
                    quantity_g: input.fire_quantity_g,
                    unit_price_g: input.unit_price_g,
                    transaction_id: &record.id,
                    reason: LedgerReason::Fire,
                },
            )
            .await?;
        }

        // The output product gains the converted quantity.
        stock::append_entry(
            &mut tx,
            &stock::AppendEntry {
                branch_id: &input.branch_id,
                product_id: &input.output_product_id,
                item_id: None,
                entry_type: EntryType::Debit,
                quantity_g: input.output_quantity_g,
                unit_price_g: input.unit_price_g,
                transaction_id: &record.id,
                reason: LedgerReason::Purchase,
            },
        )
        .await?;

        tx.commit().await?;
        info!(
            id = %record.id,
            input = %input.input_quantity_g,
            fire = %input.fire_quantity_g,
            "Production recorded"
        );

        audit_created(&self.pool, &record).await;
        Ok(record)
    }
}

/// Cash settlements at or above the reporting threshold are flagged.
/// Exact decimal comparison, never through a float.
fn flag_large_cash(payment_method: Option<PaymentMethod>, total: Money) -> bool {
    payment_method == Some(PaymentMethod::Cash) && total >= cash_report_threshold()
}

// =============================================================================
// Crate-Internal Composition
// =============================================================================

/// A transaction row, built by an orchestrator operation.
pub(crate) struct NewTransactionRow<'a> {
    pub branch_id: &'a str,
    pub kind: TransactionType,
    pub item_id: Option<&'a str>,
    pub customer_id: Option<&'a str>,
    pub quantity_g: Weight,
    pub unit_price_g: Money,
    pub labor_amount: Money,
    pub total_amount: Money,
    pub price_id: &'a str,
    pub payment_method: Option<PaymentMethod>,
    pub client_request_id: Option<&'a str>,
    pub cash_report_flagged: bool,
    pub fire_cost: Option<Money>,
    pub parent_transaction_id: Option<&'a str>,
    pub notes: Option<&'a str>,
    pub created_by: &'a str,
}

/// Inserts a transaction row on the caller's open transaction. The
/// unique dedup index is the last line of defense against a replay that
/// raced past the pre-insert lookup.
pub(crate) async fn insert_row(
    conn: &mut SqliteConnection,
    row: &NewTransactionRow<'_>,
) -> LedgerResult<TransactionRecord> {
    let record = TransactionRecord {
        id: new_id(),
        branch_id: row.branch_id.to_string(),
        kind: row.kind,
        item_id: row.item_id.map(str::to_string),
        customer_id: row.customer_id.map(str::to_string),
        quantity_g: row.quantity_g,
        unit_price_g: row.unit_price_g,
        labor_amount: row.labor_amount,
        total_amount: row.total_amount,
        price_id: row.price_id.to_string(),
        payment_method: row.payment_method,
        client_request_id: row.client_request_id.map(str::to_string),
        cash_report_flagged: row.cash_report_flagged,
        fire_cost: row.fire_cost,
        parent_transaction_id: row.parent_transaction_id.map(str::to_string),
        notes: row.notes.map(str::to_string),
        created_by: row.created_by.to_string(),
        created_at: Utc::now(),
    };

    sqlx::query(
        r#"
        INSERT INTO ledger_transaction (
            id, branch_id, type, item_id, customer_id,
            quantity_g, unit_price_g, labor_amount, total_amount,
            price_id, payment_method, client_request_id,
            cash_report_flagged, fire_cost, parent_transaction_id,
            notes, created_by, created_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9,
            ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18
        )
        "#,
    )
    .bind(&record.id)
    .bind(&record.branch_id)
    .bind(record.kind.as_str())
    .bind(record.item_id.as_deref())
    .bind(record.customer_id.as_deref())
    .bind(record.quantity_g.to_canonical_string())
    .bind(record.unit_price_g.to_canonical_string())
    .bind(record.labor_amount.to_canonical_string())
    .bind(record.total_amount.to_canonical_string())
    .bind(&record.price_id)
    .bind(record.payment_method.map(|m| m.as_str()))
    .bind(record.client_request_id.as_deref())
    .bind(record.cash_report_flagged)
    .bind(record.fire_cost.map(|c| c.to_canonical_string()))
    .bind(record.parent_transaction_id.as_deref())
    .bind(record.notes.as_deref())
    .bind(&record.created_by)
    .bind(record.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(record)
}

/// Books one manual adjustment on the caller's open transaction:
/// validates, anchors the latest reference-grade price, inserts the
/// transaction row, and appends the ledger entry. Never commits; the
/// caller owns the unit of work so the adjustment can be composed with
/// other writes atomically (alert resolution does this).
pub(crate) async fn adjustment_in(
    conn: &mut SqliteConnection,
    input: &AdjustmentInput,
    created_by: &str,
) -> LedgerResult<TransactionRecord> {
    validate_positive_weight("quantity_g", input.quantity_g)?;
    validate_non_negative_money("unit_price_g", input.unit_price_g)?;

    let price = price::current_price(conn, REFERENCE_GRADE).await?;

    let record = insert_row(
        conn,
        &NewTransactionRow {
            branch_id: &input.branch_id,
            kind: TransactionType::Adjustment,
            item_id: None,
            customer_id: None,
            quantity_g: input.quantity_g,
            unit_price_g: input.unit_price_g,
            labor_amount: Money::zero(),
            total_amount: input.quantity_g * input.unit_price_g,
            price_id: &price.id,
            payment_method: None,
            client_request_id: input.client_request_id.as_deref(),
            cash_report_flagged: false,
            fire_cost: None,
            parent_transaction_id: None,
            notes: input.notes.as_deref(),
            created_by,
        },
    )
    .await?;

    stock::append_entry(
        conn,
        &stock::AppendEntry {
            branch_id: &input.branch_id,
            product_id: &input.product_id,
            item_id: None,
            entry_type: input.entry_type,
            quantity_g: input.quantity_g,
            unit_price_g: input.unit_price_g,
            transaction_id: &record.id,
            reason: LedgerReason::Adjustment,
        },
    )
    .await?;

    Ok(record)
}

/// Idempotency lookup on the caller's open transaction.
pub(crate) async fn find_by_dedup_key(
    conn: &mut SqliteConnection,
    branch_id: &str,
    client_request_id: &str,
) -> LedgerResult<Option<TransactionRecord>> {
    let row = sqlx::query(
        r#"
        SELECT id, branch_id, type, item_id, customer_id,
               quantity_g, unit_price_g, labor_amount, total_amount,
               price_id, payment_method, client_request_id,
               cash_report_flagged, fire_cost, parent_transaction_id,
               notes, created_by, created_at
        FROM ledger_transaction
        WHERE branch_id = ?1 AND client_request_id = ?2
        "#,
    )
    .bind(branch_id)
    .bind(client_request_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(row_to_record).transpose()
}

/// Lookup by id on the caller's connection.
pub(crate) async fn get_in(
    conn: &mut SqliteConnection,
    id: &str,
) -> LedgerResult<TransactionRecord> {
    let row = sqlx::query(
        r#"
        SELECT id, branch_id, type, item_id, customer_id,
               quantity_g, unit_price_g, labor_amount, total_amount,
               price_id, payment_method, client_request_id,
               cash_report_flagged, fire_cost, parent_transaction_id,
               notes, created_by, created_at
        FROM ledger_transaction
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => row_to_record(&row),
        None => Err(LedgerError::not_found("transaction", id)),
    }
}

/// Best-effort "transaction created" audit event, after commit.
pub(crate) async fn audit_created(pool: &SqlitePool, record: &TransactionRecord) {
    audit::record_event(
        pool,
        "transaction_created",
        "transaction",
        &record.id,
        Some(&record.created_by),
        Some(json!({
            "type": record.kind.as_str(),
            "branch_id": record.branch_id,
            "total_amount": record.total_amount.to_canonical_string(),
        })),
    )
    .await;
}

fn row_to_record(row: &SqliteRow) -> LedgerResult<TransactionRecord> {
    let kind: String = row.try_get("type")?;
    let quantity: String = row.try_get("quantity_g")?;
    let unit_price: String = row.try_get("unit_price_g")?;
    let labor: String = row.try_get("labor_amount")?;
    let total: String = row.try_get("total_amount")?;
    let payment: Option<String> = row.try_get("payment_method")?;
    let fire_cost: Option<String> = row.try_get("fire_cost")?;

    Ok(TransactionRecord {
        id: row.try_get("id")?,
        branch_id: row.try_get("branch_id")?,
        kind: decode("type", &kind)?,
        item_id: row.try_get("item_id")?,
        customer_id: row.try_get("customer_id")?,
        quantity_g: decode("quantity_g", &quantity)?,
        unit_price_g: decode("unit_price_g", &unit_price)?,
        labor_amount: decode("labor_amount", &labor)?,
        total_amount: decode("total_amount", &total)?,
        price_id: row.try_get("price_id")?,
        payment_method: payment
            .as_deref()
            .map(|p| decode("payment_method", p))
            .transpose()?,
        client_request_id: row.try_get("client_request_id")?,
        cash_report_flagged: row.try_get("cash_report_flagged")?,
        fire_cost: fire_cost
            .as_deref()
            .map(|c| decode("fire_cost", c))
            .transpose()?,
        parent_transaction_id: row.try_get("parent_transaction_id")?,
        notes: row.try_get("notes")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use aurum_core::{
        AdjustmentInput, EntryType, ItemStatus, MetalGrade, PaymentMethod, ProductionFireInput,
        PurchaseInput, Rate, ReturnInput, SaleInput, ScrapInput, TransactionType, ValidationError,
        Weight,
    };

    use crate::error::LedgerError;
    use crate::repository::testing::{m, seed_item, seed_price, test_db, w};

    fn sale_input(branch: &str, item_id: &str) -> SaleInput {
        SaleInput {
            branch_id: branch.to_string(),
            item_id: item_id.to_string(),
            grade: MetalGrade::K22,
            customer_id: Some("customer-1".to_string()),
            labor_amount: m("150"),
            payment_method: PaymentMethod::Pos,
            client_request_id: None,
            notes: None,
        }
    }

    fn purchase_input(branch: &str, product: &str, qty: &str, unit: &str) -> PurchaseInput {
        PurchaseInput {
            branch_id: branch.to_string(),
            product_id: product.to_string(),
            grade: MetalGrade::K22,
            quantity_g: w(qty),
            unit_price_g: m(unit),
            labor_amount: m("0"),
            payment_method: PaymentMethod::Pos,
            client_request_id: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn sale_happy_path_balances_out() {
        let db = test_db().await;
        seed_price(&db, MetalGrade::K22, "2400", "2500").await;

        // Stock the branch, then sell the piece made from that metal.
        db.transactions()
            .create_purchase(purchase_input("branch-1", "ring-22k", "10", "2400"), "user-1")
            .await
            .unwrap();
        let item = seed_item(&db, "branch-1", "ring-22k", "10", "2400").await;

        let sale = db
            .transactions()
            .create_sale(sale_input("branch-1", &item.id), "user-1")
            .await
            .unwrap();

        assert_eq!(sale.kind, TransactionType::Sale);
        assert_eq!(sale.quantity_g, w("10"));
        assert_eq!(sale.unit_price_g, m("2500"));
        assert_eq!(sale.total_amount, m("25150")); // 10 × 2500 + 150 labor
        assert!(!sale.cash_report_flagged);

        // Purchase debit and sale credit cancel exactly.
        let balance = db.stock_ledger().balance("branch-1", "ring-22k").await.unwrap();
        assert_eq!(balance, Weight::zero());

        // Materialized chain agrees with the ground-truth sum.
        let entries = db.stock_ledger().entries("branch-1", "ring-22k", 1).await.unwrap();
        assert_eq!(entries[0].running_balance_g, balance);

        let sold = db.gold_items().get(&item.id).await.unwrap();
        assert_eq!(sold.status, ItemStatus::Sold);

        // The transaction-created observation landed after commit.
        let events = db.audit_log().events_for_entity("transaction", &sale.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "transaction_created");
    }

    #[tokio::test]
    async fn sale_requires_active_price() {
        let db = test_db().await;
        let item = seed_item(&db, "branch-1", "ring-22k", "10", "2400").await;

        let err = db
            .transactions()
            .create_sale(sale_input("branch-1", &item.id), "user-1")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn sale_replay_returns_original_without_new_writes() {
        let db = test_db().await;
        seed_price(&db, MetalGrade::K22, "2400", "2500").await;
        let item = seed_item(&db, "branch-1", "ring-22k", "10", "2400").await;

        let mut input = sale_input("branch-1", &item.id);
        input.client_request_id = Some("req-1".to_string());

        let first = db.transactions().create_sale(input.clone(), "user-1").await.unwrap();
        let second = db.transactions().create_sale(input, "user-1").await.unwrap();

        assert_eq!(first.id, second.id);

        // Exactly one set of ledger entries.
        let entries = db.stock_ledger().entries_for_transaction(&first.id).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn dedup_key_is_scoped_per_branch() {
        let db = test_db().await;
        seed_price(&db, MetalGrade::K22, "2400", "2500").await;

        let mut a = purchase_input("branch-1", "ring-22k", "5", "2400");
        a.client_request_id = Some("req-1".to_string());
        let mut b = purchase_input("branch-2", "ring-22k", "5", "2400");
        b.client_request_id = Some("req-1".to_string());

        let first = db.transactions().create_purchase(a, "user-1").await.unwrap();
        let second = db.transactions().create_purchase(b, "user-2").await.unwrap();

        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn second_sale_of_same_item_loses() {
        let db = test_db().await;
        seed_price(&db, MetalGrade::K22, "2400", "2500").await;
        let item = seed_item(&db, "branch-1", "ring-22k", "10", "2400").await;

        db.transactions()
            .create_sale(sale_input("branch-1", &item.id), "user-1")
            .await
            .unwrap();

        // The item is already sold; the loser sees "not available", it
        // does not block or double-sell.
        let err = db
            .transactions()
            .create_sale(sale_input("branch-1", &item.id), "user-2")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn large_cash_total_is_flagged_exactly_at_threshold() {
        let db = test_db().await;
        seed_price(&db, MetalGrade::K22, "1900", "2000").await;

        // 10 g × 2000 = exactly 20 000.
        let item = seed_item(&db, "branch-1", "ring-22k", "10", "1900").await;
        let mut input = sale_input("branch-1", &item.id);
        input.labor_amount = m("0");
        input.payment_method = PaymentMethod::Cash;
        let sale = db.transactions().create_sale(input, "user-1").await.unwrap();
        assert!(sale.cash_report_flagged);

        // Same total, settled by POS: not flagged.
        let item = seed_item(&db, "branch-1", "ring-22k", "10", "1900").await;
        let mut input = sale_input("branch-1", &item.id);
        input.labor_amount = m("0");
        let sale = db.transactions().create_sale(input, "user-1").await.unwrap();
        assert!(!sale.cash_report_flagged);

        // One ten-thousandth below the threshold: not flagged. This is
        // the comparison a float would get wrong.
        let item = seed_item(&db, "branch-1", "ring-22k", "9.99995", "1900").await;
        let mut input = sale_input("branch-1", &item.id);
        input.labor_amount = m("0");
        input.payment_method = PaymentMethod::Cash;
        let sale = db.transactions().create_sale(input, "user-1").await.unwrap();
        assert_eq!(sale.total_amount, m("19999.9"));
        assert!(!sale.cash_report_flagged);
    }

    #[tokio::test]
    async fn fire_cost_is_recorded_but_not_added_to_total() {
        let db = test_db().await;
        seed_price(&db, MetalGrade::K22, "2400", "2500").await;
        db.fire_rates()
            .set_product_rate("ring-22k", None, Rate::parse("0.5").unwrap(), Utc::now())
            .await
            .unwrap();

        let item = seed_item(&db, "branch-1", "ring-22k", "100", "2000").await;
        let mut input = sale_input("branch-1", &item.id);
        input.labor_amount = m("0");

        let sale = db.transactions().create_sale(input, "user-1").await.unwrap();

        // fire cost = 100 g × 0.5% × 2000 = 1000; total stays 100 × 2500.
        assert_eq!(sale.fire_cost, Some(m("1000")));
        assert_eq!(sale.total_amount, m("250000"));
    }

    #[tokio::test]
    async fn purchase_debits_stock_and_pins_price_row() {
        let db = test_db().await;
        let pinned = seed_price(&db, MetalGrade::K22, "2400", "2500").await;

        let purchase = db
            .transactions()
            .create_purchase(purchase_input("branch-1", "ring-22k", "12.5", "2350"), "user-1")
            .await
            .unwrap();

        assert_eq!(purchase.price_id, pinned.id);
        assert_eq!(purchase.unit_price_g, m("2350"));
        assert_eq!(purchase.total_amount, m("29375")); // 12.5 × 2350

        let entries = db.stock_ledger().entries_for_transaction(&purchase.id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_type, EntryType::Debit);
        assert_eq!(entries[0].running_balance_g, w("12.5"));
    }

    #[tokio::test]
    async fn return_inherits_parent_price_and_flags_discrepancy() {
        let db = test_db().await;
        seed_price(&db, MetalGrade::K22, "2400", "2500").await;
        let item = seed_item(&db, "branch-1", "ring-22k", "10", "2400").await;

        let baseline = db.stock_ledger().balance("branch-1", "ring-22k").await.unwrap();

        let sale = db
            .transactions()
            .create_sale(sale_input("branch-1", &item.id), "user-1")
            .await
            .unwrap();

        // Re-weighed 0.05 g light, beyond the 0.01 g threshold.
        let ret = db
            .transactions()
            .create_return(
                ReturnInput {
                    branch_id: "branch-1".to_string(),
                    parent_transaction_id: sale.id.clone(),
                    item_id: item.id.clone(),
                    quantity_g: w("9.95"),
                    labor_refund_amount: m("0"),
                    payment_method: PaymentMethod::Cash,
                    client_request_id: None,
                    notes: None,
                },
                "user-1",
            )
            .await
            .unwrap();

        assert_eq!(ret.kind, TransactionType::Return);
        assert_eq!(ret.unit_price_g, sale.unit_price_g);
        assert_eq!(ret.price_id, sale.price_id);
        assert_eq!(ret.parent_transaction_id.as_deref(), Some(sale.id.as_str()));
        assert_eq!(ret.total_amount, m("24875")); // 9.95 × 2500

        let returned = db.gold_items().get(&item.id).await.unwrap();
        assert_eq!(returned.status, ItemStatus::Returned);

        // The discrepancy observation is on the audit log, and the
        // return itself went through.
        let events = db.audit_log().events_for_entity("transaction", &ret.id).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "weight_discrepancy"));

        // The net effect is exactly the missing metal.
        let balance = db.stock_ledger().balance("branch-1", "ring-22k").await.unwrap();
        assert_eq!(balance, baseline - w("0.05"));
    }

    #[tokio::test]
    async fn sale_then_return_restores_presale_balance() {
        let db = test_db().await;
        seed_price(&db, MetalGrade::K22, "2400", "2500").await;
        let item = seed_item(&db, "branch-1", "ring-22k", "10", "2400").await;

        db.transactions()
            .create_purchase(purchase_input("branch-1", "ring-22k", "10", "2400"), "user-1")
            .await
            .unwrap();
        let baseline = db.stock_ledger().balance("branch-1", "ring-22k").await.unwrap();
        assert_eq!(baseline, w("10"));

        let sale = db
            .transactions()
            .create_sale(sale_input("branch-1", &item.id), "user-1")
            .await
            .unwrap();
        assert_eq!(
            db.stock_ledger().balance("branch-1", "ring-22k").await.unwrap(),
            baseline - w("10")
        );

        db.transactions()
            .create_return(
                ReturnInput {
                    branch_id: "branch-1".to_string(),
                    parent_transaction_id: sale.id.clone(),
                    item_id: item.id.clone(),
                    quantity_g: w("10"),
                    labor_refund_amount: m("0"),
                    payment_method: PaymentMethod::Cash,
                    client_request_id: None,
                    notes: None,
                },
                "user-1",
            )
            .await
            .unwrap();

        // The full cycle sums back to the pre-sale figure exactly.
        let balance = db.stock_ledger().balance("branch-1", "ring-22k").await.unwrap();
        assert_eq!(balance, baseline);
    }

    #[tokio::test]
    async fn return_conflicts_on_wrong_parent_or_double_return() {
        let db = test_db().await;
        seed_price(&db, MetalGrade::K22, "2400", "2500").await;
        let item = seed_item(&db, "branch-1", "ring-22k", "10", "2400").await;

        let purchase = db
            .transactions()
            .create_purchase(purchase_input("branch-1", "ring-22k", "5", "2400"), "user-1")
            .await
            .unwrap();

        // A purchase cannot be a return parent.
        let err = db
            .transactions()
            .create_return(
                ReturnInput {
                    branch_id: "branch-1".to_string(),
                    parent_transaction_id: purchase.id.clone(),
                    item_id: item.id.clone(),
                    quantity_g: w("10"),
                    labor_refund_amount: m("0"),
                    payment_method: PaymentMethod::Cash,
                    client_request_id: None,
                    notes: None,
                },
                "user-1",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { .. }));

        let sale = db
            .transactions()
            .create_sale(sale_input("branch-1", &item.id), "user-1")
            .await
            .unwrap();

        let return_input = ReturnInput {
            branch_id: "branch-1".to_string(),
            parent_transaction_id: sale.id.clone(),
            item_id: item.id.clone(),
            quantity_g: w("10"),
            labor_refund_amount: m("0"),
            payment_method: PaymentMethod::Cash,
            client_request_id: None,
            notes: None,
        };
        db.transactions().create_return(return_input.clone(), "user-1").await.unwrap();

        // Same sale cannot be returned twice.
        let err = db
            .transactions()
            .create_return(return_input, "user-1")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { .. }));
    }

    #[tokio::test]
    async fn adjustment_moves_stock_with_no_payment() {
        let db = test_db().await;
        seed_price(&db, MetalGrade::Has, "2400", "2450").await;

        let adj = db
            .transactions()
            .create_adjustment(
                AdjustmentInput {
                    branch_id: "branch-1".to_string(),
                    product_id: "bar-has".to_string(),
                    entry_type: EntryType::Debit,
                    quantity_g: w("2"),
                    unit_price_g: m("2400"),
                    client_request_id: None,
                    notes: Some("opening stock".to_string()),
                },
                "user-1",
            )
            .await
            .unwrap();

        assert_eq!(adj.payment_method, None);
        assert_eq!(adj.total_amount, m("4800"));

        let balance = db.stock_ledger().balance("branch-1", "bar-has").await.unwrap();
        assert_eq!(balance, w("2"));
    }

    #[tokio::test]
    async fn scrap_credits_at_acquisition_price() {
        let db = test_db().await;
        seed_price(&db, MetalGrade::Has, "2400", "2450").await;
        let item = seed_item(&db, "branch-1", "ring-22k", "8", "2100").await;

        let scrap = db
            .transactions()
            .create_scrap(
                ScrapInput {
                    branch_id: "branch-1".to_string(),
                    item_id: item.id.clone(),
                    client_request_id: None,
                    notes: None,
                },
                "user-1",
            )
            .await
            .unwrap();

        assert_eq!(scrap.kind, TransactionType::Scrap);
        assert_eq!(scrap.unit_price_g, m("2100"));
        assert_eq!(scrap.total_amount, m("16800")); // 8 × 2100

        let entries = db.stock_ledger().entries_for_transaction(&scrap.id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_type, EntryType::Credit);

        let scrapped = db.gold_items().get(&item.id).await.unwrap();
        assert_eq!(scrapped.status, ItemStatus::Scrapped);
    }

    #[tokio::test]
    async fn production_fire_conserves_metal_exactly() {
        let db = test_db().await;
        seed_price(&db, MetalGrade::Has, "2400", "2450").await;

        // Seed the input product.
        db.transactions()
            .create_adjustment(
                AdjustmentInput {
                    branch_id: "branch-1".to_string(),
                    product_id: "scrap-has".to_string(),
                    entry_type: EntryType::Debit,
                    quantity_g: w("10"),
                    unit_price_g: m("2400"),
                    client_request_id: None,
                    notes: None,
                },
                "user-1",
            )
            .await
            .unwrap();

        let fire = db
            .transactions()
            .create_production_fire(
                ProductionFireInput {
                    branch_id: "branch-1".to_string(),
                    input_product_id: "scrap-has".to_string(),
                    output_product_id: "bar-has".to_string(),
                    grade: MetalGrade::Has,
                    input_quantity_g: w("10"),
                    output_quantity_g: w("9.7"),
                    fire_quantity_g: w("0.3"),
                    unit_price_g: m("2400"),
                    client_request_id: None,
                    notes: None,
                },
                "user-1",
            )
            .await
            .unwrap();

        assert_eq!(fire.fire_cost, Some(m("720"))); // 0.3 × 2400
        assert_eq!(fire.total_amount, m("0"));
        assert_eq!(
            fire.notes.as_deref(),
            Some("production_fire: input=10.000000 output=9.700000 fire=0.300000")
        );

        let entries = db.stock_ledger().entries_for_transaction(&fire.id).await.unwrap();
        assert_eq!(entries.len(), 3);

        // Input product gave up everything; output gained the survivors.
        let input_balance = db.stock_ledger().balance("branch-1", "scrap-has").await.unwrap();
        assert_eq!(input_balance, Weight::zero());
        let output_balance = db.stock_ledger().balance("branch-1", "bar-has").await.unwrap();
        assert_eq!(output_balance, w("9.7"));
    }

    #[tokio::test]
    async fn production_fire_imbalance_writes_nothing() {
        let db = test_db().await;
        seed_price(&db, MetalGrade::Has, "2400", "2450").await;

        let err = db
            .transactions()
            .create_production_fire(
                ProductionFireInput {
                    branch_id: "branch-1".to_string(),
                    input_product_id: "scrap-has".to_string(),
                    output_product_id: "bar-has".to_string(),
                    grade: MetalGrade::Has,
                    input_quantity_g: w("10"),
                    output_quantity_g: w("9.700001"),
                    fire_quantity_g: w("0.3"),
                    unit_price_g: m("2400"),
                    client_request_id: None,
                    notes: None,
                },
                "user-1",
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LedgerError::Validation(ValidationError::FireImbalance { .. })
        ));

        let balance = db.stock_ledger().balance("branch-1", "bar-has").await.unwrap();
        assert_eq!(balance, Weight::zero());
    }

    #[tokio::test]
    async fn running_balance_chain_matches_ground_truth() {
        let db = test_db().await;
        seed_price(&db, MetalGrade::K22, "2400", "2500").await;
        seed_price(&db, MetalGrade::Has, "2400", "2450").await;

        for qty in ["0.1", "0.1", "0.1", "2.345678", "7.654322"] {
            db.transactions()
                .create_purchase(purchase_input("branch-1", "ring-22k", qty, "2400"), "user-1")
                .await
                .unwrap();
        }
        db.transactions()
            .create_adjustment(
                AdjustmentInput {
                    branch_id: "branch-1".to_string(),
                    product_id: "ring-22k".to_string(),
                    entry_type: EntryType::Credit,
                    quantity_g: w("0.3"),
                    unit_price_g: m("2400"),
                    client_request_id: None,
                    notes: None,
                },
                "user-1",
            )
            .await
            .unwrap();

        // 0.1 + 0.1 + 0.1 + 2.345678 + 7.654322 − 0.3 = 10 exactly.
        let balance = db.stock_ledger().balance("branch-1", "ring-22k").await.unwrap();
        assert_eq!(balance, w("10"));

        let latest = db.stock_ledger().entries("branch-1", "ring-22k", 1).await.unwrap();
        assert_eq!(latest[0].running_balance_g, balance);
    }
}
