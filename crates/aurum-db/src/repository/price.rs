//! # Price Ledger Repository
//!
//! Append-only price history per metal grade.
//!
//! ## Append-Only Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                       Price Ledger                                  │
//! │                                                                     │
//! │  seq  grade  buy       sell      backdated                          │
//! │  ───  ─────  ────────  ────────  ─────────                          │
//! │   1   HAS    2400.00   2450.00       -                              │
//! │   2   HAS    2410.00   2460.00       -      ◄── latest(HAS)         │
//! │   3   HAS    2405.00   2455.00      yes     (corrects seq 1 for     │
//! │                                              reporting; never       │
//! │                                              "current", never       │
//! │                                              touches seq 1)         │
//! │                                                                     │
//! │  Rows are never updated or deleted. "Latest" means highest seq      │
//! │  among non-backdated rows - insertion order, immune to equal        │
//! │  timestamps.                                                        │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use aurum_core::validation::validate_price_pair;
use aurum_core::{MetalGrade, NewPrice, PriceRecord};

use crate::error::{LedgerError, LedgerResult};
use crate::repository::{decode, new_id};

/// Repository for price ledger operations.
#[derive(Debug, Clone)]
pub struct PriceRepository {
    pool: SqlitePool,
}

impl PriceRepository {
    /// Creates a new PriceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PriceRepository { pool }
    }

    /// Records a new price row for a grade.
    ///
    /// Fails `Validation(SellBelowBuy)` when sell < buy; equal prices
    /// are allowed (zero-margin days exist).
    pub async fn record(&self, input: NewPrice) -> LedgerResult<PriceRecord> {
        validate_price_pair(input.buy_price_g, input.sell_price_g)?;

        let record = PriceRecord {
            id: new_id(),
            recorded_at: Utc::now(),
            grade: input.grade,
            buy_price_g: input.buy_price_g,
            sell_price_g: input.sell_price_g,
            source: input.source,
            recorded_by: input.recorded_by,
            is_backdated: false,
            original_price_id: None,
        };

        debug!(id = %record.id, grade = %record.grade, "Recording price");
        insert_price(&self.pool, &record).await?;
        Ok(record)
    }

    /// Records a backdated correction for an earlier price row.
    ///
    /// The correction carries its own effective timestamp and a
    /// reference to the row it corrects. The original row is never
    /// modified, and the correction never becomes the "current" price.
    pub async fn record_backdated(
        &self,
        input: NewPrice,
        recorded_at: DateTime<Utc>,
        original_price_id: &str,
    ) -> LedgerResult<PriceRecord> {
        validate_price_pair(input.buy_price_g, input.sell_price_g)?;

        // The referenced original must exist.
        let _ = self.get(original_price_id).await?;

        let record = PriceRecord {
            id: new_id(),
            recorded_at,
            grade: input.grade,
            buy_price_g: input.buy_price_g,
            sell_price_g: input.sell_price_g,
            source: input.source,
            recorded_by: input.recorded_by,
            is_backdated: true,
            original_price_id: Some(original_price_id.to_string()),
        };

        debug!(
            id = %record.id,
            original = %original_price_id,
            "Recording backdated price correction"
        );
        insert_price(&self.pool, &record).await?;
        Ok(record)
    }

    /// Returns the most recent non-backdated price for a grade, if any.
    pub async fn latest(&self, grade: MetalGrade) -> LedgerResult<Option<PriceRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, recorded_at, grade, buy_price_g, sell_price_g,
                   source, recorded_by, is_backdated, original_price_id
            FROM metal_price
            WHERE grade = ?1 AND is_backdated = 0
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(grade.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_price).transpose()
    }

    /// Gets a price row by ID.
    pub async fn get(&self, id: &str) -> LedgerResult<PriceRecord> {
        let row = sqlx::query(
            r#"
            SELECT id, recorded_at, grade, buy_price_g, sell_price_g,
                   source, recorded_by, is_backdated, original_price_id
            FROM metal_price
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_price(&row),
            None => Err(LedgerError::not_found("price", id)),
        }
    }

    /// Returns price history for a grade, newest first. Includes
    /// backdated corrections.
    pub async fn history(&self, grade: MetalGrade, limit: i64) -> LedgerResult<Vec<PriceRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, recorded_at, grade, buy_price_g, sell_price_g,
                   source, recorded_by, is_backdated, original_price_id
            FROM metal_price
            WHERE grade = ?1
            ORDER BY seq DESC
            LIMIT ?2
            "#,
        )
        .bind(grade.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_price).collect()
    }
}

async fn insert_price(pool: &SqlitePool, record: &PriceRecord) -> LedgerResult<()> {
    sqlx::query(
        r#"
        INSERT INTO metal_price (
            id, recorded_at, grade, buy_price_g, sell_price_g,
            source, recorded_by, is_backdated, original_price_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(&record.id)
    .bind(record.recorded_at)
    .bind(record.grade.as_str())
    .bind(record.buy_price_g.to_canonical_string())
    .bind(record.sell_price_g.to_canonical_string())
    .bind(&record.source)
    .bind(record.recorded_by.as_deref())
    .bind(record.is_backdated)
    .bind(record.original_price_id.as_deref())
    .execute(pool)
    .await?;

    Ok(())
}

/// Reads the current (most recent non-backdated) price for a grade on
/// the caller's open transaction.
///
/// This is the price "lock" of the orchestrator: SQLite serializes
/// writers at the store level, so the ordered read inside the open
/// transaction pins the row for the whole unit of work. No active price
/// is an operational error, not an empty result.
pub(crate) async fn current_price(
    conn: &mut SqliteConnection,
    grade: MetalGrade,
) -> LedgerResult<PriceRecord> {
    let row = sqlx::query(
        r#"
        SELECT id, recorded_at, grade, buy_price_g, sell_price_g,
               source, recorded_by, is_backdated, original_price_id
        FROM metal_price
        WHERE grade = ?1 AND is_backdated = 0
        ORDER BY seq DESC
        LIMIT 1
        "#,
    )
    .bind(grade.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => row_to_price(&row),
        None => Err(LedgerError::not_found("active price", grade.as_str())),
    }
}

fn row_to_price(row: &SqliteRow) -> LedgerResult<PriceRecord> {
    let grade: String = row.try_get("grade")?;
    let buy: String = row.try_get("buy_price_g")?;
    let sell: String = row.try_get("sell_price_g")?;

    Ok(PriceRecord {
        id: row.try_get("id")?,
        recorded_at: row.try_get("recorded_at")?,
        grade: decode("grade", &grade)?,
        buy_price_g: decode("buy_price_g", &buy)?,
        sell_price_g: decode("sell_price_g", &sell)?,
        source: row.try_get("source")?,
        recorded_by: row.try_get("recorded_by")?,
        is_backdated: row.try_get("is_backdated")?,
        original_price_id: row.try_get("original_price_id")?,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use aurum_core::{MetalGrade, NewPrice, ValidationError};

    use crate::error::LedgerError;
    use crate::repository::testing::{m, seed_price, test_db};

    #[tokio::test]
    async fn latest_follows_insertion_order() {
        let db = test_db().await;

        seed_price(&db, MetalGrade::Has, "2400", "2450").await;
        let second = seed_price(&db, MetalGrade::Has, "2410", "2460").await;

        let latest = db.prices().latest(MetalGrade::Has).await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        assert_eq!(latest.sell_price_g, m("2460"));

        // Other grades are independent.
        assert!(db.prices().latest(MetalGrade::K22).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sell_below_buy_is_rejected_equal_is_allowed() {
        let db = test_db().await;

        let err = db
            .prices()
            .record(NewPrice {
                grade: MetalGrade::Has,
                buy_price_g: m("100"),
                sell_price_g: m("99"),
                source: "test".to_string(),
                recorded_by: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Validation(ValidationError::SellBelowBuy { .. })
        ));

        // sell == buy is a valid zero-margin pair.
        db.prices()
            .record(NewPrice {
                grade: MetalGrade::Has,
                buy_price_g: m("100"),
                sell_price_g: m("100"),
                source: "test".to_string(),
                recorded_by: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn backdated_correction_never_becomes_current() {
        let db = test_db().await;

        let original = seed_price(&db, MetalGrade::Has, "2400", "2450").await;

        let correction = db
            .prices()
            .record_backdated(
                NewPrice {
                    grade: MetalGrade::Has,
                    buy_price_g: m("2395"),
                    sell_price_g: m("2445"),
                    source: "correction".to_string(),
                    recorded_by: Some("auditor".to_string()),
                },
                original.recorded_at,
                &original.id,
            )
            .await
            .unwrap();

        assert!(correction.is_backdated);
        assert_eq!(correction.original_price_id.as_deref(), Some(original.id.as_str()));

        // Latest still resolves to the original, even though the
        // correction was inserted later.
        let latest = db.prices().latest(MetalGrade::Has).await.unwrap().unwrap();
        assert_eq!(latest.id, original.id);

        // The original row is untouched.
        let reread = db.prices().get(&original.id).await.unwrap();
        assert_eq!(reread, original);

        // History shows both.
        let history = db.prices().history(MetalGrade::Has, 10).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn backdated_correction_requires_existing_original() {
        let db = test_db().await;

        let err = db
            .prices()
            .record_backdated(
                NewPrice {
                    grade: MetalGrade::Has,
                    buy_price_g: m("2395"),
                    sell_price_g: m("2445"),
                    source: "correction".to_string(),
                    recorded_by: None,
                },
                chrono::Utc::now(),
                "missing-id",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::NotFound { .. }));
    }
}
