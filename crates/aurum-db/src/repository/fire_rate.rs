//! # Fire Rate Repository
//!
//! Manufacturing-loss ("fire") rates, resolved at sale time.
//!
//! ## Resolution Order
//! ```text
//! effective_rate(product, grade):
//!   1. product-scoped rate for the product (grade-specific beats
//!      grade-agnostic), valid at the lookup instant, latest valid_from
//!   2. otherwise the global rate, same rules
//!   3. otherwise None: the sale records no fire cost
//! ```
//!
//! Setting a new rate end-dates the open rate it replaces, so at most
//! one rate per scope is valid at any instant.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use aurum_core::{MetalGrade, Rate, ValidationError};

use crate::error::LedgerResult;
use crate::repository::{decode, new_id};

/// One stored rate row.
#[derive(Debug, Clone, PartialEq)]
pub struct FireRateRecord {
    pub id: String,
    pub scope: FireRateScope,
    pub product_id: Option<String>,
    pub grade: Option<MetalGrade>,
    pub rate_percent: Rate,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
}

/// Whether a rate applies to one product or as the branch-wide default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireRateScope {
    Product,
    Global,
}

impl FireRateScope {
    fn as_str(&self) -> &'static str {
        match self {
            FireRateScope::Product => "product",
            FireRateScope::Global => "global",
        }
    }
}

/// Repository for fire rate operations.
#[derive(Debug, Clone)]
pub struct FireRateRepository {
    pool: SqlitePool,
}

impl FireRateRepository {
    /// Creates a new FireRateRepository.
    pub fn new(pool: SqlitePool) -> Self {
        FireRateRepository { pool }
    }

    /// Sets a product-scoped rate, end-dating any open rate for the
    /// same (product, grade).
    pub async fn set_product_rate(
        &self,
        product_id: &str,
        grade: Option<MetalGrade>,
        rate: Rate,
        valid_from: DateTime<Utc>,
    ) -> LedgerResult<FireRateRecord> {
        self.set_rate(FireRateScope::Product, Some(product_id), grade, rate, valid_from)
            .await
    }

    /// Sets the global fallback rate, end-dating any open global rate
    /// for the same grade.
    pub async fn set_global_rate(
        &self,
        grade: Option<MetalGrade>,
        rate: Rate,
        valid_from: DateTime<Utc>,
    ) -> LedgerResult<FireRateRecord> {
        self.set_rate(FireRateScope::Global, None, grade, rate, valid_from).await
    }

    async fn set_rate(
        &self,
        scope: FireRateScope,
        product_id: Option<&str>,
        grade: Option<MetalGrade>,
        rate: Rate,
        valid_from: DateTime<Utc>,
    ) -> LedgerResult<FireRateRecord> {
        if rate.is_negative() {
            return Err(ValidationError::MustNotBeNegative {
                field: "rate_percent",
            }
            .into());
        }

        let record = FireRateRecord {
            id: new_id(),
            scope,
            product_id: product_id.map(str::to_string),
            grade,
            rate_percent: rate,
            valid_from,
            valid_until: None,
        };

        debug!(scope = scope.as_str(), product_id, rate = %rate, "Setting fire rate");

        let mut tx = self.pool.begin().await?;

        // End-date the open rate this one replaces.
        sqlx::query(
            r#"
            UPDATE fire_rate
            SET valid_until = ?1
            WHERE scope = ?2
              AND (product_id IS ?3)
              AND (grade IS ?4)
              AND valid_until IS NULL
            "#,
        )
        .bind(valid_from)
        .bind(scope.as_str())
        .bind(product_id)
        .bind(grade.map(|g| g.as_str()))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO fire_rate (id, scope, product_id, grade, rate_percent, valid_from, valid_until)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)
            "#,
        )
        .bind(&record.id)
        .bind(scope.as_str())
        .bind(product_id)
        .bind(grade.map(|g| g.as_str()))
        .bind(rate.to_canonical_string())
        .bind(valid_from)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    /// Resolves the rate in effect right now for (product, grade).
    pub async fn effective_rate(
        &self,
        product_id: &str,
        grade: MetalGrade,
    ) -> LedgerResult<Option<Rate>> {
        let mut conn = self.pool.acquire().await?;
        effective_rate_at(&mut conn, product_id, grade, Utc::now()).await
    }

    /// Returns rate history for a product, newest first. Includes
    /// end-dated rows.
    pub async fn rates_for_product(&self, product_id: &str) -> LedgerResult<Vec<FireRateRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, scope, product_id, grade, rate_percent, valid_from, valid_until
            FROM fire_rate
            WHERE product_id = ?1
            ORDER BY valid_from DESC
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }
}

/// Rate resolution on the caller's open transaction.
pub(crate) async fn effective_rate_at(
    conn: &mut SqliteConnection,
    product_id: &str,
    grade: MetalGrade,
    at: DateTime<Utc>,
) -> LedgerResult<Option<Rate>> {
    // Product scope first; grade-specific rows sort before grade-agnostic.
    let row = sqlx::query(
        r#"
        SELECT rate_percent
        FROM fire_rate
        WHERE scope = 'product'
          AND product_id = ?1
          AND (grade IS NULL OR grade = ?2)
          AND valid_from <= ?3
          AND (valid_until IS NULL OR valid_until > ?3)
        ORDER BY (grade IS NULL), valid_from DESC
        LIMIT 1
        "#,
    )
    .bind(product_id)
    .bind(grade.as_str())
    .bind(at)
    .fetch_optional(&mut *conn)
    .await?;

    let row = match row {
        Some(row) => Some(row),
        None => {
            sqlx::query(
                r#"
                SELECT rate_percent
                FROM fire_rate
                WHERE scope = 'global'
                  AND (grade IS NULL OR grade = ?1)
                  AND valid_from <= ?2
                  AND (valid_until IS NULL OR valid_until > ?2)
                ORDER BY (grade IS NULL), valid_from DESC
                LIMIT 1
                "#,
            )
            .bind(grade.as_str())
            .bind(at)
            .fetch_optional(&mut *conn)
            .await?
        }
    };

    match row {
        Some(row) => {
            let raw: String = row.try_get("rate_percent")?;
            Ok(Some(decode("rate_percent", &raw)?))
        }
        None => Ok(None),
    }
}

fn row_to_record(row: &SqliteRow) -> LedgerResult<FireRateRecord> {
    let scope: String = row.try_get("scope")?;
    let scope = match scope.as_str() {
        "product" => FireRateScope::Product,
        _ => FireRateScope::Global,
    };
    let grade: Option<String> = row.try_get("grade")?;
    let rate: String = row.try_get("rate_percent")?;

    Ok(FireRateRecord {
        id: row.try_get("id")?,
        scope,
        product_id: row.try_get("product_id")?,
        grade: grade.as_deref().map(|g| decode("grade", g)).transpose()?,
        rate_percent: decode("rate_percent", &rate)?,
        valid_from: row.try_get("valid_from")?,
        valid_until: row.try_get("valid_until")?,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use aurum_core::{MetalGrade, Rate};

    use crate::repository::testing::test_db;

    #[tokio::test]
    async fn product_rate_beats_global_rate() {
        let db = test_db().await;
        let now = Utc::now();

        db.fire_rates()
            .set_global_rate(None, Rate::parse("1.0").unwrap(), now)
            .await
            .unwrap();
        db.fire_rates()
            .set_product_rate("ring-22k", None, Rate::parse("0.5").unwrap(), now)
            .await
            .unwrap();

        let rate = db.fire_rates().effective_rate("ring-22k", MetalGrade::K22).await.unwrap();
        assert_eq!(rate, Some(Rate::parse("0.5").unwrap()));

        // Other products fall back to the global rate.
        let rate = db.fire_rates().effective_rate("bar-has", MetalGrade::Has).await.unwrap();
        assert_eq!(rate, Some(Rate::parse("1.0").unwrap()));
    }

    #[tokio::test]
    async fn no_rate_resolves_to_none() {
        let db = test_db().await;

        let rate = db.fire_rates().effective_rate("ring-22k", MetalGrade::K22).await.unwrap();
        assert_eq!(rate, None);
    }

    #[tokio::test]
    async fn newer_rate_replaces_older() {
        let db = test_db().await;
        let now = Utc::now();

        db.fire_rates()
            .set_product_rate("ring-22k", None, Rate::parse("0.5").unwrap(), now)
            .await
            .unwrap();
        db.fire_rates()
            .set_product_rate("ring-22k", None, Rate::parse("0.7").unwrap(), now)
            .await
            .unwrap();

        let rate = db.fire_rates().effective_rate("ring-22k", MetalGrade::K22).await.unwrap();
        assert_eq!(rate, Some(Rate::parse("0.7").unwrap()));
    }

    #[tokio::test]
    async fn negative_rate_is_rejected() {
        let db = test_db().await;

        let err = db
            .fire_rates()
            .set_global_rate(None, Rate::parse("-0.5").unwrap(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::LedgerError::Validation(_)));
    }
}
