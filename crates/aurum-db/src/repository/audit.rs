//! # Audit Log Repository
//!
//! Best-effort observation sink. Audit rows are written *after* the
//! business transaction commits, on their own connection: a failed
//! audit write is logged and swallowed, a failed business operation
//! writes no audit row. The ledger never depends on the sink.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use crate::error::{LedgerError, LedgerResult};
use crate::repository::new_id;

/// One recorded observation.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub id: String,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub actor: Option<String>,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Repository for audit log reads.
#[derive(Debug, Clone)]
pub struct AuditLogRepository {
    pool: SqlitePool,
}

impl AuditLogRepository {
    /// Creates a new AuditLogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        AuditLogRepository { pool }
    }

    /// Returns all events recorded for one entity, oldest first.
    pub async fn events_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> LedgerResult<Vec<AuditEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, entity_type, entity_id, actor, details, created_at
            FROM audit_log
            WHERE entity_type = ?1 AND entity_id = ?2
            ORDER BY created_at, id
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }
}

/// Records an observation, fire-and-forget.
///
/// Must only be called after the business transaction committed.
/// Failures are logged with `warn!` and never propagate.
pub(crate) async fn record_event(
    pool: &SqlitePool,
    event_type: &str,
    entity_type: &str,
    entity_id: &str,
    actor: Option<&str>,
    details: Option<serde_json::Value>,
) {
    let result = sqlx::query(
        r#"
        INSERT INTO audit_log (id, event_type, entity_type, entity_id, actor, details, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(new_id())
    .bind(event_type)
    .bind(entity_type)
    .bind(entity_id)
    .bind(actor)
    .bind(details.map(|d| d.to_string()))
    .bind(Utc::now())
    .execute(pool)
    .await;

    if let Err(err) = result {
        warn!(
            event_type,
            entity_type,
            entity_id,
            error = %err,
            "Failed to record audit event"
        );
    }
}

fn row_to_event(row: &SqliteRow) -> LedgerResult<AuditEvent> {
    let details: Option<String> = row.try_get("details")?;
    let details = details
        .map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|e| LedgerError::Storage(format!("corrupt audit details: {e}")))
        })
        .transpose()?;

    Ok(AuditEvent {
        id: row.try_get("id")?,
        event_type: row.try_get("event_type")?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        actor: row.try_get("actor")?,
        details,
        created_at: row.try_get("created_at")?,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::record_event;
    use crate::repository::testing::test_db;

    #[tokio::test]
    async fn events_round_trip_with_json_details() {
        let db = test_db().await;

        record_event(
            db.pool(),
            "transaction_created",
            "transaction",
            "tx-1",
            Some("user-1"),
            Some(json!({ "type": "sale" })),
        )
        .await;
        record_event(db.pool(), "weight_discrepancy", "transaction", "tx-1", None, None).await;

        let events = db.audit_log().events_for_entity("transaction", "tx-1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "transaction_created");
        assert_eq!(events[0].actor.as_deref(), Some("user-1"));
        assert_eq!(events[0].details, Some(json!({ "type": "sale" })));
        assert_eq!(events[1].event_type, "weight_discrepancy");
        assert_eq!(events[1].details, None);
    }
}
