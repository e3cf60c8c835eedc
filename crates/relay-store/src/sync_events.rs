use serde_json::Value;
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use crate::db::Db;
use crate::error::StoreError;
use crate::types::{SyncEvent, SyncEventType};

/// Append-only event log shared by all router instances
///
/// Each instance keeps its own cursor as membership in `processed_by`;
/// the store's append order (`created_at ASC`) is the source of truth
/// for cross-instance ordering.
#[derive(Debug, Clone)]
pub struct SyncEventStore {
    db: Db,
}

impl SyncEventStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Append one event published by `instance_id`
    pub async fn append(
        &self,
        event_type: SyncEventType,
        event_data: &Value,
        instance_id: &str,
    ) -> Result<Uuid, StoreError> {
        let row = sqlx::query(
            r"
            INSERT INTO sync_events (id, event_type, event_data, instance_id, processed_by)
            VALUES ($1, $2, $3, $4, ARRAY[]::text[])
            RETURNING id
            ",
        )
        .bind(Uuid::new_v4())
        .bind(event_type.as_str())
        .bind(event_data)
        .bind(instance_id)
        .fetch_one(self.db.pool())
        .await?;

        Ok(row.get("id"))
    }

    /// Events not yet acknowledged by `instance_id`, oldest first
    pub async fn fetch_unprocessed(
        &self,
        instance_id: &str,
        limit: i64,
    ) -> Result<Vec<SyncEvent>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, event_type, event_data, instance_id, created_at, processed_by, processed_at
            FROM sync_events
            WHERE NOT ($1 = ANY(processed_by))
            ORDER BY created_at ASC
            LIMIT $2
            ",
        )
        .bind(instance_id)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.iter().filter_map(event_from_row).collect())
    }

    /// Add `instance_id` to the event's processed set
    ///
    /// The first acknowledgement stamps `processed_at`.
    pub async fn acknowledge(&self, event_id: Uuid, instance_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE sync_events
            SET processed_by = array_append(processed_by, $2),
                processed_at = COALESCE(processed_at, now())
            WHERE id = $1 AND NOT ($2 = ANY(processed_by))
            ",
        )
        .bind(event_id)
        .bind(instance_id)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Delete events older than the retention window
    pub async fn delete_older_than(&self, hours: i64) -> Result<u64, StoreError> {
        let sql =
            format!("DELETE FROM sync_events WHERE created_at < now() - interval '{hours} hours'");
        let result = sqlx::query(&sql).execute(self.db.pool()).await?;
        Ok(result.rows_affected())
    }
}

fn event_from_row(row: &PgRow) -> Option<SyncEvent> {
    let raw_type: String = row.get("event_type");
    let Some(event_type) = SyncEventType::parse(&raw_type) else {
        tracing::warn!(event_type = %raw_type, "skipping sync event with unknown type");
        return None;
    };

    Some(SyncEvent {
        id: row.get("id"),
        event_type,
        event_data: row.get("event_data"),
        instance_id: row.get("instance_id"),
        created_at: row.get("created_at"),
        processed_by: row.get("processed_by"),
        processed_at: row.get("processed_at"),
    })
}
