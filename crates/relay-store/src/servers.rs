use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use crate::db::Db;
use crate::error::StoreError;
use crate::types::{NewServer, ServerRecord};

/// Persistence for upstream server configurations
///
/// Rows are soft-deleted; `upsert` resurrects a soft-deleted row under
/// the same name, preserving its id.
#[derive(Debug, Clone)]
pub struct ServerRepository {
    db: Db,
}

const SERVER_COLUMNS: &str = "id, name, url, description, enabled, auto_reconnect, \
     timeout_ms, retry_attempts, created_at, updated_at, deleted_at";

impl ServerRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Insert or update a server config, merging by unique `name`
    ///
    /// Returns the stored row including its assigned id.
    pub async fn upsert(&self, server: &NewServer) -> Result<ServerRecord, StoreError> {
        let row = sqlx::query(&format!(
            r"
            INSERT INTO servers (id, name, url, description, enabled, auto_reconnect, timeout_ms, retry_attempts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (name) DO UPDATE SET
                url = EXCLUDED.url,
                description = EXCLUDED.description,
                enabled = EXCLUDED.enabled,
                auto_reconnect = EXCLUDED.auto_reconnect,
                timeout_ms = EXCLUDED.timeout_ms,
                retry_attempts = EXCLUDED.retry_attempts,
                deleted_at = NULL,
                updated_at = now()
            RETURNING {SERVER_COLUMNS}
            "
        ))
        .bind(Uuid::new_v4())
        .bind(&server.name)
        .bind(&server.url)
        .bind(&server.description)
        .bind(server.enabled)
        .bind(server.auto_reconnect)
        .bind(server.timeout_ms)
        .bind(server.retry_attempts)
        .fetch_one(self.db.pool())
        .await?;

        Ok(server_from_row(&row))
    }

    /// Live servers; disabled rows are excluded unless requested
    pub async fn find_all(&self, include_disabled: bool) -> Result<Vec<ServerRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {SERVER_COLUMNS}
            FROM servers
            WHERE deleted_at IS NULL AND (enabled OR $1)
            ORDER BY created_at ASC
            "
        ))
        .bind(include_disabled)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.iter().map(server_from_row).collect())
    }

    /// Look up one live server by name
    pub async fn find_by_name(&self, name: &str) -> Result<Option<ServerRecord>, StoreError> {
        let row = sqlx::query(&format!(
            r"
            SELECT {SERVER_COLUMNS}
            FROM servers
            WHERE name = $1 AND deleted_at IS NULL
            "
        ))
        .bind(name)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.as_ref().map(server_from_row))
    }

    /// Flip the enabled flag, touching `updated_at`
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE servers
            SET enabled = $2, updated_at = now()
            WHERE name = $1 AND deleted_at IS NULL
            ",
        )
        .bind(name)
        .bind(enabled)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Soft-delete by id; returns whether a row changed
    pub async fn soft_delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE servers
            SET deleted_at = now(), updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            ",
        )
        .bind(id)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Hard-delete rows soft-deleted more than `days_old` days ago
    ///
    /// The day count is templated into the SQL rather than bound; interval
    /// parameter binding is driver-dependent and the value is an integer.
    pub async fn cleanup_deleted(&self, days_old: i64) -> Result<u64, StoreError> {
        let sql = format!(
            "DELETE FROM servers WHERE deleted_at IS NOT NULL AND deleted_at < now() - interval '{days_old} days'"
        );
        let result = sqlx::query(&sql).execute(self.db.pool()).await?;
        Ok(result.rows_affected())
    }
}

fn server_from_row(row: &PgRow) -> ServerRecord {
    ServerRecord {
        id: row.get("id"),
        name: row.get("name"),
        url: row.get("url"),
        description: row.get("description"),
        enabled: row.get("enabled"),
        auto_reconnect: row.get("auto_reconnect"),
        timeout_ms: row.get("timeout_ms"),
        retry_attempts: row.get("retry_attempts"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        deleted_at: row.get("deleted_at"),
    }
}
