use serde::Serialize;
use sqlx::Row;

use crate::db::Db;
use crate::error::StoreError;

/// Call counts over the analytics look-back window
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallTotals {
    pub total: i64,
    pub success: i64,
    pub errors: i64,
}

/// Per-tool aggregate over the look-back window
#[derive(Debug, Clone, Serialize)]
pub struct ToolUsage {
    pub server_name: String,
    pub tool_name: String,
    pub calls: i64,
    pub avg_duration_ms: f64,
    pub errors: i64,
}

/// Minimum sample size before a tool can rank as slow
const SLOW_MIN_CALLS: i64 = 6;
/// Minimum sample size before a tool can rank as error-prone
const ERROR_PRONE_MIN_CALLS: i64 = 11;

impl Db {
    /// Total / success / error counts within the last `hours`
    pub async fn tool_call_totals(&self, hours: i64) -> Result<ToolCallTotals, StoreError> {
        let sql = format!(
            r"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE status = 'success') AS success,
                   COUNT(*) FILTER (WHERE status = 'error') AS errors
            FROM tool_calls
            WHERE created_at > now() - interval '{hours} hours'
            "
        );
        let row = sqlx::query(&sql).fetch_one(self.pool()).await?;

        Ok(ToolCallTotals {
            total: row.get("total"),
            success: row.get("success"),
            errors: row.get("errors"),
        })
    }

    /// Tools ranked by call volume within the last `hours`
    pub async fn most_used_tools(
        &self,
        hours: i64,
        limit: i64,
    ) -> Result<Vec<ToolUsage>, StoreError> {
        let sql = format!(
            r"
            {}
            ORDER BY calls DESC
            LIMIT $1
            ",
            usage_select(hours)
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(self.pool()).await?;
        Ok(rows.iter().map(usage_from_row).collect())
    }

    /// Tools ranked by average duration; requires a minimum sample size
    pub async fn slowest_tools(&self, hours: i64, limit: i64) -> Result<Vec<ToolUsage>, StoreError> {
        let sql = format!(
            r"
            {}
            HAVING COUNT(*) >= {SLOW_MIN_CALLS}
            ORDER BY avg_duration_ms DESC
            LIMIT $1
            ",
            usage_select(hours)
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(self.pool()).await?;
        Ok(rows.iter().map(usage_from_row).collect())
    }

    /// Tools ranked by error rate; requires a minimum sample size
    pub async fn error_prone_tools(
        &self,
        hours: i64,
        limit: i64,
    ) -> Result<Vec<ToolUsage>, StoreError> {
        let sql = format!(
            r"
            {}
            HAVING COUNT(*) >= {ERROR_PRONE_MIN_CALLS}
            ORDER BY COUNT(*) FILTER (WHERE status = 'error')::float8 / COUNT(*) DESC
            LIMIT $1
            ",
            usage_select(hours)
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(self.pool()).await?;
        Ok(rows.iter().map(usage_from_row).collect())
    }
}

impl Db {
    /// Drop audit rows older than the retention window
    pub async fn cleanup_tool_calls(&self, days_old: i64) -> Result<u64, StoreError> {
        let sql = format!(
            "DELETE FROM tool_calls WHERE created_at < now() - interval '{days_old} days'"
        );
        let result = sqlx::query(&sql).execute(self.pool()).await?;
        Ok(result.rows_affected())
    }
}

fn usage_select(hours: i64) -> String {
    format!(
        r"
        SELECT server_name, tool_name,
               COUNT(*) AS calls,
               AVG(duration_ms)::float8 AS avg_duration_ms,
               COUNT(*) FILTER (WHERE status = 'error') AS errors
        FROM tool_calls
        WHERE created_at > now() - interval '{hours} hours'
        GROUP BY server_name, tool_name
        "
    )
}

fn usage_from_row(row: &sqlx::postgres::PgRow) -> ToolUsage {
    ToolUsage {
        server_name: row.get("server_name"),
        tool_name: row.get("tool_name"),
        calls: row.get("calls"),
        avg_duration_ms: row.get("avg_duration_ms"),
        errors: row.get("errors"),
    }
}
