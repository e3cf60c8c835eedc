use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::state::AppState;

/// `GET /health`: liveness plus store health and router stats
pub(crate) async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let stats = state.router_stats().await;
    let servers = state.manager.server_statuses().await;

    let store = match &state.db {
        Some(db) => serde_json::to_value(db.health().await).unwrap_or(Value::Null),
        None => Value::Null,
    };

    Json(json!({
        "status": "ok",
        "router": {
            "name": state.config.router.name,
            "version": state.config.router.version,
            "instanceId": state.sync.as_ref().map(|s| s.instance_id().to_owned()),
        },
        "store": store,
        "stats": stats,
        "servers": servers,
    }))
}

/// `GET /config`: sanitized echo of the active configuration
///
/// Secrets and connection strings never appear here.
pub(crate) async fn config_handler(State(state): State<AppState>) -> Json<Value> {
    let config = &state.config;

    Json(json!({
        "router": {
            "name": config.router.name,
            "version": config.router.version,
            "separator": config.router.separator,
            "pingIntervalMs": config.router.ping_interval_ms,
            "maxPingFailures": config.router.max_ping_failures,
        },
        "server": {
            "port": config.server.port,
            "mcpPath": config.server.mcp_path,
            "authEnabled": config.server.auth.enabled,
        },
        "database": config.database.is_some(),
        "creditGating": config.credit.is_some(),
        "audit": {
            "enabled": config.audit.enabled,
            "logArguments": config.audit.log_arguments,
            "logResponses": config.audit.log_responses,
            "retentionDays": config.audit.retention_days,
        },
        "sync": {
            "enabled": config.sync.enabled,
            "pollIntervalMs": config.sync.poll_interval_ms,
            "reconcileIntervalMs": config.sync.reconcile_interval_ms,
            "cleanupIntervalMs": config.sync.cleanup_interval_ms,
            "eventRetentionHours": config.sync.event_retention_hours,
        },
    }))
}
