use std::sync::Arc;

use serde::Serialize;

use relay_config::Config;
use relay_credit::CreditGate;
use relay_registry::ToolRegistry;
use relay_store::{AuditBuffer, Db, EventBuffer, ServerRepository};
use relay_sync::SyncEngine;
use relay_upstream::ConnectionManager;

/// Everything the HTTP handlers and the MCP service share
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub manager: ConnectionManager,
    pub registry: Arc<ToolRegistry>,
    pub gate: CreditGate,
    pub sync: Option<SyncEngine>,
    pub repository: Option<ServerRepository>,
    pub db: Option<Db>,
    pub audit: Option<AuditBuffer>,
    pub events: Option<EventBuffer>,
}

/// Router-level counters reported by `/health` and `/register`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterStats {
    pub total_servers: usize,
    pub connected_servers: usize,
    pub total_tools: usize,
}

impl AppState {
    pub async fn router_stats(&self) -> RouterStats {
        let statuses = self.manager.server_statuses().await;
        RouterStats {
            total_servers: statuses.len(),
            connected_servers: statuses.iter().filter(|s| s.connected).count(),
            total_tools: statuses.iter().map(|s| s.tools_count).sum(),
        }
    }
}
