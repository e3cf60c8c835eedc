use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use relay_store::{NewServer, ServerRecord};

use crate::client::UpstreamClient;

/// In-memory configuration of one upstream server
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub auto_reconnect: bool,
    /// Per-call timeout, milliseconds
    pub timeout_ms: u64,
    pub retry_attempts: u32,
}

impl UpstreamConfig {
    /// A config with the documented defaults
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            description: None,
            enabled: true,
            auto_reconnect: true,
            timeout_ms: 30_000,
            retry_attempts: 3,
        }
    }

    pub(crate) fn to_new_server(&self) -> NewServer {
        NewServer {
            name: self.name.clone(),
            url: self.url.clone(),
            description: self.description.clone(),
            enabled: self.enabled,
            auto_reconnect: self.auto_reconnect,
            timeout_ms: self.timeout_ms as i64,
            retry_attempts: self.retry_attempts as i32,
        }
    }
}

impl From<&ServerRecord> for UpstreamConfig {
    fn from(record: &ServerRecord) -> Self {
        Self {
            name: record.name.clone(),
            url: record.url.clone(),
            description: record.description.clone(),
            enabled: record.enabled,
            auto_reconnect: record.auto_reconnect,
            timeout_ms: record.timeout_ms.max(0) as u64,
            retry_attempts: record.retry_attempts.max(0) as u32,
        }
    }
}

/// A re-exported tool with its namespaced downstream name
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedTool {
    /// `{server}{separator}{original}`
    pub name: String,
    /// Tool name on the upstream server
    pub original_name: String,
    pub server_name: String,
    /// Upstream description prefixed with `[server]`
    pub description: String,
    /// Raw JSON Schema for the tool input
    pub input_schema: serde_json::Value,
}

/// Snapshot of one connection's state, safe to serialize into `/health`
/// and `router` control tool responses
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub url: String,
    pub connected: bool,
    pub enabled: bool,
    pub auto_reconnect: bool,
    pub tools_count: usize,
    pub last_connected: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_ping_failures: u32,
    pub reconnect_attempts: u32,
}

/// One live (or tracked-but-disconnected) upstream connection
///
/// Owned exclusively by the `ConnectionManager`; everything else sees
/// `ServerStatus` snapshots or cloned tool lists.
pub(crate) struct Connection {
    pub config: UpstreamConfig,
    /// None while disconnected
    pub client: Option<Arc<UpstreamClient>>,
    /// Aggregated tools minus the control tools (`stats`, `quote`)
    pub tools: Vec<AggregatedTool>,
    /// Original names of control tools discovered on this server
    pub control_tools: HashSet<String>,
    pub last_connected: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_ping_failures: u32,
    pub reconnect_attempts: u32,
    pub last_reconnect_attempt: Option<Instant>,
    /// Set when `last_error` came from the ping path, so a healthy ping
    /// clears it without erasing unrelated errors
    pub last_error_from_ping: bool,
}

impl Connection {
    pub fn connected(&self) -> bool {
        self.client.is_some()
    }

    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            name: self.config.name.clone(),
            url: self.config.url.clone(),
            connected: self.connected(),
            enabled: self.config.enabled,
            auto_reconnect: self.config.auto_reconnect,
            tools_count: self.tools.len(),
            last_connected: self.last_connected,
            last_error: self.last_error.clone(),
            consecutive_ping_failures: self.consecutive_ping_failures,
            reconnect_attempts: self.reconnect_attempts,
        }
    }
}
