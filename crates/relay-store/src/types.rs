use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A persisted upstream server configuration
#[derive(Debug, Clone, Serialize)]
pub struct ServerRecord {
    /// Stable identifier assigned by the repository
    pub id: Uuid,
    /// Caller-chosen name, unique across live servers
    pub name: String,
    /// Absolute URL of the upstream MCP endpoint
    pub url: String,
    pub description: Option<String>,
    /// Disabled servers are not connected
    pub enabled: bool,
    pub auto_reconnect: bool,
    /// Per-call timeout, milliseconds
    pub timeout_ms: i64,
    pub retry_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Input to [`crate::ServerRepository::upsert`]
#[derive(Debug, Clone)]
pub struct NewServer {
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub auto_reconnect: bool,
    pub timeout_ms: i64,
    pub retry_attempts: i32,
}

impl NewServer {
    /// A server config with the documented defaults
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
}

/// Kinds of events in the append-only sync log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncEventType {
    Registered,
    Unregistered,
    Updated,
    Reconnected,
    Disconnected,
}

impl SyncEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Registered => "REGISTERED",
            Self::Unregistered => "UNREGISTERED",
            Self::Updated => "UPDATED",
            Self::Reconnected => "RECONNECTED",
            Self::Disconnected => "DISCONNECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "REGISTERED" => Some(Self::Registered),
            "UNREGISTERED" => Some(Self::Unregistered),
            "UPDATED" => Some(Self::Updated),
            "RECONNECTED" => Some(Self::Reconnected),
            "DISCONNECTED" => Some(Self::Disconnected),
            _ => None,
        }
    }
}

/// One row of the append-only sync event log
#[derive(Debug, Clone)]
pub struct SyncEvent {
    pub id: Uuid,
    pub event_type: SyncEventType,
    /// Opaque payload; authoritative for REGISTERED/UPDATED handlers
    pub event_data: Value,
    /// Instance that published the event
    pub instance_id: String,
    pub created_at: DateTime<Utc>,
    /// Instances that have applied (or skipped) the event
    pub processed_by: Vec<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Outcome of an audited tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Error,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// One audited tool invocation
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub server_name: String,
    pub tool_name: String,
    pub arguments: Option<Value>,
    pub response: Option<Value>,
    pub duration_ms: i64,
    pub status: CallStatus,
    pub error_message: Option<String>,
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub api_key_prefix: Option<String>,
}

/// Kinds of server lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEventType {
    Connected,
    Disconnected,
    Error,
    Registered,
    Unregistered,
    ToolLoaded,
    HealthCheck,
}

impl ServerEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
            Self::Registered => "registered",
            Self::Unregistered => "unregistered",
            Self::ToolLoaded => "tool_loaded",
            Self::HealthCheck => "health_check",
        }
    }
}

/// One server lifecycle event
#[derive(Debug, Clone)]
pub struct ServerEventRecord {
    pub server_id: Option<Uuid>,
    pub server_name: String,
    pub event_type: ServerEventType,
    pub details: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_event_type_round_trips() {
        for t in [
            SyncEventType::Registered,
            SyncEventType::Unregistered,
            SyncEventType::Updated,
            SyncEventType::Reconnected,
            SyncEventType::Disconnected,
        ] {
            assert_eq!(SyncEventType::parse(t.as_str()), Some(t));
        }
        assert_eq!(SyncEventType::parse("NOPE"), None);
    }

    #[test]
    fn new_server_defaults() {
        let s = NewServer::new("calc", "http://u:1/mcp");
        assert!(s.enabled);
        assert!(s.auto_reconnect);
        assert_eq!(s.timeout_ms, 30_000);
        assert_eq!(s.retry_attempts, 3);
    }
}
