use serde::Deserialize;
use serde_json::Value;

use relay_store::SyncEventType;
use relay_upstream::UpstreamConfig;

/// What to do about one incoming sync event, given local state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyncAction {
    Ignore,
    /// Connect and register tools
    Connect,
    /// Tear down the transport and connect afresh
    Reconnect,
    /// Unregister tools, then disconnect
    Unregister,
    /// Disconnect only; registrations stay for the reconnect path
    Disconnect,
}

/// Pure dispatch decision for one event
///
/// `own` is true when this instance published the event; such events
/// are acknowledged without acting. Everything here is idempotent:
/// events describing a state we already hold map to `Ignore`.
pub(crate) fn decide(
    event_type: SyncEventType,
    own: bool,
    tracked: bool,
    connected: bool,
) -> SyncAction {
    if own {
        return SyncAction::Ignore;
    }

    match event_type {
        SyncEventType::Registered | SyncEventType::Updated => {
            if tracked {
                SyncAction::Ignore
            } else {
                SyncAction::Connect
            }
        }
        SyncEventType::Unregistered => {
            if tracked {
                SyncAction::Unregister
            } else {
                SyncAction::Ignore
            }
        }
        SyncEventType::Reconnected => {
            if tracked && !connected {
                SyncAction::Reconnect
            } else {
                SyncAction::Ignore
            }
        }
        SyncEventType::Disconnected => {
            if tracked && connected {
                SyncAction::Disconnect
            } else {
                SyncAction::Ignore
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct EventServer {
    name: String,
    url: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_true")]
    auto_reconnect: bool,
    #[serde(default = "default_timeout")]
    timeout_ms: u64,
    #[serde(default = "default_retries")]
    retry_attempts: u32,
}

fn default_true() -> bool {
    true
}
fn default_timeout() -> u64 {
    30_000
}
fn default_retries() -> u32 {
    3
}

/// Server name carried by an event payload
pub(crate) fn payload_server_name(data: &Value) -> Option<String> {
    data.get("server")
        .and_then(|s| s.get("name"))
        .or_else(|| data.get("name"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Full server config carried by an event payload
///
/// The payload is authoritative for REGISTERED/UPDATED: the publisher
/// may not have committed the row to `servers` yet when the event is
/// observed.
pub(crate) fn payload_config(data: &Value) -> Option<UpstreamConfig> {
    let raw = data.get("server").unwrap_or(data);
    let server: EventServer = serde_json::from_value(raw.clone()).ok()?;

    let mut config = UpstreamConfig::new(server.name, server.url);
    config.description = server.description;
    config.enabled = server.enabled;
    config.auto_reconnect = server.auto_reconnect;
    config.timeout_ms = server.timeout_ms;
    config.retry_attempts = server.retry_attempts;
    Some(config)
}
