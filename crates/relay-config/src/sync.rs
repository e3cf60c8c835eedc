use serde::Deserialize;

/// Multi-instance sync engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Whether the event log is published and consumed
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Fixed instance id; a UUID is generated when unset
    #[serde(default)]
    pub instance_id: Option<String>,
    /// Event-log polling interval, milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Repository reconciliation interval, milliseconds
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,
    /// Event retention cleanup interval, milliseconds
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
    /// Hours before a sync event ages out
    #[serde(default = "default_event_retention_hours")]
    pub event_retention_hours: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            instance_id: None,
            poll_interval_ms: default_poll_interval_ms(),
            reconcile_interval_ms: default_reconcile_interval_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            event_retention_hours: default_event_retention_hours(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_reconcile_interval_ms() -> u64 {
    30_000
}

fn default_cleanup_interval_ms() -> u64 {
    3_600_000
}

fn default_event_retention_hours() -> i64 {
    24
}
