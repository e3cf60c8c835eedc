use serde::Deserialize;

/// Tool-call audit configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Whether tool calls are recorded at all
    #[serde(default)]
    pub enabled: bool,
    /// Record call arguments; when false the field is nulled before enqueue
    #[serde(default = "default_true")]
    pub log_arguments: bool,
    /// Record call responses; when false the field is nulled before enqueue
    #[serde(default = "default_true")]
    pub log_responses: bool,
    /// Days before audit rows are eligible for cleanup
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_arguments: true,
            log_responses: true,
            retention_days: default_retention_days(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> i64 {
    30
}
