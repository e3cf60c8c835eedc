use serde::Deserialize;

/// Router identity and tool-namespacing configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    /// Name advertised to downstream MCP clients
    #[serde(default = "default_name")]
    pub name: String,
    /// Version advertised to downstream MCP clients
    #[serde(default = "default_version")]
    pub version: String,
    /// Separator between server name and original tool name.
    /// Must never match the server-name character class.
    #[serde(default = "default_separator")]
    pub separator: String,
    /// Health-check interval in milliseconds
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Consecutive ping failures before a server is marked disconnected
    #[serde(default = "default_max_ping_failures")]
    pub max_ping_failures: u32,
    /// Default per-call timeout for upstream requests, milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Default retry attempts recorded on new server configs
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            version: default_version(),
            separator: default_separator(),
            ping_interval_ms: default_ping_interval_ms(),
            max_ping_failures: default_max_ping_failures(),
            timeout_ms: default_timeout_ms(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

fn default_name() -> String {
    "mcp-router".to_owned()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_owned()
}

fn default_separator() -> String {
    ":".to_owned()
}

fn default_ping_interval_ms() -> u64 {
    30_000
}

fn default_max_ping_failures() -> u32 {
    3
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retry_attempts() -> u32 {
    3
}
