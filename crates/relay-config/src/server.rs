use secrecy::SecretString;
use serde::Deserialize;

/// HTTP listener configuration
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,
    /// Path of the downstream MCP endpoint
    #[serde(default = "default_mcp_path")]
    pub mcp_path: String,
    /// Bearer-token authentication
    #[serde(default)]
    pub auth: AuthConfig,
    /// CORS for the REST surface
    #[serde(default)]
    pub cors: Option<CorsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            mcp_path: default_mcp_path(),
            auth: AuthConfig::default(),
            cors: None,
        }
    }
}

/// Bearer-token authentication configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Whether bearer-token auth is enforced
    #[serde(default)]
    pub enabled: bool,
    /// The expected token; required when enabled
    #[serde(default)]
    pub token: Option<SecretString>,
    /// Paths that skip authentication
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,
}

/// CORS configuration for the REST surface
///
/// The `/stats` endpoint always permits any origin regardless of this
/// section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins; empty means any
    #[serde(default)]
    pub origins: Vec<String>,
}

fn default_port() -> u16 {
    4000
}

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

fn default_mcp_path() -> String {
    "/mcp".to_owned()
}

fn default_public_paths() -> Vec<String> {
    vec!["/health".to_owned(), "/stats".to_owned()]
}
