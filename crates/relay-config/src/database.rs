use secrecy::SecretString;
use serde::Deserialize;

/// Relational store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Postgres connection URL
    pub url: SecretString,
    /// Maximum pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Run embedded migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_run_migrations() -> bool {
    true
}
