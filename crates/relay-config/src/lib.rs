#![allow(clippy::must_use_candidate)]

pub mod audit;
pub mod credit;
pub mod database;
mod env;
mod loader;
mod overlay;
pub mod router;
pub mod server;
pub mod sync;

use serde::Deserialize;

pub use audit::AuditConfig;
pub use credit::CreditConfig;
pub use database::DatabaseConfig;
pub use loader::SERVER_NAME_PATTERN;
pub use router::RouterConfig;
pub use server::{AuthConfig, CorsConfig, ServerConfig};
pub use sync::SyncConfig;

/// Top-level Relay configuration
///
/// Every section carries serde defaults matching the documented
/// environment defaults, so an empty file (or no file at all) yields a
/// runnable configuration. Environment variables override file values
/// via [`Config::apply_env`].
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP listener configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Router identity and namespacing
    #[serde(default)]
    pub router: RouterConfig,
    /// Relational store; omit to run memory-only
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    /// Credit gating via the user-management service; omit to disable
    #[serde(default)]
    pub credit: Option<CreditConfig>,
    /// Multi-instance sync engine
    #[serde(default)]
    pub sync: SyncConfig,
    /// Tool-call audit trail
    #[serde(default)]
    pub audit: AuditConfig,
}
