use std::time::Instant;

use secrecy::ExposeSecret;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use relay_config::DatabaseConfig;

use crate::error::StoreError;

/// Handle to the relational store
///
/// Cheap to clone; all repositories and buffers share the pool.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

/// Store liveness as reported by `/health`
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub connected: bool,
    pub latency_ms: u64,
}

impl Db {
    /// Connect the pool and optionally run embedded migrations
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(config.url.expose_secret())
            .await?;

        if config.run_migrations {
            tracing::info!("running database migrations");
            sqlx::migrate!("./migrations").run(&pool).await?;
        }

        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests)
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip latency probe
    pub async fn health(&self) -> StoreHealth {
        let started = Instant::now();
        let connected = sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|row| row.get::<i32, _>(0) == 1)
            .unwrap_or(false);

        StoreHealth {
            connected,
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Close the pool; called last during shutdown
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").finish_non_exhaustive()
    }
}
