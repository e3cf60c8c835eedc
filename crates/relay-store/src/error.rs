use thiserror::Error;

/// Errors from the relational store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Query or connection failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failure on startup
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Row payload could not be decoded
    #[error("malformed row: {0}")]
    Decode(#[from] serde_json::Error),
}
