//! Postgres connection pool and embedded migrations.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::DbError;

/// Type alias for the shared Postgres pool behind [`crate::PgStore`].
pub type DbPool = PgPool;

/// Pool sizing knobs, normally filled from the CLI.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Connect to `database_url` with the given settings.
pub async fn create_pool(database_url: &str, settings: &PoolSettings) -> Result<DbPool, DbError> {
    info!(
        max_connections = settings.max_connections,
        "connecting to database"
    );
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Apply the migrations embedded from the workspace `migrations/` directory.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbError> {
    info!("applying database migrations");
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}
