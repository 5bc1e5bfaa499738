//! Read-only connection pool bootstrap and migration runner.
//!
//! Pool construction follows the `PgPoolOptions` idiom used across the
//! retrieval pack's Postgres adapters; migrations run once at startup via
//! `sqlx::migrate!`, the mechanism the `migrate` Cargo feature exists for.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Creates the pool C9 executes validated SQL against. Bounded per
/// `Config::database.pool_size`; a request waits on acquisition up to its
/// own remaining deadline rather than this pool blocking indefinitely.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
}

/// Runs the crate's bundled migrations (`search_cache`, `popular_queries`)
/// against `pool`. Safe to call on every startup — `sqlx::migrate!` tracks
/// applied versions in its own bookkeeping table.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
