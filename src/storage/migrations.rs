//! # Database Migration Management
//!
//! SQL migrations under `migrations/` are embedded at compile time and applied
//! on pool creation when `auto_migrate` is enabled.

use crate::errors::Result;
use crate::storage::DbPool;
use sqlx::migrate::Migrator;
use tracing::info;

/// Embedded schema migrations
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply every pending migration
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    MIGRATOR.run(pool).await?;
    info!(migration_count = MIGRATOR.iter().count(), "Database migrations applied");
    Ok(())
}
