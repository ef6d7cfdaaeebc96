//! Database access for fitscan-bodyscan
//!
//! SQLite database in the root folder holding:
//! - `settings`: key/value settings (backend API key)
//! - `parameter_bounds`: hard bounds per shape / limb-mass parameter
//! - `body_scans`: committed scans when the local commit target is used

pub mod bounds;
pub mod scans;
pub mod settings;

pub use scans::{SqliteScanStore, StoredScan};

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Creates the database file and tables when missing.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Create fitscan tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS parameter_bounds (
            param_kind TEXT NOT NULL CHECK (param_kind IN ('shape', 'limb_mass')),
            name TEXT NOT NULL,
            min_value REAL NOT NULL,
            max_value REAL NOT NULL,
            PRIMARY KEY (param_kind, name),
            CHECK (min_value <= max_value)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS body_scans (
            client_scan_id TEXT PRIMARY KEY,
            scan_id TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            payload_sha256 TEXT NOT NULL,
            committed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (settings, parameter_bounds, body_scans)");

    Ok(())
}

/// In-memory pool with all tables, for tests
pub async fn memory_pool() -> Result<SqlitePool> {
    // One connection: every new :memory: connection is a separate database
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}
