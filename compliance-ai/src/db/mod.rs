//! Database access for compliance-ai
//!
//! SQLite via sqlx. Uuids and timestamps are stored as TEXT, JSON payloads as TEXT.

pub mod comparisons;
pub mod frameworks;
pub mod users;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Creates the database file and its parent directory if missing.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create tables and indexes if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> compliance_common::Result<()> {
    // Identity collaborator: current token version per user
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY,
            token_version INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS frameworks (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_path TEXT NOT NULL,
            job_id TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            control_extraction_status TEXT NOT NULL DEFAULT 'pending',
            processed_at TEXT,
            error_message TEXT,
            extracted_items TEXT NOT NULL DEFAULT '[]',
            item_count INTEGER NOT NULL DEFAULT 0,
            extracted_at TEXT,
            comparison_results TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_frameworks_status_processed ON frameworks(status, processed_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS comparisons (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            user_framework_id TEXT NOT NULL,
            expert_framework_id TEXT NOT NULL,
            user_job_id TEXT NOT NULL,
            expert_job_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            results TEXT NOT NULL DEFAULT '[]',
            results_count INTEGER NOT NULL DEFAULT 0,
            mean_score REAL,
            error_message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one active comparison per (user, user framework, expert framework)
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_comparisons_active_pair
        ON comparisons(user_id, user_framework_id, expert_framework_id)
        WHERE status IN ('pending', 'in-process')
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (users, frameworks, comparisons)");

    Ok(())
}

/// Parse a stored UUID
pub(crate) fn parse_uuid(value: &str) -> compliance_common::Result<uuid::Uuid> {
    uuid::Uuid::parse_str(value)
        .map_err(|e| compliance_common::Error::Internal(format!("Invalid UUID '{}': {}", value, e)))
}

/// Parse a stored timestamp
pub(crate) fn parse_ts(value: &str) -> compliance_common::Result<chrono::DateTime<chrono::Utc>> {
    compliance_common::time::from_db(value)
        .ok_or_else(|| compliance_common::Error::Internal(format!("Invalid timestamp: {}", value)))
}

/// Parse a stored status string
pub(crate) fn parse_status<T>(value: &str) -> compliance_common::Result<T>
where
    T: std::str::FromStr<Err = compliance_common::events::UnknownStatus>,
{
    value
        .parse()
        .map_err(|e: compliance_common::events::UnknownStatus| {
            compliance_common::Error::Internal(e.to_string())
        })
}
