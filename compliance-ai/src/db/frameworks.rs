//! Framework record persistence
//!
//! Status writes are guarded by the job ID they belong to and by the current status, so a
//! late event from a superseded monitor, or a second writer racing to the same terminal
//! state, updates zero rows instead of clobbering newer state.

use chrono::{DateTime, Utc};
use compliance_common::events::{ExtractionStatus, JobStatus};
use compliance_common::{time, Result};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_status, parse_ts, parse_uuid};
use crate::models::{ComparisonSummary, Framework, ProcessingJob};

const SELECT_COLUMNS: &str = r#"
    SELECT id, user_id, kind, file_name, file_path, job_id, status,
           control_extraction_status, processed_at, error_message,
           extracted_items, item_count, extracted_at, comparison_results, created_at
    FROM frameworks
"#;

/// Insert a new framework record
pub async fn insert(pool: &SqlitePool, framework: &Framework) -> Result<()> {
    let extracted_items = serde_json::to_string(&framework.job.extracted_items)?;
    let comparison_results = serde_json::to_string(&framework.comparison_results)?;

    sqlx::query(
        r#"
        INSERT INTO frameworks (
            id, user_id, kind, file_name, file_path, job_id, status,
            control_extraction_status, processed_at, error_message,
            extracted_items, item_count, extracted_at, comparison_results, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(framework.id.to_string())
    .bind(&framework.user_id)
    .bind(framework.kind.as_str())
    .bind(&framework.file_name)
    .bind(&framework.file_path)
    .bind(&framework.job.job_id)
    .bind(framework.job.status.as_str())
    .bind(framework.job.control_extraction_status.as_str())
    .bind(framework.job.processed_at.map(time::to_db))
    .bind(&framework.job.error_message)
    .bind(extracted_items)
    .bind(framework.job.item_count)
    .bind(framework.job.extracted_at.map(time::to_db))
    .bind(comparison_results)
    .bind(time::to_db(framework.created_at))
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a framework record
pub async fn load(pool: &SqlitePool, id: Uuid) -> Result<Option<Framework>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|row| from_row(&row)).transpose()
}

/// Attach a freshly uploaded AI job
///
/// Only succeeds when no job is outstanding (never uploaded, or the last job failed).
/// Returns false if another upload won the race.
pub async fn record_upload(pool: &SqlitePool, id: Uuid, job: &ProcessingJob) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE frameworks
        SET job_id = ?, status = ?, control_extraction_status = ?, processed_at = ?,
            error_message = NULL, extracted_items = '[]', item_count = 0, extracted_at = NULL
        WHERE id = ? AND (job_id IS NULL OR status = 'failed')
        "#,
    )
    .bind(&job.job_id)
    .bind(job.status.as_str())
    .bind(job.control_extraction_status.as_str())
    .bind(job.processed_at.map(time::to_db))
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Persist a non-terminal status change
///
/// Returns false when the job is no longer current or is already terminal.
pub async fn save_progress(
    pool: &SqlitePool,
    id: Uuid,
    job_id: &str,
    job: &ProcessingJob,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE frameworks
        SET status = ?, control_extraction_status = ?, processed_at = ?
        WHERE id = ? AND job_id = ? AND status NOT IN ('completed', 'failed')
        "#,
    )
    .bind(job.status.as_str())
    .bind(job.control_extraction_status.as_str())
    .bind(job.processed_at.map(time::to_db))
    .bind(id.to_string())
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Persist a terminal state together with its results in one statement
///
/// Exactly one concurrent caller gets `true`; every other caller sees the row already
/// terminal and gets `false`.
pub async fn save_terminal(
    pool: &SqlitePool,
    id: Uuid,
    job_id: &str,
    job: &ProcessingJob,
) -> Result<bool> {
    let extracted_items = serde_json::to_string(&job.extracted_items)?;

    let result = sqlx::query(
        r#"
        UPDATE frameworks
        SET status = ?, control_extraction_status = ?, processed_at = ?, error_message = ?,
            extracted_items = ?, item_count = ?, extracted_at = ?
        WHERE id = ? AND job_id = ? AND status NOT IN ('completed', 'failed')
        "#,
    )
    .bind(job.status.as_str())
    .bind(job.control_extraction_status.as_str())
    .bind(job.processed_at.map(time::to_db))
    .bind(&job.error_message)
    .bind(extracted_items)
    .bind(job.item_count)
    .bind(job.extracted_at.map(time::to_db))
    .bind(id.to_string())
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Jobs stuck in an intermediate state since before `cutoff`
///
/// Returns `(framework_id, job_id)` pairs.
pub async fn find_stale(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<Vec<(Uuid, String)>> {
    let rows = sqlx::query(
        r#"
        SELECT id, job_id
        FROM frameworks
        WHERE status IN ('uploaded', 'processing')
          AND job_id IS NOT NULL
          AND processed_at IS NOT NULL
          AND processed_at < ?
        ORDER BY processed_at ASC
        "#,
    )
    .bind(time::to_db(cutoff))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let id: String = row.get("id");
            let job_id: String = row.get("job_id");
            Ok((parse_uuid(&id)?, job_id))
        })
        .collect()
}

/// Append a comparison summary to the framework's result list (inside a caller's transaction)
pub(crate) async fn append_comparison_summary(
    conn: &mut sqlx::SqliteConnection,
    id: Uuid,
    summary: &ComparisonSummary,
) -> Result<()> {
    let current: Option<String> =
        sqlx::query_scalar("SELECT comparison_results FROM frameworks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await?;

    let current = current.ok_or_else(|| {
        compliance_common::Error::NotFound(format!("Framework not found: {}", id))
    })?;
    let mut summaries: Vec<ComparisonSummary> = serde_json::from_str(&current)?;
    summaries.push(summary.clone());

    sqlx::query("UPDATE frameworks SET comparison_results = ? WHERE id = ?")
        .bind(serde_json::to_string(&summaries)?)
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

fn from_row(row: &SqliteRow) -> Result<Framework> {
    let id: String = row.get("id");
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    let extraction: String = row.get("control_extraction_status");
    let processed_at: Option<String> = row.get("processed_at");
    let extracted_at: Option<String> = row.get("extracted_at");
    let extracted_items: String = row.get("extracted_items");
    let comparison_results: String = row.get("comparison_results");
    let created_at: String = row.get("created_at");

    let extracted_items: Vec<Value> = serde_json::from_str(&extracted_items)?;

    Ok(Framework {
        id: parse_uuid(&id)?,
        user_id: row.get("user_id"),
        kind: parse_status(&kind)?,
        file_name: row.get("file_name"),
        file_path: row.get("file_path"),
        job: ProcessingJob {
            job_id: row.get("job_id"),
            status: parse_status::<JobStatus>(&status)?,
            control_extraction_status: parse_status::<ExtractionStatus>(&extraction)?,
            processed_at: processed_at.as_deref().map(parse_ts).transpose()?,
            error_message: row.get("error_message"),
            extracted_items,
            item_count: row.get("item_count"),
            extracted_at: extracted_at.as_deref().map(parse_ts).transpose()?,
        },
        comparison_results: serde_json::from_str(&comparison_results)?,
        created_at: parse_ts(&created_at)?,
    })
}
