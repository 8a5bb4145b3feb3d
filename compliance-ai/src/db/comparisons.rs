//! Comparison job persistence

use chrono::{DateTime, Utc};
use compliance_common::events::ComparisonStatus;
use compliance_common::{time, Error, Result};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{frameworks, parse_status, parse_ts, parse_uuid};
use crate::models::{ComparisonJob, ComparisonSummary};

const SELECT_COLUMNS: &str = r#"
    SELECT id, user_id, user_framework_id, expert_framework_id, user_job_id, expert_job_id,
           status, results, results_count, mean_score, error_message, created_at, updated_at
    FROM comparisons
"#;

/// Insert a new comparison
///
/// Fails with [`Error::Conflict`] when an active comparison for the same
/// (user, user framework, expert framework) triple already exists.
pub async fn insert(pool: &SqlitePool, job: &ComparisonJob) -> Result<()> {
    let results = serde_json::to_string(&job.results)?;

    let outcome = sqlx::query(
        r#"
        INSERT INTO comparisons (
            id, user_id, user_framework_id, expert_framework_id, user_job_id, expert_job_id,
            status, results, results_count, mean_score, error_message, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(job.id.to_string())
    .bind(&job.user_id)
    .bind(job.user_framework_id.to_string())
    .bind(job.expert_framework_id.to_string())
    .bind(&job.user_job_id)
    .bind(&job.expert_job_id)
    .bind(job.status.as_str())
    .bind(results)
    .bind(job.results_count)
    .bind(job.mean_score)
    .bind(&job.error_message)
    .bind(time::to_db(job.created_at))
    .bind(time::to_db(job.updated_at))
    .execute(pool)
    .await;

    match outcome {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(Error::Conflict(
            "A comparison for these frameworks is already in progress".to_string(),
        )),
        Err(e) => Err(e.into()),
    }
}

/// Load a comparison
pub async fn load(pool: &SqlitePool, id: Uuid) -> Result<Option<ComparisonJob>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|row| from_row(&row)).transpose()
}

/// Active (pending or in-process) comparison for a triple, if any
pub async fn find_active(
    pool: &SqlitePool,
    user_id: &str,
    user_framework_id: Uuid,
    expert_framework_id: Uuid,
) -> Result<Option<ComparisonJob>> {
    let row = sqlx::query(&format!(
        "{} WHERE user_id = ? AND user_framework_id = ? AND expert_framework_id = ? \
         AND status IN ('pending', 'in-process') LIMIT 1",
        SELECT_COLUMNS
    ))
    .bind(user_id)
    .bind(user_framework_id.to_string())
    .bind(expert_framework_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|row| from_row(&row)).transpose()
}

/// Active comparisons not updated since before `cutoff`
pub async fn find_stale_active(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
    let ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT id FROM comparisons
        WHERE status IN ('pending', 'in-process') AND updated_at < ?
        ORDER BY updated_at ASC
        "#,
    )
    .bind(time::to_db(cutoff))
    .fetch_all(pool)
    .await?;

    ids.iter().map(|id| parse_uuid(id)).collect()
}

/// Move `pending` to `in-process`; false if it was not pending
pub async fn mark_in_process(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE comparisons SET status = 'in-process', updated_at = ? WHERE id = ? AND status = 'pending'",
    )
    .bind(time::now_db())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Record an error on an active comparison; false if it had already finished
pub async fn mark_error(pool: &SqlitePool, id: Uuid, message: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE comparisons SET status = 'error', error_message = ?, updated_at = ?
        WHERE id = ? AND status IN ('pending', 'in-process')
        "#,
    )
    .bind(message)
    .bind(time::now_db())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Move `completed` to `done`; false if it was not completed
pub async fn mark_done(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE comparisons SET status = 'done', updated_at = ? WHERE id = ? AND status = 'completed'",
    )
    .bind(time::now_db())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Store the completed results and append the summary to the user's framework record
///
/// Both writes happen in one transaction. Returns false, writing nothing, when the
/// comparison had already left the active states.
pub async fn complete_with_fan_out(
    pool: &SqlitePool,
    id: Uuid,
    user_framework_id: Uuid,
    results: &[Value],
    mean_score: Option<f64>,
    summary: &ComparisonSummary,
) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE comparisons
        SET status = 'completed', results = ?, results_count = ?, mean_score = ?,
            error_message = NULL, updated_at = ?
        WHERE id = ? AND status IN ('pending', 'in-process')
        "#,
    )
    .bind(serde_json::to_string(results)?)
    .bind(results.len() as i64)
    .bind(mean_score)
    .bind(time::to_db(summary.completed_at))
    .bind(id.to_string())
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() != 1 {
        tx.rollback().await?;
        return Ok(false);
    }

    frameworks::append_comparison_summary(&mut *tx, user_framework_id, summary).await?;
    tx.commit().await?;

    Ok(true)
}

fn from_row(row: &SqliteRow) -> Result<ComparisonJob> {
    let id: String = row.get("id");
    let user_framework_id: String = row.get("user_framework_id");
    let expert_framework_id: String = row.get("expert_framework_id");
    let status: String = row.get("status");
    let results: String = row.get("results");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(ComparisonJob {
        id: parse_uuid(&id)?,
        user_id: row.get("user_id"),
        user_framework_id: parse_uuid(&user_framework_id)?,
        expert_framework_id: parse_uuid(&expert_framework_id)?,
        user_job_id: row.get("user_job_id"),
        expert_job_id: row.get("expert_job_id"),
        status: parse_status::<ComparisonStatus>(&status)?,
        results: serde_json::from_str(&results)?,
        results_count: row.get("results_count"),
        mean_score: row.get("mean_score"),
        error_message: row.get("error_message"),
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}
