//! Identity collaborator storage
//!
//! Only what socket authentication needs: a user ID and its current token version.

use compliance_common::Result;
use sqlx::SqlitePool;

/// Insert a user or overwrite its token version
pub async fn upsert_user(pool: &SqlitePool, user_id: &str, token_version: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO users (user_id, token_version) VALUES (?, ?)
        ON CONFLICT(user_id) DO UPDATE SET token_version = excluded.token_version
        "#,
    )
    .bind(user_id)
    .bind(token_version)
    .execute(pool)
    .await?;
    Ok(())
}

/// Invalidate every token issued so far ("log out everywhere")
///
/// Returns the new version, or `None` for an unknown user.
pub async fn bump_token_version(pool: &SqlitePool, user_id: &str) -> Result<Option<i64>> {
    let version = sqlx::query_scalar::<_, i64>(
        "UPDATE users SET token_version = token_version + 1 WHERE user_id = ? RETURNING token_version",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(version)
}
