//! Session persistence
//!
//! Sessions are keyed by the SHA-256 digest of the bearer token; the clear
//! token is never written.

use chrono::{DateTime, Utc};
use lgx_common::api::Actor;
use lgx_common::time::to_storage;
use lgx_common::Result;
use sqlx::{Row, SqlitePool};

use super::parse_enum;

pub async fn upsert_session(
    pool: &SqlitePool,
    token_hash: &str,
    actor: &Actor,
    expires_at: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sessions (token_hash, user_id, role, expires_at, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(token_hash) DO UPDATE SET
            user_id = excluded.user_id,
            role = excluded.role,
            expires_at = excluded.expires_at
        "#,
    )
    .bind(token_hash)
    .bind(&actor.user_id)
    .bind(actor.role.as_str())
    .bind(expires_at.as_ref().map(to_storage))
    .bind(to_storage(&lgx_common::time::now()))
    .execute(pool)
    .await?;
    Ok(())
}

/// Actor for a live session, `None` when unknown or expired at `now`
pub async fn find_session(
    pool: &SqlitePool,
    token_hash: &str,
    now: DateTime<Utc>,
) -> Result<Option<Actor>> {
    let row = sqlx::query(
        r#"
        SELECT user_id, role FROM sessions
        WHERE token_hash = ? AND (expires_at IS NULL OR expires_at > ?)
        "#,
    )
    .bind(token_hash)
    .bind(to_storage(&now))
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let role: String = row.try_get("role")?;
    Ok(Some(Actor {
        user_id: row.try_get("user_id")?,
        role: parse_enum("role", &role)?,
    }))
}

/// Delete sessions that expired before `now`
pub async fn cleanup_expired_sessions(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at IS NOT NULL AND expires_at <= ?")
        .bind(to_storage(&now))
        .execute(pool)
        .await?;

    if result.rows_affected() > 0 {
        tracing::info!(removed = result.rows_affected(), "Removed expired sessions");
    }
    Ok(result.rows_affected())
}
