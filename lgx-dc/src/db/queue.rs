//! Offline queue persistence
//!
//! One SQLite file per device (`<root>/offline/<device_id>.db`). Items are
//! processed oldest-first (`created_at`, then insertion order).

use chrono::{DateTime, Utc};
use lgx_common::time::{from_storage, to_storage};
use lgx_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use uuid::Uuid;

use super::{open_pool, parse_enum, parse_uuid};
use crate::models::{QueueItem, QueueItemStatus};

/// Open the device's queue file, create the table, and put items a crash
/// left in `Processing` back to `Pending`
pub async fn open_queue_pool(path: &Path) -> Result<SqlitePool> {
    let pool = open_pool(path).await?;
    init_queue_tables(&pool).await?;

    let recovered = reset_processing(&pool).await?;
    if recovered > 0 {
        tracing::warn!(recovered, "Recovered offline items left in Processing");
    }
    Ok(pool)
}

pub async fn init_queue_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS offline_queue_items (
            id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'Pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_offline_status ON offline_queue_items(status, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn insert_item(pool: &SqlitePool, item: &QueueItem) -> Result<()> {
    let payload = serde_json::to_string(&item.payload)
        .map_err(|e| Error::Internal(format!("Failed to serialize payload: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO offline_queue_items (
            id, device_id, kind, payload, status, attempts, last_error, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(item.id.to_string())
    .bind(&item.device_id)
    .bind(item.kind.as_str())
    .bind(payload)
    .bind(item.status.as_str())
    .bind(item.attempts as i64)
    .bind(&item.last_error)
    .bind(to_storage(&item.created_at))
    .bind(to_storage(&item.updated_at))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_item(pool: &SqlitePool, id: Uuid) -> Result<Option<QueueItem>> {
    let row = sqlx::query(
        r#"
        SELECT id, device_id, kind, payload, status, attempts, last_error, created_at, updated_at
        FROM offline_queue_items WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(item_from_row).transpose()
}

pub async fn list_by_status(pool: &SqlitePool, status: QueueItemStatus) -> Result<Vec<QueueItem>> {
    let rows = sqlx::query(
        r#"
        SELECT id, device_id, kind, payload, status, attempts, last_error, created_at, updated_at
        FROM offline_queue_items
        WHERE status = ?
        ORDER BY created_at, rowid
        "#,
    )
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(item_from_row).collect()
}

pub async fn count_by_status(pool: &SqlitePool, status: QueueItemStatus) -> Result<u64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM offline_queue_items WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(pool)
            .await?;
    Ok(count as u64)
}

/// Move Pending items created before `cutoff` to Expired
pub async fn expire_older_than(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE offline_queue_items
        SET status = 'Expired', updated_at = ?
        WHERE status = 'Pending' AND created_at < ?
        "#,
    )
    .bind(to_storage(&lgx_common::time::now()))
    .bind(to_storage(&cutoff))
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Claim a Pending item for this pass; false when it is no longer Pending
pub async fn claim(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE offline_queue_items
        SET status = 'Processing', attempts = attempts + 1, updated_at = ?
        WHERE id = ? AND status = 'Pending'
        "#,
    )
    .bind(to_storage(&lgx_common::time::now()))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn set_status(
    pool: &SqlitePool,
    id: Uuid,
    status: QueueItemStatus,
    last_error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE offline_queue_items
        SET status = ?, last_error = COALESCE(?, last_error), updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(last_error)
    .bind(to_storage(&lgx_common::time::now()))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn reset_processing(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE offline_queue_items SET status = 'Pending', updated_at = ? WHERE status = 'Processing'",
    )
    .bind(to_storage(&lgx_common::time::now()))
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

fn item_from_row(row: &SqliteRow) -> Result<QueueItem> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("kind")?;
    let payload: String = row.try_get("payload")?;
    let status: String = row.try_get("status")?;
    let attempts: i64 = row.try_get("attempts")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(QueueItem {
        id: parse_uuid(&id)?,
        device_id: row.try_get("device_id")?,
        kind: parse_enum("kind", &kind)?,
        payload: serde_json::from_str(&payload)
            .map_err(|e| Error::Internal(format!("Failed to parse queue payload: {}", e)))?,
        status: parse_enum("status", &status)?,
        attempts: attempts.max(0) as u32,
        last_error: row.try_get("last_error")?,
        created_at: from_storage(&created_at)?,
        updated_at: from_storage(&updated_at)?,
    })
}
