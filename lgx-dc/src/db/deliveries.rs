//! Delivery confirmation, signature and photo persistence
//!
//! Inserts take a `&mut SqliteConnection` so the orchestrator can run them
//! inside one transaction. Sync-state updates are conditional on the record
//! not being `Synced` yet, which makes a concurrent second push a no-op.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use lgx_common::events::SyncState;
use lgx_common::time::{from_storage, to_storage};
use lgx_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{parse_enum, parse_optional_ts, parse_uuid};
use crate::models::{DeliveryConfirmation, Photo, Signature, SyncFilter, SyncStatistics};

pub async fn insert_confirmation(
    conn: &mut SqliteConnection,
    delivery: &DeliveryConfirmation,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO delivery_confirmations (
            id, shipment_id, delivered_by, delivered_at, recipient_name, delivery_notes,
            gps_latitude, gps_longitude, gps_accuracy, verification_hash, status,
            sync_state, sync_attempts, sync_error, erp_sync_timestamp, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(delivery.id.to_string())
    .bind(delivery.shipment_id)
    .bind(&delivery.delivered_by)
    .bind(to_storage(&delivery.delivered_at))
    .bind(&delivery.recipient_name)
    .bind(&delivery.delivery_notes)
    .bind(delivery.gps_latitude)
    .bind(delivery.gps_longitude)
    .bind(delivery.gps_accuracy)
    .bind(&delivery.verification_hash)
    .bind(delivery.status.as_str())
    .bind(delivery.sync_state.as_str())
    .bind(delivery.sync_attempts as i64)
    .bind(&delivery.sync_error)
    .bind(delivery.erp_sync_timestamp.as_ref().map(to_storage))
    .bind(to_storage(&delivery.created_at))
    .bind(to_storage(&delivery.updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn insert_signature(conn: &mut SqliteConnection, signature: &Signature) -> Result<()> {
    let stroke_data = serde_json::to_string(&signature.stroke_data)
        .map_err(|e| Error::Internal(format!("Failed to serialize strokes: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO delivery_signatures (
            id, delivery_id, signature_data, signature_hash, quality_score,
            stroke_data, width, height, device_info, signed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(signature.id.to_string())
    .bind(signature.delivery_id.to_string())
    .bind(&signature.signature_data)
    .bind(&signature.signature_hash)
    .bind(signature.quality_score)
    .bind(stroke_data)
    .bind(signature.width as i64)
    .bind(signature.height as i64)
    .bind(&signature.device_info)
    .bind(to_storage(&signature.signed_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn insert_photo(conn: &mut SqliteConnection, photo: &Photo) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO delivery_photos (
            id, delivery_id, path, thumbnail_path, photo_type, gps_latitude, gps_longitude,
            file_size, width, height, mime_type, captured_at, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(photo.id.to_string())
    .bind(photo.delivery_id.to_string())
    .bind(&photo.path)
    .bind(&photo.thumbnail_path)
    .bind(photo.photo_type.as_str())
    .bind(photo.gps_latitude)
    .bind(photo.gps_longitude)
    .bind(photo.file_size as i64)
    .bind(photo.width as i64)
    .bind(photo.height as i64)
    .bind(&photo.mime_type)
    .bind(photo.captured_at.as_ref().map(to_storage))
    .bind(to_storage(&photo.created_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn exists(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM delivery_confirmations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(pool)
            .await?;
    Ok(found.is_some())
}

/// Load a confirmation with its signature and photos
pub async fn load_delivery(pool: &SqlitePool, id: Uuid) -> Result<Option<DeliveryConfirmation>> {
    let row = sqlx::query(
        r#"
        SELECT id, shipment_id, delivered_by, delivered_at, recipient_name, delivery_notes,
               gps_latitude, gps_longitude, gps_accuracy, verification_hash, status,
               sync_state, sync_attempts, sync_error, erp_sync_timestamp, created_at, updated_at
        FROM delivery_confirmations
        WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let mut delivery = delivery_from_row(&row)?;
    delivery.signature = load_signature(pool, id).await?;
    delivery.photos = load_photos(pool, id).await?;
    Ok(Some(delivery))
}

fn delivery_from_row(row: &SqliteRow) -> Result<DeliveryConfirmation> {
    let id: String = row.try_get("id")?;
    let delivered_at: String = row.try_get("delivered_at")?;
    let status: String = row.try_get("status")?;
    let sync_state: String = row.try_get("sync_state")?;
    let sync_attempts: i64 = row.try_get("sync_attempts")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(DeliveryConfirmation {
        id: parse_uuid(&id)?,
        shipment_id: row.try_get("shipment_id")?,
        delivered_by: row.try_get("delivered_by")?,
        delivered_at: from_storage(&delivered_at)?,
        recipient_name: row.try_get("recipient_name")?,
        delivery_notes: row.try_get("delivery_notes")?,
        gps_latitude: row.try_get("gps_latitude")?,
        gps_longitude: row.try_get("gps_longitude")?,
        gps_accuracy: row.try_get("gps_accuracy")?,
        verification_hash: row.try_get("verification_hash")?,
        status: parse_enum("status", &status)?,
        sync_state: parse_enum("sync_state", &sync_state)?,
        sync_attempts: sync_attempts.max(0) as u32,
        sync_error: row.try_get("sync_error")?,
        erp_sync_timestamp: parse_optional_ts(row.try_get("erp_sync_timestamp")?)?,
        created_at: from_storage(&created_at)?,
        updated_at: from_storage(&updated_at)?,
        signature: None,
        photos: Vec::new(),
    })
}

async fn load_signature(pool: &SqlitePool, delivery_id: Uuid) -> Result<Option<Signature>> {
    let row = sqlx::query(
        r#"
        SELECT id, delivery_id, signature_data, signature_hash, quality_score,
               stroke_data, width, height, device_info, signed_at
        FROM delivery_signatures
        WHERE delivery_id = ?
        "#,
    )
    .bind(delivery_id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let id: String = row.try_get("id")?;
    let stroke_data: String = row.try_get("stroke_data")?;
    let signed_at: String = row.try_get("signed_at")?;
    let width: i64 = row.try_get("width")?;
    let height: i64 = row.try_get("height")?;

    Ok(Some(Signature {
        id: parse_uuid(&id)?,
        delivery_id,
        signature_data: row.try_get("signature_data")?,
        signature_hash: row.try_get("signature_hash")?,
        quality_score: row.try_get("quality_score")?,
        stroke_data: serde_json::from_str(&stroke_data)
            .map_err(|e| Error::Internal(format!("Failed to parse strokes: {}", e)))?,
        width: width as u32,
        height: height as u32,
        device_info: row.try_get("device_info")?,
        signed_at: from_storage(&signed_at)?,
    }))
}

async fn load_photos(pool: &SqlitePool, delivery_id: Uuid) -> Result<Vec<Photo>> {
    let rows = sqlx::query(
        r#"
        SELECT id, path, thumbnail_path, photo_type, gps_latitude, gps_longitude,
               file_size, width, height, mime_type, captured_at, created_at
        FROM delivery_photos
        WHERE delivery_id = ?
        ORDER BY created_at, rowid
        "#,
    )
    .bind(delivery_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<Photo> {
            let id: String = row.try_get("id")?;
            let photo_type: String = row.try_get("photo_type")?;
            let file_size: i64 = row.try_get("file_size")?;
            let width: i64 = row.try_get("width")?;
            let height: i64 = row.try_get("height")?;
            let created_at: String = row.try_get("created_at")?;

            Ok(Photo {
                id: parse_uuid(&id)?,
                delivery_id,
                path: row.try_get("path")?,
                thumbnail_path: row.try_get("thumbnail_path")?,
                photo_type: parse_enum("photo_type", &photo_type)?,
                gps_latitude: row.try_get("gps_latitude")?,
                gps_longitude: row.try_get("gps_longitude")?,
                file_size: file_size as u64,
                width: width as u32,
                height: height as u32,
                mime_type: row.try_get("mime_type")?,
                captured_at: parse_optional_ts(row.try_get("captured_at")?)?,
                created_at: from_storage(&created_at)?,
            })
        })
        .collect()
}

/// Current sync state, `None` when the delivery does not exist
pub async fn sync_state(pool: &SqlitePool, id: Uuid) -> Result<Option<SyncState>> {
    let state: Option<String> =
        sqlx::query_scalar("SELECT sync_state FROM delivery_confirmations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(pool)
            .await?;
    state.map(|s| parse_enum("sync_state", &s)).transpose()
}

/// Record the attempt count reached so far
pub async fn record_attempts(pool: &SqlitePool, id: Uuid, attempts: u32) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE delivery_confirmations
        SET sync_attempts = ?, updated_at = ?
        WHERE id = ? AND sync_state != 'Synced'
        "#,
    )
    .bind(attempts as i64)
    .bind(to_storage(&lgx_common::time::now()))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Transition to `Synced`; false when the record was already synced
///
/// The pushed photos are stamped in the same transaction so a later push
/// for this delivery skips them.
pub async fn mark_synced(
    pool: &SqlitePool,
    id: Uuid,
    attempts: u32,
    synced_at: DateTime<Utc>,
    photo_ids: &[Uuid],
) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let result = sqlx::query(
        r#"
        UPDATE delivery_confirmations
        SET sync_state = 'Synced', sync_attempts = ?, sync_error = NULL,
            erp_sync_timestamp = ?, updated_at = ?
        WHERE id = ? AND sync_state != 'Synced'
        "#,
    )
    .bind(attempts as i64)
    .bind(to_storage(&synced_at))
    .bind(to_storage(&synced_at))
    .bind(id.to_string())
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() != 1 {
        return Ok(false);
    }

    for photo_id in photo_ids {
        sqlx::query("UPDATE delivery_photos SET erp_uploaded_at = ? WHERE id = ? AND delivery_id = ?")
            .bind(to_storage(&synced_at))
            .bind(photo_id.to_string())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(true)
}

/// Ids of photos already accepted by the ERP document store
pub async fn uploaded_photo_ids(pool: &SqlitePool, delivery_id: Uuid) -> Result<HashSet<Uuid>> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT id FROM delivery_photos WHERE delivery_id = ? AND erp_uploaded_at IS NOT NULL",
    )
    .bind(delivery_id.to_string())
    .fetch_all(pool)
    .await?;

    ids.iter().map(|id| parse_uuid(id)).collect()
}

/// Put a synced delivery back to `Pending` after new photos were attached
///
/// Keeps `erp_sync_timestamp`, which marks the status and signature as
/// already delivered.
pub async fn rearm_synced(conn: &mut SqliteConnection, id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE delivery_confirmations
        SET sync_state = 'Pending', sync_attempts = 0, sync_error = NULL, updated_at = ?
        WHERE id = ? AND sync_state = 'Synced'
        "#,
    )
    .bind(to_storage(&lgx_common::time::now()))
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Transition to `SyncFailed` with a descriptive error
pub async fn mark_failed(pool: &SqlitePool, id: Uuid, attempts: u32, error: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE delivery_confirmations
        SET sync_state = 'SyncFailed', sync_attempts = ?, sync_error = ?, updated_at = ?
        WHERE id = ? AND sync_state != 'Synced'
        "#,
    )
    .bind(attempts as i64)
    .bind(error)
    .bind(to_storage(&lgx_common::time::now()))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Re-arm a failed delivery for another round of attempts
///
/// Synced records are left untouched (returns false).
pub async fn reset_to_pending(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE delivery_confirmations
        SET sync_state = 'Pending', sync_attempts = 0, sync_error = NULL, updated_at = ?
        WHERE id = ? AND sync_state != 'Synced'
        "#,
    )
    .bind(to_storage(&lgx_common::time::now()))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Oldest-first ids of deliveries waiting for their first push
pub async fn list_pending_ids(pool: &SqlitePool, limit: u32) -> Result<Vec<Uuid>> {
    let ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT id FROM delivery_confirmations
        WHERE sync_state = 'Pending'
        ORDER BY created_at, rowid
        LIMIT ?
        "#,
    )
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    ids.iter().map(|id| parse_uuid(id)).collect::<Result<Vec<_>>>()
}

/// Delete a confirmation; signature and photo rows cascade
pub async fn delete_delivery(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM delivery_confirmations WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn sync_statistics(pool: &SqlitePool, filter: &SyncFilter) -> Result<SyncStatistics> {
    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
        r#"
        SELECT
            COUNT(*) AS total,
            COALESCE(SUM(CASE WHEN sync_state = 'Synced' THEN 1 ELSE 0 END), 0) AS synced,
            COALESCE(SUM(CASE WHEN sync_state IN ('Pending', 'Queued') THEN 1 ELSE 0 END), 0) AS pending,
            COALESCE(SUM(CASE WHEN sync_state = 'SyncFailed' THEN 1 ELSE 0 END), 0) AS failed
        FROM delivery_confirmations
        WHERE 1 = 1
        "#,
    );

    if let Some(delivered_by) = &filter.delivered_by {
        query.push(" AND delivered_by = ").push_bind(delivered_by.clone());
    }
    if let Some(shipment_id) = filter.shipment_id {
        query.push(" AND shipment_id = ").push_bind(shipment_id);
    }
    if let Some(from) = &filter.from {
        query.push(" AND delivered_at >= ").push_bind(to_storage(from));
    }
    if let Some(to) = &filter.to {
        query.push(" AND delivered_at < ").push_bind(to_storage(to));
    }

    let row = query.build().fetch_one(pool).await?;
    let total: i64 = row.try_get("total")?;
    let synced: i64 = row.try_get("synced")?;
    let pending: i64 = row.try_get("pending")?;
    let failed: i64 = row.try_get("failed")?;

    Ok(SyncStatistics::from_counts(
        total as u64,
        synced as u64,
        pending as u64,
        failed as u64,
    ))
}
