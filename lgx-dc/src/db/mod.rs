//! SQLite persistence for lgx-dc
//!
//! The service database (`<root>/lgx-dc.db`) holds delivery confirmations,
//! their signatures and photos, plus the shipment mirror and sessions. The
//! offline queue lives in its own per-device file (see [`queue`]).

pub mod deliveries;
pub mod queue;
pub mod sessions;
pub mod shipments;

use lgx_common::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONNECTIONS: u32 = 8;

/// Open (creating if missing) a WAL-mode SQLite file with foreign keys on
pub async fn open_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::debug!("Opening database: {}", db_path.display());

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Open the service database and create its tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let pool = open_pool(db_path).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create service tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS delivery_confirmations (
            id TEXT PRIMARY KEY,
            shipment_id INTEGER NOT NULL,
            delivered_by TEXT NOT NULL,
            delivered_at TEXT NOT NULL,
            recipient_name TEXT NOT NULL,
            delivery_notes TEXT,
            gps_latitude REAL,
            gps_longitude REAL,
            gps_accuracy REAL,
            verification_hash TEXT NOT NULL,
            status TEXT NOT NULL,
            sync_state TEXT NOT NULL DEFAULT 'Pending',
            sync_attempts INTEGER NOT NULL DEFAULT 0,
            sync_error TEXT,
            erp_sync_timestamp TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_deliveries_sync_state ON delivery_confirmations(sync_state)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_deliveries_shipment ON delivery_confirmations(shipment_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS delivery_signatures (
            id TEXT PRIMARY KEY,
            delivery_id TEXT NOT NULL UNIQUE
                REFERENCES delivery_confirmations(id) ON DELETE CASCADE,
            signature_data TEXT NOT NULL,
            signature_hash TEXT NOT NULL,
            quality_score REAL NOT NULL,
            stroke_data TEXT NOT NULL,
            width INTEGER NOT NULL,
            height INTEGER NOT NULL,
            device_info TEXT,
            signed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS delivery_photos (
            id TEXT PRIMARY KEY,
            delivery_id TEXT NOT NULL
                REFERENCES delivery_confirmations(id) ON DELETE CASCADE,
            path TEXT NOT NULL,
            thumbnail_path TEXT NOT NULL,
            photo_type TEXT NOT NULL,
            gps_latitude REAL,
            gps_longitude REAL,
            file_size INTEGER NOT NULL,
            width INTEGER NOT NULL,
            height INTEGER NOT NULL,
            mime_type TEXT NOT NULL,
            captured_at TEXT,
            created_at TEXT NOT NULL,
            erp_uploaded_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_photos_delivery ON delivery_photos(delivery_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS shipments (
            id INTEGER PRIMARY KEY,
            status TEXT NOT NULL,
            assigned_driver_id TEXT,
            owner_id TEXT,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            token_hash TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            role TEXT NOT NULL,
            expires_at TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!(
        "Database tables initialized (delivery_confirmations, delivery_signatures, delivery_photos, shipments, sessions)"
    );

    Ok(())
}

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Bad UUID '{}': {}", value, e)))
}

/// Parse a text-stored enum
pub(crate) fn parse_enum<T>(column: &str, value: &str) -> Result<T>
where
    T: FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e: String| Error::Internal(format!("Bad {} in database: {}", column, e)))
}

pub(crate) fn parse_optional_ts(
    value: Option<String>,
) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    value
        .as_deref()
        .map(lgx_common::time::from_storage)
        .transpose()
}
