//! Shipment mirror table
//!
//! Rows are written by the ERP import job (outside this service) and by
//! tests; the confirmation workflow only reads them.

use lgx_common::time::to_storage;
use lgx_common::Result;
use sqlx::{Row, SqlitePool};

use super::parse_enum;
use crate::models::Shipment;

pub async fn get_shipment(pool: &SqlitePool, id: i64) -> Result<Option<Shipment>> {
    let row = sqlx::query(
        "SELECT id, status, assigned_driver_id, owner_id FROM shipments WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let status: String = row.try_get("status")?;
    Ok(Some(Shipment {
        id: row.try_get("id")?,
        status: parse_enum("status", &status)?,
        assigned_driver_id: row.try_get("assigned_driver_id")?,
        owner_id: row.try_get("owner_id")?,
    }))
}

pub async fn upsert_shipment(pool: &SqlitePool, shipment: &Shipment) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO shipments (id, status, assigned_driver_id, owner_id, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            status = excluded.status,
            assigned_driver_id = excluded.assigned_driver_id,
            owner_id = excluded.owner_id,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(shipment.id)
    .bind(shipment.status.as_str())
    .bind(&shipment.assigned_driver_id)
    .bind(&shipment.owner_id)
    .bind(to_storage(&lgx_common::time::now()))
    .execute(pool)
    .await?;
    Ok(())
}
