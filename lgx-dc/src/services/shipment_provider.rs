//! Shipment lookup

use async_trait::async_trait;
use lgx_common::Result;
use sqlx::SqlitePool;

use crate::db::shipments;
use crate::models::Shipment;

#[async_trait]
pub trait ShipmentProvider: Send + Sync {
    async fn get_shipment(&self, id: i64) -> Result<Option<Shipment>>;
}

/// Reads the local mirror of ERP shipments
pub struct DbShipmentProvider {
    pool: SqlitePool,
}

impl DbShipmentProvider {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ShipmentProvider for DbShipmentProvider {
    async fn get_shipment(&self, id: i64) -> Result<Option<Shipment>> {
        shipments::get_shipment(&self.pool, id).await
    }
}
