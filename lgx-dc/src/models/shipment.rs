//! Local mirror of ERP shipments

use lgx_common::api::Actor;
use lgx_common::events::ChannelAccess;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Pending,
    Assigned,
    InTransit,
    Delivered,
    Returned,
    Cancelled,
}

impl ShipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Pending => "pending",
            ShipmentStatus::Assigned => "assigned",
            ShipmentStatus::InTransit => "in_transit",
            ShipmentStatus::Delivered => "delivered",
            ShipmentStatus::Returned => "returned",
            ShipmentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ShipmentStatus::Pending),
            "assigned" => Ok(ShipmentStatus::Assigned),
            "in_transit" => Ok(ShipmentStatus::InTransit),
            "delivered" => Ok(ShipmentStatus::Delivered),
            "returned" => Ok(ShipmentStatus::Returned),
            "cancelled" => Ok(ShipmentStatus::Cancelled),
            other => Err(format!("Unknown shipment status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shipment {
    pub id: i64,
    pub status: ShipmentStatus,
    pub assigned_driver_id: Option<String>,
    pub owner_id: Option<String>,
}

impl Shipment {
    /// Cancelled shipments accept no further proof of delivery
    pub fn is_deliverable(&self) -> bool {
        self.status != ShipmentStatus::Cancelled
    }

    /// Who may observe this shipment's channel
    pub fn access(&self) -> ChannelAccess {
        ChannelAccess {
            assigned_driver_id: self.assigned_driver_id.clone(),
            owner_ids: self.owner_id.iter().cloned().collect(),
        }
    }

    /// Assigned driver, owner, or supervisor/admin
    pub fn permits(&self, actor: &Actor) -> bool {
        actor.role.is_supervisory()
            || self.assigned_driver_id.as_deref() == Some(actor.user_id.as_str())
            || self.owner_id.as_deref() == Some(actor.user_id.as_str())
    }
}
