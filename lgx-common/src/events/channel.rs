//! Broadcast channel addressing and subscription authorization

use crate::api::Actor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Private channel scoped to one shipment or one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "lowercase")]
pub enum Channel {
    Shipment(i64),
    Delivery(Uuid),
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Shipment(id) => write!(f, "shipment.{}", id),
            Channel::Delivery(id) => write!(f, "delivery.{}", id),
        }
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scope, id) = s
            .split_once('.')
            .ok_or_else(|| format!("Malformed channel name: {}", s))?;
        match scope {
            "shipment" => id
                .parse::<i64>()
                .map(Channel::Shipment)
                .map_err(|e| format!("Bad shipment id in {}: {}", s, e)),
            "delivery" => Uuid::parse_str(id)
                .map(Channel::Delivery)
                .map_err(|e| format!("Bad delivery id in {}: {}", s, e)),
            other => Err(format!("Unknown channel scope: {}", other)),
        }
    }
}

/// Who is entitled to observe a channel
///
/// Built by the service from the shipment mirror (assigned driver, owner)
/// and, for delivery channels, the user who captured the delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelAccess {
    pub assigned_driver_id: Option<String>,
    pub owner_ids: Vec<String>,
}

/// Decide whether `actor` may subscribe to a channel with the given access
pub fn authorize_subscription(actor: &Actor, access: &ChannelAccess) -> bool {
    if actor.role.is_supervisory() {
        return true;
    }
    if access.assigned_driver_id.as_deref() == Some(actor.user_id.as_str()) {
        return true;
    }
    access.owner_ids.iter().any(|owner| owner == &actor.user_id)
}
