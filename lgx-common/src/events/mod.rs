//! Event types for the delivery lifecycle
//!
//! Provides the shared [`DeliveryEvent`] definition and the channel-keyed
//! [`Broadcaster`] used to fan events out to SSE subscribers.

mod broadcaster;
mod channel;
mod delivery_types;

pub use broadcaster::{Broadcaster, Subscription};
pub use channel::{authorize_subscription, Channel, ChannelAccess};
pub use delivery_types::{DeliveryStatus, SyncState};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery lifecycle events
///
/// Serialized for SSE as a flat JSON object carrying `eventType`,
/// `deliveryId`, `shipmentId` and `timestamp` plus the variant's payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum DeliveryEvent {
    /// A confirmation was durably persisted
    ///
    /// Published after commit and before the sync outcome for the same
    /// delivery.
    #[serde(rename = "delivery.confirmed", rename_all = "camelCase")]
    Confirmed {
        delivery_id: Uuid,
        shipment_id: i64,
        status: DeliveryStatus,
        sync_state: SyncState,
        recipient_name: String,
        delivered_by: String,
        timestamp: DateTime<Utc>,
    },

    /// Sync state (or business status) of a delivery changed
    #[serde(rename = "delivery.statusUpdated", rename_all = "camelCase")]
    StatusUpdated {
        delivery_id: Uuid,
        shipment_id: i64,
        status: DeliveryStatus,
        sync_state: SyncState,
        sync_attempts: u32,
        erp_sync_timestamp: Option<DateTime<Utc>>,
        sync_error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Intermediate drawing feedback while a recipient signs
    ///
    /// `delivery_id` is absent because no confirmation exists yet.
    #[serde(rename = "signature.progress", rename_all = "camelCase")]
    SignatureProgress {
        delivery_id: Option<Uuid>,
        shipment_id: i64,
        stroke_count: usize,
        point_count: usize,
        quality_estimate: f64,
        timestamp: DateTime<Utc>,
    },

    /// Driver position update for a shipment en route
    #[serde(rename = "delivery.locationUpdated", rename_all = "camelCase")]
    LocationUpdated {
        delivery_id: Option<Uuid>,
        shipment_id: i64,
        latitude: f64,
        longitude: f64,
        accuracy: Option<f64>,
        timestamp: DateTime<Utc>,
    },
}

impl DeliveryEvent {
    /// Wire name of the event, also used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            DeliveryEvent::Confirmed { .. } => "delivery.confirmed",
            DeliveryEvent::StatusUpdated { .. } => "delivery.statusUpdated",
            DeliveryEvent::SignatureProgress { .. } => "signature.progress",
            DeliveryEvent::LocationUpdated { .. } => "delivery.locationUpdated",
        }
    }

    pub fn shipment_id(&self) -> i64 {
        match self {
            DeliveryEvent::Confirmed { shipment_id, .. }
            | DeliveryEvent::StatusUpdated { shipment_id, .. }
            | DeliveryEvent::SignatureProgress { shipment_id, .. }
            | DeliveryEvent::LocationUpdated { shipment_id, .. } => *shipment_id,
        }
    }

    pub fn delivery_id(&self) -> Option<Uuid> {
        match self {
            DeliveryEvent::Confirmed { delivery_id, .. }
            | DeliveryEvent::StatusUpdated { delivery_id, .. } => Some(*delivery_id),
            DeliveryEvent::SignatureProgress { delivery_id, .. }
            | DeliveryEvent::LocationUpdated { delivery_id, .. } => *delivery_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DeliveryEvent::Confirmed { timestamp, .. }
            | DeliveryEvent::StatusUpdated { timestamp, .. }
            | DeliveryEvent::SignatureProgress { timestamp, .. }
            | DeliveryEvent::LocationUpdated { timestamp, .. } => *timestamp,
        }
    }

    /// Channels this event is routed to: always its shipment, plus its
    /// delivery when one exists
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels = vec![Channel::Shipment(self.shipment_id())];
        if let Some(delivery_id) = self.delivery_id() {
            channels.push(Channel::Delivery(delivery_id));
        }
        channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmed_event_wire_shape() {
        let delivery_id = Uuid::new_v4();
        let event = DeliveryEvent::Confirmed {
            delivery_id,
            shipment_id: 42,
            status: DeliveryStatus::Delivered,
            sync_state: SyncState::Pending,
            recipient_name: "Jane Doe".to_string(),
            delivered_by: "driver-7".to_string(),
            timestamp: Utc::now(),
        };

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "delivery.confirmed");
        assert_eq!(json["deliveryId"], delivery_id.to_string());
        assert_eq!(json["shipmentId"], 42);
        assert_eq!(json["status"], "delivered");
        assert_eq!(json["syncState"], "Pending");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_progress_event_has_null_delivery() {
        let event = DeliveryEvent::SignatureProgress {
            delivery_id: None,
            shipment_id: 9,
            stroke_count: 2,
            point_count: 40,
            quality_estimate: 0.41,
            timestamp: Utc::now(),
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "signature.progress");
        assert!(json["deliveryId"].is_null());
        assert_eq!(json["strokeCount"], 2);
        assert_eq!(event.channels(), vec![Channel::Shipment(9)]);
    }

    #[test]
    fn test_status_updated_deserializes() {
        let delivery_id = Uuid::new_v4();
        let raw = serde_json::json!({
            "eventType": "delivery.statusUpdated",
            "deliveryId": delivery_id,
            "shipmentId": 3,
            "status": "delivered",
            "syncState": "SyncFailed",
            "syncAttempts": 3,
            "erpSyncTimestamp": null,
            "syncError": "ERP sync failed after 3 attempts: timeout",
            "timestamp": "2026-01-01T00:00:00Z"
        });
        let event: DeliveryEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.event_type(), "delivery.statusUpdated");
        assert_eq!(event.delivery_id(), Some(delivery_id));
        assert_eq!(
            event.channels(),
            vec![Channel::Shipment(3), Channel::Delivery(delivery_id)]
        );
    }

    #[test]
    fn test_sync_state_strings() {
        assert_eq!(SyncState::SyncFailed.to_string(), "SyncFailed");
        assert_eq!("Synced".parse::<SyncState>().unwrap(), SyncState::Synced);
        assert!(SyncState::Synced.is_terminal());
        assert!(!SyncState::Pending.is_terminal());
        assert_eq!("returned".parse::<DeliveryStatus>().unwrap(), DeliveryStatus::Returned);
    }
}
