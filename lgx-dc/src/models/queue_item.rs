//! Offline capture queue items

use chrono::{DateTime, Utc};
use lgx_common::api::Actor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{CaptureInput, PhotoInput};

/// What an offline item replays into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueItemKind {
    DeliveryConfirmation,
    PhotoUpload,
}

impl QueueItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemKind::DeliveryConfirmation => "DeliveryConfirmation",
            QueueItemKind::PhotoUpload => "PhotoUpload",
        }
    }
}

impl fmt::Display for QueueItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DeliveryConfirmation" => Ok(QueueItemKind::DeliveryConfirmation),
            "PhotoUpload" => Ok(QueueItemKind::PhotoUpload),
            other => Err(format!("Unknown queue item kind: {}", other)),
        }
    }
}

/// Queue item lifecycle
///
/// Pending → Processing → Completed | Failed; Pending → Expired once the
/// item outlives the TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Expired,
}

impl QueueItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemStatus::Pending => "Pending",
            QueueItemStatus::Processing => "Processing",
            QueueItemStatus::Completed => "Completed",
            QueueItemStatus::Failed => "Failed",
            QueueItemStatus::Expired => "Expired",
        }
    }
}

impl fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(QueueItemStatus::Pending),
            "Processing" => Ok(QueueItemStatus::Processing),
            "Completed" => Ok(QueueItemStatus::Completed),
            "Failed" => Ok(QueueItemStatus::Failed),
            "Expired" => Ok(QueueItemStatus::Expired),
            other => Err(format!("Unknown queue item status: {}", other)),
        }
    }
}

/// Staged copy of a capture made while the device was offline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: Uuid,
    pub device_id: String,
    pub kind: QueueItemKind,
    pub payload: serde_json::Value,
    pub status: QueueItemStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    /// User who made the capture, read from the payload
    pub fn captured_by(&self) -> Option<String> {
        let actor = self.payload.get("actor")?.clone();
        serde_json::from_value::<Actor>(actor)
            .ok()
            .map(|actor| actor.user_id)
    }

    /// Supervisory roles see every item; others only their own captures
    pub fn visible_to(&self, actor: &Actor) -> bool {
        actor.role.is_supervisory() || self.captured_by().as_deref() == Some(actor.user_id.as_str())
    }
}

/// Payload of a `DeliveryConfirmation` item
///
/// The delivery id is assigned at capture time so that replay is idempotent
/// and later photo uploads can reference it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedCapture {
    pub delivery_id: Uuid,
    pub shipment_id: i64,
    pub actor: Actor,
    pub input: CaptureInput,
    pub captured_at: DateTime<Utc>,
}

/// Payload of a `PhotoUpload` item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedPhotos {
    pub delivery_id: Uuid,
    pub actor: Actor,
    pub photos: Vec<PhotoInput>,
}

/// Outcome buckets of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub synced: usize,
    pub failed: usize,
    pub expired: usize,
}

impl DrainReport {
    pub fn total(&self) -> usize {
        self.synced + self.failed + self.expired
    }
}
