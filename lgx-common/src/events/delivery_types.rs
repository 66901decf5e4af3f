//! Delivery lifecycle enums shared by the store, the sync worker and events

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Business status of a delivery, independent of ERP synchronization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Confirmed,
    Delivered,
    Failed,
    Returned,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Confirmed => "confirmed",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Returned => "returned",
        }
    }
}

impl Default for DeliveryStatus {
    fn default() -> Self {
        DeliveryStatus::Delivered
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(DeliveryStatus::Confirmed),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            "returned" => Ok(DeliveryStatus::Returned),
            other => Err(format!("Unknown delivery status: {}", other)),
        }
    }
}

/// Push status of a delivery record towards the ERP
///
/// `Queued` is only reported for captures still held in a device's offline
/// queue; records in the store are `Pending`, `Synced` or `SyncFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncState {
    Pending,
    Queued,
    Synced,
    SyncFailed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Pending => "Pending",
            SyncState::Queued => "Queued",
            SyncState::Synced => "Synced",
            SyncState::SyncFailed => "SyncFailed",
        }
    }

    /// No further automatic work will happen in this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncState::Synced | SyncState::SyncFailed)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(SyncState::Pending),
            "Queued" => Ok(SyncState::Queued),
            "Synced" => Ok(SyncState::Synced),
            "SyncFailed" => Ok(SyncState::SyncFailed),
            other => Err(format!("Unknown sync state: {}", other)),
        }
    }
}
