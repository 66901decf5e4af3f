//! ERP synchronization results and statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of one `sync(delivery_id)` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum SyncOutcome {
    /// Pushed during this call
    Synced { attempts: u32 },
    /// Already synced; no ERP call was made
    AlreadySynced,
    /// Transient failures exhausted the attempt budget
    Failed { attempts: u32, error: String },
    /// The ERP refused the data; not retried
    Rejected { error: String },
    /// Nothing pushed: shutdown interrupted the sync, or the worker found the
    /// record no longer Pending
    Cancelled,
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Synced { .. } | SyncOutcome::AlreadySynced)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            SyncOutcome::Failed { error, .. } | SyncOutcome::Rejected { error } => Some(error),
            SyncOutcome::Cancelled => Some("sync cancelled"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSyncError {
    pub delivery_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSyncResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<BatchSyncError>,
}

/// Narrowing filter for sync statistics (all fields optional)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFilter {
    #[serde(default)]
    pub delivered_by: Option<String>,
    #[serde(default)]
    pub shipment_id: Option<i64>,
    /// Inclusive lower bound on `delivered_at`
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `delivered_at`
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatistics {
    pub total: u64,
    pub synced: u64,
    /// Pending plus Queued
    pub pending: u64,
    pub failed: u64,
    /// Percentage with two decimals; 0 when there are no records
    pub success_rate: f64,
}

impl SyncStatistics {
    pub fn from_counts(total: u64, synced: u64, pending: u64, failed: u64) -> Self {
        let success_rate = if total == 0 {
            0.0
        } else {
            (synced as f64 / total as f64 * 100.0 * 100.0).round() / 100.0
        };
        Self {
            total,
            synced,
            pending,
            failed,
            success_rate,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMonitoringStats {
    #[serde(flatten)]
    pub statistics: SyncStatistics,
    pub queue_depth: usize,
    pub sync_in_progress: bool,
    pub active_syncs: usize,
    pub last_sweep_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate_rounding() {
        assert_eq!(SyncStatistics::from_counts(5, 3, 2, 0).success_rate, 60.0);
        assert_eq!(SyncStatistics::from_counts(3, 1, 2, 0).success_rate, 33.33);
        assert_eq!(SyncStatistics::from_counts(3, 2, 1, 0).success_rate, 66.67);
    }

    #[test]
    fn test_success_rate_empty() {
        let stats = SyncStatistics::from_counts(0, 0, 0, 0);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[test]
    fn test_outcome_wire_shape() {
        let json = serde_json::to_value(SyncOutcome::Synced { attempts: 2 }).unwrap();
        assert_eq!(json["outcome"], "synced");
        assert_eq!(json["attempts"], 2);
        assert!(SyncOutcome::AlreadySynced.is_success());
        assert!(!SyncOutcome::Rejected { error: "x".into() }.is_success());
    }
}
