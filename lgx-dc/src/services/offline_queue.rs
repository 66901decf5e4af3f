//! Offline capture queue
//!
//! Captures made while the device is disconnected are staged in a per-device
//! SQLite file and replayed through the orchestrator once connectivity
//! returns. A drain pass:
//! 1. expires Pending items older than the TTL (never attempted, kept for
//!    manual intervention);
//! 2. claims the remaining Pending items oldest-first, one attempt each;
//! 3. marks each Completed, Failed (permanent rejection or attempts
//!    exhausted), or back to Pending (transient failure).
//!
//! Only one pass runs at a time.

use async_trait::async_trait;
use lgx_common::time::{Clock, SystemClock};
use lgx_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error as ThisError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::queue;
use crate::models::{
    DrainReport, QueueItem, QueueItemKind, QueueItemStatus, QueuedCapture, QueuedPhotos,
};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT};

/// Why a replayed item did not go through
#[derive(Debug, Clone, ThisError, PartialEq, Eq)]
pub enum ReplayError {
    /// Retrying the same payload cannot succeed (validation, permissions)
    #[error("rejected: {0}")]
    Permanent(String),

    #[error("transient failure: {0}")]
    Transient(String),
}

/// Persists replayed captures; implemented by the orchestrator
#[async_trait]
pub trait CaptureReplay: Send + Sync {
    async fn replay_capture(&self, capture: QueuedCapture) -> std::result::Result<(), ReplayError>;

    async fn replay_photos(&self, photos: QueuedPhotos) -> std::result::Result<(), ReplayError>;
}

/// Online/offline flag shared by the orchestrator, the drainer and the probe
#[derive(Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Update the flag; subscribers are woken only on an actual change
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    pub ttl: Duration,
    /// Lifetime attempt budget across passes
    pub max_attempts: u32,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 60 * 60),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub device_id: String,
    pub online: bool,
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub expired: u64,
}

pub struct OfflineQueue {
    pool: SqlitePool,
    device_id: String,
    policy: QueuePolicy,
    clock: Arc<dyn Clock>,
    drain_lock: tokio::sync::Mutex<()>,
}

impl OfflineQueue {
    /// Open `<root>/offline/<device_id>.db`, recovering interrupted items
    pub async fn open(root: &Path, device_id: &str, policy: QueuePolicy) -> Result<Self> {
        Self::open_with_clock(root, device_id, policy, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(
        root: &Path,
        device_id: &str,
        policy: QueuePolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let file_name = format!("{}.db", sanitize_device_id(device_id)?);
        let path = root.join("offline").join(file_name);
        let pool = queue::open_queue_pool(&path).await?;

        info!(device_id, path = %path.display(), "Offline queue opened");

        Ok(Self {
            pool,
            device_id: device_id.to_string(),
            policy,
            clock,
            drain_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Stage a payload; returns the queue item id
    pub async fn enqueue<T: Serialize>(&self, kind: QueueItemKind, payload: &T) -> Result<Uuid> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| Error::Internal(format!("Failed to serialize {} payload: {}", kind, e)))?;
        let now = self.clock.now();
        let item = QueueItem {
            id: Uuid::new_v4(),
            device_id: self.device_id.clone(),
            kind,
            payload,
            status: QueueItemStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        queue::insert_item(&self.pool, &item).await?;

        info!(queue_id = %item.id, kind = %kind, "Capture queued offline");
        Ok(item.id)
    }

    pub async fn enqueue_capture(&self, capture: &QueuedCapture) -> Result<Uuid> {
        self.enqueue(QueueItemKind::DeliveryConfirmation, capture).await
    }

    pub async fn enqueue_photos(&self, photos: &QueuedPhotos) -> Result<Uuid> {
        self.enqueue(QueueItemKind::PhotoUpload, photos).await
    }

    pub async fn has_pending(&self) -> Result<bool> {
        Ok(queue::count_by_status(&self.pool, QueueItemStatus::Pending).await? > 0)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<QueueItem>> {
        queue::get_item(&self.pool, id).await
    }

    pub async fn status(&self, online: bool) -> Result<QueueStatus> {
        Ok(QueueStatus {
            device_id: self.device_id.clone(),
            online,
            pending: queue::count_by_status(&self.pool, QueueItemStatus::Pending).await?,
            processing: queue::count_by_status(&self.pool, QueueItemStatus::Processing).await?,
            completed: queue::count_by_status(&self.pool, QueueItemStatus::Completed).await?,
            failed: queue::count_by_status(&self.pool, QueueItemStatus::Failed).await?,
            expired: queue::count_by_status(&self.pool, QueueItemStatus::Expired).await?,
        })
    }

    /// Items that outlived the TTL and need manual intervention
    pub async fn list_expired(&self) -> Result<Vec<QueueItem>> {
        queue::list_by_status(&self.pool, QueueItemStatus::Expired).await
    }

    /// Run one drain pass; `None` when a pass is already running
    pub async fn drain(&self, replay: &dyn CaptureReplay) -> Result<Option<DrainReport>> {
        let Ok(_pass) = self.drain_lock.try_lock() else {
            debug!("Drain already running, skipping");
            return Ok(None);
        };

        let mut report = DrainReport::default();

        let ttl = chrono::Duration::from_std(self.policy.ttl)
            .map_err(|e| Error::Config(format!("Offline TTL out of range: {}", e)))?;
        let cutoff = self.clock.now() - ttl;
        report.expired = queue::expire_older_than(&self.pool, cutoff).await? as usize;
        if report.expired > 0 {
            warn!(expired = report.expired, "Offline items expired without replay");
        }

        let items = queue::list_by_status(&self.pool, QueueItemStatus::Pending).await?;
        for item in items {
            if !queue::claim(&self.pool, item.id).await? {
                continue;
            }
            let attempts = item.attempts + 1;

            match self.replay_item(&item, replay).await {
                Ok(()) => {
                    self.settle(item.id, QueueItemStatus::Completed, None).await?;
                    debug!(queue_id = %item.id, kind = %item.kind, "Offline item replayed");
                    report.synced += 1;
                }
                Err(ReplayError::Permanent(reason)) => {
                    self.settle(item.id, QueueItemStatus::Failed, Some(&reason)).await?;
                    warn!(queue_id = %item.id, "Offline item rejected: {}", reason);
                    report.failed += 1;
                }
                Err(ReplayError::Transient(reason)) => {
                    let status = if attempts >= self.policy.max_attempts {
                        error!(
                            queue_id = %item.id,
                            attempts,
                            "Offline item failed after {} attempts: {}",
                            attempts,
                            reason
                        );
                        QueueItemStatus::Failed
                    } else {
                        warn!(queue_id = %item.id, attempts, "Offline replay failed, will retry: {}", reason);
                        QueueItemStatus::Pending
                    };
                    self.settle(item.id, status, Some(&reason)).await?;
                    report.failed += 1;
                }
            }
        }

        if report.total() > 0 {
            info!(
                synced = report.synced,
                failed = report.failed,
                expired = report.expired,
                "Offline drain pass finished"
            );
        }
        Ok(Some(report))
    }

    async fn settle(&self, id: Uuid, status: QueueItemStatus, reason: Option<&str>) -> Result<()> {
        retry_on_lock("settle_queue_item", DEFAULT_MAX_LOCK_WAIT, || {
            queue::set_status(&self.pool, id, status, reason)
        })
        .await
    }

    async fn replay_item(
        &self,
        item: &QueueItem,
        replay: &dyn CaptureReplay,
    ) -> std::result::Result<(), ReplayError> {
        match item.kind {
            QueueItemKind::DeliveryConfirmation => {
                let capture: QueuedCapture = serde_json::from_value(item.payload.clone())
                    .map_err(|e| ReplayError::Permanent(format!("unreadable payload: {}", e)))?;
                replay.replay_capture(capture).await
            }
            QueueItemKind::PhotoUpload => {
                let photos: QueuedPhotos = serde_json::from_value(item.payload.clone())
                    .map_err(|e| ReplayError::Permanent(format!("unreadable payload: {}", e)))?;
                replay.replay_photos(photos).await
            }
        }
    }
}

/// Device ids become file names
fn sanitize_device_id(device_id: &str) -> Result<String> {
    let trimmed = device_id.trim();
    if trimmed.is_empty()
        || !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::Config(format!(
            "device_id '{}' must be non-empty and use only [A-Za-z0-9_-]",
            device_id
        )));
    }
    Ok(trimmed.to_string())
}

/// Drain on every offline→online transition and on a periodic tick
pub fn spawn_drainer(
    queue: Arc<OfflineQueue>,
    replay: Arc<dyn CaptureReplay>,
    connectivity: Connectivity,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut online_rx = connectivity.subscribe();
        let mut was_online = *online_rx.borrow_and_update();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(device_id = queue.device_id(), interval_secs = interval.as_secs(), "Offline drainer started");

        loop {
            let reason = tokio::select! {
                _ = cancel.cancelled() => break,
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *online_rx.borrow_and_update();
                    let reconnected = online && !was_online;
                    was_online = online;
                    if !reconnected {
                        continue;
                    }
                    "reconnected"
                }
                _ = ticker.tick() => {
                    if !connectivity.is_online() {
                        continue;
                    }
                    "tick"
                }
            };

            match queue.has_pending().await {
                Ok(false) => continue,
                Ok(true) => {}
                Err(e) => {
                    error!("Offline queue check failed: {}", e);
                    continue;
                }
            }

            debug!(reason, "Draining offline queue");
            if let Err(e) = queue.drain(replay.as_ref()).await {
                error!("Offline drain failed: {}", e);
            }
        }

        info!("Offline drainer stopped");
    })
}

/// Poll `probe_url` and report reachability through `connectivity`
pub fn spawn_probe(
    connectivity: Connectivity,
    probe_url: String,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = match reqwest::Client::builder().timeout(interval.min(Duration::from_secs(5))).build() {
            Ok(client) => client,
            Err(e) => {
                error!("Connectivity probe disabled, client build failed: {}", e);
                return;
            }
        };
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let online = match client.get(&probe_url).send().await {
                        Ok(response) => !response.status().is_server_error(),
                        Err(e) => {
                            debug!("Connectivity probe failed: {}", e);
                            false
                        }
                    };
                    connectivity.set_online(online);
                }
            }
        }
    })
}
