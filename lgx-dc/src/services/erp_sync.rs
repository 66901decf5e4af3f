//! ERP synchronization
//!
//! [`SyncService`] pushes one delivery to the ERP with bounded retries and
//! exponential backoff. [`SyncWorker`] is the long-lived task that feeds it:
//! ids arrive on an mpsc queue (from the orchestrator) and from a periodic
//! sweep of `Pending` records, and each sync runs in its own task bounded by
//! a semaphore.
//!
//! Pushes for the same delivery are serialized by a per-delivery lock, and
//! the final state change is a conditional update on `sync_state != 'Synced'`,
//! so a delivery is pushed at most once however many callers race. Photos
//! attached later take the same lock and re-arm the delivery; its next push
//! carries only the photos the ERP has not accepted yet.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use lgx_common::events::{Broadcaster, DeliveryEvent, SyncState};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, OwnedMutexGuard, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::erp_client::{
    idempotency_key, DocumentUpload, ErpClient, ErpError, StatusUpdate, TrackingRow,
};
use super::validator::{decode_image_payload, detect_image_mime};
use super::DeliveryError;
use crate::db::deliveries;
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT};
use crate::models::{
    BatchSyncError, BatchSyncResult, DeliveryConfirmation, SyncFilter, SyncMonitoringStats,
    SyncOutcome, SyncStatistics,
};

const SWEEP_BATCH: u32 = 100;

/// `min(base * 2^(attempt-1), max)`; attempt numbering starts at 1
pub fn next_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .map_or(max, |delay| delay.min(max))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Bound on one attempt (all ERP calls of that attempt together)
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn next_delay(&self, attempt: u32) -> Duration {
        next_delay(attempt, self.base_delay, self.max_delay)
    }
}

/// Per-delivery async locks
///
/// An entry exists while a sync for that delivery runs or waits; the guard
/// removes it when the last holder leaves.
#[derive(Clone, Default)]
pub struct DeliveryLocks {
    locks: Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>,
}

pub struct DeliveryLockGuard {
    locks: DeliveryLocks,
    delivery_id: Uuid,
    _guard: OwnedMutexGuard<()>,
}

impl DeliveryLocks {
    pub async fn acquire(&self, delivery_id: Uuid) -> DeliveryLockGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks.entry(delivery_id).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        DeliveryLockGuard {
            locks: self.clone(),
            delivery_id,
            _guard: guard,
        }
    }

    fn active(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl Drop for DeliveryLockGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.locks.lock().unwrap_or_else(|p| p.into_inner());
        // Map entry plus the Arc inside our own guard: nobody else is waiting
        let idle = locks
            .get(&self.delivery_id)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2);
        if idle {
            locks.remove(&self.delivery_id);
        }
    }
}

/// Everything pushed for one delivery, built once per sync call
///
/// A delivery synced before carries only its new photos.
struct ErpPayload {
    status: Option<StatusUpdate>,
    signature: Option<DocumentUpload>,
    photos: Vec<DocumentUpload>,
    photo_ids: Vec<Uuid>,
    tracking: Option<TrackingRow>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SyncMode {
    /// Push unless already Synced
    Any,
    /// Worker path: skip anything that is no longer Pending
    PendingOnly,
}

pub struct SyncService {
    pool: SqlitePool,
    erp: Arc<dyn ErpClient>,
    broadcaster: Broadcaster,
    photo_root: PathBuf,
    policy: RetryPolicy,
    locks: DeliveryLocks,
    cancel: CancellationToken,
}

impl SyncService {
    pub fn new(
        pool: SqlitePool,
        erp: Arc<dyn ErpClient>,
        broadcaster: Broadcaster,
        photo_root: impl Into<PathBuf>,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pool,
            erp,
            broadcaster,
            photo_root: photo_root.into(),
            policy,
            locks: DeliveryLocks::default(),
            cancel,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Deliveries with a sync running or waiting on its lock
    pub fn active_syncs(&self) -> usize {
        self.locks.active()
    }

    /// The per-delivery locks pushes run under
    pub fn locks(&self) -> DeliveryLocks {
        self.locks.clone()
    }

    /// Push one delivery to the ERP
    ///
    /// A `Synced` delivery returns [`SyncOutcome::AlreadySynced`] without any
    /// ERP call. A `SyncFailed` delivery is pushed again; use [`Self::resync`]
    /// to also clear its error and attempt count first.
    pub async fn sync(&self, delivery_id: Uuid) -> Result<SyncOutcome, DeliveryError> {
        self.run(delivery_id, SyncMode::Any).await
    }

    /// Worker entry point: only deliveries still `Pending` are pushed
    pub(crate) async fn sync_pending(&self, delivery_id: Uuid) -> Result<SyncOutcome, DeliveryError> {
        self.run(delivery_id, SyncMode::PendingOnly).await
    }

    /// Reset a failed delivery to Pending, then push it
    pub async fn resync(&self, delivery_id: Uuid) -> Result<SyncOutcome, DeliveryError> {
        match deliveries::sync_state(&self.pool, delivery_id).await? {
            None => return Err(DeliveryError::DeliveryNotFound(delivery_id)),
            Some(SyncState::Synced) => return Ok(SyncOutcome::AlreadySynced),
            Some(_) => {}
        }
        if deliveries::reset_to_pending(&self.pool, delivery_id).await? {
            info!(delivery_id = %delivery_id, "Delivery re-armed for sync");
        }
        self.sync(delivery_id).await
    }

    /// Re-sync several deliveries; individual failures don't stop the batch
    pub async fn sync_batch(&self, ids: &[Uuid], concurrency: usize) -> BatchSyncResult {
        let outcomes: Vec<(Uuid, Result<SyncOutcome, DeliveryError>)> = stream::iter(ids.iter().copied())
            .map(|id| async move { (id, self.resync(id).await) })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut result = BatchSyncResult {
            total: ids.len(),
            ..BatchSyncResult::default()
        };
        for (delivery_id, outcome) in outcomes {
            let error = match outcome {
                Ok(outcome) if outcome.is_success() => {
                    result.successful += 1;
                    continue;
                }
                Ok(outcome) => outcome.error().unwrap_or("sync failed").to_string(),
                Err(e) => e.to_string(),
            };
            result.failed += 1;
            result.errors.push(BatchSyncError { delivery_id, error });
        }

        info!(
            total = result.total,
            successful = result.successful,
            failed = result.failed,
            "Batch sync finished"
        );
        result
    }

    pub async fn statistics(&self, filter: &SyncFilter) -> Result<SyncStatistics, DeliveryError> {
        Ok(deliveries::sync_statistics(&self.pool, filter).await?)
    }

    pub async fn monitoring_stats(&self, handle: &SyncHandle) -> Result<SyncMonitoringStats, DeliveryError> {
        let statistics = self.statistics(&SyncFilter::default()).await?;
        let active_syncs = self.active_syncs();
        Ok(SyncMonitoringStats {
            statistics,
            queue_depth: handle.queue_depth(),
            sync_in_progress: active_syncs > 0,
            active_syncs,
            last_sweep_at: handle.last_sweep_at(),
        })
    }

    async fn run(&self, delivery_id: Uuid, mode: SyncMode) -> Result<SyncOutcome, DeliveryError> {
        let _lock = self.locks.acquire(delivery_id).await;

        let delivery = deliveries::load_delivery(&self.pool, delivery_id)
            .await?
            .ok_or(DeliveryError::DeliveryNotFound(delivery_id))?;

        match delivery.sync_state {
            SyncState::Synced => {
                debug!(delivery_id = %delivery_id, "Already synced, skipping");
                return Ok(SyncOutcome::AlreadySynced);
            }
            SyncState::Pending => {}
            other if mode == SyncMode::PendingOnly => {
                debug!(delivery_id = %delivery_id, state = %other, "Not pending, skipping");
                return Ok(SyncOutcome::Cancelled);
            }
            _ => {}
        }

        let uploaded = deliveries::uploaded_photo_ids(&self.pool, delivery_id).await?;
        let payload = match self.build_payload(&delivery, &uploaded).await {
            Ok(payload) => payload,
            Err(cause) => {
                let message = format!("Delivery payload unavailable: {}", cause);
                return self.fail(&delivery, 0, message, false).await;
            }
        };

        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(SyncOutcome::Cancelled);
            }

            // Another path may have finished the push while we slept
            if deliveries::sync_state(&self.pool, delivery_id).await? == Some(SyncState::Synced) {
                return Ok(SyncOutcome::AlreadySynced);
            }

            attempt += 1;
            deliveries::record_attempts(&self.pool, delivery_id, attempt).await?;

            let result = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(delivery_id = %delivery_id, attempt, "Sync cancelled by shutdown");
                    return Ok(SyncOutcome::Cancelled);
                }
                result = tokio::time::timeout(self.policy.attempt_timeout, self.push(&payload)) => {
                    result.unwrap_or(Err(ErpError::Timeout(self.policy.attempt_timeout)))
                }
            };

            match result {
                Ok(()) => {
                    let synced_at = lgx_common::time::now();
                    let marked = retry_on_lock("mark_synced", DEFAULT_MAX_LOCK_WAIT, || {
                        deliveries::mark_synced(
                            &self.pool,
                            delivery_id,
                            attempt,
                            synced_at,
                            &payload.photo_ids,
                        )
                    })
                    .await?;
                    if !marked {
                        return Ok(SyncOutcome::AlreadySynced);
                    }
                    info!(
                        delivery_id = %delivery_id,
                        shipment_id = delivery.shipment_id,
                        attempt,
                        photos = payload.photo_ids.len(),
                        follow_up = payload.status.is_none(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Delivery synced to ERP"
                    );
                    self.publish_status(&delivery, SyncState::Synced, attempt, Some(synced_at), None);
                    return Ok(SyncOutcome::Synced { attempts: attempt });
                }
                Err(e) if !e.is_retryable() => {
                    let message = format!("ERP rejected delivery: {}", e);
                    return self.fail(&delivery, attempt, message, false).await;
                }
                Err(e) if attempt >= self.policy.max_attempts => {
                    let message = format!("ERP sync failed after {} attempts: {}", attempt, e);
                    return self.fail(&delivery, attempt, message, true).await;
                }
                Err(e) => {
                    let delay = self.policy.next_delay(attempt);
                    warn!(
                        delivery_id = %delivery_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "ERP sync attempt failed: {}",
                        e
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Ok(SyncOutcome::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn fail(
        &self,
        delivery: &DeliveryConfirmation,
        attempts: u32,
        message: String,
        exhausted: bool,
    ) -> Result<SyncOutcome, DeliveryError> {
        let marked = retry_on_lock("mark_failed", DEFAULT_MAX_LOCK_WAIT, || {
            deliveries::mark_failed(&self.pool, delivery.id, attempts, &message)
        })
        .await?;
        if !marked {
            return Ok(SyncOutcome::AlreadySynced);
        }
        error!(
            delivery_id = %delivery.id,
            shipment_id = delivery.shipment_id,
            attempts,
            "{}",
            message
        );
        self.publish_status(delivery, SyncState::SyncFailed, attempts, None, Some(message.clone()));
        Ok(if exhausted {
            SyncOutcome::Failed {
                attempts,
                error: message,
            }
        } else {
            SyncOutcome::Rejected { error: message }
        })
    }

    fn publish_status(
        &self,
        delivery: &DeliveryConfirmation,
        sync_state: SyncState,
        sync_attempts: u32,
        erp_sync_timestamp: Option<DateTime<Utc>>,
        sync_error: Option<String>,
    ) {
        self.broadcaster.publish_event(DeliveryEvent::StatusUpdated {
            delivery_id: delivery.id,
            shipment_id: delivery.shipment_id,
            status: delivery.status,
            sync_state,
            sync_attempts,
            erp_sync_timestamp,
            sync_error,
            timestamp: lgx_common::time::now(),
        });
    }

    /// Status, signature, photos, tracking; stops at the first failure
    async fn push(&self, payload: &ErpPayload) -> Result<(), ErpError> {
        if let Some(status) = &payload.status {
            self.erp.update_shipment_status(status).await?;
        }
        if let Some(signature) = &payload.signature {
            self.erp.upload_document(signature).await?;
        }
        for photo in &payload.photos {
            self.erp.upload_document(photo).await?;
        }
        if let Some(tracking) = &payload.tracking {
            self.erp.insert_tracking(tracking).await?;
        }
        Ok(())
    }

    async fn build_payload(
        &self,
        delivery: &DeliveryConfirmation,
        uploaded: &HashSet<Uuid>,
    ) -> Result<ErpPayload, String> {
        let shipment_id = delivery.shipment_id;
        let delivery_id = delivery.id;
        // Status, signature and tracking went out with the first push
        let first_push = delivery.erp_sync_timestamp.is_none();

        let status = first_push.then(|| StatusUpdate {
            shipment_id,
            delivery_id,
            status: delivery.status,
            delivered_at: delivery.delivered_at,
            delivered_by: delivery.delivered_by.clone(),
            recipient_name: delivery.recipient_name.clone(),
            delivery_notes: delivery.delivery_notes.clone(),
            verification_hash: delivery.verification_hash.clone(),
            idempotency_key: idempotency_key(shipment_id, "status", delivery_id),
        });

        let signature = match &delivery.signature {
            Some(sig) if first_push => {
                let bytes = decode_image_payload(&sig.signature_data)
                    .map_err(|e| format!("signature image unreadable: {}", e))?;
                let mime_type = detect_image_mime(&bytes).unwrap_or("application/octet-stream");
                Some(DocumentUpload {
                    shipment_id,
                    delivery_id,
                    document_type: "signature".to_string(),
                    file_name: format!("signature-{}.{}", delivery_id, file_extension(mime_type)),
                    mime_type: mime_type.to_string(),
                    content: STANDARD.encode(bytes),
                    idempotency_key: idempotency_key(shipment_id, "signature", delivery_id),
                })
            }
            _ => None,
        };

        let mut photos = Vec::with_capacity(delivery.photos.len());
        let mut photo_ids = Vec::with_capacity(delivery.photos.len());
        for photo in delivery.photos.iter().filter(|p| !uploaded.contains(&p.id)) {
            let path = self.photo_root.join(&photo.path);
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| format!("photo {} unreadable: {}", photo.id, e))?;
            let document_type = format!("photo.{}", photo.id);
            photos.push(DocumentUpload {
                shipment_id,
                delivery_id,
                idempotency_key: idempotency_key(shipment_id, &document_type, delivery_id),
                document_type,
                file_name: format!("{}.{}", photo.id, file_extension(&photo.mime_type)),
                mime_type: photo.mime_type.clone(),
                content: STANDARD.encode(bytes),
            });
            photo_ids.push(photo.id);
        }

        let tracking = delivery.gps().filter(|_| first_push).map(|gps| TrackingRow {
            shipment_id,
            delivery_id,
            latitude: gps.latitude,
            longitude: gps.longitude,
            accuracy: gps.accuracy,
            recorded_at: delivery.delivered_at,
            idempotency_key: idempotency_key(shipment_id, "tracking", delivery_id),
        });

        Ok(ErpPayload {
            status,
            signature,
            photos,
            photo_ids,
            tracking,
        })
    }
}

fn file_extension(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        _ => "bin",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    pub sweep_interval: Duration,
    pub max_concurrent: usize,
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            max_concurrent: 4,
            queue_capacity: 1024,
        }
    }
}

#[derive(Default)]
struct WorkerState {
    queue_depth: AtomicUsize,
    last_sweep_at: Mutex<Option<DateTime<Utc>>>,
}

/// Sending side of the sync worker's queue
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<Uuid>,
    state: Arc<WorkerState>,
}

impl SyncHandle {
    /// Hand a delivery to the worker without waiting
    ///
    /// Returns false when the queue is full or the worker has stopped; the
    /// record stays Pending and the next sweep picks it up.
    pub fn enqueue(&self, delivery_id: Uuid) -> bool {
        match self.tx.try_send(delivery_id) {
            Ok(()) => {
                self.state.queue_depth.fetch_add(1, Ordering::SeqCst);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(delivery_id = %delivery_id, "Sync queue full, leaving delivery for the sweep");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(delivery_id = %delivery_id, "Sync worker stopped, leaving delivery for the sweep");
                false
            }
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.state.queue_depth.load(Ordering::SeqCst)
    }

    pub fn last_sweep_at(&self) -> Option<DateTime<Utc>> {
        *self
            .state
            .last_sweep_at
            .lock()
            .unwrap_or_else(|p| p.into_inner())
    }
}

pub struct SyncWorker {
    service: Arc<SyncService>,
    pool: SqlitePool,
    config: WorkerConfig,
    rx: mpsc::Receiver<Uuid>,
    state: Arc<WorkerState>,
    cancel: CancellationToken,
    /// In-flight syncs; the flag asks for one more run once the current one ends
    in_flight: Arc<Mutex<HashMap<Uuid, bool>>>,
}

impl SyncWorker {
    /// Start the worker task
    pub fn spawn(
        service: Arc<SyncService>,
        pool: SqlitePool,
        config: WorkerConfig,
        cancel: CancellationToken,
    ) -> (SyncHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let state = Arc::new(WorkerState::default());
        let handle = SyncHandle {
            tx,
            state: state.clone(),
        };

        let worker = SyncWorker {
            service,
            pool,
            config,
            rx,
            state,
            cancel,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        };
        let join = tokio::spawn(worker.run());
        (handle, join)
    }

    async fn run(mut self) {
        info!(
            max_concurrent = self.config.max_concurrent,
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            "Sync worker started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut tasks = JoinSet::new();
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = self.rx.recv() => {
                    let Some(delivery_id) = received else { break };
                    self.state.queue_depth.fetch_sub(1, Ordering::SeqCst);
                    self.dispatch(delivery_id, &semaphore, &mut tasks);
                }
                _ = sweep.tick() => {
                    self.sweep(&semaphore, &mut tasks).await;
                }
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Running syncs observe the same token and return promptly
        while tasks.join_next().await.is_some() {}
        info!("Sync worker stopped");
    }

    async fn sweep(&self, semaphore: &Arc<Semaphore>, tasks: &mut JoinSet<()>) {
        *self
            .state
            .last_sweep_at
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(lgx_common::time::now());

        match deliveries::list_pending_ids(&self.pool, SWEEP_BATCH).await {
            Ok(ids) => {
                if !ids.is_empty() {
                    debug!(count = ids.len(), "Sweep found pending deliveries");
                }
                for id in ids {
                    self.dispatch(id, semaphore, tasks);
                }
            }
            Err(e) => error!("Sync sweep failed: {}", e),
        }
    }

    fn dispatch(&self, delivery_id: Uuid, semaphore: &Arc<Semaphore>, tasks: &mut JoinSet<()>) {
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(rerun) = in_flight.get_mut(&delivery_id) {
                debug!(delivery_id = %delivery_id, "Sync already in flight, scheduling a rerun");
                *rerun = true;
                return;
            }
            in_flight.insert(delivery_id, false);
        }

        let service = self.service.clone();
        let semaphore = semaphore.clone();
        let in_flight = self.in_flight.clone();

        tasks.spawn(async move {
            loop {
                if let Ok(_permit) = semaphore.clone().acquire_owned().await {
                    match service.sync_pending(delivery_id).await {
                        Ok(outcome) => debug!(delivery_id = %delivery_id, ?outcome, "Sync finished"),
                        Err(e) => error!(delivery_id = %delivery_id, "Sync errored: {}", e),
                    }
                }

                let mut entries = in_flight.lock().unwrap_or_else(|p| p.into_inner());
                match entries.get_mut(&delivery_id) {
                    Some(rerun) if *rerun => *rerun = false,
                    _ => {
                        entries.remove(&delivery_id);
                        break;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_delay_doubles_and_caps() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        assert_eq!(next_delay(1, base, max), Duration::from_secs(1));
        assert_eq!(next_delay(2, base, max), Duration::from_secs(2));
        assert_eq!(next_delay(3, base, max), Duration::from_secs(4));
        assert_eq!(next_delay(5, base, max), Duration::from_secs(16));
        assert_eq!(next_delay(6, base, max), Duration::from_secs(30));
        assert_eq!(next_delay(40, base, max), Duration::from_secs(30));
    }

    #[test]
    fn test_attempt_zero_treated_as_first() {
        let d = next_delay(0, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(d, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_lock_entry_removed_after_release() {
        let locks = DeliveryLocks::default();
        let id = Uuid::new_v4();
        {
            let _guard = locks.acquire(id).await;
            assert_eq!(locks.active(), 1);
        }
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_lock_serializes_same_delivery() {
        let locks = DeliveryLocks::default();
        let id = Uuid::new_v4();
        let guard = locks.acquire(id).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire(id).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(locks.active(), 0);
    }
}
