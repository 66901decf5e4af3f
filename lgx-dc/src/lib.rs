//! lgx-dc library interface
//!
//! Delivery confirmation capture and ERP synchronization. Exposes the
//! service wiring so integration tests can run it against fakes.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::{middleware, Router};
use chrono::{DateTime, Utc};
use lgx_common::events::Broadcaster;
use lgx_common::time::{Clock, SystemClock};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::services::{
    spawn_drainer, Connectivity, DeliveryOrchestrator, ErpClient, OfflineQueue, PhotoLimits,
    PhotoProcessor, QueuePolicy, RetryPolicy, SessionService, ShipmentProvider, SyncHandle,
    SyncService, SyncWorker, WorkerConfig,
};

/// Request bodies carry base64 photos; allow several full-size ones
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Channel-keyed event fan-out for SSE
    pub broadcaster: Broadcaster,
    pub orchestrator: Arc<DeliveryOrchestrator>,
    pub sync_service: Arc<SyncService>,
    pub sync_handle: SyncHandle,
    pub sessions: Arc<dyn SessionService>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
    /// Parallelism for `/sync/batch`
    pub batch_concurrency: usize,
}

impl AppState {
    /// Remember a failure for `/health`
    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Offline queue settings for driver devices
#[derive(Clone)]
pub struct OfflineOptions {
    pub root: PathBuf,
    pub device_id: String,
    pub policy: QueuePolicy,
    pub drain_interval: Duration,
    pub clock: Arc<dyn Clock>,
}

impl OfflineOptions {
    pub fn new(root: impl Into<PathBuf>, device_id: impl Into<String>, policy: QueuePolicy) -> Self {
        Self {
            root: root.into(),
            device_id: device_id.into(),
            policy,
            drain_interval: Duration::from_secs(300),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Everything `start_services` needs besides the collaborators
#[derive(Clone)]
pub struct ServiceOptions {
    pub photo_root: PathBuf,
    pub photo_limits: PhotoLimits,
    pub retry: RetryPolicy,
    pub worker: WorkerConfig,
    pub event_capacity: usize,
    pub batch_concurrency: usize,
    pub offline: Option<OfflineOptions>,
}

impl ServiceOptions {
    pub fn new(photo_root: impl Into<PathBuf>) -> Self {
        Self {
            photo_root: photo_root.into(),
            photo_limits: PhotoLimits::default(),
            retry: RetryPolicy::default(),
            worker: WorkerConfig::default(),
            event_capacity: 256,
            batch_concurrency: 4,
            offline: None,
        }
    }
}

/// Running service: shared state plus its background tasks
pub struct Services {
    pub state: AppState,
    pub tasks: Vec<JoinHandle<()>>,
}

impl Services {
    /// Wait for background tasks after the cancel token fired
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!("Background task panicked: {}", e);
            }
        }
    }
}

/// Wire the sync worker, offline drainer and orchestrator
///
/// All background tasks stop when `cancel` fires.
pub async fn start_services(
    db: SqlitePool,
    erp: Arc<dyn ErpClient>,
    shipments: Arc<dyn ShipmentProvider>,
    sessions: Arc<dyn SessionService>,
    connectivity: Connectivity,
    options: ServiceOptions,
    cancel: CancellationToken,
) -> lgx_common::Result<Services> {
    let broadcaster = Broadcaster::new(options.event_capacity);
    let mut tasks = Vec::new();

    let sync_service = Arc::new(SyncService::new(
        db.clone(),
        erp,
        broadcaster.clone(),
        options.photo_root.clone(),
        options.retry,
        cancel.clone(),
    ));
    let (sync_handle, worker) =
        SyncWorker::spawn(sync_service.clone(), db.clone(), options.worker, cancel.clone());
    tasks.push(worker);

    let offline = match &options.offline {
        Some(offline) => Some(Arc::new(
            OfflineQueue::open_with_clock(
                &offline.root,
                &offline.device_id,
                offline.policy,
                offline.clock.clone(),
            )
            .await?,
        )),
        None => None,
    };

    let orchestrator = Arc::new(DeliveryOrchestrator::new(
        db.clone(),
        shipments,
        PhotoProcessor::new(options.photo_root.clone(), options.photo_limits),
        broadcaster.clone(),
        sync_handle.clone(),
        sync_service.locks(),
        connectivity.clone(),
        offline.clone(),
    ));

    if let (Some(queue), Some(offline)) = (offline, &options.offline) {
        tasks.push(spawn_drainer(
            queue,
            orchestrator.clone(),
            connectivity,
            offline.drain_interval,
            cancel.clone(),
        ));
    }

    let state = AppState {
        db,
        broadcaster,
        orchestrator,
        sync_service,
        sync_handle,
        sessions,
        startup_time: Utc::now(),
        last_error: Arc::new(RwLock::new(None)),
        batch_concurrency: options.batch_concurrency.max(1),
    };

    Ok(Services { state, tasks })
}

/// Build application router
///
/// Everything except `/health` requires a bearer session.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .merge(api::delivery_routes())
        .merge(api::sync_routes())
        .merge(api::event_routes())
        .merge(api::offline_routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth_middleware,
        ));

    Router::new()
        .merge(protected)
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
