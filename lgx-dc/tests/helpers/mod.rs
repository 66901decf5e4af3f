//! Shared fixtures for lgx-dc integration tests
//!
//! Temp SQLite database, a scripted fake ERP client, shipment seeding and
//! capture builders.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use lgx_common::api::{Actor, Role};
use lgx_common::events::{DeliveryStatus, SyncState};
use lgx_common::time::ManualClock;
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use lgx_dc::db::{self, deliveries, shipments};
use lgx_dc::models::{
    CaptureInput, DeliveryConfirmation, PhotoInput, PhotoType, Shipment, ShipmentStatus,
    Signature, SignatureInput, Stroke, StrokePoint,
};
use lgx_dc::services::erp_client::{DocumentUpload, StatusUpdate, TrackingRow};
use lgx_dc::services::validator;
use lgx_dc::services::{
    Connectivity, DbSessionService, DbShipmentProvider, ErpClient, ErpError, RetryPolicy,
    WorkerConfig,
};
use lgx_dc::{start_services, OfflineOptions, ServiceOptions, Services};

pub const DRIVER: &str = "driver-7";
pub const OTHER_DRIVER: &str = "driver-9";
pub const OWNER: &str = "dispatch-1";

pub const DRIVER_TOKEN: &str = "driver-token";
pub const OTHER_DRIVER_TOKEN: &str = "other-driver-token";
pub const SUPERVISOR_TOKEN: &str = "supervisor-token";

/// ERP double: records every call, fails status updates and document
/// uploads as scripted
#[derive(Default)]
pub struct FakeErp {
    script: Mutex<VecDeque<ErpError>>,
    document_script: Mutex<VecDeque<ErpError>>,
    delay: Mutex<Option<Duration>>,
    status_calls: AtomicUsize,
    document_calls: AtomicUsize,
    tracking_calls: AtomicUsize,
    keys: Mutex<Vec<String>>,
    document_keys: Mutex<Vec<String>>,
}

impl FakeErp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next status updates with these errors, in order
    pub fn fail_next(&self, errors: impl IntoIterator<Item = ErpError>) {
        self.script.lock().unwrap().extend(errors);
    }

    pub fn fail_always(&self, error: ErpError, times: usize) {
        self.fail_next(std::iter::repeat(error).take(times));
    }

    /// Fail the next document uploads with these errors, in order
    pub fn fail_documents(&self, errors: impl IntoIterator<Item = ErpError>) {
        self.document_script.lock().unwrap().extend(errors);
    }

    /// Slow every status update down
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn document_calls(&self) -> usize {
        self.document_calls.load(Ordering::SeqCst)
    }

    pub fn tracking_calls(&self) -> usize {
        self.tracking_calls.load(Ordering::SeqCst)
    }

    pub fn idempotency_keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }

    /// Idempotency keys of accepted document uploads, in call order
    pub fn document_keys(&self) -> Vec<String> {
        self.document_keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl ErpClient for FakeErp {
    async fn update_shipment_status(&self, update: &StatusUpdate) -> Result<(), ErpError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.keys.lock().unwrap().push(update.idempotency_key.clone());
        match self.script.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn upload_document(&self, document: &DocumentUpload) -> Result<(), ErpError> {
        self.document_calls.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().unwrap().push(document.idempotency_key.clone());
        if let Some(error) = self.document_script.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.document_keys
            .lock()
            .unwrap()
            .push(document.idempotency_key.clone());
        Ok(())
    }

    async fn insert_tracking(&self, row: &TrackingRow) -> Result<(), ErpError> {
        self.tracking_calls.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().unwrap().push(row.idempotency_key.clone());
        Ok(())
    }
}

/// Retries in milliseconds so exhaustion tests stay fast
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        attempt_timeout: Duration::from_secs(2),
    }
}

/// Temp root folder with an initialized service database
pub async fn test_db() -> (TempDir, SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::init_database_pool(&dir.path().join("lgx-dc.db"))
        .await
        .unwrap();
    (dir, pool)
}

pub async fn seed_shipment(pool: &SqlitePool, id: i64, status: ShipmentStatus) {
    shipments::upsert_shipment(
        pool,
        &Shipment {
            id,
            status,
            assigned_driver_id: Some(DRIVER.to_string()),
            owner_id: Some(OWNER.to_string()),
        },
    )
    .await
    .unwrap();
}

pub fn driver() -> Actor {
    Actor::new(DRIVER, Role::Driver)
}

pub fn other_driver() -> Actor {
    Actor::new(OTHER_DRIVER, Role::Driver)
}

pub fn supervisor() -> Actor {
    Actor::new("supervisor-1", Role::Supervisor)
}

/// A valid PNG of the given size, base64 encoded
pub fn png_b64(width: u32, height: u32) -> String {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([30, 120, 200]));
    let mut bytes = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut bytes, image::ImageFormat::Png)
        .unwrap();
    STANDARD.encode(bytes.into_inner())
}

/// PNG magic followed by garbage: accepted by type detection, fails decoding
pub fn corrupt_png_b64() -> String {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&[0u8; 64]);
    STANDARD.encode(bytes)
}

pub fn photo(data: String) -> PhotoInput {
    PhotoInput {
        data,
        photo_type: PhotoType::DeliveryProof,
        gps_latitude: Some(40.7128),
        gps_longitude: Some(-74.0060),
        captured_at: None,
    }
}

fn line(n: usize, x0: f64, y0: f64, x1: f64, y1: f64) -> Stroke {
    (0..n)
        .map(|i| {
            let f = i as f64 / (n - 1) as f64;
            StrokePoint {
                x: x0 + (x1 - x0) * f,
                y: y0 + (y1 - y0) * f,
                t: Some(i as i64 * 10),
            }
        })
        .collect()
}

/// Three long strokes across half the canvas; scores 1.0
pub fn strong_signature() -> SignatureInput {
    SignatureInput {
        signature_data: format!("data:image/png;base64,{}", png_b64(4, 2)),
        stroke_data: vec![
            line(50, 100.0, 50.0, 300.0, 150.0),
            line(50, 100.0, 150.0, 300.0, 50.0),
            line(50, 120.0, 100.0, 280.0, 100.0),
        ],
        width: 400,
        height: 200,
        device_info: Some("test-tablet".to_string()),
    }
}

/// One short scribble; well below the legal threshold
pub fn weak_signature() -> SignatureInput {
    SignatureInput {
        stroke_data: vec![line(12, 10.0, 10.0, 20.0, 12.0)],
        ..strong_signature()
    }
}

/// Shipment 42 handed to Jane Doe in lower Manhattan
pub fn capture() -> CaptureInput {
    CaptureInput {
        recipient_name: Some("Jane Doe".to_string()),
        delivery_notes: Some("Left with reception".to_string()),
        gps_latitude: Some(40.7128),
        gps_longitude: Some(-74.0060),
        gps_accuracy: Some(5.0),
        status: None,
        delivered_at: None,
        signature: Some(strong_signature()),
        photos: Vec::new(),
    }
}

/// Insert a confirmation row directly, bypassing the orchestrator and worker
pub async fn insert_delivery(
    pool: &SqlitePool,
    shipment_id: i64,
    sync_state: SyncState,
) -> DeliveryConfirmation {
    let now = lgx_common::time::now();
    let mut delivery = DeliveryConfirmation {
        id: Uuid::new_v4(),
        shipment_id,
        delivered_by: DRIVER.to_string(),
        delivered_at: now,
        recipient_name: "Jane Doe".to_string(),
        delivery_notes: None,
        gps_latitude: Some(40.7128),
        gps_longitude: Some(-74.0060),
        gps_accuracy: None,
        verification_hash: String::new(),
        status: DeliveryStatus::Delivered,
        sync_state,
        sync_attempts: 0,
        sync_error: None,
        erp_sync_timestamp: None,
        created_at: now,
        updated_at: now,
        signature: None,
        photos: Vec::new(),
    };
    delivery.verification_hash = delivery.compute_verification_hash();

    let mut conn = pool.acquire().await.unwrap();
    deliveries::insert_confirmation(&mut *conn, &delivery)
        .await
        .unwrap();
    delivery
}

/// Attach a strong signature row to an inserted delivery
pub async fn insert_signature(pool: &SqlitePool, delivery_id: Uuid) {
    let input = strong_signature();
    let signature = Signature {
        id: Uuid::new_v4(),
        delivery_id,
        signature_hash: validator::signature_hash(&input.signature_data),
        signature_data: input.signature_data,
        quality_score: 1.0,
        stroke_data: input.stroke_data,
        width: input.width,
        height: input.height,
        device_info: input.device_info,
        signed_at: lgx_common::time::now(),
    };
    let mut conn = pool.acquire().await.unwrap();
    deliveries::insert_signature(&mut *conn, &signature)
        .await
        .unwrap();
}

pub async fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Number of files anywhere under `dir`
pub fn count_files(dir: &std::path::Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}

/// Poll until `check` holds or two seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// A running service against a temp root and the fake ERP
pub struct TestService {
    pub dir: TempDir,
    pub pool: SqlitePool,
    pub erp: Arc<FakeErp>,
    pub connectivity: Connectivity,
    /// Clock of the offline queue (TTL checks)
    pub clock: Arc<ManualClock>,
    pub cancel: CancellationToken,
    pub services: Services,
}

impl TestService {
    pub async fn start() -> Self {
        Self::start_with(false, true).await
    }

    /// `offline_queue` enables the device queue; `online` is the initial
    /// connectivity
    pub async fn start_with(offline_queue: bool, online: bool) -> Self {
        let (dir, pool) = test_db().await;
        seed_shipment(&pool, 42, ShipmentStatus::InTransit).await;

        let sessions = Arc::new(DbSessionService::new(pool.clone()));
        sessions.register(DRIVER_TOKEN, &driver(), None).await.unwrap();
        sessions
            .register(OTHER_DRIVER_TOKEN, &other_driver(), None)
            .await
            .unwrap();
        sessions
            .register(SUPERVISOR_TOKEN, &supervisor(), None)
            .await
            .unwrap();

        let erp = FakeErp::new();
        let connectivity = Connectivity::new(online);
        let cancel = CancellationToken::new();
        let clock = Arc::new(ManualClock::new(lgx_common::time::now()));

        let mut options = ServiceOptions::new(dir.path().join("photos"));
        options.retry = fast_retry(3);
        options.worker = WorkerConfig {
            sweep_interval: Duration::from_secs(3600),
            max_concurrent: 4,
            queue_capacity: 64,
        };
        if offline_queue {
            let mut offline = OfflineOptions::new(dir.path(), "van-12", Default::default());
            offline.drain_interval = Duration::from_secs(3600);
            offline.clock = clock.clone();
            options.offline = Some(offline);
        }

        let services = start_services(
            pool.clone(),
            erp.clone(),
            Arc::new(DbShipmentProvider::new(pool.clone())),
            sessions,
            connectivity.clone(),
            options,
            cancel.clone(),
        )
        .await
        .unwrap();

        Self {
            dir,
            pool,
            erp,
            connectivity,
            clock,
            cancel,
            services,
        }
    }

    pub fn photo_root(&self) -> std::path::PathBuf {
        self.dir.path().join("photos")
    }

    pub async fn sync_state(&self, id: Uuid) -> Option<SyncState> {
        deliveries::sync_state(&self.pool, id).await.unwrap()
    }

    pub async fn wait_for_state(&self, id: Uuid, state: SyncState) -> bool {
        eventually(|| async move { self.sync_state(id).await == Some(state) }).await
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        self.services.join().await;
    }
}
