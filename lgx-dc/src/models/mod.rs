//! Data models for delivery confirmation capture and synchronization

pub mod delivery;
pub mod photo;
pub mod queue_item;
pub mod shipment;
pub mod signature;
pub mod sync;

pub use delivery::{CaptureInput, DeliveryConfirmation, GpsFix};
pub use lgx_common::events::{DeliveryStatus, SyncState};
pub use photo::{Photo, PhotoInput, PhotoType};
pub use queue_item::{
    DrainReport, QueueItem, QueueItemKind, QueueItemStatus, QueuedCapture, QueuedPhotos,
};
pub use shipment::{Shipment, ShipmentStatus};
pub use signature::{Signature, SignatureInput, Stroke, StrokePoint};
pub use sync::{BatchSyncError, BatchSyncResult, SyncFilter, SyncMonitoringStats, SyncOutcome, SyncStatistics};
