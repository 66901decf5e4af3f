//! Delivery confirmation services
//!
//! Leaf-first: [`validator`] and [`photo_processor`] are pure/local,
//! [`erp_sync`] and [`offline_queue`] run as background tasks, and
//! [`orchestrator`] ties them together behind `confirm_delivery`.

pub mod erp_client;
pub mod erp_sync;
pub mod offline_queue;
pub mod orchestrator;
pub mod photo_processor;
pub mod session;
pub mod shipment_provider;
pub mod validator;

pub use erp_client::{ErpClient, ErpError, HttpErpClient};
pub use erp_sync::{
    next_delay, DeliveryLockGuard, DeliveryLocks, RetryPolicy, SyncHandle, SyncService, SyncWorker,
    WorkerConfig,
};
pub use offline_queue::{
    spawn_drainer, spawn_probe, CaptureReplay, Connectivity, OfflineQueue, QueuePolicy, QueueStatus,
    ReplayError,
};
pub use orchestrator::{AttachOutcome, ConfirmOutcome, DeliveryOrchestrator};
pub use photo_processor::{PhotoLimits, PhotoProcessor};
pub use session::{DbSessionService, SessionService};
pub use shipment_provider::{DbShipmentProvider, ShipmentProvider};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// One field-level validation message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Domain failures of the confirmation workflow
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Invalid GPS coordinates")]
    InvalidGpsCoordinates(Vec<FieldError>),

    #[error("Invalid signature")]
    InvalidSignature(Vec<FieldError>),

    #[error("Recipient name is required")]
    MissingRecipient,

    #[error("Photo {index} is {size} bytes, limit is {limit}")]
    PhotoTooLarge { index: usize, size: usize, limit: usize },

    #[error("Invalid photo")]
    InvalidPhoto(Vec<FieldError>),

    #[error("Photo processing failed: {0}")]
    PhotoProcessingFailed(String),

    #[error("Shipment {0} not found")]
    ShipmentNotFound(i64),

    #[error("Shipment {shipment_id} is {status} and cannot be delivered")]
    ShipmentNotDeliverable { shipment_id: i64, status: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Delivery {0} not found")]
    DeliveryNotFound(Uuid),

    #[error(transparent)]
    Common(#[from] lgx_common::Error),
}

impl DeliveryError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            DeliveryError::InvalidGpsCoordinates(_) => "INVALID_GPS_COORDINATES",
            DeliveryError::InvalidSignature(_) => "INVALID_SIGNATURE",
            DeliveryError::MissingRecipient => "MISSING_RECIPIENT",
            DeliveryError::PhotoTooLarge { .. } => "PHOTO_TOO_LARGE",
            DeliveryError::InvalidPhoto(_) => "INVALID_PHOTO",
            DeliveryError::PhotoProcessingFailed(_) => "PHOTO_PROCESSING_FAILED",
            DeliveryError::ShipmentNotFound(_) => "SHIPMENT_NOT_FOUND",
            DeliveryError::ShipmentNotDeliverable { .. } => "SHIPMENT_NOT_DELIVERABLE",
            DeliveryError::Forbidden(_) => "FORBIDDEN",
            DeliveryError::DeliveryNotFound(_) => "DELIVERY_NOT_FOUND",
            DeliveryError::Common(_) => "INTERNAL_ERROR",
        }
    }

    pub fn fields(&self) -> Vec<FieldError> {
        match self {
            DeliveryError::InvalidGpsCoordinates(fields)
            | DeliveryError::InvalidSignature(fields)
            | DeliveryError::InvalidPhoto(fields) => fields.clone(),
            DeliveryError::MissingRecipient => {
                vec![FieldError::new("recipient_name", "Recipient name is required")]
            }
            DeliveryError::PhotoTooLarge { index, size, limit } => vec![FieldError::new(
                format!("photos[{}]", index),
                format!("{} bytes exceeds the {} byte limit", size, limit),
            )],
            _ => Vec::new(),
        }
    }

    /// Input validation failures (HTTP 422, never retried)
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DeliveryError::InvalidGpsCoordinates(_)
                | DeliveryError::InvalidSignature(_)
                | DeliveryError::MissingRecipient
                | DeliveryError::PhotoTooLarge { .. }
                | DeliveryError::InvalidPhoto(_)
                | DeliveryError::PhotoProcessingFailed(_)
                | DeliveryError::ShipmentNotDeliverable { .. }
        )
    }

    /// Retrying the same payload can never succeed
    ///
    /// Only infrastructure errors (database, filesystem) are worth retrying.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, DeliveryError::Common(_))
    }
}
