//! Delivery confirmation workflow
//!
//! `confirm_delivery` validates the capture, persists the confirmation with
//! its signature and photos in one transaction, publishes
//! `delivery.confirmed` and hands the id to the sync worker. Nothing talks to
//! the ERP inline. While the device is offline, captures are validated and
//! staged in the offline queue instead; the queue later replays them through
//! [`CaptureReplay`] under the id assigned at capture time.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use lgx_common::api::Actor;
use lgx_common::events::{Broadcaster, ChannelAccess, DeliveryEvent, SyncState};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::erp_sync::{DeliveryLocks, SyncHandle};
use super::offline_queue::{CaptureReplay, Connectivity, OfflineQueue, ReplayError};
use super::photo_processor::{PhotoProcessor, PreparedPhoto};
use super::shipment_provider::ShipmentProvider;
use super::validator::{self, SignatureProgress};
use super::{DeliveryError, FieldError};
use crate::db::deliveries;
use crate::models::{
    CaptureInput, DeliveryConfirmation, GpsFix, Photo, PhotoInput, QueuedCapture, QueuedPhotos,
    Shipment, Signature, SignatureInput, Stroke,
};

/// Result of a confirmation request
#[derive(Debug, Clone)]
pub enum ConfirmOutcome {
    /// Persisted; ERP sync is pending
    Confirmed(DeliveryConfirmation),
    /// Device offline; staged for replay
    Queued { queue_id: Uuid, delivery_id: Uuid },
}

#[derive(Debug, Clone)]
pub enum AttachOutcome {
    Attached(Vec<Photo>),
    Queued { queue_id: Uuid, delivery_id: Uuid },
}

/// Capture fields that passed the pure checks
struct ValidatedCapture {
    recipient_name: String,
    gps: Option<GpsFix>,
    signature: Option<(SignatureInput, f64)>,
}

pub struct DeliveryOrchestrator {
    pool: SqlitePool,
    shipments: Arc<dyn ShipmentProvider>,
    photos: PhotoProcessor,
    broadcaster: Broadcaster,
    sync: SyncHandle,
    sync_locks: DeliveryLocks,
    connectivity: Connectivity,
    offline: Option<Arc<OfflineQueue>>,
}

impl DeliveryOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        shipments: Arc<dyn ShipmentProvider>,
        photos: PhotoProcessor,
        broadcaster: Broadcaster,
        sync: SyncHandle,
        sync_locks: DeliveryLocks,
        connectivity: Connectivity,
        offline: Option<Arc<OfflineQueue>>,
    ) -> Self {
        Self {
            pool,
            shipments,
            photos,
            broadcaster,
            sync,
            sync_locks,
            connectivity,
            offline,
        }
    }

    pub fn offline_queue(&self) -> Option<&Arc<OfflineQueue>> {
        self.offline.as_ref()
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Offline queue to stage into, when the device is disconnected
    fn staging_queue(&self) -> Option<&Arc<OfflineQueue>> {
        if self.connectivity.is_online() {
            None
        } else {
            self.offline.as_ref()
        }
    }

    /// Confirm delivery of `shipment_id` on behalf of `actor`
    pub async fn confirm_delivery(
        &self,
        actor: &Actor,
        shipment_id: i64,
        mut input: CaptureInput,
    ) -> Result<ConfirmOutcome, DeliveryError> {
        let received_at = lgx_common::time::now();

        if let Some(queue) = self.staging_queue() {
            validate_capture(&input)?;
            self.photos.prepare_all(&input.photos)?;

            input.delivered_at.get_or_insert(received_at);
            let capture = QueuedCapture {
                delivery_id: Uuid::new_v4(),
                shipment_id,
                actor: actor.clone(),
                input,
                captured_at: received_at,
            };
            let queue_id = queue.enqueue_capture(&capture).await?;
            info!(
                shipment_id,
                delivery_id = %capture.delivery_id,
                queue_id = %queue_id,
                "Device offline, delivery confirmation queued"
            );
            return Ok(ConfirmOutcome::Queued {
                queue_id,
                delivery_id: capture.delivery_id,
            });
        }

        let delivery = self
            .persist_capture(actor, shipment_id, input, Uuid::new_v4(), received_at)
            .await?;
        Ok(ConfirmOutcome::Confirmed(delivery))
    }

    /// Validate, persist, publish, enqueue; the online path and the replay path
    async fn persist_capture(
        &self,
        actor: &Actor,
        shipment_id: i64,
        input: CaptureInput,
        delivery_id: Uuid,
        received_at: DateTime<Utc>,
    ) -> Result<DeliveryConfirmation, DeliveryError> {
        let validated = validate_capture(&input)?;
        self.authorize_shipment(actor, shipment_id, true).await?;
        let prepared = self.photos.prepare_all(&input.photos)?;

        let now = lgx_common::time::now();
        let delivered_at = input.delivered_at.unwrap_or(received_at).trunc_subsecs(6);

        let signature = validated.signature.map(|(sig, quality_score)| Signature {
            id: Uuid::new_v4(),
            delivery_id,
            signature_hash: validator::signature_hash(&sig.signature_data),
            signature_data: sig.signature_data,
            quality_score,
            stroke_data: sig.stroke_data,
            width: sig.width,
            height: sig.height,
            device_info: sig.device_info,
            signed_at: delivered_at,
        });

        let mut delivery = DeliveryConfirmation {
            id: delivery_id,
            shipment_id,
            delivered_by: actor.user_id.clone(),
            delivered_at,
            recipient_name: validated.recipient_name,
            delivery_notes: input.notes().map(str::to_string),
            gps_latitude: validated.gps.map(|g| g.latitude),
            gps_longitude: validated.gps.map(|g| g.longitude),
            gps_accuracy: validated.gps.and_then(|g| g.accuracy),
            verification_hash: String::new(),
            status: input.status.unwrap_or_default(),
            sync_state: SyncState::Pending,
            sync_attempts: 0,
            sync_error: None,
            erp_sync_timestamp: None,
            created_at: now,
            updated_at: now,
            signature,
            photos: Vec::new(),
        };
        delivery.verification_hash = delivery.compute_verification_hash();

        delivery.photos = self.insert_all(&delivery, prepared).await?;

        info!(
            delivery_id = %delivery.id,
            shipment_id,
            delivered_by = %delivery.delivered_by,
            photos = delivery.photos.len(),
            "Delivery confirmed"
        );

        // Confirmed goes out before the worker can publish a sync outcome
        self.broadcaster.publish_event(DeliveryEvent::Confirmed {
            delivery_id: delivery.id,
            shipment_id,
            status: delivery.status,
            sync_state: delivery.sync_state,
            recipient_name: delivery.recipient_name.clone(),
            delivered_by: delivery.delivered_by.clone(),
            timestamp: now,
        });
        self.sync.enqueue(delivery.id);

        Ok(delivery)
    }

    /// Photo files first, then one transaction: confirmation, signature, photos
    async fn insert_all(
        &self,
        delivery: &DeliveryConfirmation,
        prepared: Vec<PreparedPhoto>,
    ) -> Result<Vec<Photo>, DeliveryError> {
        let photos = self.photos.store(delivery.id, prepared).await?;

        let committed = async {
            let mut tx = self.pool.begin().await?;
            deliveries::insert_confirmation(&mut *tx, delivery).await?;
            if let Some(signature) = &delivery.signature {
                deliveries::insert_signature(&mut *tx, signature).await?;
            }
            for photo in &photos {
                deliveries::insert_photo(&mut *tx, photo).await?;
            }
            tx.commit().await?;
            Ok::<_, lgx_common::Error>(())
        }
        .await;

        if let Err(e) = committed {
            warn!(delivery_id = %delivery.id, "Rolling back delivery: {}", e);
            self.photos.remove(&photos).await;
            return Err(e.into());
        }

        Ok(photos)
    }

    /// Add photos to an existing delivery (all or nothing)
    pub async fn attach_photos(
        &self,
        actor: &Actor,
        delivery_id: Uuid,
        inputs: Vec<PhotoInput>,
    ) -> Result<AttachOutcome, DeliveryError> {
        if inputs.is_empty() {
            return Err(DeliveryError::InvalidPhoto(vec![FieldError::new(
                "photos",
                "At least one photo is required",
            )]));
        }

        if let Some(queue) = self.staging_queue() {
            self.photos.prepare_all(&inputs)?;
            let queued = QueuedPhotos {
                delivery_id,
                actor: actor.clone(),
                photos: inputs,
            };
            let queue_id = queue.enqueue_photos(&queued).await?;
            return Ok(AttachOutcome::Queued {
                queue_id,
                delivery_id,
            });
        }

        let photos = self.persist_photos(actor, delivery_id, inputs).await?;
        Ok(AttachOutcome::Attached(photos))
    }

    /// Store and insert photos for an existing delivery, then get them to the ERP
    ///
    /// Runs under the delivery's sync lock: a push already running finishes
    /// with the photos it loaded, and the state read here is final until
    /// the rows are in.
    async fn persist_photos(
        &self,
        actor: &Actor,
        delivery_id: Uuid,
        inputs: Vec<PhotoInput>,
    ) -> Result<Vec<Photo>, DeliveryError> {
        self.get_delivery(actor, delivery_id).await?;
        let prepared = self.photos.prepare_all(&inputs)?;

        let sync_lock = self.sync_locks.acquire(delivery_id).await;
        let state = deliveries::sync_state(&self.pool, delivery_id)
            .await?
            .ok_or(DeliveryError::DeliveryNotFound(delivery_id))?;

        let photos = self.photos.store(delivery_id, prepared).await?;

        let committed = async {
            let mut tx = self.pool.begin().await?;
            for photo in &photos {
                deliveries::insert_photo(&mut *tx, photo).await?;
            }
            if state == SyncState::Synced {
                deliveries::rearm_synced(&mut *tx, delivery_id).await?;
            }
            tx.commit().await?;
            Ok::<_, lgx_common::Error>(())
        }
        .await;

        if let Err(e) = committed {
            self.photos.remove(&photos).await;
            return Err(e.into());
        }
        drop(sync_lock);

        info!(delivery_id = %delivery_id, count = photos.len(), "Photos attached");
        match state {
            SyncState::Synced => {
                info!(delivery_id = %delivery_id, "Delivery re-armed to push new photos");
                self.sync.enqueue(delivery_id);
            }
            SyncState::Pending => {
                self.sync.enqueue(delivery_id);
            }
            SyncState::SyncFailed => {
                info!(delivery_id = %delivery_id, "Photos go out with the next re-sync");
            }
            SyncState::Queued => {}
        }
        Ok(photos)
    }

    /// Load a delivery the actor may see
    pub async fn get_delivery(
        &self,
        actor: &Actor,
        delivery_id: Uuid,
    ) -> Result<DeliveryConfirmation, DeliveryError> {
        let delivery = deliveries::load_delivery(&self.pool, delivery_id)
            .await?
            .ok_or(DeliveryError::DeliveryNotFound(delivery_id))?;

        if delivery.delivered_by == actor.user_id || actor.role.is_supervisory() {
            return Ok(delivery);
        }
        match self.shipments.get_shipment(delivery.shipment_id).await? {
            Some(shipment) if shipment.permits(actor) => Ok(delivery),
            _ => Err(DeliveryError::Forbidden(format!(
                "{} may not access delivery {}",
                actor.user_id, delivery_id
            ))),
        }
    }

    /// Remove a delivery with its signature, photo rows and photo files
    ///
    /// Supervisory roles only. Synced deliveries are kept; the ERP already
    /// holds them.
    pub async fn delete_delivery(&self, actor: &Actor, delivery_id: Uuid) -> Result<(), DeliveryError> {
        if !actor.role.is_supervisory() {
            return Err(DeliveryError::Forbidden(format!(
                "{} may not delete deliveries",
                actor.user_id
            )));
        }
        let delivery = deliveries::load_delivery(&self.pool, delivery_id)
            .await?
            .ok_or(DeliveryError::DeliveryNotFound(delivery_id))?;
        // A re-armed delivery was pushed once already
        if delivery.sync_state == SyncState::Synced || delivery.erp_sync_timestamp.is_some() {
            return Err(DeliveryError::Forbidden(format!(
                "delivery {} is already synced to the ERP",
                delivery_id
            )));
        }

        if deliveries::delete_delivery(&self.pool, delivery_id).await? {
            self.photos.remove_delivery(delivery_id).await;
            info!(delivery_id = %delivery_id, user_id = %actor.user_id, "Delivery deleted");
        }
        Ok(())
    }

    /// Who may observe a shipment's channel
    pub async fn shipment_access(&self, shipment_id: i64) -> Result<ChannelAccess, DeliveryError> {
        let shipment = self.load_shipment(shipment_id).await?;
        Ok(shipment.access())
    }

    /// Who may observe a delivery's channel: the shipment's audience plus
    /// the user who captured it
    pub async fn delivery_access(&self, delivery_id: Uuid) -> Result<ChannelAccess, DeliveryError> {
        let delivery = deliveries::load_delivery(&self.pool, delivery_id)
            .await?
            .ok_or(DeliveryError::DeliveryNotFound(delivery_id))?;

        let mut access = match self.shipments.get_shipment(delivery.shipment_id).await? {
            Some(shipment) => shipment.access(),
            None => ChannelAccess::default(),
        };
        if !access.owner_ids.contains(&delivery.delivered_by) {
            access.owner_ids.push(delivery.delivered_by);
        }
        Ok(access)
    }

    /// Publish drawing feedback while the recipient signs
    pub async fn report_signature_progress(
        &self,
        actor: &Actor,
        shipment_id: i64,
        strokes: &[Stroke],
        width: u32,
        height: u32,
    ) -> Result<SignatureProgress, DeliveryError> {
        self.authorize_shipment(actor, shipment_id, false).await?;

        let progress = validator::estimate_progress(strokes, width, height);
        self.broadcaster.publish_event(DeliveryEvent::SignatureProgress {
            delivery_id: None,
            shipment_id,
            stroke_count: progress.stroke_count,
            point_count: progress.point_count,
            quality_estimate: progress.quality_estimate,
            timestamp: lgx_common::time::now(),
        });
        Ok(progress)
    }

    /// Publish the driver's position for a shipment
    pub async fn report_location(
        &self,
        actor: &Actor,
        shipment_id: i64,
        latitude: Option<f64>,
        longitude: Option<f64>,
        accuracy: Option<f64>,
    ) -> Result<GpsFix, DeliveryError> {
        let gps = validator::validate_gps(latitude, longitude, accuracy)?.ok_or_else(|| {
            DeliveryError::InvalidGpsCoordinates(vec![FieldError::new(
                "gps_latitude",
                "Latitude and longitude are required",
            )])
        })?;
        self.authorize_shipment(actor, shipment_id, false).await?;

        self.broadcaster.publish_event(DeliveryEvent::LocationUpdated {
            delivery_id: None,
            shipment_id,
            latitude: gps.latitude,
            longitude: gps.longitude,
            accuracy: gps.accuracy,
            timestamp: lgx_common::time::now(),
        });
        Ok(gps)
    }

    async fn load_shipment(&self, shipment_id: i64) -> Result<Shipment, DeliveryError> {
        self.shipments
            .get_shipment(shipment_id)
            .await?
            .ok_or(DeliveryError::ShipmentNotFound(shipment_id))
    }

    /// Shipment must exist, the actor must be entitled to it, and (when
    /// confirming) it must still be deliverable
    async fn authorize_shipment(
        &self,
        actor: &Actor,
        shipment_id: i64,
        require_deliverable: bool,
    ) -> Result<Shipment, DeliveryError> {
        let shipment = self.load_shipment(shipment_id).await?;

        if !shipment.permits(actor) {
            return Err(DeliveryError::Forbidden(format!(
                "{} is not assigned to shipment {}",
                actor.user_id, shipment_id
            )));
        }
        if require_deliverable && !shipment.is_deliverable() {
            return Err(DeliveryError::ShipmentNotDeliverable {
                shipment_id,
                status: shipment.status.to_string(),
            });
        }
        Ok(shipment)
    }
}

/// Pure capture checks: GPS, recipient, signature
fn validate_capture(input: &CaptureInput) -> Result<ValidatedCapture, DeliveryError> {
    let gps = validator::validate_gps(input.gps_latitude, input.gps_longitude, input.gps_accuracy)?;

    let recipient_name = input
        .recipient()
        .ok_or(DeliveryError::MissingRecipient)?
        .to_string();

    let signature = match &input.signature {
        Some(sig) => {
            let result = validator::validate_signature(sig);
            if !result.valid {
                return Err(DeliveryError::InvalidSignature(result.errors));
            }
            Some((sig.clone(), result.quality_score))
        }
        None => None,
    };

    Ok(ValidatedCapture {
        recipient_name,
        gps,
        signature,
    })
}

fn replay_error(e: DeliveryError) -> ReplayError {
    if e.is_permanent() {
        ReplayError::Permanent(format!("{}: {}", e.code(), e))
    } else {
        ReplayError::Transient(e.to_string())
    }
}

#[async_trait]
impl CaptureReplay for DeliveryOrchestrator {
    async fn replay_capture(&self, capture: QueuedCapture) -> Result<(), ReplayError> {
        let exists = deliveries::exists(&self.pool, capture.delivery_id)
            .await
            .map_err(|e| ReplayError::Transient(e.to_string()))?;
        if exists {
            info!(delivery_id = %capture.delivery_id, "Queued capture already persisted");
            return Ok(());
        }

        self.persist_capture(
            &capture.actor,
            capture.shipment_id,
            capture.input,
            capture.delivery_id,
            capture.captured_at,
        )
        .await
        .map(|_| ())
        .map_err(replay_error)
    }

    async fn replay_photos(&self, queued: QueuedPhotos) -> Result<(), ReplayError> {
        match self
            .persist_photos(&queued.actor, queued.delivery_id, queued.photos)
            .await
        {
            Ok(_) => Ok(()),
            // The capture it belongs to may still be waiting in the queue
            Err(DeliveryError::DeliveryNotFound(id)) => Err(ReplayError::Transient(format!(
                "delivery {} not persisted yet",
                id
            ))),
            Err(e) => Err(replay_error(e)),
        }
    }
}
