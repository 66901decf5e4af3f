//! Delivery capture endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use lgx_common::api::Actor;
use lgx_common::events::SyncState;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::{CaptureInput, PhotoInput, Stroke};
use crate::services::{AttachOutcome, ConfirmOutcome};
use crate::AppState;

/// Response body when a capture was staged offline
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueuedResponse {
    queue_id: Uuid,
    delivery_id: Uuid,
    sync_state: SyncState,
}

/// POST /shipments/:id/confirm
///
/// 201 with the persisted confirmation, or 202 when the device is offline
/// and the capture was queued.
pub async fn confirm_delivery(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(shipment_id): Path<i64>,
    Json(input): Json<CaptureInput>,
) -> ApiResult<Response> {
    let outcome = state
        .orchestrator
        .confirm_delivery(&actor, shipment_id, input)
        .await?;

    Ok(match outcome {
        ConfirmOutcome::Confirmed(delivery) => (StatusCode::CREATED, Json(delivery)).into_response(),
        ConfirmOutcome::Queued {
            queue_id,
            delivery_id,
        } => (
            StatusCode::ACCEPTED,
            Json(QueuedResponse {
                queue_id,
                delivery_id,
                sync_state: SyncState::Queued,
            }),
        )
            .into_response(),
    })
}

/// GET /deliveries/:id
pub async fn get_delivery(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(delivery_id): Path<Uuid>,
) -> ApiResult<Response> {
    let delivery = state.orchestrator.get_delivery(&actor, delivery_id).await?;
    let legally_valid = delivery.signature.as_ref().map(|s| s.is_legally_valid());
    let integrity_ok = delivery.verify_integrity();

    let mut body = serde_json::to_value(&delivery)
        .map_err(|e| crate::error::ApiError::Internal(e.to_string()))?;
    body["integrityVerified"] = json!(integrity_ok);
    body["signatureLegallyValid"] = json!(legally_valid);
    Ok(Json(body).into_response())
}

/// DELETE /deliveries/:id (supervisory roles, unsynced deliveries only)
pub async fn delete_delivery(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(delivery_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.orchestrator.delete_delivery(&actor, delivery_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct AttachPhotosRequest {
    pub photos: Vec<PhotoInput>,
}

/// POST /deliveries/:id/photos
pub async fn attach_photos(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(delivery_id): Path<Uuid>,
    Json(request): Json<AttachPhotosRequest>,
) -> ApiResult<Response> {
    let outcome = state
        .orchestrator
        .attach_photos(&actor, delivery_id, request.photos)
        .await?;

    Ok(match outcome {
        AttachOutcome::Attached(photos) => {
            (StatusCode::CREATED, Json(json!({ "photos": photos }))).into_response()
        }
        AttachOutcome::Queued {
            queue_id,
            delivery_id,
        } => (
            StatusCode::ACCEPTED,
            Json(QueuedResponse {
                queue_id,
                delivery_id,
                sync_state: SyncState::Queued,
            }),
        )
            .into_response(),
    })
}

#[derive(Debug, Deserialize)]
pub struct SignatureProgressRequest {
    #[serde(default)]
    pub strokes: Vec<Stroke>,
    pub width: u32,
    pub height: u32,
}

/// POST /shipments/:id/signature-progress
pub async fn signature_progress(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(shipment_id): Path<i64>,
    Json(request): Json<SignatureProgressRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let progress = state
        .orchestrator
        .report_signature_progress(&actor, shipment_id, &request.strokes, request.width, request.height)
        .await?;

    Ok(Json(json!({
        "strokeCount": progress.stroke_count,
        "pointCount": progress.point_count,
        "qualityEstimate": progress.quality_estimate,
    })))
}

#[derive(Debug, Deserialize)]
pub struct LocationRequest {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
}

/// POST /shipments/:id/location
pub async fn report_location(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(shipment_id): Path<i64>,
    Json(request): Json<LocationRequest>,
) -> ApiResult<StatusCode> {
    state
        .orchestrator
        .report_location(
            &actor,
            shipment_id,
            request.latitude,
            request.longitude,
            request.accuracy,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn delivery_routes() -> Router<AppState> {
    Router::new()
        .route("/shipments/:id/confirm", post(confirm_delivery))
        .route("/shipments/:id/signature-progress", post(signature_progress))
        .route("/shipments/:id/location", post(report_location))
        .route("/deliveries/:id", get(get_delivery).delete(delete_delivery))
        .route("/deliveries/:id/photos", post(attach_photos))
}
