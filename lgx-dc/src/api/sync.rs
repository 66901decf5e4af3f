//! ERP synchronization endpoints

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use lgx_common::api::{Actor, Role};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{BatchSyncResult, SyncFilter, SyncMonitoringStats, SyncStatistics};
use crate::services::DeliveryError;
use crate::AppState;

/// POST /deliveries/:id/sync
///
/// Manual retry: resets a failed record to Pending and pushes it now.
/// Already-synced records are reported as such without contacting the ERP.
pub async fn sync_delivery(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(delivery_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.orchestrator.get_delivery(&actor, delivery_id).await?;

    info!(delivery_id = %delivery_id, user_id = %actor.user_id, "Manual sync requested");
    let outcome = state.sync_service.resync(delivery_id).await?;
    if let Some(error) = outcome.error() {
        state
            .record_error(format!("Sync of delivery {} failed: {}", delivery_id, error))
            .await;
    }
    let delivery = state.orchestrator.get_delivery(&actor, delivery_id).await?;

    Ok(Json(json!({
        "result": outcome,
        "delivery": delivery,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSyncRequest {
    pub delivery_ids: Vec<Uuid>,
}

/// POST /sync/batch (supervisory roles only)
pub async fn sync_batch(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<BatchSyncRequest>,
) -> ApiResult<Json<BatchSyncResult>> {
    if !actor.role.is_supervisory() {
        return Err(DeliveryError::Forbidden(format!(
            "{} may not run batch sync",
            actor.user_id
        ))
        .into());
    }
    if request.delivery_ids.is_empty() {
        return Err(ApiError::BadRequest("deliveryIds must not be empty".to_string()));
    }

    let result = state
        .sync_service
        .sync_batch(&request.delivery_ids, state.batch_concurrency)
        .await;
    Ok(Json(result))
}

/// GET /sync/statistics
///
/// Drivers only ever see their own deliveries, whatever filter they send.
pub async fn sync_statistics(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(mut filter): Query<SyncFilter>,
) -> ApiResult<Json<SyncStatistics>> {
    if actor.role == Role::Driver {
        filter.delivered_by = Some(actor.user_id.clone());
    }
    if let (Some(from), Some(to)) = (filter.from, filter.to) {
        if from > to {
            return Err(ApiError::BadRequest("from must not be after to".to_string()));
        }
    }
    Ok(Json(state.sync_service.statistics(&filter).await?))
}

/// GET /sync/monitoring (supervisory roles only)
pub async fn sync_monitoring(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<SyncMonitoringStats>> {
    if !actor.role.is_supervisory() {
        return Err(DeliveryError::Forbidden(format!(
            "{} may not view sync monitoring",
            actor.user_id
        ))
        .into());
    }
    Ok(Json(
        state.sync_service.monitoring_stats(&state.sync_handle).await?,
    ))
}

pub fn sync_routes() -> Router<AppState> {
    Router::new()
        .route("/deliveries/:id/sync", post(sync_delivery))
        .route("/sync/batch", post(sync_batch))
        .route("/sync/statistics", get(sync_statistics))
        .route("/sync/monitoring", get(sync_monitoring))
}
