//! Offline queue inspection and manual drain

use axum::{
    extract::State,
    routing::{get, post},
    Extension, Json, Router,
};
use lgx_common::api::Actor;
use std::sync::Arc;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::models::{DrainReport, QueueItem};
use crate::services::{OfflineQueue, QueueStatus};
use crate::AppState;

fn queue(state: &AppState) -> ApiResult<Arc<OfflineQueue>> {
    state
        .orchestrator
        .offline_queue()
        .cloned()
        .ok_or_else(|| ApiError::NotFound("Offline queue is not enabled on this node".to_string()))
}

/// GET /offline/status
pub async fn offline_status(State(state): State<AppState>) -> ApiResult<Json<QueueStatus>> {
    let queue = queue(&state)?;
    let online = state.orchestrator.connectivity().is_online();
    Ok(Json(queue.status(online).await?))
}

/// GET /offline/expired
///
/// Drivers and warehouse staff only see the items they captured.
pub async fn offline_expired(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<Vec<QueueItem>>> {
    let queue = queue(&state)?;
    let items = queue
        .list_expired()
        .await?
        .into_iter()
        .filter(|item| item.visible_to(&actor))
        .collect();
    Ok(Json(items))
}

/// POST /offline/drain
///
/// 409 while another drain pass is running.
pub async fn offline_drain(State(state): State<AppState>) -> ApiResult<Json<DrainReport>> {
    let queue = queue(&state)?;
    let report = queue
        .drain(state.orchestrator.as_ref())
        .await?
        .ok_or_else(|| ApiError::Conflict("Offline queue drain already in progress".to_string()))?;

    if report.failed > 0 {
        state
            .record_error(format!("{} offline captures failed to replay", report.failed))
            .await;
    }
    info!(
        synced = report.synced,
        failed = report.failed,
        expired = report.expired,
        "Manual offline drain finished"
    );
    Ok(Json(report))
}

pub fn offline_routes() -> Router<AppState> {
    Router::new()
        .route("/offline/status", get(offline_status))
        .route("/offline/expired", get(offline_expired))
        .route("/offline/drain", post(offline_drain))
}
