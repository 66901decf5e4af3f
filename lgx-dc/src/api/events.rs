//! Live delivery event streams
//!
//! One SSE stream per channel. Access is checked once, at subscribe time.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Extension, Router,
};
use lgx_common::api::Actor;
use lgx_common::events::Channel;
use lgx_common::sse::delivery_event_sse;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::services::DeliveryError;
use crate::AppState;

/// GET /events/shipments/:id
pub async fn shipment_events(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(shipment_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let access = state.orchestrator.shipment_access(shipment_id).await?;
    let subscription = state
        .broadcaster
        .subscribe_authorized(&actor, Channel::Shipment(shipment_id), &access)
        .ok_or_else(|| {
            DeliveryError::Forbidden(format!(
                "{} may not observe shipment {}",
                actor.user_id, shipment_id
            ))
        })?;
    Ok(delivery_event_sse(subscription))
}

/// GET /events/deliveries/:id
pub async fn delivery_events(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(delivery_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let access = state.orchestrator.delivery_access(delivery_id).await?;
    let subscription = state
        .broadcaster
        .subscribe_authorized(&actor, Channel::Delivery(delivery_id), &access)
        .ok_or_else(|| {
            DeliveryError::Forbidden(format!(
                "{} may not observe delivery {}",
                actor.user_id, delivery_id
            ))
        })?;
    Ok(delivery_event_sse(subscription))
}

pub fn event_routes() -> Router<AppState> {
    Router::new()
        .route("/events/shipments/:id", get(shipment_events))
        .route("/events/deliveries/:id", get(delivery_events))
}
