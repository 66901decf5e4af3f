//! Server-Sent Events (SSE) utilities
//!
//! Turns a broadcaster [`Subscription`] into an axum SSE response.

use crate::events::Subscription;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Heartbeat interval for delivery event streams
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Stream delivery events from one channel subscription
///
/// Sends a `ConnectionStatus` event first, then each event as JSON with the
/// SSE `event:` field set to the event type. Ends when the channel closes.
pub fn delivery_event_sse(
    subscription: Subscription,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let channel = subscription.channel();
    info!(channel = %channel, "New SSE client connected");
    let mut events = Box::pin(subscription.into_stream());

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        while let Some(event) = events.next().await {
            let event_type = event.event_type();
            match serde_json::to_string(&event) {
                Ok(event_json) => {
                    debug!(channel = %channel, event_type, "SSE: Forwarding event");
                    yield Ok(Event::default().event(event_type).data(event_json));
                }
                Err(e) => {
                    warn!(channel = %channel, "SSE: Failed to serialize event {}: {}", event_type, e);
                }
            }
        }

        info!(channel = %channel, "SSE: Channel closed, ending stream");
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    )
}
