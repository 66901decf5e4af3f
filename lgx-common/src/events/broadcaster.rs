//! Channel-keyed event fan-out
//!
//! One `tokio::broadcast` sender per active channel:
//! - Non-blocking publish (slow subscribers don't block producers)
//! - At-most-once delivery: a lagging subscriber skips what it missed
//! - Channels with no subscribers drop events and are pruned
//!
//! The broadcaster is a liveness aid, not a durability mechanism; clients
//! reconcile against the delivery store.

use super::{authorize_subscription, Channel, ChannelAccess, DeliveryEvent};
use crate::api::Actor;
use futures::stream::{Stream, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

/// Registry of channel → sender
#[derive(Clone)]
pub struct Broadcaster {
    channels: Arc<RwLock<HashMap<Channel, broadcast::Sender<DeliveryEvent>>>>,
    capacity: usize,
}

impl Broadcaster {
    /// Creates a broadcaster whose per-channel buffers hold `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Register a subscriber on `channel`
    ///
    /// Callers must have authorized the subscription first; see
    /// [`Broadcaster::subscribe_authorized`].
    pub fn subscribe(&self, channel: Channel) -> Subscription {
        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let sender = channels
            .entry(channel)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        let rx = sender.subscribe();
        debug!(channel = %channel, subscribers = sender.receiver_count(), "Subscriber registered");
        Subscription { channel, rx }
    }

    /// Authorize `actor` against `access`, then register
    ///
    /// Returns `None` when the actor may not observe the channel; nothing is
    /// registered in that case.
    pub fn subscribe_authorized(
        &self,
        actor: &Actor,
        channel: Channel,
        access: &ChannelAccess,
    ) -> Option<Subscription> {
        if !authorize_subscription(actor, access) {
            debug!(channel = %channel, user_id = %actor.user_id, "Subscription denied");
            return None;
        }
        Some(self.subscribe(channel))
    }

    /// Publish one event on one channel
    ///
    /// Returns the number of subscribers reached (0 when nobody listens).
    pub fn publish(&self, channel: Channel, event: DeliveryEvent) -> usize {
        let sender = {
            let channels = self
                .channels
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            channels.get(&channel).cloned()
        };

        let Some(sender) = sender else {
            debug!(channel = %channel, event_type = event.event_type(), "No subscribers, event dropped");
            return 0;
        };

        match sender.send(event) {
            Ok(reached) => reached,
            Err(_) => {
                self.prune(channel);
                0
            }
        }
    }

    /// Publish an event to every channel it belongs to
    pub fn publish_event(&self, event: DeliveryEvent) -> usize {
        event
            .channels()
            .into_iter()
            .map(|channel| self.publish(channel, event.clone()))
            .sum()
    }

    /// Current subscriber count on `channel`
    pub fn subscriber_count(&self, channel: Channel) -> usize {
        let channels = self
            .channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels
            .get(&channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Number of channels with a live sender
    pub fn channel_count(&self) -> usize {
        self.channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn prune(&self, channel: Channel) {
        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(sender) = channels.get(&channel) {
            if sender.receiver_count() == 0 {
                channels.remove(&channel);
                debug!(channel = %channel, "Channel pruned");
            }
        }
    }
}

/// Receiving end of one channel subscription
pub struct Subscription {
    channel: Channel,
    rx: broadcast::Receiver<DeliveryEvent>,
}

impl Subscription {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Next event, skipping anything lost to lag
    ///
    /// Returns `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<DeliveryEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(channel = %self.channel, skipped, "Subscriber lagged, events skipped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive, `None` when nothing is buffered
    pub fn try_recv(&mut self) -> Option<DeliveryEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Convert into a stream of events, dropping lag notifications
    pub fn into_stream(self) -> impl Stream<Item = DeliveryEvent> {
        BroadcastStream::new(self.rx).filter_map(|item| async move { item.ok() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Role;
    use crate::events::{DeliveryStatus, SyncState};
    use chrono::Utc;
    use uuid::Uuid;

    fn progress(shipment_id: i64) -> DeliveryEvent {
        DeliveryEvent::SignatureProgress {
            delivery_id: None,
            shipment_id,
            stroke_count: 1,
            point_count: 10,
            quality_estimate: 0.2,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let bus = Broadcaster::new(16);
        assert_eq!(bus.publish(Channel::Shipment(1), progress(1)), 0);
        assert_eq!(bus.channel_count(), 0);
    }

    #[test]
    fn test_subscribers_only_see_their_channel() {
        let bus = Broadcaster::new(16);
        let mut a = bus.subscribe(Channel::Shipment(1));
        let mut b = bus.subscribe(Channel::Shipment(2));

        assert_eq!(bus.publish(Channel::Shipment(1), progress(1)), 1);

        assert_eq!(a.try_recv().map(|e| e.shipment_id()), Some(1));
        assert!(b.try_recv().is_none());
    }

    #[test]
    fn test_publish_event_reaches_shipment_and_delivery_channels() {
        let bus = Broadcaster::new(16);
        let delivery_id = Uuid::new_v4();
        let mut by_shipment = bus.subscribe(Channel::Shipment(42));
        let mut by_delivery = bus.subscribe(Channel::Delivery(delivery_id));

        let reached = bus.publish_event(DeliveryEvent::Confirmed {
            delivery_id,
            shipment_id: 42,
            status: DeliveryStatus::Delivered,
            sync_state: SyncState::Pending,
            recipient_name: "Jane Doe".to_string(),
            delivered_by: "driver-7".to_string(),
            timestamp: Utc::now(),
        });

        assert_eq!(reached, 2);
        assert!(by_shipment.try_recv().is_some());
        assert!(by_delivery.try_recv().is_some());
    }

    #[test]
    fn test_dropped_subscription_prunes_channel() {
        let bus = Broadcaster::new(16);
        let sub = bus.subscribe(Channel::Shipment(5));
        assert_eq!(bus.subscriber_count(Channel::Shipment(5)), 1);
        drop(sub);

        assert_eq!(bus.publish(Channel::Shipment(5), progress(5)), 0);
        assert_eq!(bus.channel_count(), 0);
    }

    #[test]
    fn test_lagging_subscriber_skips_missed_events() {
        let bus = Broadcaster::new(2);
        let mut sub = bus.subscribe(Channel::Shipment(1));
        for _ in 0..5 {
            bus.publish(Channel::Shipment(1), progress(1));
        }
        let mut received = 0;
        while sub.try_recv().is_some() {
            received += 1;
        }
        assert_eq!(received, 2);
    }

    #[test]
    fn test_unauthorized_subscription_is_not_registered() {
        let bus = Broadcaster::new(4);
        let stranger = Actor::new("driver-9", Role::Driver);
        let access = ChannelAccess {
            assigned_driver_id: Some("driver-1".to_string()),
            owner_ids: vec![],
        };
        assert!(bus
            .subscribe_authorized(&stranger, Channel::Shipment(3), &access)
            .is_none());
        assert_eq!(bus.channel_count(), 0);

        let driver = Actor::new("driver-1", Role::Driver);
        assert!(bus
            .subscribe_authorized(&driver, Channel::Shipment(3), &access)
            .is_some());
    }

    #[tokio::test]
    async fn test_recv_awaits_next_event() {
        let bus = Broadcaster::new(4);
        let mut sub = bus.subscribe(Channel::Shipment(8));
        let publisher = bus.clone();
        tokio::spawn(async move {
            publisher.publish(Channel::Shipment(8), progress(8));
        });
        let event = sub.recv().await.unwrap();
        assert_eq!(event.event_type(), "signature.progress");
    }
}
