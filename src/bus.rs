// Typed event bus between the live channel and its subscribers.
//
// Each event kind carries an ordered set of subscribers; every subscriber
// holds its own queue, so one slow consumer never blocks another and
// unsubscribing one handler leaves co-registered handlers untouched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::ServerMessage;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Everything the live channel can deliver: synthetic connection lifecycle
/// events plus parsed server messages.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Transport handshake succeeded.
    Connected,
    /// Transport dropped; automatic reconnect begins unless exhausted.
    Disconnected,
    /// All reconnect attempts failed; no further automatic retries.
    RetriesExhausted,
    /// A parsed inbound server message.
    Message(ServerMessage),
}

impl ChannelEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ChannelEvent::Connected => EventKind::Connected,
            ChannelEvent::Disconnected => EventKind::Disconnected,
            ChannelEvent::RetriesExhausted => EventKind::RetriesExhausted,
            ChannelEvent::Message(msg) => match msg {
                ServerMessage::ServerTime(_) => EventKind::ServerTime,
                ServerMessage::UpdateBid(_) => EventKind::BidUpdate,
                ServerMessage::BidError(_) => EventKind::BidError,
                ServerMessage::BidSuccess(_) => EventKind::BidSuccess,
                ServerMessage::ItemsUpdated(_) => EventKind::ItemsUpdated,
            },
        }
    }
}

/// Subscription key: one per deliverable event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    RetriesExhausted,
    ServerTime,
    BidUpdate,
    BidError,
    BidSuccess,
    ItemsUpdated,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::RetriesExhausted,
        EventKind::ServerTime,
        EventKind::BidUpdate,
        EventKind::BidError,
        EventKind::BidSuccess,
        EventKind::ItemsUpdated,
    ];
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// Opaque handle identifying one subscriber across every kind it registered
/// for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A live subscription: the id for later cancellation plus the receiving end
/// of the subscriber's queue. Events arrive strictly in dispatch order.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

struct Entry {
    id: SubscriptionId,
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct EventBus {
    subscribers: HashMap<EventKind, Vec<Entry>>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    /// Register a subscriber for a single event kind.
    pub fn subscribe(&mut self, kind: EventKind) -> Subscription {
        self.subscribe_many(&[kind])
    }

    /// Register one subscriber for several event kinds at once; all matching
    /// events arrive on the same receiver, in dispatch order.
    pub fn subscribe_many(&mut self, kinds: &[EventKind]) -> Subscription {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        for kind in kinds {
            self.subscribers.entry(*kind).or_default().push(Entry {
                id,
                tx: tx.clone(),
            });
        }
        Subscription { id, rx }
    }

    /// Remove a subscriber everywhere it is registered. Removal takes effect
    /// before the next `publish`; unknown ids are a no-op. Returns whether
    /// anything was removed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let mut removed = false;
        for entries in self.subscribers.values_mut() {
            let before = entries.len();
            entries.retain(|entry| entry.id != id);
            removed |= entries.len() != before;
        }
        removed
    }

    /// Deliver an event to every subscriber of its kind, in registration
    /// order. Subscribers whose receiver has been dropped are pruned.
    pub fn publish(&mut self, event: &ChannelEvent) {
        let Some(entries) = self.subscribers.get_mut(&event.kind()) else {
            return;
        };
        entries.retain(|entry| match entry.tx.send(event.clone()) {
            Ok(()) => true,
            Err(_) => {
                debug!("pruning subscription {:?}: receiver dropped", entry.id);
                false
            }
        });
    }

    /// Drop every subscription, closing all receivers. Used at channel
    /// teardown so downstream loops observe end-of-stream.
    pub fn clear(&mut self) {
        self.subscribers.clear();
    }
}

/// The bus as shared between the channel handle (subscribe/unsubscribe) and
/// the connection task (publish).
#[derive(Clone, Default)]
pub struct SharedBus {
    inner: Arc<Mutex<EventBus>>,
}

impl SharedBus {
    pub fn new() -> Self {
        SharedBus::default()
    }

    pub fn subscribe(&self, kind: EventKind) -> Subscription {
        self.lock().subscribe(kind)
    }

    pub fn subscribe_many(&self, kinds: &[EventKind]) -> Subscription {
        self.lock().subscribe_many(kinds)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().unsubscribe(id)
    }

    pub fn publish(&self, event: &ChannelEvent) {
        self.lock().publish(event);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, EventBus> {
        // The registry stays structurally sound across a panic mid-publish.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServerTimePayload;

    fn server_time_event(ms: i64) -> ChannelEvent {
        ChannelEvent::Message(ServerMessage::ServerTime(ServerTimePayload {
            server_time: ms,
        }))
    }

    #[test]
    fn events_reach_only_matching_subscribers() {
        let mut bus = EventBus::new();
        let mut times = bus.subscribe(EventKind::ServerTime);
        let mut connects = bus.subscribe(EventKind::Connected);

        bus.publish(&server_time_event(1));

        assert!(matches!(
            times.rx.try_recv(),
            Ok(ChannelEvent::Message(ServerMessage::ServerTime(_)))
        ));
        assert!(connects.rx.try_recv().is_err());
    }

    #[test]
    fn co_registered_subscribers_all_receive() {
        let mut bus = EventBus::new();
        let mut first = bus.subscribe(EventKind::Connected);
        let mut second = bus.subscribe(EventKind::Connected);

        bus.publish(&ChannelEvent::Connected);

        assert!(matches!(first.rx.try_recv(), Ok(ChannelEvent::Connected)));
        assert!(matches!(second.rx.try_recv(), Ok(ChannelEvent::Connected)));
    }

    #[test]
    fn unsubscribe_removes_one_without_clobbering_the_other() {
        let mut bus = EventBus::new();
        let mut keep = bus.subscribe(EventKind::Connected);
        let drop_me = bus.subscribe(EventKind::Connected);

        assert!(bus.unsubscribe(drop_me.id));
        bus.publish(&ChannelEvent::Connected);

        let mut dropped_rx = drop_me.rx;
        assert!(matches!(keep.rx.try_recv(), Ok(ChannelEvent::Connected)));
        assert!(dropped_rx.try_recv().is_err());
    }

    #[test]
    fn unsubscribe_unknown_id_is_a_no_op() {
        let mut bus = EventBus::new();
        let sub = bus.subscribe(EventKind::Connected);
        assert!(bus.unsubscribe(sub.id));
        assert!(!bus.unsubscribe(sub.id));
    }

    #[test]
    fn subscribe_many_preserves_dispatch_order_across_kinds() {
        let mut bus = EventBus::new();
        let mut sub = bus.subscribe_many(&[EventKind::Connected, EventKind::ServerTime]);

        bus.publish(&ChannelEvent::Connected);
        bus.publish(&server_time_event(1));
        bus.publish(&ChannelEvent::Connected);

        assert!(matches!(sub.rx.try_recv(), Ok(ChannelEvent::Connected)));
        assert!(matches!(
            sub.rx.try_recv(),
            Ok(ChannelEvent::Message(ServerMessage::ServerTime(_)))
        ));
        assert!(matches!(sub.rx.try_recv(), Ok(ChannelEvent::Connected)));
    }

    #[test]
    fn dropped_receivers_are_pruned_on_publish() {
        let mut bus = EventBus::new();
        let sub = bus.subscribe(EventKind::Connected);
        drop(sub.rx);

        bus.publish(&ChannelEvent::Connected);

        // Pruned: unsubscribing the same id afterwards removes nothing.
        assert!(!bus.unsubscribe(sub.id));
    }

    #[test]
    fn clear_closes_all_receivers() {
        let mut bus = EventBus::new();
        let mut sub = bus.subscribe(EventKind::Connected);
        bus.clear();
        assert!(matches!(
            sub.rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
