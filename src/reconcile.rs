// Reconciliation: merges inbound channel events into local state and derives
// the user-facing signals from each state transition.
//
// This is the composition point between the live channel, the state store,
// and the clock. It is the single writer for both the item collection and
// the server-time offset, so no mutation ever races another.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::bus::{ChannelEvent, Subscription};
use crate::clock::ClockSync;
use crate::protocol::{
    BidErrorPayload, BidUpdatePayload, Item, ServerMessage, REASON_AUCTION_ENDED,
    REASON_BID_TOO_LOW,
};
use crate::store::{BidPatch, StateStore};

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Ephemeral, derived signal for the presentation layer. Never stored;
/// produced here and consumed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The live channel (re)connected.
    Connected,
    /// The connection dropped; automatic reconnection is in progress.
    ConnectionLost,
    /// Reconnect attempts are exhausted; recovery needs a fresh session.
    ConnectionExhausted,
    /// The initial item fetch failed; starting with an empty collection.
    InitialLoadFailed,
    /// The local identity now holds the high bid on this item.
    Winning { item_id: String, amount: u64 },
    /// The local identity held the high bid on this item and just lost it.
    Outbid { item_id: String, title: String },
    /// A submitted bid was rejected as too low.
    BidTooLow { message: String },
    /// A submitted bid was rejected because the auction already ended.
    AuctionEnded,
    /// A submitted bid was rejected for any other (or unknown) reason.
    BidRejected { message: String },
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notification::Connected => write!(f, "Connected to live auction"),
            Notification::ConnectionLost => write!(f, "Connection lost. Reconnecting..."),
            Notification::ConnectionExhausted => {
                write!(f, "Disconnected from the auction server. Restart to reconnect.")
            }
            Notification::InitialLoadFailed => write!(f, "Failed to load auctions"),
            Notification::Winning { amount, .. } => write!(f, "You're winning! ${amount}"),
            Notification::Outbid { title, .. } => {
                write!(f, "You've been outbid on {title}!")
            }
            Notification::BidTooLow { message } => write!(f, "{message}"),
            Notification::AuctionEnded => write!(f, "This auction has ended"),
            Notification::BidRejected { message } => write!(f, "{message}"),
        }
    }
}

/// Map a rejection payload to exactly one notification. Total: unknown and
/// absent reason codes fall through to the generic kind instead of being
/// dropped.
pub fn map_bid_error(payload: &BidErrorPayload) -> Notification {
    match payload.error.as_deref() {
        Some(REASON_BID_TOO_LOW) => Notification::BidTooLow {
            message: payload
                .message
                .clone()
                .unwrap_or_else(|| "Bid too low".to_string()),
        },
        Some(REASON_AUCTION_ENDED) => Notification::AuctionEnded,
        _ => Notification::BidRejected {
            message: payload
                .message
                .clone()
                .unwrap_or_else(|| "Bid failed".to_string()),
        },
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Owns the state store and drives it from channel events.
pub struct Reconciler {
    store: StateStore,
    clock: Arc<ClockSync>,
    identity: String,
    notification_tx: mpsc::Sender<Notification>,
    items_tx: watch::Sender<Vec<Item>>,
}

impl Reconciler {
    pub fn new(
        store: StateStore,
        clock: Arc<ClockSync>,
        identity: String,
        notification_tx: mpsc::Sender<Notification>,
        items_tx: watch::Sender<Vec<Item>>,
    ) -> Self {
        Reconciler {
            store,
            clock,
            identity,
            notification_tx,
            items_tx,
        }
    }

    /// Consume channel events until the subscription closes. Events are
    /// handled strictly in arrival order.
    pub async fn run(mut self, mut events: Subscription) {
        info!("reconciliation loop started");
        while let Some(event) = events.rx.recv().await {
            self.handle_event(event).await;
        }
        debug!("event subscription closed, reconciliation loop exiting");
    }

    async fn handle_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => self.notify(Notification::Connected).await,
            ChannelEvent::Disconnected => self.notify(Notification::ConnectionLost).await,
            ChannelEvent::RetriesExhausted => {
                self.notify(Notification::ConnectionExhausted).await
            }
            ChannelEvent::Message(message) => self.handle_message(message).await,
        }
    }

    async fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::ServerTime(payload) => {
                self.clock.apply_sample(payload.server_time);
            }
            ServerMessage::UpdateBid(payload) => self.handle_bid_update(payload).await,
            ServerMessage::BidError(payload) => {
                warn!(
                    "bid rejected: code={:?} message={:?}",
                    payload.error, payload.message
                );
                self.notify(map_bid_error(&payload)).await;
            }
            ServerMessage::BidSuccess(payload) => {
                // Acknowledgement only; the authoritative item fields arrive
                // via the UPDATE_BID broadcast.
                debug!("bid acknowledged for item {}", payload.item_id);
            }
            ServerMessage::ItemsUpdated(payload) => {
                self.store.replace_all(payload.items);
                self.publish_snapshot();
            }
        }
    }

    /// Apply one accepted-bid update and derive the leadership signal.
    ///
    /// The previous-holder comparison runs against the item state
    /// immediately prior to this patch (captured by the store atomically
    /// with the mutation), so rapid successive updates each yield exactly
    /// one correct notification.
    async fn handle_bid_update(&mut self, payload: BidUpdatePayload) {
        let patch = BidPatch::from(&payload);
        let Some(outcome) = self.store.apply_patch(&payload.item_id, &patch) else {
            // Unknown item: logged by the store, nothing to derive.
            return;
        };
        self.publish_snapshot();

        let was_leading = outcome.previous.highest_bidder.as_deref() == Some(self.identity.as_str());
        let is_leading = outcome.current.highest_bidder.as_deref() == Some(self.identity.as_str());

        if is_leading {
            self.notify(Notification::Winning {
                item_id: outcome.current.id,
                amount: outcome.current.current_bid,
            })
            .await;
        } else if was_leading {
            self.notify(Notification::Outbid {
                item_id: outcome.previous.id,
                title: outcome.previous.title,
            })
            .await;
        }
        // An update touching neither past nor present leadership is silent.
    }

    fn publish_snapshot(&self) {
        self.items_tx.send_replace(self.store.snapshot());
    }

    async fn notify(&self, notification: Notification) {
        debug!("notification: {notification:?}");
        if self.notification_tx.send(notification).await.is_err() {
            debug!("notification receiver dropped");
        }
    }
}
