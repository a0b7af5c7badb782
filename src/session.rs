// The auction session: explicit construction and teardown of the sync core.
//
// Construction order matters and is fixed here: the local identity must
// exist before the channel starts (outbound bids carry it), the initial
// item load happens before live events are consumed, and the first offset
// sample can only arrive once the channel is up. Teardown releases the
// connection and cancels pending timers, idempotently.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api;
use crate::bus::{EventKind, SharedBus};
use crate::channel::{ChannelError, ChannelState, LiveChannel};
use crate::clock::ClockSync;
use crate::config::Config;
use crate::protocol::Item;
use crate::reconcile::{Notification, Reconciler};
use crate::store::StateStore;
use crate::transport::Connector;

/// Capacity of the notification channel to the presentation layer.
const NOTIFICATION_CAPACITY: usize = 256;

/// How long `shutdown` waits for the reconciliation task to drain.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A running sync session against one auction server.
pub struct AuctionSession {
    identity: String,
    clock: Arc<ClockSync>,
    channel: LiveChannel,
    items_rx: watch::Receiver<Vec<Item>>,
    reconcile_task: Option<JoinHandle<()>>,
}

impl AuctionSession {
    /// Bring the session up: load the initial collection, start the live
    /// channel, and spawn the reconciliation loop. Returns the session
    /// handle plus the notification stream for the presentation layer.
    ///
    /// A failed initial load is not fatal: it surfaces as
    /// [`Notification::InitialLoadFailed`] and the collection starts empty,
    /// to be filled by the next `ITEMS_UPDATED` broadcast.
    pub async fn start<C: Connector>(
        config: &Config,
        identity: String,
        connector: C,
    ) -> (Self, mpsc::Receiver<Notification>) {
        let clock = Arc::new(ClockSync::new());
        let (notification_tx, notification_rx) = mpsc::channel(NOTIFICATION_CAPACITY);

        let mut store = StateStore::new();
        match api::fetch_items(&config.server.api_url).await {
            Ok(items) => {
                info!("initial load: {} auction items", items.len());
                store.replace_all(items);
            }
            Err(e) => {
                warn!("initial item load failed: {e}");
                let _ = notification_tx.send(Notification::InitialLoadFailed).await;
            }
        }
        let (items_tx, items_rx) = watch::channel(store.snapshot());

        // Subscribe before the channel starts connecting so the reconciler
        // cannot miss the first synthetic Connected event.
        let bus = SharedBus::new();
        let events = bus.subscribe_many(&EventKind::ALL);
        let channel = LiveChannel::start(connector, config.reconnect.clone(), bus);

        let reconciler = Reconciler::new(
            store,
            Arc::clone(&clock),
            identity.clone(),
            notification_tx,
            items_tx,
        );
        let reconcile_task = tokio::spawn(reconciler.run(events));

        let session = AuctionSession {
            identity,
            clock,
            channel,
            items_rx,
            reconcile_task: Some(reconcile_task),
        };
        (session, notification_rx)
    }

    /// The persisted local identity this session bids as.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Shared clock handle for countdown rendering.
    pub fn clock(&self) -> Arc<ClockSync> {
        Arc::clone(&self.clock)
    }

    /// Read-only item snapshots; updated after every reconciled mutation.
    pub fn items(&self) -> watch::Receiver<Vec<Item>> {
        self.items_rx.clone()
    }

    pub fn connection_state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Submit a bid as the local identity. Fire-and-forget; see
    /// [`LiveChannel::submit_bid`].
    pub fn submit_bid(&self, item_id: &str, amount: u64) -> Result<(), ChannelError> {
        self.channel.submit_bid(item_id, amount, &self.identity)
    }

    /// Tear the session down: close the channel (which cancels pending
    /// reconnects and closes every subscription) and wait for the
    /// reconciliation loop to drain. Idempotent.
    pub async fn shutdown(&mut self) {
        self.channel.shutdown().await;

        if let Some(mut task) = self.reconcile_task.take() {
            // The cleared bus closes the event subscription, so the loop
            // exits on its own; the timeout is a backstop.
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await {
                Ok(_) => {}
                Err(_) => {
                    warn!("reconciliation task did not exit within timeout, aborting");
                    task.abort();
                    let _ = task.await;
                }
            }
        }
        info!("auction session shut down");
    }
}
