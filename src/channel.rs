// Live event channel: owns the persistent connection lifecycle and the
// subscriber registry, and exposes the one outbound command (submit bid).
//
// A background task drives the connection: connect, read frames and publish
// them on the bus, reconnect with a bounded fixed-delay policy after drops,
// and surface exhaustion instead of retrying forever. The handle is cheap to
// call into from anywhere; all transport I/O happens on the task.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::{ChannelEvent, EventKind, SharedBus, Subscription, SubscriptionId};
use crate::config::ReconnectPolicy;
use crate::protocol::{ClientCommand, ServerMessage};
use crate::transport::{Connector, Transport};

/// How long `shutdown` waits for the connection task before aborting it.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// States and errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal: explicit shutdown happened; no further transitions.
    Closed,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// Local precondition failure: nothing was sent over the wire.
    #[error("not connected to the auction server")]
    NotConnected,

    #[error("channel has been shut down")]
    Closed,
}

struct SharedState {
    state: AtomicU8,
}

impl SharedState {
    fn new() -> Self {
        SharedState {
            state: AtomicU8::new(ChannelState::Disconnected as u8),
        }
    }

    fn set(&self, state: ChannelState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn get(&self) -> ChannelState {
        match self.state.load(Ordering::Acquire) {
            0 => ChannelState::Disconnected,
            1 => ChannelState::Connecting,
            2 => ChannelState::Connected,
            _ => ChannelState::Closed,
        }
    }
}

enum Command {
    Outbound(ClientCommand),
    Close,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to the live channel. Subscriptions and outbound commands go
/// through here; events come back through [`Subscription`] receivers.
pub struct LiveChannel {
    cmd_tx: mpsc::UnboundedSender<Command>,
    bus: SharedBus,
    shared: Arc<SharedState>,
    task: Option<JoinHandle<()>>,
}

impl LiveChannel {
    /// Spawn the connection task and begin connecting.
    ///
    /// The caller constructs the bus so it can register subscriptions
    /// before the first connect attempt; those subscribers are guaranteed
    /// to observe the initial synthetic `Connected` event.
    pub fn start<C: Connector>(connector: C, policy: ReconnectPolicy, bus: SharedBus) -> Self {
        let shared = Arc::new(SharedState::new());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_loop(
            connector,
            policy,
            Arc::clone(&shared),
            bus.clone(),
            cmd_rx,
        ));

        LiveChannel {
            cmd_tx,
            bus,
            shared,
            task: Some(task),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.shared.get()
    }

    /// Register a subscriber for one event kind.
    pub fn subscribe(&self, kind: EventKind) -> Subscription {
        self.bus.subscribe(kind)
    }

    /// Register one subscriber for several event kinds on a single receiver.
    pub fn subscribe_many(&self, kinds: &[EventKind]) -> Subscription {
        self.bus.subscribe_many(kinds)
    }

    /// Remove a subscriber; takes effect before the next dispatched event.
    /// Unknown ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.bus.unsubscribe(id);
    }

    /// Queue a bid command for transmission and return immediately.
    ///
    /// Fire-and-forget: the outcome arrives later (if at all) as an
    /// independent `BID_ERROR`/`BID_SUCCESS`/`UPDATE_BID` event, correlated
    /// by item id and bidder, never by this call. When the channel is not
    /// connected the command fails locally and nothing touches the wire;
    /// bids are never silently queued for later.
    pub fn submit_bid(&self, item_id: &str, amount: u64, bidder: &str) -> Result<(), ChannelError> {
        match self.state() {
            ChannelState::Connected => {}
            ChannelState::Closed => return Err(ChannelError::Closed),
            ChannelState::Disconnected | ChannelState::Connecting => {
                return Err(ChannelError::NotConnected)
            }
        }

        let command = ClientCommand::BidPlaced {
            item_id: item_id.to_string(),
            bid_amount: amount,
            user_id: bidder.to_string(),
        };
        self.cmd_tx
            .send(Command::Outbound(command))
            .map_err(|_| ChannelError::NotConnected)
    }

    /// Shut the channel down: close the connection, cancel any pending
    /// reconnect, and close every subscription. Idempotent.
    pub async fn shutdown(&mut self) {
        debug!("channel shutdown requested");
        let _ = self.cmd_tx.send(Command::Close);

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await {
                Ok(_) => {}
                Err(_) => {
                    warn!("connection task did not exit within timeout, aborting");
                    task.abort();
                    let _ = task.await;
                }
            }
        }

        self.shared.set(ChannelState::Closed);
        self.bus.clear();
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        // No executor context here, so no graceful close: just abort.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

enum Exit {
    Shutdown,
    Dropped,
}

async fn run_loop<C: Connector>(
    connector: C,
    policy: ReconnectPolicy,
    shared: Arc<SharedState>,
    bus: SharedBus,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
) {
    // Consecutive failed connect attempts; reset on every success.
    let mut failures: u32 = 0;

    loop {
        shared.set(ChannelState::Connecting);
        debug!("connecting to auction server");

        let connected = tokio::select! {
            result = connector.connect() => result,
            _ = recv_close(&mut cmd_rx) => break,
        };

        match connected {
            Ok(mut transport) => {
                failures = 0;
                shared.set(ChannelState::Connected);
                info!("connected to auction server");
                bus.publish(&ChannelEvent::Connected);

                match drive(&mut transport, &mut cmd_rx, &bus).await {
                    Exit::Shutdown => {
                        transport.close().await;
                        break;
                    }
                    Exit::Dropped => {
                        shared.set(ChannelState::Disconnected);
                        warn!("connection to auction server lost");
                        bus.publish(&ChannelEvent::Disconnected);
                    }
                }
            }
            Err(e) => {
                failures += 1;
                warn!(
                    "connect attempt {failures}/{} failed: {e}",
                    policy.max_attempts
                );
                if failures >= policy.max_attempts {
                    shared.set(ChannelState::Disconnected);
                    warn!("reconnect attempts exhausted, giving up");
                    bus.publish(&ChannelEvent::RetriesExhausted);
                    // Automatic-retry phase is over. Subscriptions stay open
                    // (nothing more will arrive); recovery requires a fresh
                    // channel.
                    return;
                }
            }
        }

        // Wait out the retry delay, still responsive to shutdown.
        tokio::select! {
            _ = tokio::time::sleep(policy.delay()) => {}
            _ = recv_close(&mut cmd_rx) => break,
        }
    }

    shared.set(ChannelState::Closed);
    bus.clear();
    debug!("connection task exited");
}

/// Read/write loop over one established connection.
async fn drive<T: Transport>(
    transport: &mut T,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    bus: &SharedBus,
) -> Exit {
    loop {
        tokio::select! {
            command = cmd_rx.recv() => match command {
                Some(Command::Outbound(outbound)) => match serde_json::to_string(&outbound) {
                    Ok(json) => {
                        if let Err(e) = transport.send(json).await {
                            warn!("send failed: {e}");
                            return Exit::Dropped;
                        }
                    }
                    Err(e) => {
                        // A non-serializable command is a programming bug;
                        // don't kill the connection over it.
                        error!("failed to serialize outbound command: {e}");
                    }
                },
                Some(Command::Close) | None => return Exit::Shutdown,
            },
            frame = transport.recv() => match frame {
                Some(Ok(text)) => dispatch(bus, &text),
                Some(Err(e)) => {
                    warn!("transport error: {e}");
                    return Exit::Dropped;
                }
                None => {
                    info!("server closed the connection");
                    return Exit::Dropped;
                }
            },
        }
    }
}

/// Parse one inbound frame and publish it. Malformed frames are logged and
/// skipped, never fatal.
fn dispatch(bus: &SharedBus, text: &str) {
    match serde_json::from_str::<ServerMessage>(text) {
        Ok(message) => {
            debug!("dispatching {:?}", std::mem::discriminant(&message));
            bus.publish(&ChannelEvent::Message(message));
        }
        Err(e) => warn!("failed to parse server message: {e} -- raw: {text}"),
    }
}

/// Wait for an explicit close (or the handle being dropped) while between
/// connections. Outbound commands arriving in this state are dropped: the
/// submit path already failed them locally, so anything seen here raced a
/// disconnect.
async fn recv_close(cmd_rx: &mut mpsc::UnboundedReceiver<Command>) {
    loop {
        match cmd_rx.recv().await {
            Some(Command::Close) | None => return,
            Some(Command::Outbound(_)) => {
                warn!("dropping outbound command while not connected");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServerTimePayload;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex as StdMutex;
    use tokio_tungstenite::tungstenite::Error as WsError;

    use crate::transport::TransportError;

    /// One scripted inbound step for a mock connection.
    enum Step {
        Frame(String),
        Error,
        Close,
    }

    struct MockTransport {
        steps: VecDeque<Step>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, text: String) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(text);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String, TransportError>> {
            match self.steps.pop_front() {
                Some(Step::Frame(text)) => Some(Ok(text)),
                Some(Step::Error) => Some(Err(TransportError::Ws(WsError::ConnectionClosed))),
                Some(Step::Close) => None,
                // Script exhausted: stay connected until shutdown.
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) {}
    }

    /// Hands out one scripted transport per connect; connects beyond the
    /// script fail.
    struct MockConnector {
        scripts: StdMutex<VecDeque<Vec<Step>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        connects: Arc<AtomicU32>,
    }

    impl MockConnector {
        fn new(scripts: Vec<Vec<Step>>) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicU32>) {
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let connects = Arc::new(AtomicU32::new(0));
            let connector = MockConnector {
                scripts: StdMutex::new(scripts.into()),
                sent: Arc::clone(&sent),
                connects: Arc::clone(&connects),
            };
            (connector, sent, connects)
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Transport = MockTransport;

        async fn connect(&self) -> Result<MockTransport, TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            match self.scripts.lock().unwrap().pop_front() {
                Some(steps) => Ok(MockTransport {
                    steps: steps.into(),
                    sent: Arc::clone(&self.sent),
                }),
                None => Err(TransportError::Ws(WsError::ConnectionClosed)),
            }
        }
    }

    fn server_time_frame(ms: i64) -> String {
        format!(r#"{{"type":"SERVER_TIME","payload":{{"serverTime":{ms}}}}}"#)
    }

    fn policy(delay_ms: u64, max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            delay_ms,
            max_attempts,
        }
    }

    async fn next_event(sub: &mut Subscription) -> Option<ChannelEvent> {
        tokio::time::timeout(Duration::from_secs(10), sub.rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test(start_paused = true)]
    async fn connect_publishes_connected_and_dispatches_frames() {
        let (connector, _sent, _) =
            MockConnector::new(vec![vec![Step::Frame(server_time_frame(42))]]);
        let bus = SharedBus::new();
        // Subscribing before start guarantees the first events are observed.
        let mut sub = bus.subscribe_many(&[EventKind::Connected, EventKind::ServerTime]);
        let mut channel = LiveChannel::start(connector, policy(1000, 5), bus);

        assert!(matches!(
            next_event(&mut sub).await,
            Some(ChannelEvent::Connected)
        ));
        match next_event(&mut sub).await {
            Some(ChannelEvent::Message(ServerMessage::ServerTime(ServerTimePayload {
                server_time,
            }))) => assert_eq!(server_time, 42),
            other => panic!("expected SERVER_TIME, got {other:?}"),
        }
        assert_eq!(channel.state(), ChannelState::Connected);

        channel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frames_are_skipped() {
        let (connector, _sent, _) = MockConnector::new(vec![vec![
            Step::Frame("this is not json".into()),
            Step::Frame(server_time_frame(7)),
        ]]);
        let bus = SharedBus::new();
        let mut sub = bus.subscribe(EventKind::ServerTime);
        let mut channel = LiveChannel::start(connector, policy(1000, 5), bus);

        match next_event(&mut sub).await {
            Some(ChannelEvent::Message(ServerMessage::ServerTime(p))) => {
                assert_eq!(p.server_time, 7)
            }
            other => panic!("expected SERVER_TIME, got {other:?}"),
        }

        channel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn submit_bid_while_disconnected_fails_without_transport_io() {
        let (connector, sent, _) = MockConnector::new(vec![]);
        let mut channel = LiveChannel::start(connector, policy(10, 1), SharedBus::new());

        let result = channel.submit_bid("item_1", 110, "user_a");
        assert_eq!(result, Err(ChannelError::NotConnected));
        assert!(sent.lock().unwrap().is_empty());

        channel.shutdown().await;
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn submit_bid_when_connected_reaches_the_wire() {
        let (connector, sent, _) = MockConnector::new(vec![vec![]]);
        let bus = SharedBus::new();
        let mut sub = bus.subscribe(EventKind::Connected);
        let mut channel = LiveChannel::start(connector, policy(1000, 5), bus);

        assert!(matches!(
            next_event(&mut sub).await,
            Some(ChannelEvent::Connected)
        ));
        channel.submit_bid("item_1", 110, "user_a").unwrap();

        // Give the connection task a chance to flush the command.
        for _ in 0..50 {
            if !sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let frames = sent.lock().unwrap();
        assert_eq!(frames.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(value["type"], "BID_PLACED");
        assert_eq!(value["payload"]["itemId"], "item_1");
        assert_eq!(value["payload"]["bidAmount"], 110);
        assert_eq!(value["payload"]["userId"], "user_a");
        drop(frames);

        channel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn drop_triggers_reconnect_and_fresh_dispatch() {
        let (connector, _sent, connects) = MockConnector::new(vec![
            vec![Step::Frame(server_time_frame(1)), Step::Close],
            vec![Step::Frame(server_time_frame(2))],
        ]);
        let bus = SharedBus::new();
        let mut sub = bus.subscribe_many(&[
            EventKind::Connected,
            EventKind::Disconnected,
            EventKind::ServerTime,
        ]);
        let mut channel = LiveChannel::start(connector, policy(50, 5), bus);

        let mut seen = Vec::new();
        for _ in 0..5 {
            match next_event(&mut sub).await {
                Some(ChannelEvent::Connected) => seen.push("connected".to_string()),
                Some(ChannelEvent::Disconnected) => seen.push("disconnected".to_string()),
                Some(ChannelEvent::Message(ServerMessage::ServerTime(p))) => {
                    seen.push(format!("time:{}", p.server_time))
                }
                other => panic!("unexpected event {other:?}"),
            }
        }

        assert_eq!(
            seen,
            vec!["connected", "time:1", "disconnected", "connected", "time:2"]
        );
        assert_eq!(connects.load(Ordering::SeqCst), 2);

        channel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_also_triggers_reconnect() {
        let (connector, _sent, connects) =
            MockConnector::new(vec![vec![Step::Error], vec![Step::Frame(server_time_frame(9))]]);
        let bus = SharedBus::new();
        let mut sub = bus.subscribe(EventKind::ServerTime);
        let mut channel = LiveChannel::start(connector, policy(50, 5), bus);

        match next_event(&mut sub).await {
            Some(ChannelEvent::Message(ServerMessage::ServerTime(p))) => {
                assert_eq!(p.server_time, 9)
            }
            other => panic!("expected SERVER_TIME after reconnect, got {other:?}"),
        }
        assert_eq!(connects.load(Ordering::SeqCst), 2);

        channel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded_and_exhaustion_is_surfaced() {
        let (connector, _sent, connects) = MockConnector::new(vec![]);
        let bus = SharedBus::new();
        let mut sub = bus.subscribe(EventKind::RetriesExhausted);
        let mut channel = LiveChannel::start(connector, policy(10, 3), bus);

        assert!(matches!(
            next_event(&mut sub).await,
            Some(ChannelEvent::RetriesExhausted)
        ));
        assert_eq!(connects.load(Ordering::SeqCst), 3);
        assert_eq!(channel.state(), ChannelState::Disconnected);

        // The automatic-retry phase is over: no further attempts happen.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connects.load(Ordering::SeqCst), 3);

        channel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_stops_delivery_to_that_subscriber_only() {
        let (connector, _sent, _) = MockConnector::new(vec![vec![
            Step::Frame(server_time_frame(1)),
            Step::Frame(server_time_frame(2)),
        ]]);
        let bus = SharedBus::new();
        let mut keep = bus.subscribe(EventKind::ServerTime);
        let removed = bus.subscribe(EventKind::ServerTime);
        let mut channel = LiveChannel::start(connector, policy(1000, 5), bus);

        channel.unsubscribe(removed.id);

        assert!(next_event(&mut keep).await.is_some());
        assert!(next_event(&mut keep).await.is_some());

        let mut removed_rx = removed.rx;
        assert!(removed_rx.try_recv().is_err());

        channel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_idempotent_and_closes_subscriptions() {
        let (connector, _sent, _) = MockConnector::new(vec![vec![]]);
        let bus = SharedBus::new();
        let mut sub = bus.subscribe(EventKind::Connected);
        let mut channel = LiveChannel::start(connector, policy(1000, 5), bus);

        assert!(matches!(
            next_event(&mut sub).await,
            Some(ChannelEvent::Connected)
        ));

        channel.shutdown().await;
        channel.shutdown().await;

        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(next_event(&mut sub).await.is_none());
        assert_eq!(
            channel.submit_bid("item_1", 100, "user_a"),
            Err(ChannelError::Closed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_a_pending_reconnect_delay() {
        let (connector, _sent, connects) =
            MockConnector::new(vec![vec![Step::Close]]);
        // Long delay: shutdown must not wait for it.
        let bus = SharedBus::new();
        let mut sub = bus.subscribe(EventKind::Disconnected);
        let mut channel = LiveChannel::start(connector, policy(3_600_000, 5), bus);

        assert!(matches!(
            next_event(&mut sub).await,
            Some(ChannelEvent::Disconnected)
        ));

        channel.shutdown().await;
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }
}
