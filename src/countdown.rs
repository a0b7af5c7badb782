// Per-item countdown derivation and ticker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::clock::ClockSync;

/// Refresh period for live countdown updates.
pub const TICK_PERIOD: Duration = Duration::from_millis(100);

const WARNING_SECS: i64 = 60;
const CRITICAL_SECS: i64 = 30;

/// Derived remaining-time state for one auction item.
///
/// A pure function of `(end_time, now)`: equal inputs always produce an
/// identical view, regardless of when or how often it is sampled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountdownView {
    /// Remaining time in milliseconds, clamped to zero.
    pub remaining_ms: i64,
    /// `"<minutes>:<seconds>"` (seconds zero-padded), or `"ENDED"`.
    pub display: String,
    pub is_expired: bool,
    /// Less than a minute remaining.
    pub is_warning: bool,
    /// Less than thirty seconds remaining.
    pub is_critical: bool,
}

impl CountdownView {
    /// Derive the view for `end_time_ms` as seen at `now_ms` (both epoch
    /// milliseconds in authoritative time).
    pub fn at(end_time_ms: i64, now_ms: i64) -> Self {
        let remaining_ms = (end_time_ms - now_ms).max(0);
        if remaining_ms == 0 {
            return CountdownView {
                remaining_ms: 0,
                display: "ENDED".to_string(),
                is_expired: true,
                is_warning: false,
                is_critical: false,
            };
        }

        let total_seconds = remaining_ms / 1000;
        let minutes = total_seconds / 60;
        let seconds = total_seconds % 60;

        CountdownView {
            remaining_ms,
            display: format!("{minutes}:{seconds:02}"),
            is_expired: false,
            is_warning: total_seconds < WARNING_SECS,
            is_critical: total_seconds < CRITICAL_SECS,
        }
    }
}

/// A live countdown for a single item.
///
/// Spawns a ticker task that re-derives the view every [`TICK_PERIOD`] and
/// publishes it through a watch channel. Once the remaining time reaches
/// zero the final `ENDED` view is published and the ticker stops itself;
/// bringing the countdown back requires [`Countdown::restart`] with a new
/// end time. Dropping the handle aborts the ticker.
#[derive(Debug)]
pub struct Countdown {
    end_time_ms: i64,
    view_rx: watch::Receiver<CountdownView>,
    task: JoinHandle<()>,
}

impl Countdown {
    /// Start ticking toward `end_time_ms`, reading the current time from
    /// `clock`.
    pub fn start(end_time_ms: i64, clock: Arc<ClockSync>) -> Self {
        let initial = CountdownView::at(end_time_ms, clock.now_ms());
        let (view_tx, view_rx) = watch::channel(initial);
        let task = tokio::spawn(tick(end_time_ms, clock, view_tx));
        Countdown {
            end_time_ms,
            view_rx,
            task,
        }
    }

    /// The end time this countdown is tracking.
    pub fn end_time_ms(&self) -> i64 {
        self.end_time_ms
    }

    /// The most recently published view.
    pub fn view(&self) -> CountdownView {
        self.view_rx.borrow().clone()
    }

    /// A receiver that observes every published view.
    pub fn subscribe(&self) -> watch::Receiver<CountdownView> {
        self.view_rx.clone()
    }

    /// Abort the current ticker and re-arm against a new end time.
    pub fn restart(&mut self, end_time_ms: i64, clock: Arc<ClockSync>) {
        self.task.abort();
        *self = Countdown::start(end_time_ms, clock);
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn tick(end_time_ms: i64, clock: Arc<ClockSync>, view_tx: watch::Sender<CountdownView>) {
    let mut interval = tokio::time::interval(TICK_PERIOD);
    loop {
        interval.tick().await;
        let view = CountdownView::at(end_time_ms, clock.now_ms());
        let expired = view.is_expired;
        if view_tx.send(view).is_err() {
            // Receiver gone, the item left the collection.
            return;
        }
        if expired {
            // No further ticks once ended.
            return;
        }
    }
}
