// Line-oriented terminal presenter.
//
// Consumes notifications and read-only item snapshots from the session and
// prints a periodic board with live countdowns. This is deliberately thin:
// the sync core never depends on it, and it never mutates core state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::clock::ClockSync;
use crate::countdown::Countdown;
use crate::protocol::Item;
use crate::reconcile::Notification;

/// Run the presenter until the session closes its channels.
pub async fn run(
    mut notifications: mpsc::Receiver<Notification>,
    mut items_rx: watch::Receiver<Vec<Item>>,
    clock: Arc<ClockSync>,
    identity: String,
    render_interval: Duration,
) -> anyhow::Result<()> {
    let mut countdowns: HashMap<String, Countdown> = HashMap::new();
    let mut snapshot = items_rx.borrow().clone();
    sync_countdowns(&mut countdowns, &snapshot, &clock);

    let mut interval = tokio::time::interval(render_interval);

    loop {
        tokio::select! {
            notification = notifications.recv() => match notification {
                Some(n) => println!("*** {n}"),
                None => break,
            },
            changed = items_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                snapshot = items_rx.borrow_and_update().clone();
                sync_countdowns(&mut countdowns, &snapshot, &clock);
            }
            _ = interval.tick() => {
                render(&snapshot, &countdowns, &clock, &identity);
            }
        }
    }

    debug!("presenter exiting");
    Ok(())
}

/// Keep one countdown per item, restarting when an end time changes and
/// dropping countdowns for items that left the collection.
fn sync_countdowns(
    countdowns: &mut HashMap<String, Countdown>,
    items: &[Item],
    clock: &Arc<ClockSync>,
) {
    for item in items {
        match countdowns.get_mut(&item.id) {
            Some(countdown) if countdown.end_time_ms() == item.end_time => {}
            Some(countdown) => countdown.restart(item.end_time, Arc::clone(clock)),
            None => {
                countdowns.insert(item.id.clone(), Countdown::start(item.end_time, Arc::clone(clock)));
            }
        }
    }
    countdowns.retain(|id, _| items.iter().any(|item| item.id == *id));
}

fn render(
    items: &[Item],
    countdowns: &HashMap<String, Countdown>,
    clock: &Arc<ClockSync>,
    identity: &str,
) {
    let server_time = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(clock.now_ms())
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());

    println!();
    println!("LIVE AUCTION  [server time {server_time}]  bidding as {identity}");

    if items.is_empty() {
        println!("  (no auction items)");
        return;
    }

    for item in items {
        let timer = countdowns
            .get(&item.id)
            .map(|c| c.view())
            .map(|view| {
                if view.is_critical && !view.is_expired {
                    format!("{} !!", view.display)
                } else if view.is_warning && !view.is_expired {
                    format!("{} !", view.display)
                } else {
                    view.display
                }
            })
            .unwrap_or_else(|| "-".to_string());

        let marker = if item.highest_bidder.as_deref() == Some(identity) {
            "  <- winning"
        } else {
            ""
        };

        println!(
            "  [{timer:>8}] {:<28} ${:<8} {:>3} bids{marker}",
            item.title, item.current_bid, item.bid_count
        );
    }
}
