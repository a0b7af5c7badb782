// Local item collection: the authoritative-as-known view of every auction
// lot, mutated only by the reconciliation task.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::protocol::{BidUpdatePayload, Item};

/// The bid-bearing fields merged into an item by an `UPDATE_BID` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidPatch {
    pub current_bid: u64,
    pub highest_bidder: Option<String>,
    pub bid_count: u32,
}

impl From<&BidUpdatePayload> for BidPatch {
    fn from(payload: &BidUpdatePayload) -> Self {
        BidPatch {
            current_bid: payload.current_bid,
            highest_bidder: payload.highest_bidder.clone(),
            bid_count: payload.bid_count,
        }
    }
}

/// The before/after state of one patched item, captured atomically with the
/// mutation so callers can diff without re-reading the store.
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub previous: Item,
    pub current: Item,
}

/// The before/after snapshots of a full-collection replace.
#[derive(Debug, Clone)]
pub struct ReplaceOutcome {
    pub previous: Vec<Item>,
    pub current: Vec<Item>,
}

/// Single-writer collection of auction items keyed by id.
#[derive(Debug, Default)]
pub struct StateStore {
    items: HashMap<String, Item>,
}

impl StateStore {
    pub fn new() -> Self {
        StateStore::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, item_id: &str) -> Option<&Item> {
        self.items.get(item_id)
    }

    /// Replace the entire collection (initial load and bulk resync). No
    /// diffing is performed; the caller receives both snapshots.
    pub fn replace_all(&mut self, items: Vec<Item>) -> ReplaceOutcome {
        let previous = self.snapshot();
        self.items = items.into_iter().map(|item| (item.id.clone(), item)).collect();
        debug!("collection replaced: {} items", self.items.len());
        ReplaceOutcome {
            previous,
            current: self.snapshot(),
        }
    }

    /// Merge the patch into the matching item and return its before/after
    /// state. An unknown id is a logged no-op: the server may broadcast
    /// updates for items this client has not loaded yet.
    pub fn apply_patch(&mut self, item_id: &str, patch: &BidPatch) -> Option<PatchOutcome> {
        let Some(item) = self.items.get_mut(item_id) else {
            warn!("ignoring bid update for unknown item {item_id}");
            return None;
        };

        let previous = item.clone();
        item.current_bid = patch.current_bid;
        item.highest_bidder = patch.highest_bidder.clone();
        item.bid_count = patch.bid_count;

        Some(PatchOutcome {
            previous,
            current: item.clone(),
        })
    }

    /// A value snapshot of the collection, ordered by end time (soonest
    /// first) with the id as a tie-breaker, so renders are deterministic.
    pub fn snapshot(&self) -> Vec<Item> {
        let mut items: Vec<Item> = self.items.values().cloned().collect();
        items.sort_by(|a, b| a.end_time.cmp(&b.end_time).then_with(|| a.id.cmp(&b.id)));
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, current_bid: u64, bidder: Option<&str>, end_time: i64) -> Item {
        Item {
            id: id.to_string(),
            title: format!("Item {id}"),
            description: String::new(),
            category: "Test".to_string(),
            image_url: String::new(),
            current_bid,
            highest_bidder: bidder.map(str::to_string),
            bid_count: 0,
            end_time,
        }
    }

    fn patch(current_bid: u64, bidder: &str, bid_count: u32) -> BidPatch {
        BidPatch {
            current_bid,
            highest_bidder: Some(bidder.to_string()),
            bid_count,
        }
    }

    #[test]
    fn replace_all_swaps_the_collection_and_reports_both_states() {
        let mut store = StateStore::new();
        store.replace_all(vec![item("a", 100, None, 10)]);

        let outcome = store.replace_all(vec![item("b", 200, None, 20), item("c", 300, None, 5)]);

        assert_eq!(outcome.previous.len(), 1);
        assert_eq!(outcome.previous[0].id, "a");
        assert_eq!(outcome.current.len(), 2);
        assert_eq!(store.len(), 2);
        assert!(store.get("a").is_none());
    }

    #[test]
    fn last_patch_wins_per_item() {
        let mut store = StateStore::new();
        store.replace_all(vec![item("a", 100, None, 10)]);

        store.apply_patch("a", &patch(110, "alice", 1));
        store.apply_patch("a", &patch(120, "bob", 2));
        store.apply_patch("a", &patch(130, "carol", 3));

        let current = store.get("a").unwrap();
        assert_eq!(current.current_bid, 130);
        assert_eq!(current.highest_bidder.as_deref(), Some("carol"));
        assert_eq!(current.bid_count, 3);
    }

    #[test]
    fn patch_returns_pre_mutation_state() {
        let mut store = StateStore::new();
        store.replace_all(vec![item("a", 100, Some("alice"), 10)]);

        let outcome = store.apply_patch("a", &patch(110, "bob", 1)).unwrap();

        assert_eq!(outcome.previous.current_bid, 100);
        assert_eq!(outcome.previous.highest_bidder.as_deref(), Some("alice"));
        assert_eq!(outcome.current.current_bid, 110);
        assert_eq!(outcome.current.highest_bidder.as_deref(), Some("bob"));
    }

    #[test]
    fn patch_preserves_display_metadata() {
        let mut store = StateStore::new();
        store.replace_all(vec![item("a", 100, None, 10)]);

        store.apply_patch("a", &patch(110, "bob", 1));

        let current = store.get("a").unwrap();
        assert_eq!(current.title, "Item a");
        assert_eq!(current.category, "Test");
        assert_eq!(current.end_time, 10);
    }

    #[test]
    fn unknown_item_is_a_no_op() {
        let mut store = StateStore::new();
        store.replace_all(vec![item("a", 100, None, 10)]);

        let outcome = store.apply_patch("missing", &patch(110, "bob", 1));

        assert!(outcome.is_none());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap().current_bid, 100);
    }

    #[test]
    fn snapshot_orders_by_end_time_then_id() {
        let mut store = StateStore::new();
        store.replace_all(vec![
            item("z", 1, None, 20),
            item("a", 1, None, 20),
            item("m", 1, None, 5),
        ]);

        let snapshot = store.snapshot();
        let ids: Vec<&str> = snapshot.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["m", "a", "z"]);
    }
}
