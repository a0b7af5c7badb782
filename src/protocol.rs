// Wire protocol: message types exchanged with the auction server.
//
// Every frame on the persistent connection is a JSON text message shaped
// `{"type": "<NAME>", "payload": {...}}` with camelCase payload fields.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Auction items
// ---------------------------------------------------------------------------

/// One auction lot, as known from the authoritative server.
///
/// Display metadata (`title`, `description`, `category`, `image_url`) is
/// immutable after creation; `current_bid` and `bid_count` only ever move
/// upward, and only under server updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub image_url: String,
    /// Current high bid in whole currency units.
    pub current_bid: u64,
    /// Identity of the current leading bidder, if any.
    #[serde(default)]
    pub highest_bidder: Option<String>,
    #[serde(default)]
    pub bid_count: u32,
    /// Auction close time as epoch milliseconds in authoritative time.
    pub end_time: i64,
}

// ---------------------------------------------------------------------------
// Inbound messages (server -> client)
// ---------------------------------------------------------------------------

/// A parsed inbound frame from the auction server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    /// Authoritative clock sample, re-sent after every (re)connect.
    #[serde(rename = "SERVER_TIME")]
    ServerTime(ServerTimePayload),
    /// A bid was accepted somewhere; carries the updated item fields.
    #[serde(rename = "UPDATE_BID")]
    UpdateBid(BidUpdatePayload),
    /// A bid submitted from this connection was rejected.
    #[serde(rename = "BID_ERROR")]
    BidError(BidErrorPayload),
    /// Acknowledgement of a bid submitted from this connection.
    #[serde(rename = "BID_SUCCESS")]
    BidSuccess(BidSuccessPayload),
    /// Full collection replace, used for initial load and bulk resync.
    #[serde(rename = "ITEMS_UPDATED")]
    ItemsUpdated(ItemsPayload),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTimePayload {
    /// Server wall clock as epoch milliseconds.
    pub server_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidUpdatePayload {
    pub item_id: String,
    pub current_bid: u64,
    #[serde(default)]
    pub highest_bidder: Option<String>,
    #[serde(default)]
    pub bid_count: u32,
}

/// Rejection payload. `error` is a server-defined reason code; unknown codes
/// must still resolve to a user-facing notification (see the reconciler's
/// total mapping), so both fields are optional here.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidErrorPayload {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidSuccessPayload {
    pub item_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsPayload {
    #[serde(default)]
    pub items: Vec<Item>,
}

/// Well-known rejection reason codes. Anything else falls through to the
/// generic rejection notification.
pub const REASON_BID_TOO_LOW: &str = "BID_TOO_LOW";
pub const REASON_AUCTION_ENDED: &str = "AUCTION_ENDED";

// ---------------------------------------------------------------------------
// Outbound messages (client -> server)
// ---------------------------------------------------------------------------

/// An outbound command frame. Fire-and-forget: the outcome (if any) arrives
/// later as an independent `BID_ERROR`/`BID_SUCCESS`/`UPDATE_BID` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientCommand {
    #[serde(rename = "BID_PLACED")]
    #[serde(rename_all = "camelCase")]
    BidPlaced {
        item_id: String,
        bid_amount: u64,
        user_id: String,
    },
}
