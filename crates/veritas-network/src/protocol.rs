use serde::{Deserialize, Serialize};

use veritas_core::{HashId, Item};
use veritas_engine::ItemNotification;

/// Requests exchanged over the `/veritas/items/1` `request_response`
/// protocol. `Notify` is how `deliver` reaches a single peer — gossipsub
/// has no per-peer unicast, so unicast notifications (replies to a
/// `requestAnswer` poll, the reply to an inbound notification) go out this
/// way instead; broadcast still uses gossipsub. `GetItem` is the remote
/// fetch a downloader issues for a body it doesn't hold.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum VeritasRequest {
    Notify(ItemNotification),
    GetItem(HashId),
}

/// Responses to [`VeritasRequest`]. `Notify` is fire-and-forget from the
/// caller's point of view — `Ack` only completes the protocol exchange, the
/// engine never waits on it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum VeritasResponse {
    Ack,
    Item(Option<Item>),
}
