use serde::{Deserialize, Serialize};

use veritas_core::{HashId, Item, ItemResult, ItemState, Timestamp};

/// Wire shape of an item submitted via `registerItem`. Ids and references
/// travel as hex strings and the payload as a hex-encoded byte string —
/// `jsonrpsee` speaks JSON, which has no native byte-string type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcItem {
    pub id: String,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub revokes: Vec<String>,
    #[serde(default)]
    pub new_items: Vec<RpcItem>,
    #[serde(default)]
    pub payload: String,
}

/// Error converting an [`RpcItem`] into the engine's [`Item`] — always a
/// malformed hex field, never a consensus outcome.
#[derive(Debug, thiserror::Error)]
pub enum RpcItemError {
    #[error("invalid hex in field `{field}`: {source}")]
    BadHex {
        field: &'static str,
        #[source]
        source: hex::FromHexError,
    },
}

impl RpcItem {
    pub fn into_item(self) -> Result<Item, RpcItemError> {
        let id = HashId::from_hex(&self.id).map_err(|e| RpcItemError::BadHex {
            field: "id",
            source: e,
        })?;

        let mut references = Vec::with_capacity(self.references.len());
        for r in &self.references {
            references.push(HashId::from_hex(r).map_err(|e| RpcItemError::BadHex {
                field: "references",
                source: e,
            })?);
        }

        let mut revokes = Vec::with_capacity(self.revokes.len());
        for r in &self.revokes {
            revokes.push(HashId::from_hex(r).map_err(|e| RpcItemError::BadHex {
                field: "revokes",
                source: e,
            })?);
        }

        let mut new_items = Vec::with_capacity(self.new_items.len());
        for child in self.new_items {
            new_items.push(child.into_item()?);
        }

        let payload = hex::decode(&self.payload).map_err(|e| RpcItemError::BadHex {
            field: "payload",
            source: e,
        })?;

        Ok(Item::new(id, self.created_at, self.expires_at)
            .with_references(references)
            .with_revokes(revokes)
            .with_new_items(new_items)
            .with_payload(payload))
    }
}

fn state_str(state: ItemState) -> &'static str {
    match state {
        ItemState::Pending => "PENDING",
        ItemState::PendingPositive => "PENDING_POSITIVE",
        ItemState::PendingNegative => "PENDING_NEGATIVE",
        ItemState::Approved => "APPROVED",
        ItemState::Declined => "DECLINED",
        ItemState::Revoked => "REVOKED",
        ItemState::LockedForCreation => "LOCKED_FOR_CREATION",
        ItemState::Undefined => "UNDEFINED",
        ItemState::Discarded => "DISCARDED",
    }
}

/// Wire shape of an [`ItemResult`]. `state` is rendered as the upper-snake
/// name rather than serde's default enum tagging, matching how peers and
/// clients refer to states in logs and documentation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcItemResult {
    pub state: String,
    pub expires_at: Timestamp,
    pub have_copy: bool,
}

impl From<ItemResult> for RpcItemResult {
    fn from(r: ItemResult) -> Self {
        Self {
            state: state_str(r.state).to_string(),
            expires_at: r.expires_at,
            have_copy: r.have_copy,
        }
    }
}
