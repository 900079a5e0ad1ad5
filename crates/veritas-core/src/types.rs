use serde::{Deserialize, Serialize};
use std::fmt;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

// ── HashId ───────────────────────────────────────────────────────────────────

/// Opaque 32-byte content identifier. Equality and hashing are defined over
/// the raw bytes; no total order is required by the design, but `Ord` is
/// derived anyway so ids can live in sorted sets (lockedToRevoke/lockedToCreate)
/// without pulling in a second collection type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HashId(pub [u8; 32]);

impl HashId {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive an id from content by BLAKE3-hashing it. Used by tests and by
    /// embedders who don't have their own content-addressing scheme yet.
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes[..32]);
        Ok(Self(arr))
    }
}

impl fmt::Display for HashId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for HashId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashId({}…)", &self.to_hex()[..12])
    }
}

// ── NodeInfo ─────────────────────────────────────────────────────────────────

/// Peer identity. Equality and hashing are by `id` alone — the same peer
/// seen at two different addresses is still one peer for quorum purposes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: HashId,
    pub address: String,
}

impl NodeInfo {
    pub fn new(id: HashId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }
}

impl PartialEq for NodeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for NodeInfo {}

impl std::hash::Hash for NodeInfo {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// ── ItemState ────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ItemState {
    Pending,
    PendingPositive,
    PendingNegative,
    Approved,
    Declined,
    Revoked,
    LockedForCreation,
    Undefined,
    Discarded,
}

impl ItemState {
    /// A state is positive iff PENDING_POSITIVE or APPROVED; everything
    /// else is negative for tallying purposes.
    pub fn is_positive(&self) -> bool {
        matches!(self, ItemState::PendingPositive | ItemState::Approved)
    }
}

// ── ItemResult ───────────────────────────────────────────────────────────────

/// Snapshot returned to clients and peers. `UNDEFINED` and `DISCARDED` are
/// distinguished constants rather than a shared "unknown" bucket, since a
/// caller needs to tell "this id was never seen" apart from "this id was
/// rejected outright for being too old."
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemResult {
    pub state: ItemState,
    pub expires_at: Timestamp,
    pub have_copy: bool,
}

impl ItemResult {
    pub const fn undefined() -> Self {
        Self {
            state: ItemState::Undefined,
            expires_at: 0,
            have_copy: false,
        }
    }

    pub const fn discarded() -> Self {
        Self {
            state: ItemState::Discarded,
            expires_at: 0,
            have_copy: false,
        }
    }
}
