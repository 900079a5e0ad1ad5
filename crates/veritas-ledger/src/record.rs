use serde::{Deserialize, Serialize};

use veritas_core::{HashId, ItemState, Timestamp};

/// Persistent row owned by the Ledger, keyed by `HashId`. Carries the
/// fields the distilled spec's `StateRecord` describes; the small
/// `set_state`/`set_expires_at` helpers mirror its mutator methods, with
/// `save`/`destroy`/`unlock`/the conditional locking operations living on
/// `Ledger` instead (a plain value has no business reaching back into the
/// store that owns it).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateRecordData {
    pub id: HashId,
    pub state: ItemState,
    pub expires_at: Timestamp,
    /// The item id that currently holds a conditional lock on this record,
    /// if any (set by `lock_to_revoke`/`create_output_lock_record`).
    pub locked_by: Option<HashId>,
}

impl StateRecordData {
    pub fn pending(id: HashId, now: Timestamp) -> Self {
        Self {
            id,
            state: ItemState::Pending,
            expires_at: now,
            locked_by: None,
        }
    }

    pub fn set_state(&mut self, state: ItemState) {
        self.state = state;
    }

    pub fn set_expires_at(&mut self, expires_at: Timestamp) {
        self.expires_at = expires_at;
    }

    pub fn is_locked(&self) -> bool {
        self.locked_by.is_some()
    }
}
