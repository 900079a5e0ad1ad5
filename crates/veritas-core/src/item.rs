use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ItemError;
use crate::types::{HashId, Timestamp};

/// A transactional object that may reference, revoke, and create other
/// items, subject to consensus. Items are value-like but may accumulate
/// errors during processing — `errors` starts empty and is only ever
/// appended to by the processor that owns this item's consensus round.
///
/// Items are plain, wire-serializable data: the self-validation predicate
/// described by the data model (`check()`) is deliberately *not* a method
/// on this type, since a method can't cross `bincode` wire boundaries or be
/// swapped per deployment. It is instead an injected `ItemChecker`
/// collaborator — see below.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Item {
    pub id: HashId,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub references: BTreeSet<HashId>,
    pub revokes: BTreeSet<HashId>,
    pub new_items: Vec<Item>,
    pub errors: Vec<ItemError>,
    /// Opaque application payload. Its meaning is out of scope for the
    /// consensus engine; `ItemChecker` implementations interpret it.
    pub payload: Vec<u8>,
}

impl Item {
    pub fn new(id: HashId, created_at: Timestamp, expires_at: Timestamp) -> Self {
        Self {
            id,
            created_at,
            expires_at,
            references: BTreeSet::new(),
            revokes: BTreeSet::new(),
            new_items: Vec::new(),
            errors: Vec::new(),
            payload: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_references(mut self, refs: impl IntoIterator<Item = HashId>) -> Self {
        self.references = refs.into_iter().collect();
        self
    }

    pub fn with_revokes(mut self, revokes: impl IntoIterator<Item = HashId>) -> Self {
        self.revokes = revokes.into_iter().collect();
        self
    }

    pub fn with_new_items(mut self, items: impl IntoIterator<Item = Item>) -> Self {
        self.new_items = items.into_iter().collect();
        self
    }

    pub fn is_valid_so_far(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push_error(&mut self, err: ItemError) {
        self.errors.push(err);
    }
}

/// Pluggable, black-box item validation. Cryptographic and application-level
/// checks live behind this trait — the consensus engine only ever calls
/// `check`, never inspects `payload` itself.
pub trait ItemChecker: fmt::Debug + Send + Sync {
    /// Validate `item` in place, pushing any `ItemError`s found onto
    /// `item.errors`. Returns `true` iff no errors were pushed.
    fn check(&self, item: &mut Item) -> bool;
}

/// A checker that accepts everything. Used by tests and by embedders who
/// have not yet wired in real validation.
#[derive(Debug, Default)]
pub struct AlwaysValidChecker;

impl ItemChecker for AlwaysValidChecker {
    fn check(&self, _item: &mut Item) -> bool {
        true
    }
}
