pub mod record;
pub mod sled_ledger;

pub use record::StateRecordData;
pub use sled_ledger::SledLedger;

use veritas_core::{EngineError, HashId, Timestamp};

/// Persistent store of state records: lookup, conditional locking, atomic
/// multi-record transactions, and plain save/destroy. Implementations must
/// give `lock_to_revoke`/`create_output_lock_record` compare-and-set
/// semantics — the whole safety of concurrent consensus across processors
/// rests on these two calls, not on anything the engine crate does itself.
pub trait Ledger: Send + Sync {
    fn get_record(&self, id: &HashId) -> Result<Option<StateRecordData>, EngineError>;

    /// Creates a record in PENDING if absent; returns the existing record
    /// otherwise.
    fn find_or_create(&self, id: &HashId, now: Timestamp) -> Result<StateRecordData, EngineError>;

    /// True iff a record exists and its state is exactly APPROVED —
    /// `LOCKED_FOR_CREATION` is a provisional placeholder, not an approved
    /// dependency other items may reference.
    fn is_approved(&self, id: &HashId) -> Result<bool, EngineError>;

    /// Succeeds only if `id`'s record is currently APPROVED and not already
    /// locked by a different owner; returns the locked record or `None`.
    fn lock_to_revoke(
        &self,
        id: &HashId,
        owner: HashId,
    ) -> Result<Option<StateRecordData>, EngineError>;

    /// Succeeds only if no record for `id` exists; creates one in
    /// LOCKED_FOR_CREATION owned by `owner`.
    fn create_output_lock_record(
        &self,
        id: &HashId,
        owner: HashId,
        now: Timestamp,
    ) -> Result<Option<StateRecordData>, EngineError>;

    fn save(&self, record: &StateRecordData) -> Result<(), EngineError>;

    /// Release a conditional reservation taken by `lock_to_revoke` or
    /// `create_output_lock_record`. A revoke-lock is cleared back to
    /// unlocked APPROVED; a create-lock (whose record only ever existed as
    /// a placeholder) is destroyed outright.
    fn unlock(&self, id: &HashId) -> Result<(), EngineError>;

    fn destroy(&self, id: &HashId) -> Result<(), EngineError>;

    /// Run `f` atomically with respect to every other call to `transaction`
    /// on this ledger. `f` receives a transactional handle with the same
    /// shape as the methods above.
    fn transaction(
        &self,
        f: &mut dyn FnMut(&mut dyn LedgerTxn) -> Result<(), EngineError>,
    ) -> Result<(), EngineError>;
}

/// The subset of `Ledger` operations available inside a `transaction`
/// closure. Kept as a separate trait (rather than reusing `Ledger`) so the
/// closure signature doesn't imply nested transactions are possible.
pub trait LedgerTxn {
    fn find_or_create(&mut self, id: &HashId, now: Timestamp) -> Result<StateRecordData, EngineError>;
    fn save(&mut self, record: &StateRecordData) -> Result<(), EngineError>;
    fn unlock(&mut self, id: &HashId) -> Result<(), EngineError>;
}
