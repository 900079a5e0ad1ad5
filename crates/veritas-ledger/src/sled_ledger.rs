use std::cell::RefCell;
use std::path::Path;

use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use tracing::info;

use veritas_core::{EngineError, HashId, ItemState, Timestamp};

use crate::record::StateRecordData;
use crate::{Ledger, LedgerTxn};

/// `sled`-backed `Ledger`. A single `records` tree holds every
/// `StateRecordData`, keyed by the id's raw bytes — one tree rather than
/// one per state is what lets `transaction` give true cross-key atomicity
/// via `sled::Tree::transaction` without a hand-rolled global mutex.
pub struct SledLedger {
    #[allow(dead_code)]
    db: sled::Db,
    records: sled::Tree,
}

impl SledLedger {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let db = sled::open(path)?;
        let records = db.open_tree("records")?;
        Ok(Self { db, records })
    }

    pub fn flush(&self) -> Result<(), EngineError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

// ── shared logic, usable both standalone and inside a cross-key transaction ──

fn tx_get(
    tree: &TransactionalTree,
    id: &HashId,
) -> Result<Option<StateRecordData>, ConflictableTransactionError<EngineError>> {
    match tree.get(id.as_bytes())? {
        Some(bytes) => {
            let rec = bincode::deserialize(&bytes)
                .map_err(|e| ConflictableTransactionError::Abort(EngineError::from(e)))?;
            Ok(Some(rec))
        }
        None => Ok(None),
    }
}

fn tx_save(
    tree: &TransactionalTree,
    record: &StateRecordData,
) -> Result<(), ConflictableTransactionError<EngineError>> {
    let bytes = bincode::serialize(record)
        .map_err(|e| ConflictableTransactionError::Abort(EngineError::from(e)))?;
    tree.insert(record.id.as_bytes(), bytes)?;
    Ok(())
}

fn tx_find_or_create(
    tree: &TransactionalTree,
    id: &HashId,
    now: Timestamp,
) -> Result<StateRecordData, ConflictableTransactionError<EngineError>> {
    match tx_get(tree, id)? {
        Some(rec) => Ok(rec),
        None => {
            let rec = StateRecordData::pending(*id, now);
            tx_save(tree, &rec)?;
            Ok(rec)
        }
    }
}

fn tx_unlock(
    tree: &TransactionalTree,
    id: &HashId,
) -> Result<(), ConflictableTransactionError<EngineError>> {
    if let Some(mut rec) = tx_get(tree, id)? {
        if rec.state == ItemState::LockedForCreation {
            tree.remove(id.as_bytes())?;
        } else {
            rec.locked_by = None;
            tx_save(tree, &rec)?;
        }
    }
    Ok(())
}

fn map_txn_error(e: TransactionError<EngineError>) -> EngineError {
    match e {
        TransactionError::Abort(inner) => inner,
        TransactionError::Storage(s) => EngineError::from(s),
    }
}

impl Ledger for SledLedger {
    fn get_record(&self, id: &HashId) -> Result<Option<StateRecordData>, EngineError> {
        match self.records.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn find_or_create(&self, id: &HashId, now: Timestamp) -> Result<StateRecordData, EngineError> {
        self.records
            .transaction(|tree| Ok(tx_find_or_create(tree, id, now)?))
            .map_err(map_txn_error)
    }

    fn is_approved(&self, id: &HashId) -> Result<bool, EngineError> {
        Ok(self
            .get_record(id)?
            .is_some_and(|r| r.state == ItemState::Approved))
    }

    fn lock_to_revoke(
        &self,
        id: &HashId,
        owner: HashId,
    ) -> Result<Option<StateRecordData>, EngineError> {
        self.records
            .transaction(move |tree| {
                let Some(mut rec) = tx_get(tree, id)? else {
                    return Ok(None);
                };
                if rec.state != ItemState::Approved || rec.is_locked() {
                    return Ok(None);
                }
                rec.locked_by = Some(owner);
                tx_save(tree, &rec)?;
                Ok(Some(rec))
            })
            .map_err(map_txn_error)
    }

    fn create_output_lock_record(
        &self,
        id: &HashId,
        owner: HashId,
        now: Timestamp,
    ) -> Result<Option<StateRecordData>, EngineError> {
        self.records
            .transaction(move |tree| {
                if tx_get(tree, id)?.is_some() {
                    return Ok(None);
                }
                let rec = StateRecordData {
                    id: *id,
                    state: ItemState::LockedForCreation,
                    expires_at: now,
                    locked_by: Some(owner),
                };
                tx_save(tree, &rec)?;
                Ok(Some(rec))
            })
            .map_err(map_txn_error)
    }

    fn save(&self, record: &StateRecordData) -> Result<(), EngineError> {
        let bytes = bincode::serialize(record)?;
        self.records.insert(record.id.as_bytes(), bytes)?;
        Ok(())
    }

    fn unlock(&self, id: &HashId) -> Result<(), EngineError> {
        self.records
            .transaction(move |tree| tx_unlock(tree, id))
            .map_err(map_txn_error)
    }

    fn destroy(&self, id: &HashId) -> Result<(), EngineError> {
        self.records.remove(id.as_bytes())?;
        Ok(())
    }

    fn transaction(
        &self,
        f: &mut dyn FnMut(&mut dyn LedgerTxn) -> Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        let cell = RefCell::new(f);
        let result = self.records.transaction(|tree| {
            let mut handle = SledTxnHandle { tree };
            let mut f_ref = cell.borrow_mut();
            (f_ref)(&mut handle).map_err(ConflictableTransactionError::Abort)
        });
        result.map_err(map_txn_error)?;
        info!("ledger transaction committed");
        Ok(())
    }
}

/// `LedgerTxn` handle used inside `SledLedger::transaction`'s closure.
struct SledTxnHandle<'a> {
    tree: &'a TransactionalTree<'a>,
}

impl<'a> LedgerTxn for SledTxnHandle<'a> {
    fn find_or_create(
        &mut self,
        id: &HashId,
        now: Timestamp,
    ) -> Result<StateRecordData, EngineError> {
        tx_find_or_create(self.tree, id, now)
            .map_err(|e| map_txn_error(TransactionError::from(e)))
    }

    fn save(&mut self, record: &StateRecordData) -> Result<(), EngineError> {
        tx_save(self.tree, record).map_err(|e| map_txn_error(TransactionError::from(e)))
    }

    fn unlock(&mut self, id: &HashId) -> Result<(), EngineError> {
        tx_unlock(self.tree, id).map_err(|e| map_txn_error(TransactionError::from(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_ledger() -> (SledLedger, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SledLedger::open(dir.path()).unwrap();
        (ledger, dir)
    }

    fn approved(id: HashId, now: Timestamp) -> StateRecordData {
        StateRecordData {
            id,
            state: ItemState::Approved,
            expires_at: now + 1000,
            locked_by: None,
        }
    }

    #[test]
    fn find_or_create_is_idempotent() {
        let (ledger, _dir) = temp_ledger();
        let id = HashId::of(b"item-1");
        let first = ledger.find_or_create(&id, 100).unwrap();
        assert_eq!(first.state, ItemState::Pending);
        ledger
            .save(&StateRecordData {
                state: ItemState::Approved,
                ..first.clone()
            })
            .unwrap();
        let second = ledger.find_or_create(&id, 200).unwrap();
        assert_eq!(second.state, ItemState::Approved);
    }

    #[test]
    fn is_approved_excludes_locked_for_creation() {
        let (ledger, _dir) = temp_ledger();
        let id = HashId::of(b"item-2");
        let owner = HashId::of(b"owner");
        ledger.create_output_lock_record(&id, owner, 0).unwrap();
        assert!(!ledger.is_approved(&id).unwrap());
    }

    #[test]
    fn lock_to_revoke_rejects_double_lock() {
        let (ledger, _dir) = temp_ledger();
        let id = HashId::of(b"item-3");
        ledger.save(&approved(id, 0)).unwrap();

        let owner_a = HashId::of(b"owner-a");
        let owner_b = HashId::of(b"owner-b");

        let locked = ledger.lock_to_revoke(&id, owner_a).unwrap();
        assert!(locked.is_some());

        let second = ledger.lock_to_revoke(&id, owner_b).unwrap();
        assert!(second.is_none(), "second revoke lock must fail");
    }

    #[test]
    fn unlock_revoke_lock_restores_approved_unlocked() {
        let (ledger, _dir) = temp_ledger();
        let id = HashId::of(b"item-4");
        ledger.save(&approved(id, 0)).unwrap();
        ledger.lock_to_revoke(&id, HashId::of(b"owner")).unwrap();

        ledger.unlock(&id).unwrap();

        let rec = ledger.get_record(&id).unwrap().unwrap();
        assert_eq!(rec.state, ItemState::Approved);
        assert!(!rec.is_locked());
    }

    #[test]
    fn unlock_create_lock_destroys_record() {
        let (ledger, _dir) = temp_ledger();
        let id = HashId::of(b"item-5");
        ledger
            .create_output_lock_record(&id, HashId::of(b"owner"), 0)
            .unwrap();

        ledger.unlock(&id).unwrap();

        assert!(ledger.get_record(&id).unwrap().is_none());
    }

    #[test]
    fn cross_key_transaction_is_atomic() {
        let (ledger, _dir) = temp_ledger();
        let revoked = HashId::of(b"revoked");
        let created = HashId::of(b"created");
        ledger.save(&approved(revoked, 0)).unwrap();

        ledger
            .transaction(&mut |txn| {
                let mut r = txn.find_or_create(&revoked, 0)?;
                r.set_state(ItemState::Revoked);
                txn.save(&r)?;
                let mut c = txn.find_or_create(&created, 0)?;
                c.set_state(ItemState::Approved);
                txn.save(&c)?;
                Ok(())
            })
            .unwrap();

        assert_eq!(
            ledger.get_record(&revoked).unwrap().unwrap().state,
            ItemState::Revoked
        );
        assert_eq!(
            ledger.get_record(&created).unwrap().unwrap().state,
            ItemState::Approved
        );
    }
}
