use thiserror::Error;

/// Errors accumulated on an item during local validation. These are never
/// raised — they are pushed onto `Item::errors` and flip the local vote to
/// negative, but processing continues (see `ItemProcessor::local_check`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ItemError {
    #[error("item created too long ago")]
    Expired,

    #[error("referenced item is not approved")]
    BadRef,

    #[error("revoked item could not be locked")]
    BadRevoke,

    #[error("new item failed its own check")]
    BadNewItem,

    #[error("new item's identifier already has a ledger record")]
    NewItemExists,
}

/// Ledger, storage, and transport failures. Unlike `ItemError`, these are
/// returned via `Result` and propagated with `?`. Most are non-fatal to the
/// caller (a download timeout triggers a reschedule); `LedgerTransaction`
/// failures during commit/rollback are fatal to the owning processor, per
/// the error handling design.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("ledger transaction failed: {0}")]
    LedgerTransaction(String),

    #[error("remote fetch from peer timed out")]
    FetchTimeout,

    #[error("remote fetch from peer failed: {0}")]
    Transport(String),

    #[error("{0}")]
    Other(String),
}

impl From<sled::Error> for EngineError {
    fn from(e: sled::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}

impl From<bincode::Error> for EngineError {
    fn from(e: bincode::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}
