pub mod config;
pub mod error;
pub mod item;
pub mod types;

pub use config::Config;
pub use error::{EngineError, ItemError};
pub use item::{AlwaysValidChecker, Item, ItemChecker};
pub use types::{HashId, ItemResult, ItemState, NodeInfo, Timestamp};
