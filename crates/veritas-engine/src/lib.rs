pub mod event;
pub mod item_cache;
pub mod item_lock;
pub mod network;
pub mod node;
pub mod processor;
pub mod vote_tally;

pub use event::OnceEvent;
pub use item_cache::ItemCache;
pub use item_lock::ItemLock;
pub use network::{ItemNotification, ItemSource, LoopbackHub, LoopbackNetwork, Network, NotificationCodec, NotificationHandler};
pub use node::Node;
pub use processor::ItemProcessor;
pub use vote_tally::{Consensus, VoteTally};
