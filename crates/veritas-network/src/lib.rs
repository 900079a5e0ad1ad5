//! `libp2p`-backed transport implementing `veritas_engine::Network`.
//!
//! `gossipsub` broadcasts item notifications to every subscribed peer.
//! A `request_response` protocol carries unicast notifications and remote
//! `getItem` fetches. `identify` and `ping` handle peer address exchange
//! and liveness. Peer discovery is static bootstrap-dialing — no DHT.

mod behaviour;
pub mod config;
mod protocol;
mod network;

pub use config::P2pConfig;
pub use network::{GossipNetwork, GossipNetworkDriver};
pub use protocol::{VeritasRequest, VeritasResponse};
