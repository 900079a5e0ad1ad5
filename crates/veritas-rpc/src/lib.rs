//! Client-facing JSON-RPC 2.0 server.
//!
//! Namespace: "veritas"
//! Methods:
//!   veritas_registerItem — submit an item for consensus
//!   veritas_checkItem    — look up an item's current result
//!   veritas_waitItem     — block until an item's round finishes

pub mod api;
pub mod server;
pub mod types;

pub use api::{VeritasApiClient, VeritasApiServer};
pub use server::{RpcServer, RpcServerState};
pub use types::{RpcItem, RpcItemError, RpcItemResult};
