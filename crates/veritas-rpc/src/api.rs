use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

use crate::types::{RpcItem, RpcItemResult};

/// Client-facing JSON-RPC 2.0 API. All method names are prefixed with
/// "veritas_" via `namespace = "veritas"`.
#[rpc(server, client, namespace = "veritas")]
pub trait VeritasApi {
    /// Submit an item for consensus. Returns the item's current result —
    /// `PENDING` for a freshly started round, a terminal state if the
    /// ledger already had a final record for this id, or `DISCARDED` if
    /// the item was created too long ago to be considered.
    #[method(name = "registerItem")]
    async fn register_item(&self, item: RpcItem) -> RpcResult<RpcItemResult>;

    /// Look up the current result for `id` without starting a round.
    /// Returns `UNDEFINED` for an id this node has never seen.
    #[method(name = "checkItem")]
    async fn check_item(&self, id: String) -> RpcResult<RpcItemResult>;

    /// Block up to `timeout_secs` for `id`'s consensus round to finish,
    /// then return whatever result is current. Intended for tests and
    /// operational tooling, not the normal client submission path.
    #[method(name = "waitItem")]
    async fn wait_item(&self, id: String, timeout_secs: u64) -> RpcResult<RpcItemResult>;
}
