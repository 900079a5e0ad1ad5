use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use veritas_core::HashId;
use veritas_engine::Node;

use crate::api::VeritasApiServer;
use crate::types::{RpcItem, RpcItemResult};

fn rpc_err(code: i32, msg: impl Into<String>) -> ErrorObject<'static> {
    ErrorObject::owned(code, msg.into(), None::<()>)
}

fn parse_id(id: &str) -> RpcResult<HashId> {
    HashId::from_hex(id).map_err(|e| rpc_err(-32602, format!("invalid item id: {e}")))
}

/// Shared state passed to the RPC server — just the node, since every
/// method is a thin pass-through onto it.
pub struct RpcServerState {
    pub node: Arc<Node>,
}

/// The RPC server implementation.
pub struct RpcServer {
    state: Arc<RpcServerState>,
}

impl RpcServer {
    pub fn new(state: Arc<RpcServerState>) -> Self {
        Self { state }
    }

    /// Start the JSON-RPC server on `addr` with permissive CORS headers.
    /// Returns a handle to stop it.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<ServerHandle> {
        let cors = CorsLayer::new()
            .allow_methods(Any)
            .allow_origin(Any)
            .allow_headers(Any);

        let server = Server::builder()
            .set_http_middleware(tower::ServiceBuilder::new().layer(cors))
            .build(addr)
            .await?;

        let module = self.into_rpc();
        let handle = server.start(module);
        info!(%addr, "RPC server started");
        Ok(handle)
    }
}

#[async_trait]
impl VeritasApiServer for RpcServer {
    async fn register_item(&self, item: RpcItem) -> RpcResult<RpcItemResult> {
        let item = item
            .into_item()
            .map_err(|e| rpc_err(-32602, e.to_string()))?;
        let result = self.state.node.register_item(item).await;
        Ok(result.into())
    }

    async fn check_item(&self, id: String) -> RpcResult<RpcItemResult> {
        let id = parse_id(&id)?;
        Ok(self.state.node.check_item(id).into())
    }

    async fn wait_item(&self, id: String, timeout_secs: u64) -> RpcResult<RpcItemResult> {
        let id = parse_id(&id)?;
        let result = self
            .state
            .node
            .wait_item(id, Duration::from_secs(timeout_secs))
            .await;
        Ok(result.into())
    }
}
