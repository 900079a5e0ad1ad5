//! veritas-node — the node binary wiring the consensus engine, a `sled`
//! ledger, a `libp2p` transport, and a client-facing JSON-RPC server into
//! one running process.
//!
//! Startup sequence: parse CLI flags, load `Config` (file, then CLI
//! overrides), open the ledger, build the P2P transport, construct the
//! `Node`, start the RPC server, then block until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, Weak};

use clap::Parser;
use tracing::info;

use veritas_core::{AlwaysValidChecker, Config, HashId, Item, ItemChecker};
use veritas_engine::{ItemSource, Network, Node};
use veritas_ledger::{Ledger, SledLedger};
use veritas_network::{GossipNetwork, P2pConfig};
use veritas_rpc::{RpcServer, RpcServerState};

#[derive(Parser, Debug)]
#[command(name = "veritas-node", about = "Item-approval consensus node")]
struct Cli {
    /// Path to a TOML config file. Fields the file omits fall back to
    /// `Config::default()`; flags below override whatever the file sets.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ledger storage directory.
    #[arg(long)]
    data_dir: Option<String>,

    /// P2P listen multiaddress, e.g. "/ip4/0.0.0.0/tcp/7777".
    #[arg(long)]
    listen_addr: Option<String>,

    /// Bootstrap peer multiaddress. Repeat for multiple peers.
    #[arg(long = "bootstrap")]
    bootstrap_peers: Vec<String>,

    /// JSON-RPC bind address, e.g. "127.0.0.1:8645".
    #[arg(long)]
    rpc_addr: Option<String>,
}

impl Cli {
    fn apply_overrides(&self, mut config: Config) -> Config {
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(addr) = &self.listen_addr {
            config.listen_addr = addr.clone();
        }
        if !self.bootstrap_peers.is_empty() {
            config.bootstrap_peers = self.bootstrap_peers.clone();
        }
        if let Some(addr) = &self.rpc_addr {
            config.rpc_addr = addr.clone();
        }
        config
    }
}

/// Resolves the `GossipNetwork`-needs-an-`ItemSource` / `Node`-needs-a-
/// `Network` construction cycle: the transport is built first against this
/// placeholder, and `bind` installs the real `Node` once it exists. Every
/// `get_item` answered before `bind` runs (there are none — nothing can
/// reach a peer's `get_item` handler before the transport itself has
/// finished starting) would simply see an absent node and answer `None`.
struct LateBoundItemSource {
    node: OnceLock<Weak<Node>>,
}

impl LateBoundItemSource {
    fn new() -> Self {
        Self {
            node: OnceLock::new(),
        }
    }

    fn bind(&self, node: Weak<Node>) {
        let _ = self.node.set(node);
    }
}

impl ItemSource for LateBoundItemSource {
    fn get_item(&self, id: &HashId) -> Option<Item> {
        self.node.get()?.upgrade()?.get_item(id)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_toml_file(path)?,
        None => Config::default(),
    };
    let config = Arc::new(cli.apply_overrides(config));

    let ledger: Arc<dyn Ledger> = Arc::new(SledLedger::open(&config.data_dir)?);

    let item_source = Arc::new(LateBoundItemSource::new());
    let p2p_config = P2pConfig {
        listen_addr: config.listen_addr.clone(),
        bootstrap_peers: config.bootstrap_peers.clone(),
        ..Default::default()
    };
    let (network, driver) =
        GossipNetwork::new(p2p_config, Arc::clone(&item_source) as Arc<dyn ItemSource>)?;
    tokio::spawn(driver.run());

    let self_info = network.self_info().clone();
    let network: Arc<dyn Network> = Arc::new(network);
    let checker: Arc<dyn ItemChecker> = Arc::new(AlwaysValidChecker);

    let node = Node::new(self_info, Arc::clone(&config), ledger, network, checker);
    item_source.bind(Arc::downgrade(&node));

    let rpc_state = Arc::new(RpcServerState {
        node: Arc::clone(&node),
    });
    let rpc_addr: SocketAddr = config.rpc_addr.parse()?;
    let _rpc_handle = RpcServer::new(rpc_state).start(rpc_addr).await?;

    info!(rpc_addr = %rpc_addr, listen_addr = %config.listen_addr, "veritas-node ready");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
