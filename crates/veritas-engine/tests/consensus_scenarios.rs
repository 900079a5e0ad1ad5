//! Multi-node end-to-end scenarios, run entirely in-process over
//! `LoopbackHub` so no sockets or external processes are required.

use std::sync::Arc;
use std::time::Duration;

use veritas_core::{AlwaysValidChecker, Config, HashId, Item, ItemChecker, ItemState, NodeInfo};
use veritas_engine::network::{ItemSource, LoopbackHub};
use veritas_engine::Node;
use veritas_ledger::{Ledger, SledLedger};

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn cluster_config(positive: usize, negative: usize) -> Arc<Config> {
    let mut cfg = Config::default();
    cfg.positive_consensus = positive;
    cfg.negative_consensus = negative;
    cfg.poll_time = Duration::from_millis(30);
    cfg.max_get_item_time = Duration::from_secs(2);
    cfg.max_cache_age = Duration::from_secs(30);
    Arc::new(cfg)
}

/// `hub.register` needs an `ItemSource` before the `Node` it will back
/// exists. This slot is registered first (answering nothing), then pointed
/// at the real node's own `ItemSource` impl once it's constructed.
struct SourceSlot(std::sync::Mutex<Option<Arc<dyn ItemSource>>>);

impl SourceSlot {
    fn new() -> Arc<Self> {
        Arc::new(Self(std::sync::Mutex::new(None)))
    }

    fn set(&self, source: Arc<dyn ItemSource>) {
        *self.0.lock().unwrap() = Some(source);
    }
}

impl ItemSource for SourceSlot {
    fn get_item(&self, id: &HashId) -> Option<Item> {
        self.0.lock().unwrap().as_ref().and_then(|s| s.get_item(id))
    }
}

fn spawn_cluster(
    n: usize,
    config: Arc<Config>,
    checker: Arc<dyn ItemChecker>,
) -> (Vec<Arc<Node>>, Vec<tempfile::TempDir>) {
    let hub = LoopbackHub::new();
    let mut nodes = Vec::new();
    let mut dirs = Vec::new();
    for i in 0..n {
        let dir = tempfile::tempdir().unwrap();
        let ledger: Arc<dyn Ledger> = Arc::new(SledLedger::open(dir.path()).unwrap());
        let info = NodeInfo::new(HashId::of(format!("node-{i}").as_bytes()), format!("peer-{i}"));

        let slot = SourceSlot::new();
        let network = hub.register(info.clone(), Arc::clone(&slot) as Arc<dyn ItemSource>);
        let node = Node::new(
            info,
            Arc::clone(&config),
            ledger,
            Arc::new(network),
            Arc::clone(&checker),
        );
        slot.set(Arc::clone(&node) as Arc<dyn ItemSource>);

        nodes.push(node);
        dirs.push(dir);
    }
    (nodes, dirs)
}

#[tokio::test]
async fn happy_path_reaches_unanimous_approval_across_cluster() {
    let (nodes, _dirs) = spawn_cluster(3, cluster_config(3, 2), Arc::new(AlwaysValidChecker));

    let item = Item::new(HashId::of(b"cluster-happy-path"), now(), now() + 1000);
    let result = nodes[0].register_item(item.clone()).await;
    assert_ne!(result.state, ItemState::Discarded);

    for node in &nodes {
        let settled = node.wait_item(item.id, Duration::from_secs(5)).await;
        assert_eq!(
            settled.state,
            ItemState::Approved,
            "every node in the cluster should converge on APPROVED"
        );
    }
}

#[derive(Debug)]
struct AlwaysRejectChecker;
impl ItemChecker for AlwaysRejectChecker {
    fn check(&self, item: &mut Item) -> bool {
        item.push_error(veritas_core::ItemError::BadNewItem);
        false
    }
}

#[tokio::test]
async fn unanimous_rejection_declines_across_cluster() {
    let (nodes, _dirs) = spawn_cluster(3, cluster_config(3, 2), Arc::new(AlwaysRejectChecker));

    let item = Item::new(HashId::of(b"cluster-negative-path"), now(), now() + 1000);
    nodes[0].register_item(item.clone()).await;

    for node in &nodes {
        let settled = node.wait_item(item.id, Duration::from_secs(5)).await;
        assert_eq!(settled.state, ItemState::Declined);
    }
}

#[tokio::test]
async fn registering_the_same_item_twice_is_idempotent() {
    let (nodes, _dirs) = spawn_cluster(1, cluster_config(1, 1), Arc::new(AlwaysValidChecker));
    let item = Item::new(HashId::of(b"cluster-dup"), now(), now() + 1000);

    let first = nodes[0].register_item(item.clone()).await;
    let second = nodes[0].register_item(item.clone()).await;
    assert_eq!(first.state, second.state);
}

#[tokio::test]
async fn stale_item_is_discarded_without_a_ledger_record() {
    let (nodes, _dirs) = spawn_cluster(1, cluster_config(1, 1), Arc::new(AlwaysValidChecker));

    let ancient = Item::new(HashId::of(b"ancient"), now() - 100_000, now() + 1000);
    let result = nodes[0].register_item(ancient.clone()).await;
    assert_eq!(result.state, ItemState::Discarded);
    assert_eq!(nodes[0].check_item(ancient.id).state, ItemState::Undefined);
}
