use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use veritas_core::{EngineError, HashId, Item, ItemResult, NodeInfo};

/// Wire shape of a peer-to-peer vote message. All five fields must be
/// preserved bit-equivalently by every transport so peers running mixed
/// implementations interoperate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemNotification {
    pub from: NodeInfo,
    pub item_id: HashId,
    pub result: ItemResult,
    pub request_answer: bool,
}

/// Encodes/decodes [`ItemNotification`] for the wire, named and tested
/// independently of whatever transport carries the bytes.
pub struct NotificationCodec;

impl NotificationCodec {
    pub fn encode(notification: &ItemNotification) -> Result<Vec<u8>, EngineError> {
        bincode::serialize(notification).map_err(EngineError::from)
    }

    pub fn decode(bytes: &[u8]) -> Result<ItemNotification, EngineError> {
        bincode::deserialize(bytes).map_err(EngineError::from)
    }
}

/// Invoked once per inbound notification. Implementations reply, if a reply
/// is warranted, by calling back into `Network::deliver` themselves —
/// `subscribe` carries no implicit request/response pairing.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, notification: ItemNotification);
}

/// Opaque peer-to-peer transport consumed by the engine: unicast delivery,
/// broadcast, peer iteration, remote item fetch, and an inbound notification
/// subscription. Two implementations exist in this repo: [`LoopbackNetwork`]
/// below (in-process, for tests) and `veritas-network`'s `GossipNetwork` (a
/// `libp2p` transport, for deployment).
#[async_trait]
pub trait Network: Send + Sync {
    /// Register the callback invoked per inbound notification. At most one
    /// handler is active; a later call replaces an earlier one.
    fn subscribe(&self, handler: Arc<dyn NotificationHandler>);

    /// Fire-and-forget unicast to `peer`.
    async fn deliver(&self, peer: &NodeInfo, notification: ItemNotification);

    /// Deliver to every known peer except `origin`.
    async fn broadcast(&self, origin: &NodeInfo, notification: ItemNotification);

    /// Snapshot of currently known peers.
    fn peers(&self) -> Vec<NodeInfo>;

    /// Remote fetch of an item body from `peer`. The returned future
    /// resolves once the peer replies or `timeout` elapses; a timeout is
    /// reported as `EngineError::FetchTimeout`, not a panic or hang.
    async fn get_item(
        &self,
        id: HashId,
        peer: &NodeInfo,
        timeout: Duration,
    ) -> Result<Option<Item>, EngineError>;
}

/// Supplies item bodies to peers that `get_item` from this node — backed by
/// a node's cache plus any in-flight processor bodies. Kept as its own small
/// trait (rather than handing the whole `Node` to the transport) so the
/// transport only ever reaches into exactly what it needs to answer a fetch.
pub trait ItemSource: Send + Sync {
    fn get_item(&self, id: &HashId) -> Option<Item>;
}

// ── LoopbackNetwork: in-process transport for tests and single-process demos ──

struct LoopbackNode {
    info: NodeInfo,
    handler: Mutex<Option<Arc<dyn NotificationHandler>>>,
    item_source: Arc<dyn ItemSource>,
}

/// Shared registry backing every [`LoopbackNetwork`] handle in one process.
/// Connecting several `Node`s to the same hub gives them a working gossip
/// fabric without sockets — used by the engine's own integration tests.
pub struct LoopbackHub {
    nodes: Mutex<HashMap<HashId, Arc<LoopbackNode>>>,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: Mutex::new(HashMap::new()),
        })
    }

    /// Register a new peer on this hub and return its `Network` handle.
    pub fn register(
        self: &Arc<Self>,
        info: NodeInfo,
        item_source: Arc<dyn ItemSource>,
    ) -> LoopbackNetwork {
        let node = Arc::new(LoopbackNode {
            info: info.clone(),
            handler: Mutex::new(None),
            item_source,
        });
        self.nodes.lock().unwrap().insert(info.id, node);
        LoopbackNetwork {
            self_info: info,
            hub: Arc::clone(self),
        }
    }
}

#[derive(Clone)]
pub struct LoopbackNetwork {
    self_info: NodeInfo,
    hub: Arc<LoopbackHub>,
}

#[async_trait]
impl Network for LoopbackNetwork {
    fn subscribe(&self, handler: Arc<dyn NotificationHandler>) {
        let nodes = self.hub.nodes.lock().unwrap();
        if let Some(node) = nodes.get(&self.self_info.id) {
            *node.handler.lock().unwrap() = Some(handler);
        }
    }

    async fn deliver(&self, peer: &NodeInfo, notification: ItemNotification) {
        let target = self.hub.nodes.lock().unwrap().get(&peer.id).cloned();
        let Some(node) = target else { return };
        let handler = node.handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            tokio::spawn(async move { handler.handle(notification).await });
        }
    }

    async fn broadcast(&self, origin: &NodeInfo, notification: ItemNotification) {
        let targets: Vec<Arc<LoopbackNode>> = self
            .hub
            .nodes
            .lock()
            .unwrap()
            .values()
            .filter(|n| n.info.id != origin.id)
            .cloned()
            .collect();
        for node in targets {
            let handler = node.handler.lock().unwrap().clone();
            if let Some(handler) = handler {
                let notification = notification.clone();
                tokio::spawn(async move { handler.handle(notification).await });
            }
        }
    }

    fn peers(&self) -> Vec<NodeInfo> {
        self.hub
            .nodes
            .lock()
            .unwrap()
            .values()
            .filter(|n| n.info.id != self.self_info.id)
            .map(|n| n.info.clone())
            .collect()
    }

    async fn get_item(
        &self,
        id: HashId,
        peer: &NodeInfo,
        timeout: Duration,
    ) -> Result<Option<Item>, EngineError> {
        let target = self.hub.nodes.lock().unwrap().get(&peer.id).cloned();
        tokio::time::timeout(timeout, async move {
            target.and_then(|node| node.item_source.get_item(&id))
        })
        .await
        .map_err(|_| EngineError::FetchTimeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use veritas_core::{ItemState, Timestamp};

    struct StaticSource(Option<Item>);
    impl ItemSource for StaticSource {
        fn get_item(&self, _id: &HashId) -> Option<Item> {
            self.0.clone()
        }
    }

    struct CountingHandler(Arc<AtomicUsize>);
    #[async_trait]
    impl NotificationHandler for CountingHandler {
        async fn handle(&self, _notification: ItemNotification) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn node_info(tag: &[u8]) -> NodeInfo {
        NodeInfo::new(HashId::of(tag), "loopback".to_string())
    }

    fn notification(from: NodeInfo) -> ItemNotification {
        ItemNotification {
            from,
            item_id: HashId::of(b"item"),
            result: ItemResult {
                state: ItemState::PendingPositive,
                expires_at: 0 as Timestamp,
                have_copy: true,
            },
            request_answer: false,
        }
    }

    #[tokio::test]
    async fn codec_round_trips() {
        let n = notification(node_info(b"a"));
        let bytes = NotificationCodec::encode(&n).unwrap();
        let decoded = NotificationCodec::decode(&bytes).unwrap();
        assert_eq!(decoded.item_id, n.item_id);
        assert_eq!(decoded.request_answer, n.request_answer);
    }

    #[tokio::test]
    async fn deliver_reaches_only_target() {
        let hub = LoopbackHub::new();
        let a = node_info(b"a");
        let b = node_info(b"b");
        let count_a = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::new(AtomicUsize::new(0));

        let net_a = hub.register(a.clone(), Arc::new(StaticSource(None)));
        let net_b = hub.register(b.clone(), Arc::new(StaticSource(None)));
        net_a.subscribe(Arc::new(CountingHandler(Arc::clone(&count_a))));
        net_b.subscribe(Arc::new(CountingHandler(Arc::clone(&count_b))));

        net_a.deliver(&b, notification(a.clone())).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(count_a.load(Ordering::SeqCst), 0);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn broadcast_skips_origin() {
        let hub = LoopbackHub::new();
        let (a, b, c) = (node_info(b"a"), node_info(b"b"), node_info(b"c"));
        let counts: Vec<_> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();

        let net_a = hub.register(a.clone(), Arc::new(StaticSource(None)));
        hub.register(b.clone(), Arc::new(StaticSource(None)))
            .subscribe(Arc::new(CountingHandler(Arc::clone(&counts[1]))));
        hub.register(c.clone(), Arc::new(StaticSource(None)))
            .subscribe(Arc::new(CountingHandler(Arc::clone(&counts[2]))));
        net_a.subscribe(Arc::new(CountingHandler(Arc::clone(&counts[0]))));

        net_a.broadcast(&a, notification(a.clone())).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(counts[0].load(Ordering::SeqCst), 0);
        assert_eq!(counts[1].load(Ordering::SeqCst), 1);
        assert_eq!(counts[2].load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_item_returns_source_body() {
        let hub = LoopbackHub::new();
        let a = node_info(b"a");
        let b = node_info(b"b");
        let body = Item::new(HashId::of(b"item"), 0, 100);
        hub.register(a.clone(), Arc::new(StaticSource(None)));
        let net_a = hub.register(a, Arc::new(StaticSource(None)));
        hub.register(b.clone(), Arc::new(StaticSource(Some(body.clone()))));

        let fetched = net_a
            .get_item(body.id, &b, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(fetched.unwrap().id, body.id);
    }

    #[tokio::test]
    async fn peers_excludes_self() {
        let hub = LoopbackHub::new();
        let a = node_info(b"a");
        let b = node_info(b"b");
        let net_a = hub.register(a.clone(), Arc::new(StaticSource(None)));
        hub.register(b.clone(), Arc::new(StaticSource(None)));

        let peers = net_a.peers();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].id, b.id);
    }
}
