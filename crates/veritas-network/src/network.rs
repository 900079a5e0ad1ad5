use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use libp2p::{
    gossipsub, identify, noise, ping, request_response, swarm::SwarmEvent, tcp, yamux, Multiaddr,
    PeerId, StreamProtocol, Swarm,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use veritas_core::{EngineError, HashId, Item, NodeInfo};
use veritas_engine::{ItemNotification, ItemSource, Network, NotificationCodec, NotificationHandler};

use crate::behaviour::{VeritasBehaviour, VeritasBehaviourEvent};
use crate::config::P2pConfig;
use crate::protocol::{VeritasRequest, VeritasResponse};

const ITEM_PROTOCOL: &str = "/veritas/items/1";

struct PeerEntry {
    peer_id: PeerId,
    info: NodeInfo,
}

type PeerTable = Arc<Mutex<HashMap<HashId, PeerEntry>>>;

/// Commands sent from [`GossipNetwork`]'s `Network` methods to the swarm
/// event loop owned by [`GossipNetworkDriver`]. The `Network` trait's
/// methods must return without owning the swarm (`Swarm` is `!Sync` by
/// design), so every call becomes a message to the task that does.
enum Command {
    Broadcast(ItemNotification),
    Unicast {
        peer: PeerId,
        notification: ItemNotification,
    },
    GetItem {
        peer: PeerId,
        id: HashId,
        respond_to: oneshot::Sender<Result<Option<Item>, EngineError>>,
    },
}

/// `libp2p` transport implementing `veritas_engine::Network`: `gossipsub`
/// for broadcast, a `request_response` protocol for unicast `deliver` and
/// `getItem`, and `identify`/`ping` for peer housekeeping. Peer discovery is
/// static bootstrap-dialing rather than a DHT — a fixed-size consensus
/// network has no need for Kademlia's scale.
///
/// A `HashId` is not a `libp2p::PeerId`, so every peer this node learns
/// about (via `identify` or a bare connection) is registered in `peers`
/// under `HashId::of(peer_id.to_bytes())` — a stable, reproducible mapping
/// computed the same way on every node, which is what lets `deliver`
/// recover the transport-level `PeerId` from the `NodeInfo` the engine
/// hands back.
#[derive(Clone)]
pub struct GossipNetwork {
    self_info: NodeInfo,
    cmd_tx: mpsc::UnboundedSender<Command>,
    handler: Arc<Mutex<Option<Arc<dyn NotificationHandler>>>>,
    peers: PeerTable,
}

impl GossipNetwork {
    /// Build the transport and return `(handle, driver)`. The handle is
    /// what `Node::new` takes as its `Arc<dyn Network>`; the driver must be
    /// `tokio::spawn`ed by the caller to actually pump the swarm.
    pub fn new(
        config: P2pConfig,
        item_source: Arc<dyn ItemSource>,
    ) -> Result<(GossipNetwork, GossipNetworkDriver), EngineError> {
        Self::try_new(config, item_source).map_err(|e| EngineError::Transport(e.to_string()))
    }

    fn try_new(
        config: P2pConfig,
        item_source: Arc<dyn ItemSource>,
    ) -> Result<(GossipNetwork, GossipNetworkDriver), Box<dyn std::error::Error + Send + Sync>> {
        let topic = gossipsub::IdentTopic::new(&config.notification_topic);

        let mut swarm = libp2p::SwarmBuilder::with_new_identity()
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )?
            .with_behaviour(|key| {
                let message_id_fn = |msg: &gossipsub::Message| {
                    let mut s = DefaultHasher::new();
                    msg.data.hash(&mut s);
                    gossipsub::MessageId::from(s.finish().to_string())
                };

                let gossipsub_config = gossipsub::ConfigBuilder::default()
                    .heartbeat_interval(Duration::from_secs(1))
                    .validation_mode(gossipsub::ValidationMode::Strict)
                    .message_id_fn(message_id_fn)
                    .build()
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

                let gossipsub = gossipsub::Behaviour::new(
                    gossipsub::MessageAuthenticity::Signed(key.clone()),
                    gossipsub_config,
                )
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

                let request_response = request_response::cbor::Behaviour::new(
                    [(
                        StreamProtocol::new(ITEM_PROTOCOL),
                        request_response::ProtocolSupport::Full,
                    )],
                    request_response::Config::default(),
                );

                let identify = identify::Behaviour::new(identify::Config::new(
                    config.protocol_version.clone(),
                    key.public(),
                ));

                let ping = ping::Behaviour::default();

                Ok(VeritasBehaviour {
                    gossipsub,
                    request_response,
                    identify,
                    ping,
                })
            })?
            .build();

        swarm.behaviour_mut().gossipsub.subscribe(&topic)?;

        let listen_addr: Multiaddr = config.listen_addr.parse()?;
        swarm.listen_on(listen_addr)?;

        for addr_str in &config.bootstrap_peers {
            match addr_str.parse::<Multiaddr>() {
                Ok(addr) => {
                    if let Err(e) = swarm.dial(addr.clone()) {
                        warn!(addr = %addr, error = %e, "failed to dial bootstrap peer");
                    }
                }
                Err(e) => warn!(addr = %addr_str, error = %e, "invalid bootstrap multiaddr"),
            }
        }

        let local_peer_id = *swarm.local_peer_id();
        let self_info = NodeInfo::new(
            HashId::of(local_peer_id.to_bytes().as_slice()),
            config.listen_addr.clone(),
        );

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let handler = Arc::new(Mutex::new(None));
        let peers: PeerTable = Arc::new(Mutex::new(HashMap::new()));

        let network = GossipNetwork {
            self_info,
            cmd_tx,
            handler: Arc::clone(&handler),
            peers: Arc::clone(&peers),
        };
        let driver = GossipNetworkDriver {
            swarm,
            topic,
            cmd_rx,
            handler,
            peers,
            item_source,
            pending_get_item: HashMap::new(),
        };

        Ok((network, driver))
    }

    pub fn self_info(&self) -> &NodeInfo {
        &self.self_info
    }

    fn peer_id_for(&self, id: &HashId) -> Option<PeerId> {
        self.peers.lock().unwrap().get(id).map(|e| e.peer_id)
    }
}

#[async_trait]
impl Network for GossipNetwork {
    fn subscribe(&self, handler: Arc<dyn NotificationHandler>) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    async fn deliver(&self, peer: &NodeInfo, notification: ItemNotification) {
        let Some(peer_id) = self.peer_id_for(&peer.id) else {
            warn!(peer = %peer.id, "deliver: peer not registered with transport, dropping");
            return;
        };
        let _ = self.cmd_tx.send(Command::Unicast {
            peer: peer_id,
            notification,
        });
    }

    async fn broadcast(&self, _origin: &NodeInfo, notification: ItemNotification) {
        let _ = self.cmd_tx.send(Command::Broadcast(notification));
    }

    fn peers(&self) -> Vec<NodeInfo> {
        self.peers
            .lock()
            .unwrap()
            .values()
            .map(|e| e.info.clone())
            .collect()
    }

    async fn get_item(
        &self,
        id: HashId,
        peer: &NodeInfo,
        timeout: Duration,
    ) -> Result<Option<Item>, EngineError> {
        let Some(peer_id) = self.peer_id_for(&peer.id) else {
            return Err(EngineError::Transport("peer not registered".into()));
        };
        let (respond_to, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::GetItem {
                peer: peer_id,
                id,
                respond_to,
            })
            .map_err(|_| EngineError::Transport("network driver stopped".into()))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EngineError::Transport(
                "network driver dropped response channel".into(),
            )),
            Err(_) => Err(EngineError::FetchTimeout),
        }
    }
}

/// Owns the `Swarm`. Run with `tokio::spawn(driver.run())` once per node
/// process; the `GossipNetwork` handle returned alongside it is the only
/// thing the rest of the node ever touches.
pub struct GossipNetworkDriver {
    swarm: Swarm<VeritasBehaviour>,
    topic: gossipsub::IdentTopic,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    handler: Arc<Mutex<Option<Arc<dyn NotificationHandler>>>>,
    peers: PeerTable,
    item_source: Arc<dyn ItemSource>,
    pending_get_item:
        HashMap<request_response::OutboundRequestId, oneshot::Sender<Result<Option<Item>, EngineError>>>,
}

impl GossipNetworkDriver {
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(command) => self.handle_command(command),
                        None => {
                            debug!("all GossipNetwork handles dropped, stopping driver");
                            return;
                        }
                    }
                }
                event = self.swarm.select_next_some() => self.handle_swarm_event(event),
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Broadcast(notification) => match NotificationCodec::encode(&notification) {
                Ok(bytes) => {
                    if let Err(e) = self
                        .swarm
                        .behaviour_mut()
                        .gossipsub
                        .publish(self.topic.clone(), bytes)
                    {
                        warn!(error = %e, "gossipsub publish failed");
                    }
                }
                Err(e) => error!(error = %e, "failed to encode outbound notification"),
            },
            Command::Unicast { peer, notification } => {
                self.swarm
                    .behaviour_mut()
                    .request_response
                    .send_request(&peer, VeritasRequest::Notify(notification));
            }
            Command::GetItem {
                peer,
                id,
                respond_to,
            } => {
                let request_id = self
                    .swarm
                    .behaviour_mut()
                    .request_response
                    .send_request(&peer, VeritasRequest::GetItem(id));
                self.pending_get_item.insert(request_id, respond_to);
            }
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<VeritasBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(addr = %address, "P2P listening on");
            }
            SwarmEvent::Behaviour(VeritasBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                message,
                ..
            })) => match NotificationCodec::decode(&message.data) {
                Ok(notification) => self.dispatch(notification),
                Err(e) => debug!(error = %e, "failed to decode gossip notification"),
            },
            SwarmEvent::Behaviour(VeritasBehaviourEvent::RequestResponse(
                request_response::Event::Message { message, .. },
            )) => match message {
                request_response::Message::Request {
                    request, channel, ..
                } => self.handle_inbound_request(request, channel),
                request_response::Message::Response {
                    request_id,
                    response,
                } => self.handle_inbound_response(request_id, response),
            },
            SwarmEvent::Behaviour(VeritasBehaviourEvent::RequestResponse(
                request_response::Event::OutboundFailure {
                    request_id, error, ..
                },
            )) => {
                if let Some(respond_to) = self.pending_get_item.remove(&request_id) {
                    let _ = respond_to.send(Err(EngineError::Transport(error.to_string())));
                }
            }
            SwarmEvent::Behaviour(VeritasBehaviourEvent::RequestResponse(
                request_response::Event::InboundFailure { error, .. },
            )) => {
                debug!(error = %error, "inbound request_response failure");
            }
            SwarmEvent::Behaviour(VeritasBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                self.register_peer(peer_id, info.listen_addrs.first().cloned());
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                debug!(peer = %peer_id, "connection established");
                self.register_peer(peer_id, None);
            }
            SwarmEvent::ConnectionClosed { peer_id, .. } => {
                debug!(peer = %peer_id, "connection closed");
                self.peers
                    .lock()
                    .unwrap()
                    .retain(|_, entry| entry.peer_id != peer_id);
            }
            _ => {}
        }
    }

    fn handle_inbound_request(
        &mut self,
        request: VeritasRequest,
        channel: request_response::ResponseChannel<VeritasResponse>,
    ) {
        match request {
            VeritasRequest::Notify(notification) => {
                let _ = self
                    .swarm
                    .behaviour_mut()
                    .request_response
                    .send_response(channel, VeritasResponse::Ack);
                self.dispatch(notification);
            }
            VeritasRequest::GetItem(id) => {
                let item = self.item_source.get_item(&id);
                let _ = self
                    .swarm
                    .behaviour_mut()
                    .request_response
                    .send_response(channel, VeritasResponse::Item(item));
            }
        }
    }

    fn handle_inbound_response(
        &mut self,
        request_id: request_response::OutboundRequestId,
        response: VeritasResponse,
    ) {
        let Some(respond_to) = self.pending_get_item.remove(&request_id) else {
            // Ack to a fire-and-forget Unicast Notify — nothing waits on it.
            return;
        };
        match response {
            VeritasResponse::Item(item) => {
                let _ = respond_to.send(Ok(item));
            }
            VeritasResponse::Ack => {
                let _ = respond_to.send(Ok(None));
            }
        }
    }

    fn dispatch(&self, notification: ItemNotification) {
        let handler = self.handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            tokio::spawn(async move { handler.handle(notification).await });
        }
    }

    fn register_peer(&self, peer_id: PeerId, addr: Option<Multiaddr>) {
        let id = HashId::of(peer_id.to_bytes().as_slice());
        let address = addr
            .map(|a| a.to_string())
            .unwrap_or_else(|| peer_id.to_string());
        let info = NodeInfo::new(id, address);
        self.peers
            .lock()
            .unwrap()
            .insert(id, PeerEntry { peer_id, info });
    }
}
