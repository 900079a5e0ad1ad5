use libp2p::{gossipsub, identify, ping, request_response, swarm::NetworkBehaviour};

use crate::protocol::{VeritasRequest, VeritasResponse};

/// Combined libp2p network behaviour for a Veritas node.
///
/// `#[derive(NetworkBehaviour)]` auto-generates `VeritasBehaviourEvent`, an
/// enum with one variant per field, which the swarm's event loop matches on.
/// Four protocols, each owning one concern: `gossipsub` broadcasts
/// notifications to every subscriber; `request_response` carries unicast
/// notifications and `getItem` fetches; `identify` and `ping` are peer
/// housekeeping (identity exchange and liveness). There is no Kademlia DHT
/// here — peer discovery is static bootstrap-dialing (see
/// `GossipNetwork::new`), which is all a fixed-validator-set consensus
/// network needs.
#[derive(NetworkBehaviour)]
pub struct VeritasBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub request_response: request_response::cbor::Behaviour<VeritasRequest, VeritasResponse>,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
}
