/// Configuration for the libp2p transport backing [`crate::GossipNetwork`].
#[derive(Debug, Clone)]
pub struct P2pConfig {
    /// Local listen multiaddress (e.g. "/ip4/0.0.0.0/tcp/7777").
    pub listen_addr: String,
    /// Bootstrap peer multiaddresses dialed on startup.
    pub bootstrap_peers: Vec<String>,
    /// Protocol version string advertised via `identify`.
    pub protocol_version: String,
    /// GossipSub topic name used to broadcast `ItemNotification`s.
    pub notification_topic: String,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_addr: "/ip4/0.0.0.0/tcp/0".into(),
            bootstrap_peers: Vec::new(),
            protocol_version: "/veritas/1.0.0".into(),
            notification_topic: "veritas-items".into(),
        }
    }
}
