use std::time::Duration;

use serde::{Deserialize, Serialize};

// ── Defaults ─────────────────────────────────────────────────────────────────
//
// Single-node development defaults. A deployed node overrides these from a
// TOML file (see `veritas-node`'s `--config` flag); every field here has a
// `#[serde(default = "...")]` fallback so a config file only needs to name
// the values it wants to change.

const DEFAULT_MAX_CACHE_AGE_SECS: u64 = 3600;
const DEFAULT_MAX_ITEM_CREATION_AGE_SECS: u64 = 600;
const DEFAULT_POLL_TIME_SECS: u64 = 5;
const DEFAULT_MAX_GET_ITEM_TIME_SECS: u64 = 10;
const DEFAULT_MAX_DOWNLOAD_ON_APPROVE_TIME_SECS: u64 = 30;
const DEFAULT_POSITIVE_CONSENSUS: usize = 3;
const DEFAULT_NEGATIVE_CONSENSUS: usize = 2;
const DEFAULT_REVOKED_ITEM_EXPIRATION_SECS: u64 = 86_400;
const DEFAULT_DECLINED_ITEM_EXPIRATION_SECS: u64 = 3600;

fn default_max_cache_age() -> Duration {
    Duration::from_secs(DEFAULT_MAX_CACHE_AGE_SECS)
}
fn default_max_item_creation_age() -> Duration {
    Duration::from_secs(DEFAULT_MAX_ITEM_CREATION_AGE_SECS)
}
fn default_poll_time() -> Duration {
    Duration::from_secs(DEFAULT_POLL_TIME_SECS)
}
fn default_max_get_item_time() -> Duration {
    Duration::from_secs(DEFAULT_MAX_GET_ITEM_TIME_SECS)
}
fn default_max_download_on_approve_time() -> Duration {
    Duration::from_secs(DEFAULT_MAX_DOWNLOAD_ON_APPROVE_TIME_SECS)
}
fn default_positive_consensus() -> usize {
    DEFAULT_POSITIVE_CONSENSUS
}
fn default_negative_consensus() -> usize {
    DEFAULT_NEGATIVE_CONSENSUS
}
fn default_revoked_item_expiration() -> Duration {
    Duration::from_secs(DEFAULT_REVOKED_ITEM_EXPIRATION_SECS)
}
fn default_declined_item_expiration() -> Duration {
    Duration::from_secs(DEFAULT_DECLINED_ITEM_EXPIRATION_SECS)
}
fn default_processor_retention() -> Duration {
    default_max_cache_age()
}

/// The nine consensus parameters from the external interfaces contract,
/// plus the deployment knobs a real node needs (left out of the core
/// consensus engine's scope, but part of a complete node).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Cache TTL and initial processor lifetime.
    #[serde(with = "humantime_secs", default = "default_max_cache_age")]
    pub max_cache_age: Duration,

    /// Reject items created before `now - max_item_creation_age`.
    #[serde(with = "humantime_secs", default = "default_max_item_creation_age")]
    pub max_item_creation_age: Duration,

    /// Retransmit/repoll interval and download retry interval.
    #[serde(with = "humantime_secs", default = "default_poll_time")]
    pub poll_time: Duration,

    /// Per-attempt remote-fetch timeout.
    #[serde(with = "humantime_secs", default = "default_max_get_item_time")]
    pub max_get_item_time: Duration,

    /// Extended window to fetch the body after positive quorum.
    #[serde(
        with = "humantime_secs",
        default = "default_max_download_on_approve_time"
    )]
    pub max_download_on_approve_time: Duration,

    /// Peer count threshold for approval.
    #[serde(default = "default_positive_consensus")]
    pub positive_consensus: usize,

    /// Peer count threshold for rejection.
    #[serde(default = "default_negative_consensus")]
    pub negative_consensus: usize,

    /// Record retention after reaching REVOKED.
    #[serde(with = "humantime_secs", default = "default_revoked_item_expiration")]
    pub revoked_item_expiration: Duration,

    /// Record retention after reaching DECLINED/UNDEFINED.
    #[serde(
        with = "humantime_secs",
        default = "default_declined_item_expiration"
    )]
    pub declined_item_expiration: Duration,

    /// How long a finished processor stays in the Node's processors map
    /// before the background sweep removes it, so late-arriving `waitItem`
    /// calls and notification traffic still find it idempotently.
    #[serde(with = "humantime_secs", default = "default_processor_retention")]
    pub processor_retention: Duration,

    /// Local node's data directory (ledger storage).
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// P2P listen multiaddress.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Multiaddresses of peers to dial on startup.
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,

    /// JSON-RPC bind address.
    #[serde(default = "default_rpc_addr")]
    pub rpc_addr: String,
}

fn default_data_dir() -> String {
    "./data".to_string()
}
fn default_listen_addr() -> String {
    "/ip4/0.0.0.0/tcp/0".to_string()
}
fn default_rpc_addr() -> String {
    "127.0.0.1:8645".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_cache_age: default_max_cache_age(),
            max_item_creation_age: default_max_item_creation_age(),
            poll_time: default_poll_time(),
            max_get_item_time: default_max_get_item_time(),
            max_download_on_approve_time: default_max_download_on_approve_time(),
            positive_consensus: default_positive_consensus(),
            negative_consensus: default_negative_consensus(),
            revoked_item_expiration: default_revoked_item_expiration(),
            declined_item_expiration: default_declined_item_expiration(),
            processor_retention: default_processor_retention(),
            data_dir: default_data_dir(),
            listen_addr: default_listen_addr(),
            bootstrap_peers: Vec::new(),
            rpc_addr: default_rpc_addr(),
        }
    }
}

impl Config {
    /// Load from a TOML file, falling back to defaults for any field the
    /// file omits.
    pub fn from_toml_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&text)?;
        Ok(cfg)
    }
}

/// Durations are stored as plain seconds in the config file/wire format —
/// simpler than adopting a `humantime`-style string format for a config
/// this small, while still keeping the in-memory type a `Duration`.
mod humantime_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_consensus_thresholds() {
        let cfg = Config::default();
        assert_eq!(cfg.positive_consensus, 3);
        assert_eq!(cfg.negative_consensus, 2);
        assert_eq!(cfg.poll_time, Duration::from_secs(5));
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let toml_text = "positive_consensus = 5\n";
        let cfg: Config = toml::from_str(toml_text).unwrap();
        assert_eq!(cfg.positive_consensus, 5);
        assert_eq!(cfg.negative_consensus, default_negative_consensus());
        assert_eq!(cfg.max_cache_age, default_max_cache_age());
    }
}
