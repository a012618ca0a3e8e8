#![deny(unsafe_code)]

use std::fmt;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use config::{Config, File};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use rretain_utils::*;

use self::logging::Log;

pub use self::options::Options;

pub mod logging;
pub mod options;

pub type Result<T> = anyhow::Result<T>;

static SETTINGS: OnceCell<Settings> = OnceCell::new();

#[derive(Clone)]
pub struct Settings(Arc<Inner>);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub task: Task,
    #[serde(default)]
    pub node: Node,
    #[serde(default)]
    pub cluster: Cluster,
    #[serde(default)]
    pub limiter: Limiter,
    #[serde(default)]
    pub store: Store,
    #[serde(default)]
    pub log: Log,
    #[serde(default, skip)]
    pub opts: Options,
}

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from(Inner::default())
    }
}

impl From<Inner> for Settings {
    fn from(inner: Inner) -> Self {
        Self(Arc::new(inner))
    }
}

impl Settings {
    pub fn new(opts: Options) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("/etc/rretain/rretain").required(false))
            .add_source(File::with_name("rretain").required(false))
            .add_source(
                config::Environment::with_prefix("rretain")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(" ")
                    .with_list_parse_key("cluster.peers"),
            );

        if let Some(cfg) = opts.cfg_name.as_ref() {
            builder = builder.add_source(File::with_name(cfg).required(true));
        }

        let mut inner: Inner = builder.build()?.try_deserialize()?;

        //Command line configuration overriding file configuration
        if let Some(id) = opts.node_id {
            inner.node.id = id;
        }
        if let Some(peers) = opts.peers.as_ref() {
            inner.cluster.peers.clone_from(peers);
        }
        if let Some(laddr) = opts.laddr {
            inner.cluster.laddr = Some(laddr);
        }

        inner.opts = opts;
        Ok(Self(Arc::new(inner)))
    }

    #[inline]
    pub fn instance() -> &'static Self {
        match SETTINGS.get() {
            Some(c) => c,
            None => {
                unreachable!("Settings not initialized");
            }
        }
    }

    #[inline]
    pub fn init(opts: Options) -> Result<&'static Self> {
        SETTINGS.set(Settings::new(opts)?).map_err(|_| anyhow!("Settings init failed"))?;
        SETTINGS.get().ok_or_else(|| anyhow!("Settings init failed"))
    }

    #[inline]
    pub fn logs(&self) {
        log::debug!("Config info is {:?}", self.0);
        log::info!("node_id is {}", self.node.id);
        log::info!("exec_workers is {}", self.task.exec_workers);
        log::info!("exec_queue_max is {}", self.task.exec_queue_max);
        log::info!("cluster laddr is {:?}", self.cluster.laddr);
        log::info!("cluster peers is {:?}", self.cluster.peers);
        log::info!("limiter config is: {:?}", self.limiter);
        log::info!("store config is: {:?}", self.store);
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Settings ...")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Task {
    //Concurrent task count for the store worker pool.
    #[serde(default = "Task::exec_workers_default")]
    pub exec_workers: usize,

    //Queue capacity for the store worker pool.
    #[serde(default = "Task::exec_queue_max_default")]
    pub exec_queue_max: usize,
}

impl Default for Task {
    #[inline]
    fn default() -> Self {
        Self { exec_workers: Self::exec_workers_default(), exec_queue_max: Self::exec_queue_max_default() }
    }
}

impl Task {
    fn exec_workers_default() -> usize {
        1000
    }
    fn exec_queue_max_default() -> usize {
        300_000
    }
}

#[derive(Default, Debug, Clone, Deserialize, Serialize)]
pub struct Node {
    #[serde(default)]
    pub id: NodeId,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Cluster {
    //gRPC listen address for peer traffic, not listening when unset
    #[serde(default, deserialize_with = "deserialize_laddr")]
    pub laddr: Option<SocketAddr>,

    //Peer nodes, "2@127.0.0.1:5364"
    #[serde(default)]
    pub peers: Vec<NodeAddr>,

    //Upper bound a global read waits for each peer
    #[serde(
        default = "Cluster::read_timeout_default",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub read_timeout: Duration,

    //Timeout for sending mutation batches and for connecting to a peer
    #[serde(
        default = "Cluster::client_timeout_default",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub client_timeout: Duration,

    #[serde(default = "Cluster::client_concurrency_limit_default")]
    pub client_concurrency_limit: usize,

    //Capacity of the outbound mutation queue
    #[serde(default = "Cluster::queue_capacity_default")]
    pub queue_capacity: usize,

    //Maximum number of mutations merged into one peer message
    #[serde(default = "Cluster::batch_size_default")]
    pub batch_size: usize,
}

impl Default for Cluster {
    fn default() -> Self {
        Self {
            laddr: None,
            peers: Vec::new(),
            read_timeout: Self::read_timeout_default(),
            client_timeout: Self::client_timeout_default(),
            client_concurrency_limit: Self::client_concurrency_limit_default(),
            queue_capacity: Self::queue_capacity_default(),
            batch_size: Self::batch_size_default(),
        }
    }
}

impl Cluster {
    fn read_timeout_default() -> Duration {
        Duration::from_secs(3)
    }
    fn client_timeout_default() -> Duration {
        Duration::from_secs(5)
    }
    fn client_concurrency_limit_default() -> usize {
        128
    }
    fn queue_capacity_default() -> usize {
        300_000
    }
    fn batch_size_default() -> usize {
        500
    }
}

fn deserialize_laddr<'de, D>(deserializer: D) -> std::result::Result<Option<SocketAddr>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let addr = String::deserialize(deserializer)?;
    if addr.is_empty() {
        return Ok(None);
    }
    addr.parse::<SocketAddr>().map(Some).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Limiter {
    #[serde(default = "Limiter::enable_default")]
    pub enable: bool,
    #[serde(default = "Limiter::read_default")]
    pub read: Rate,
    #[serde(default = "Limiter::mutate_default")]
    pub mutate: Rate,
}

impl Default for Limiter {
    fn default() -> Self {
        Self { enable: Self::enable_default(), read: Self::read_default(), mutate: Self::mutate_default() }
    }
}

impl Limiter {
    fn enable_default() -> bool {
        true
    }
    fn read_default() -> Rate {
        Rate::new(1000, Duration::from_secs(1))
    }
    fn mutate_default() -> Rate {
        Rate::new(500, Duration::from_secs(1))
    }
}

/// Token bucket parameters: `burst` tokens, refilled completely every `replenish_n_per`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Rate {
    pub burst: NonZeroU32,
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub replenish_n_per: Duration,
}

impl Rate {
    #[inline]
    pub fn new(burst: u32, replenish_n_per: Duration) -> Self {
        Self { burst: NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN), replenish_n_per }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Store {
    // The maximum number of retained messages, where 0 indicates no limit. Once reached, existing
    // topics can still be replaced but no new topic is stored.
    #[serde(default)]
    pub max_retained_messages: usize,

    #[serde(default = "Store::max_payload_size_default")]
    pub max_payload_size: Bytesize,

    // Age after which a retained message is dropped, 0 means never
    #[serde(
        default = "Store::expiry_interval_default",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub expiry_interval: Duration,

    // How long removal markers are kept to win against late replicated writes
    #[serde(
        default = "Store::tombstone_ttl_default",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub tombstone_ttl: Duration,

    #[serde(
        default = "Store::maintenance_interval_default",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub maintenance_interval: Duration,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            max_retained_messages: 0,
            max_payload_size: Self::max_payload_size_default(),
            expiry_interval: Self::expiry_interval_default(),
            tombstone_ttl: Self::tombstone_ttl_default(),
            maintenance_interval: Self::maintenance_interval_default(),
        }
    }
}

impl Store {
    fn max_payload_size_default() -> Bytesize {
        Bytesize::from(1024 * 1024)
    }
    fn expiry_interval_default() -> Duration {
        Duration::ZERO
    }
    fn tombstone_ttl_default() -> Duration {
        Duration::from_secs(600)
    }
    fn maintenance_interval_default() -> Duration {
        Duration::from_secs(60)
    }

    #[inline]
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::new(Options::default()).expect("Settings creation failed");
        assert_eq!(settings.node.id, 0);
        assert!(settings.cluster.peers.is_empty());
        assert_eq!(settings.cluster.read_timeout, Duration::from_secs(3));
        assert!(settings.limiter.enable);
        assert_eq!(settings.limiter.read.burst.get(), 1000);
        assert_eq!(settings.store.max_payload_size.as_usize(), 1024 * 1024);
        assert_eq!(settings.store.expiry_interval, Duration::ZERO);
    }

    #[test]
    fn test_options_override() {
        let peers = vec!["2@127.0.0.1:5364".parse().unwrap(), "3@127.0.0.1:5365".parse().unwrap()];
        let opts = Options {
            node_id: Some(1),
            peers: Some(peers.clone()),
            laddr: Some("127.0.0.1:5363".parse().unwrap()),
            ..Default::default()
        };
        let settings = Settings::new(opts).expect("Settings creation failed");
        assert_eq!(settings.node.id, 1);
        assert_eq!(settings.cluster.peers, peers);
        assert_eq!(settings.cluster.laddr, Some("127.0.0.1:5363".parse().unwrap()));
    }

    #[test]
    fn test_toml_source() {
        let toml = r#"
            [node]
            id = 7

            [cluster]
            peers = ["8@10.0.0.8:5363"]
            read_timeout = "500ms"

            [limiter.mutate]
            burst = 3
            replenish_n_per = "1m"

            [store]
            max_retained_messages = 10
            max_payload_size = "64K"
            expiry_interval = "1h"
        "#;
        let inner: Inner = Config::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(inner.node.id, 7);
        assert_eq!(inner.cluster.peers[0].id, 8);
        assert_eq!(inner.cluster.read_timeout, Duration::from_millis(500));
        assert_eq!(inner.limiter.mutate.burst.get(), 3);
        assert_eq!(inner.limiter.mutate.replenish_n_per, Duration::from_secs(60));
        assert_eq!(inner.limiter.read.burst.get(), 1000);
        assert_eq!(inner.store.max_retained_messages, 10);
        assert_eq!(inner.store.max_payload_size.as_usize(), 64 * 1024);
        assert_eq!(inner.store.expiry_interval, Duration::from_secs(3600));
    }
}
