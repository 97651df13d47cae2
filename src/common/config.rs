//! Configuration for minigraph components

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node ID (unique identifier)
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Coordinator-specific config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<CoordinatorConfig>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_node_id() -> String {
    "coord-1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            coordinator: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from `minigraph.toml` (optional) and `MINIGRAPH__*` env vars.
    ///
    /// Missing or unreadable sources fall back to defaults.
    pub fn load() -> Self {
        Self::load_from("minigraph").unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Load configuration from the given file stem (without extension)
    pub fn load_from(file: &str) -> crate::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(file).required(false))
            .add_source(config::Environment::with_prefix("MINIGRAPH").separator("__"))
            .build()
            .map_err(|e| crate::Error::InvalidConfig(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| crate::Error::InvalidConfig(e.to_string()))
    }
}

/// Policy used to pick a new owner when a partition must move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementPolicy {
    LeastLoaded,
    RoundRobin,
    Hrw,
}

impl std::str::FromStr for PlacementPolicy {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "least_loaded" | "least-loaded" => Ok(PlacementPolicy::LeastLoaded),
            "round_robin" | "round-robin" => Ok(PlacementPolicy::RoundRobin),
            "hrw" => Ok(PlacementPolicy::Hrw),
            other => Err(crate::Error::InvalidConfig(format!(
                "unknown placement policy: {}",
                other
            ))),
        }
    }
}

/// Backend for the metadata store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum StorageBackend {
    Memory,
    Rocksdb { path: PathBuf },
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bind address for HTTP API
    pub bind_addr: SocketAddr,

    /// Metadata store backend
    #[serde(default = "default_storage")]
    pub storage: StorageBackend,

    /// Number of graph partitions
    #[serde(default = "default_num_partitions")]
    pub num_partitions: u32,

    /// Storage nodes known at startup
    #[serde(default)]
    pub initial_nodes: Vec<String>,

    /// Owner selection when nodes leave
    #[serde(default = "default_placement")]
    pub placement: PlacementPolicy,

    /// Bound on a single prepare/commit/ack call to a storage node
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_ms: u64,

    /// Bound on a whole remote flush
    #[serde(default = "default_flush_timeout")]
    pub flush_timeout_ms: u64,

    /// Delay between flush polling rounds
    #[serde(default = "default_flush_poll_interval")]
    pub flush_poll_interval_ms: u64,

    /// Attempts to deliver a commit decision before giving up
    #[serde(default = "default_commit_retries")]
    pub commit_retries: usize,

    /// Delay between re-deliveries of in-doubt commits
    #[serde(default = "default_redelivery_interval")]
    pub redelivery_interval_ms: u64,
}

fn default_storage() -> StorageBackend {
    StorageBackend::Memory
}
fn default_num_partitions() -> u32 {
    16
}
fn default_placement() -> PlacementPolicy {
    PlacementPolicy::LeastLoaded
}
fn default_dispatch_timeout() -> u64 {
    2_000
}
fn default_flush_timeout() -> u64 {
    10_000
}
fn default_flush_poll_interval() -> u64 {
    20
}
fn default_commit_retries() -> usize {
    5
}
fn default_redelivery_interval() -> u64 {
    500
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7000)),
            storage: default_storage(),
            num_partitions: default_num_partitions(),
            initial_nodes: Vec::new(),
            placement: default_placement(),
            dispatch_timeout_ms: default_dispatch_timeout(),
            flush_timeout_ms: default_flush_timeout(),
            flush_poll_interval_ms: default_flush_poll_interval(),
            commit_retries: default_commit_retries(),
            redelivery_interval_ms: default_redelivery_interval(),
        }
    }
}

impl CoordinatorConfig {
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn flush_poll_interval(&self) -> Duration {
        Duration::from_millis(self.flush_poll_interval_ms)
    }

    pub fn redelivery_interval(&self) -> Duration {
        Duration::from_millis(self.redelivery_interval_ms)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.num_partitions == 0 {
            return Err(crate::Error::InvalidConfig(
                "num_partitions must be positive".into(),
            ));
        }
        if self.flush_poll_interval_ms == 0 || self.flush_timeout_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "flush timeout and poll interval must be positive".into(),
            ));
        }
        if self.redelivery_interval_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "redelivery_interval_ms must be positive".into(),
            ));
        }
        if self.commit_retries == 0 {
            return Err(crate::Error::InvalidConfig(
                "commit_retries must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Client connection settings, validated once at construction
#[derive(Debug, Clone)]
pub struct ClientConfig {
    addresses: Vec<String>,
    credentials: Option<(String, String)>,
    request_timeout: Duration,
}

impl ClientConfig {
    /// Build from a list of `host:port` addresses.
    ///
    /// Username and password must be given together.
    pub fn new(
        addresses: Vec<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> crate::Result<Self> {
        if addresses.is_empty() {
            return Err(crate::Error::InvalidConfig(
                "at least one address is required".into(),
            ));
        }
        for addr in &addresses {
            validate_host_port(addr)?;
        }
        let credentials = match (username, password) {
            (Some(u), Some(p)) => Some((u, p)),
            (None, None) => None,
            _ => {
                return Err(crate::Error::InvalidConfig(
                    "username and password must be set together".into(),
                ))
            }
        };
        Ok(Self {
            addresses,
            credentials,
            request_timeout: Duration::from_secs(30),
        })
    }

    /// Parse a comma-separated `host:port` list
    pub fn from_hosts(
        hosts: &str,
        username: Option<String>,
        password: Option<String>,
    ) -> crate::Result<Self> {
        let addresses = hosts
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect();
        Self::new(addresses, username, password)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.credentials
            .as_ref()
            .map(|(u, p)| (u.as_str(), p.as_str()))
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

fn validate_host_port(addr: &str) -> crate::Result<()> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| crate::Error::InvalidConfig(format!("missing port in {}", addr)))?;
    if host.is_empty() {
        return Err(crate::Error::InvalidConfig(format!(
            "missing host in {}",
            addr
        )));
    }
    port.parse::<u16>()
        .map_err(|_| crate::Error::InvalidConfig(format!("invalid port in {}", addr)))?;
    Ok(())
}
