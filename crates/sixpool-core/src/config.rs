//! Configuration for the pool service and its clients.
//!
//! Resolution order: explicit CLI flags → environment variables →
//! config file → defaults.
//!
//! Config file location:
//!   1. $SIXPOOL_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/sixpool/config.toml
//!   3. ~/.config/sixpool/config.toml

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const GLOBAL_DB_FILE: &str = "ipv6_global_addrs.json";
pub const MIRROR_DB_DIR: &str = "ipv6_mirrors";
pub const DEFAULT_DBNAME: &str = "default";
pub const DEFAULT_PORT: u16 = 16000;

/// Everything the pool service needs at construction. No process-wide
/// mutable state; one value, passed down.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Directory holding the global DB file and the mirrors directory.
    pub db_root: PathBuf,
    /// TCP port for the RPC surface.
    pub port: u16,
    /// Interface carrying the routed prefix.
    pub iface: String,
    /// Prefix length announced by the upstream router.
    pub prefix_len: u8,
    /// Target number of verified addresses in the global DB.
    pub usable_num: usize,
    /// Echo service the checker probes; the body must equal the bound
    /// source address.
    pub check_url: String,
    /// Per-probe deadline, seconds.
    pub check_timeout_secs: u64,
    /// Concurrent probes in a `checks` batch.
    pub check_parallel: usize,
    /// Route reconcile cadence, seconds.
    pub route_check_interval_secs: u64,
    /// Debounce for batched DB saves, seconds.
    pub save_interval_secs: u64,
    /// Mirror sync cadence, seconds.
    pub mirror_sync_interval_secs: u64,
    /// Fallback replenish cadence when no pick wakes the loop, seconds.
    pub replenish_interval_secs: u64,
    /// Ceiling on RPC lock waits before answering Busy, seconds.
    pub lock_ceiling_secs: u64,
    /// End-to-end deadline for slow RPC handlers (spawn, checks), seconds.
    pub rpc_deadline_secs: u64,
    /// NDP proxy daemon configuration file.
    pub ndppd_conf: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            db_root: data_dir(),
            port: DEFAULT_PORT,
            iface: "eth0".to_string(),
            prefix_len: 64,
            usable_num: 20,
            check_url: "https://ipv6.icanhazip.com".to_string(),
            check_timeout_secs: 5,
            check_parallel: 8,
            route_check_interval_secs: 1800,
            save_interval_secs: 2,
            mirror_sync_interval_secs: 2,
            replenish_interval_secs: 5,
            lock_ceiling_secs: 1,
            rpc_deadline_secs: 60,
            ndppd_conf: PathBuf::from("/etc/ndppd.conf"),
        }
    }
}

impl ServiceConfig {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }
    pub fn route_check_interval(&self) -> Duration {
        Duration::from_secs(self.route_check_interval_secs)
    }
    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }
    pub fn mirror_sync_interval(&self) -> Duration {
        Duration::from_secs(self.mirror_sync_interval_secs)
    }
    pub fn replenish_interval(&self) -> Duration {
        Duration::from_secs(self.replenish_interval_secs)
    }
    pub fn lock_ceiling(&self) -> Duration {
        Duration::from_secs(self.lock_ceiling_secs)
    }
    pub fn rpc_deadline(&self) -> Duration {
        Duration::from_secs(self.rpc_deadline_secs)
    }

    pub fn global_db_path(&self) -> PathBuf {
        self.db_root.join(GLOBAL_DB_FILE)
    }
    pub fn mirror_dir(&self) -> PathBuf {
        self.db_root.join(MIRROR_DB_DIR)
    }

    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            ServiceConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("SIXPOOL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Apply SIXPOOL_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SIXPOOL_DB_ROOT") {
            self.db_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SIXPOOL_IFACE") {
            self.iface = v;
        }
        if let Ok(v) = std::env::var("SIXPOOL_PORT") {
            if let Ok(p) = v.parse() {
                self.port = p;
            }
        }
        if let Ok(v) = std::env::var("SIXPOOL_USABLE_NUM") {
            if let Ok(n) = v.parse() {
                self.usable_num = n;
            }
        }
        if let Ok(v) = std::env::var("SIXPOOL_CHECK_URL") {
            self.check_url = v;
        }
        if let Ok(v) = std::env::var("SIXPOOL_NDPPD_CONF") {
            self.ndppd_conf = PathBuf::from(v);
        }
    }
}

/// Client-side knobs for the session adapter and RPC client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Pool service base URL.
    pub server_url: String,
    /// Tenant identifier partitioning address accounting.
    pub dbname: String,
    /// Per-request deadline against the pool service, seconds.
    pub request_timeout_secs: u64,
    /// Sleep between adapt retries when the pool is empty, seconds.
    pub adapt_retry_interval_secs: u64,
    /// Adapt attempts before giving up with PoolExhausted.
    pub adapt_max_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("http://localhost:{DEFAULT_PORT}"),
            dbname: DEFAULT_DBNAME.to_string(),
            request_timeout_secs: 10,
            adapt_retry_interval_secs: 5,
            adapt_max_retries: 15,
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
    pub fn adapt_retry_interval(&self) -> Duration {
        Duration::from_secs(self.adapt_retry_interval_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("sixpool")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("sixpool")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
}
