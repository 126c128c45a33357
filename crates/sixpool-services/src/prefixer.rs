//! Prefix detection — what IPv6 network is routed at us right now?
//!
//! The kernel's view is read through `ip -6 addr show`, the same tool
//! the route controller drives. Only stable global addresses count:
//! link-local and privacy (temporary) addresses never reflect the
//! delegated prefix.

use std::net::Ipv6Addr;

use async_trait::async_trait;
use tokio::process::Command;

use sixpool_core::{PoolError, Prefix};

/// Source of the currently-routed prefix. The pool service only ever
/// talks to this trait; tests substitute a static implementation.
#[async_trait]
pub trait PrefixSource: Send + Sync {
    async fn current_prefix(&self) -> Result<Prefix, PoolError>;
}

/// Reads the prefix from a named interface via `ip -6 addr show`.
pub struct InterfacePrefixer {
    iface: String,
    prefix_len: u8,
}

impl InterfacePrefixer {
    pub fn new(iface: impl Into<String>, prefix_len: u8) -> Self {
        Self { iface: iface.into(), prefix_len }
    }

    /// Pull the global addresses out of `ip -6 addr show` output.
    /// Lines look like:
    ///   inet6 2001:db8::5/64 scope global dynamic mngtmpaddr
    ///   inet6 2001:db8::1c9f:.../64 scope global temporary dynamic
    fn parse_global_addrs(output: &str) -> Vec<Ipv6Addr> {
        let mut addrs = Vec::new();
        for line in output.lines() {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.first() != Some(&"inet6") {
                continue;
            }
            if tokens.contains(&"temporary") {
                continue;
            }
            let Some(with_len) = tokens.get(1) else { continue };
            let Some(text) = with_len.split('/').next() else { continue };
            let Ok(addr) = text.parse::<Ipv6Addr>() else { continue };
            // Global unicast only (2000::/3).
            if addr.segments()[0] & 0xe000 == 0x2000 {
                addrs.push(addr);
            }
        }
        addrs
    }
}

#[async_trait]
impl PrefixSource for InterfacePrefixer {
    async fn current_prefix(&self) -> Result<Prefix, PoolError> {
        let output = Command::new("ip")
            .args(["-6", "addr", "show", "dev", &self.iface, "scope", "global"])
            .output()
            .await
            .map_err(|e| PoolError::Internal(format!("failed to run ip: {e}")))?;
        if !output.status.success() {
            return Err(PoolError::NoInterface(self.iface.clone()));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let addrs = Self::parse_global_addrs(&text);
        // Lowest-numbered address is the deterministic representative.
        let addr = addrs
            .into_iter()
            .min()
            .ok_or_else(|| PoolError::NoGlobalAddress(self.iface.clone()))?;
        Prefix::from_addr(&self.iface, addr, self.prefix_len)
    }
}

/// Fixed prefix source for tests and for deployments where the prefix
/// is configured rather than discovered.
#[derive(Default)]
pub struct StaticPrefixSource {
    current: std::sync::RwLock<Option<Prefix>>,
}

impl StaticPrefixSource {
    pub fn new(prefix: Prefix) -> Self {
        Self { current: std::sync::RwLock::new(Some(prefix)) }
    }

    pub fn set(&self, prefix: Option<Prefix>) {
        *self.current.write().unwrap() = prefix;
    }
}

#[async_trait]
impl PrefixSource for StaticPrefixSource {
    async fn current_prefix(&self) -> Result<Prefix, PoolError> {
        self.current
            .read()
            .unwrap()
            .clone()
            .ok_or(PoolError::NoPrefix)
    }
}
