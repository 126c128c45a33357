//! Route controller — keeps the kernel and the NDP proxy in line with
//! the delegated prefix.
//!
//! Two pieces of state are reconciled: a `local` route steering the
//! whole prefix at the interface, and the ndppd configuration that
//! answers neighbor solicitations for every address inside it. Both
//! operations are idempotent; `run` composes them and restarts the
//! proxy only when something actually changed or the daemon is down.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use sixpool_core::{PoolError, Prefix};

use crate::persist;

const RESTART_ATTEMPTS: u32 = 3;
const RESTART_BACKOFF: Duration = Duration::from_secs(1);

async fn run_cmd(program: &str, args: &[&str]) -> Result<String, PoolError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| PoolError::Internal(format!("failed to run {program}: {e}")))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(PoolError::Internal(format!(
            "{program} {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

pub struct RouteUpdater {
    prefix: Prefix,
    ndppd_conf: PathBuf,
}

impl RouteUpdater {
    pub fn new(prefix: Prefix, ndppd_conf: PathBuf) -> Self {
        Self { prefix, ndppd_conf }
    }

    /// Install the local route for the prefix. `replace` rather than
    /// `add` — reinstalling an existing route must not fail.
    pub async fn add_route(&self) -> Result<(), PoolError> {
        let net = self.prefix.net.to_string();
        run_cmd(
            "ip",
            &["route", "replace", "local", &net, "dev", &self.prefix.iface],
        )
        .await?;
        tracing::info!(net = %net, iface = %self.prefix.iface, "local route installed");
        Ok(())
    }

    pub async fn del_route(&self) -> Result<(), PoolError> {
        let net = self.prefix.net.to_string();
        run_cmd("ip", &["route", "del", "local", &net, "dev", &self.prefix.iface]).await?;
        tracing::info!(net = %net, "local route removed");
        Ok(())
    }

    /// Does the proxy config already advertise this prefix on this
    /// interface?
    pub async fn is_ndppd_conf_latest(&self) -> bool {
        let Ok(text) = tokio::fs::read_to_string(&self.ndppd_conf).await else {
            return false;
        };
        Self::conf_matches(&text, &self.prefix)
    }

    fn conf_matches(text: &str, prefix: &Prefix) -> bool {
        let net = prefix.net.to_string();
        let mut proxy_found = false;
        let mut rule_found = false;
        for line in text.lines() {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens.as_slice() {
                ["proxy", iface, ..] if *iface == prefix.iface => proxy_found = true,
                ["rule", rule_net, ..] if *rule_net == net => rule_found = true,
                _ => {}
            }
        }
        proxy_found && rule_found
    }

    /// The entire file the rewriter owns. Exactly one proxy block with
    /// one static rule; nothing else survives a rewrite.
    pub fn render_conf(&self) -> String {
        format!(
            "route-ttl 30000\nproxy {iface} {{\n    router no\n    timeout 500\n    ttl 30000\n    rule {net} {{\n        static\n    }}\n}}\n",
            iface = self.prefix.iface,
            net = self.prefix.net,
        )
    }

    /// Rewrite the proxy config. Temp-file + rename, so a crashed
    /// rewrite can never leave ndppd with half a file.
    pub async fn modify_ndppd_conf(&self) -> Result<(), PoolError> {
        persist::write_atomic(&self.ndppd_conf, self.render_conf().as_bytes())
            .await
            .map_err(|e| {
                PoolError::Internal(format!("write {}: {e}", self.ndppd_conf.display()))
            })?;
        tracing::info!(path = %self.ndppd_conf.display(), net = %self.prefix.net, "ndppd.conf rewritten");
        Ok(())
    }

    pub async fn is_ndppd_active(&self) -> bool {
        run_cmd("systemctl", &["is-active", "--quiet", "ndppd"])
            .await
            .is_ok()
    }

    /// Restart the proxy daemon, retrying with linear backoff. ndppd
    /// occasionally wedges on restart; three attempts covers the
    /// transient cases.
    pub async fn restart_ndppd(&self) -> Result<(), PoolError> {
        let mut last = String::new();
        for attempt in 1..=RESTART_ATTEMPTS {
            match run_cmd("systemctl", &["restart", "ndppd"]).await {
                Ok(_) => {
                    tracing::info!(attempt, "ndppd restarted");
                    return Ok(());
                }
                Err(e) => {
                    last = e.to_string();
                    tracing::warn!(attempt, error = %last, "ndppd restart failed");
                    if attempt < RESTART_ATTEMPTS {
                        tokio::time::sleep(RESTART_BACKOFF * attempt).await;
                    }
                }
            }
        }
        Err(PoolError::ProxyRestart(last))
    }

    /// Full reconcile: route, then config, then proxy.
    pub async fn run(&self) -> Result<(), PoolError> {
        self.add_route().await?;
        if !self.is_ndppd_conf_latest().await {
            self.modify_ndppd_conf().await?;
            self.restart_ndppd().await?;
        } else if !self.is_ndppd_active().await {
            self.restart_ndppd().await?;
        }
        Ok(())
    }
}

/// What the pool service asks of the route layer. Narrow on purpose:
/// one call per reconcile cycle.
#[async_trait]
pub trait RouteControl: Send + Sync {
    async fn reconcile(&self, prefix: &Prefix) -> Result<(), PoolError>;
}

/// Production implementation backed by `ip route` and ndppd.
pub struct NdppdRouteControl {
    ndppd_conf: PathBuf,
}

impl NdppdRouteControl {
    pub fn new(ndppd_conf: PathBuf) -> Self {
        Self { ndppd_conf }
    }
}

#[async_trait]
impl RouteControl for NdppdRouteControl {
    async fn reconcile(&self, prefix: &Prefix) -> Result<(), PoolError> {
        RouteUpdater::new(prefix.clone(), self.ndppd_conf.clone())
            .run()
            .await
    }
}

/// Reconciler that touches nothing. For tests and for hosts where
/// routing is managed externally.
pub struct NoopRouteControl;

#[async_trait]
impl RouteControl for NoopRouteControl {
    async fn reconcile(&self, _prefix: &Prefix) -> Result<(), PoolError> {
        Ok(())
    }
}
