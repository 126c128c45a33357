//! Source-bound HTTP session for scrapers.
//!
//! A session owns one address picked from the pool and a reqwest
//! client whose connections bind to it before connecting. Rebinding
//! replaces the whole client: reqwest's connection pool dies with it,
//! so no keep-alive connection can quietly keep using the previous
//! source address.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tokio::sync::watch;

use sixpool_core::{AddrReportInfo, AddrStatus, ClientConfig, PoolError};

use crate::client::PoolClient;

/// Source-address plumbing for a reqwest client under construction.
pub struct SourceBinding;

impl SourceBinding {
    /// Restrict resolution and connection to IPv4.
    pub fn force_ipv4(builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    /// Restrict resolution and connection to IPv6.
    pub fn force_ipv6(builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        builder.local_address(IpAddr::V6(Ipv6Addr::UNSPECIFIED))
    }

    /// Bind all new sockets to `(ip, 0)`. Implies IPv6-only resolution.
    pub fn bind(builder: reqwest::ClientBuilder, ip: Ipv6Addr) -> reqwest::ClientBuilder {
        builder.local_address(IpAddr::V6(ip))
    }
}

/// Handle for interrupting a blocked `adapt` from another task.
#[derive(Clone)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

/// An HTTP session pinned to one pool address at a time.
pub struct BoundSession {
    cfg: ClientConfig,
    pool: PoolClient,
    http: reqwest::Client,
    current: Option<Ipv6Addr>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl BoundSession {
    /// Build a session and bind it to its first address. Blocks (with
    /// retries) until the pool can serve one.
    pub async fn connect(cfg: ClientConfig) -> Result<Self, PoolError> {
        let pool = PoolClient::new(&cfg)?;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let http = SourceBinding::force_ipv6(
            reqwest::Client::builder().timeout(cfg.request_timeout()),
        )
        .build()
        .map_err(|e| PoolError::Internal(format!("build session client: {e}")))?;

        let mut session = Self { cfg, pool, http, current: None, cancel_tx, cancel_rx };
        session.adapt().await?;
        Ok(session)
    }

    /// Pick an address and rebind the session to it. An empty pool is
    /// retried every `adapt_retry_interval` up to `adapt_max_retries`
    /// times; exhaustion is `PoolExhausted`, interruption `Cancelled`.
    pub async fn adapt(&mut self) -> Result<Ipv6Addr, PoolError> {
        let max = self.cfg.adapt_max_retries.max(1);
        for attempt in 1..=max {
            if *self.cancel_rx.borrow() {
                return Err(PoolError::Cancelled);
            }
            match self.pool.pick().await {
                Ok(addr) => {
                    self.rebind(addr)?;
                    tracing::info!(dbname = self.pool.dbname(), %addr, "session adapted");
                    return Ok(addr);
                }
                Err(e) if e.is_retryable() => {
                    if attempt == max {
                        break;
                    }
                    tracing::debug!(
                        dbname = self.pool.dbname(),
                        attempt,
                        error = %e,
                        "pool empty, waiting"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.cfg.adapt_retry_interval()) => {}
                        _ = self.cancel_rx.changed() => {
                            if *self.cancel_rx.borrow() {
                                return Err(PoolError::Cancelled);
                            }
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(PoolError::PoolExhausted(max))
    }

    /// Swap in a fresh client bound to `addr`. Dropping the old client
    /// drops its pooled connections — nothing keeps speaking from the
    /// old source.
    fn rebind(&mut self, addr: Ipv6Addr) -> Result<(), PoolError> {
        self.http = SourceBinding::bind(
            reqwest::Client::builder().timeout(self.cfg.request_timeout()),
            addr,
        )
        .build()
        .map_err(|e| PoolError::Internal(format!("bind to {addr}: {e}")))?;
        self.current = Some(addr);
        Ok(())
    }

    /// Report the current address back and release it. The session is
    /// unbound afterward; call `adapt` to pick a new address.
    pub async fn report(&mut self, status: AddrStatus) -> Result<bool, PoolError> {
        let Some(addr) = self.current.take() else {
            return Ok(false);
        };
        let info = AddrReportInfo { addr, status, reason: None };
        info.validate()?;
        let ok = self.pool.report(&info).await?;
        tracing::info!(dbname = self.pool.dbname(), %addr, status = status.as_str(), "reported");
        Ok(ok)
    }

    /// Report with a reason attached, e.g. why the address went bad.
    pub async fn report_with_reason(
        &mut self,
        status: AddrStatus,
        reason: impl Into<String>,
    ) -> Result<bool, PoolError> {
        let Some(addr) = self.current.take() else {
            return Ok(false);
        };
        let info = AddrReportInfo { addr, status, reason: Some(reason.into()) };
        info.validate()?;
        self.pool.report(&info).await
    }

    pub fn current_addr(&self) -> Option<Ipv6Addr> {
        self.current
    }

    /// The bound reqwest client. Every request made through it leaves
    /// from the current pool address.
    pub fn client(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel_tx.clone())
    }

    /// Convenience GET through the bound client.
    pub async fn get(&self, url: &str) -> Result<reqwest::Response, reqwest::Error> {
        self.http.get(url).send().await
    }
}
