//! Usability probing — does upstream actually route this address?
//!
//! Binding a socket to an address the host does not own can still
//! succeed at the syscall layer; only a round trip proves the LAN
//! answers neighbor discovery for it and replies find their way back.
//! So a probe is a real HTTP GET sourced from the candidate, against
//! an echo service whose body is the caller's address.

use std::net::{IpAddr, Ipv6Addr};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use sixpool_core::PoolError;

/// Probe seam between the spawner/RPC surface and the network. A probe
/// answers a plain bool: every failure mode — bind refused, no route,
/// timeout, non-2xx, wrong echo — means "not usable", never an error.
#[async_trait]
pub trait AddrProber: Send + Sync {
    async fn check(&self, addr: Ipv6Addr) -> bool;

    /// Probe a batch, results in input order.
    async fn checks(&self, addrs: &[Ipv6Addr]) -> Vec<bool> {
        let mut results = Vec::with_capacity(addrs.len());
        for addr in addrs {
            results.push(self.check(*addr).await);
        }
        results
    }
}

/// Probes by sourcing an HTTP GET from the candidate address.
pub struct HttpChecker {
    url: String,
    timeout: Duration,
    parallel: usize,
}

impl HttpChecker {
    pub fn new(url: impl Into<String>, timeout: Duration, parallel: usize) -> Self {
        Self { url: url.into(), timeout, parallel: parallel.max(1) }
    }

    /// The echo predicate: the body must parse as an IPv6 address equal
    /// to the one we bound. Comparing parsed addresses makes the echo
    /// service's formatting irrelevant. Swap this one function to use a
    /// differently-shaped echo service.
    fn body_matches(addr: Ipv6Addr, body: &str) -> bool {
        body.trim().parse::<Ipv6Addr>() == Ok(addr)
    }

    async fn probe(&self, addr: Ipv6Addr) -> Result<bool, PoolError> {
        let client = reqwest::Client::builder()
            .local_address(IpAddr::V6(addr))
            .timeout(self.timeout)
            .build()
            .map_err(|e| PoolError::Internal(format!("probe client: {e}")))?;
        let response = client
            .get(&self.url)
            .send()
            .await
            .map_err(|_| PoolError::CheckFailed(addr))?;
        if !response.status().is_success() {
            return Ok(false);
        }
        let body = response
            .text()
            .await
            .map_err(|_| PoolError::CheckFailed(addr))?;
        Ok(Self::body_matches(addr, &body))
    }
}

#[async_trait]
impl AddrProber for HttpChecker {
    async fn check(&self, addr: Ipv6Addr) -> bool {
        match self.probe(addr).await {
            Ok(usable) => {
                tracing::debug!(%addr, usable, "probe finished");
                usable
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "probe failed");
                false
            }
        }
    }

    async fn checks(&self, addrs: &[Ipv6Addr]) -> Vec<bool> {
        stream::iter(addrs.iter().copied())
            .map(|addr| self.check(addr))
            .buffered(self.parallel)
            .collect()
            .await
    }
}

/// Prober with a fixed verdict, flippable at runtime. Test double for
/// everything above the probe seam.
#[derive(Default)]
pub struct StaticProber {
    usable: std::sync::atomic::AtomicBool,
}

impl StaticProber {
    pub fn new(usable: bool) -> Self {
        Self { usable: std::sync::atomic::AtomicBool::new(usable) }
    }

    pub fn set_usable(&self, usable: bool) {
        self.usable.store(usable, std::sync::atomic::Ordering::Relaxed);
    }
}

#[async_trait]
impl AddrProber for StaticProber {
    async fn check(&self, _addr: Ipv6Addr) -> bool {
        self.usable.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Ipv6Addr {
        s.parse().unwrap()
    }

    #[test]
    fn body_matches_is_format_insensitive() {
        let a = addr("2001:db8::1");
        assert!(HttpChecker::body_matches(a, "2001:db8::1"));
        assert!(HttpChecker::body_matches(a, "  2001:db8::1\n"));
        assert!(HttpChecker::body_matches(a, "2001:0db8:0000:0000:0000:0000:0000:0001"));
        assert!(!HttpChecker::body_matches(a, "2001:db8::2"));
        assert!(!HttpChecker::body_matches(a, "not an address"));
        assert!(!HttpChecker::body_matches(a, ""));
    }

    #[tokio::test]
    async fn checks_preserves_input_order() {
        let prober = StaticProber::new(true);
        let addrs = vec![addr("2001:db8::1"), addr("2001:db8::2"), addr("2001:db8::3")];
        let results = prober.checks(&addrs).await;
        assert_eq!(results, vec![true, true, true]);
    }

    #[tokio::test]
    async fn static_prober_flips() {
        let prober = StaticProber::new(false);
        assert!(!prober.check(addr("2001:db8::1")).await);
        prober.set_usable(true);
        assert!(prober.check(addr("2001:db8::1")).await);
    }

    #[tokio::test]
    async fn unroutable_bind_fails_closed() {
        // 2001:db8::/32 is documentation space — no host owns this
        // address, so the probe must come back unusable, not panic.
        let checker = HttpChecker::new(
            "http://127.0.0.1:9/",
            Duration::from_millis(200),
            4,
        );
        assert!(!checker.check(addr("2001:db8::dead")).await);
    }
}
