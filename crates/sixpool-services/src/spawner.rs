//! Spawner — mints fresh verified addresses into the global DB.
//!
//! A spawn is: draw random host bits under the installed prefix,
//! screen for collisions, probe, insert. Insertion is the last step,
//! so a crash mid-spawn leaves nothing to clean up, and a prefix
//! change mid-probe just drops the candidate on the floor.

use std::net::Ipv6Addr;
use std::sync::Arc;

use rand::rngs::OsRng;

use sixpool_core::addr::random_addr_in;
use sixpool_core::PoolError;

use crate::checker::AddrProber;
use crate::global_db::GlobalDb;

/// Draws before giving up on finding an unused candidate. Collisions
/// are essentially impossible in a /64; the bound exists for densely
/// seeded DBs and tiny test prefixes.
const COLLISION_RETRIES: usize = 16;

/// Overall attempt budget multiplier for a batch of n.
const BATCH_BUDGET_FACTOR: usize = 4;

pub struct Spawner {
    global: GlobalDb,
    prober: Arc<dyn AddrProber>,
}

impl Spawner {
    pub fn new(global: GlobalDb, prober: Arc<dyn AddrProber>) -> Self {
        Self { global, prober }
    }

    async fn fresh_candidate(
        &self,
        net: ipnetwork::Ipv6Network,
    ) -> Result<Ipv6Addr, PoolError> {
        for _ in 0..COLLISION_RETRIES {
            let candidate = random_addr_in(net, &mut OsRng);
            if !self.global.has_addr(candidate).await? {
                return Ok(candidate);
            }
        }
        Err(PoolError::Internal(format!(
            "no unused address in {net} after {COLLISION_RETRIES} draws"
        )))
    }

    /// Mint one verified address. Fails with `NoPrefix` when no prefix
    /// is installed (or it changed while we probed), `CheckFailed` when
    /// the candidate does not route.
    pub async fn spawn_one(&self) -> Result<Ipv6Addr, PoolError> {
        let net = self.global.get_prefix().await?.ok_or(PoolError::NoPrefix)?;
        let candidate = self.fresh_candidate(net).await?;

        if !self.prober.check(candidate).await {
            return Err(PoolError::CheckFailed(candidate));
        }

        // The probe is slow; the prefix may have moved underneath it.
        // A candidate verified under the old prefix must not leak into
        // the new pool.
        match self.global.get_prefix().await? {
            Some(current) if current == net => {}
            _ => return Err(PoolError::NoPrefix),
        }
        if !self.global.add_addr(candidate).await? {
            // Lost an insert race — treat like a failed attempt.
            return Err(PoolError::CheckFailed(candidate));
        }
        tracing::info!(addr = %candidate, "spawned verified address");
        Ok(candidate)
    }

    /// Mint up to `n` addresses under an overall attempt budget.
    /// `complete` is true iff all `n` were accepted within the budget.
    /// `NoPrefix` propagates only when nothing was produced at all.
    pub async fn spawn_many(&self, n: usize) -> Result<(Vec<Ipv6Addr>, bool), PoolError> {
        let budget = n.saturating_mul(BATCH_BUDGET_FACTOR).max(1);
        let mut accepted = Vec::new();
        let mut attempts = 0;

        while accepted.len() < n && attempts < budget {
            attempts += 1;
            match self.spawn_one().await {
                Ok(addr) => accepted.push(addr),
                Err(PoolError::NoPrefix) => {
                    if accepted.is_empty() {
                        return Err(PoolError::NoPrefix);
                    }
                    return Ok((accepted, false));
                }
                Err(e) => {
                    tracing::debug!(attempt = attempts, error = %e, "spawn attempt failed");
                }
            }
        }
        let complete = accepted.len() == n;
        Ok((accepted, complete))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::StaticProber;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    async fn temp_global() -> GlobalDb {
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path: PathBuf = std::env::temp_dir().join(format!(
            "sixpool-spawner-test-{}-{}/global.json",
            std::process::id(),
            id
        ));
        GlobalDb::open(path, Duration::from_secs(1)).await
    }

    fn net(s: &str) -> ipnetwork::Ipv6Network {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn spawn_without_prefix_fails() {
        let global = temp_global().await;
        let spawner = Spawner::new(global, Arc::new(StaticProber::new(true)));
        assert!(matches!(spawner.spawn_one().await, Err(PoolError::NoPrefix)));
    }

    #[tokio::test]
    async fn spawn_inserts_in_prefix_address() {
        let global = temp_global().await;
        global.set_prefix(net("2001:db8::/64")).await.unwrap();
        let spawner = Spawner::new(global.clone(), Arc::new(StaticProber::new(true)));

        let addr = spawner.spawn_one().await.unwrap();
        assert!(net("2001:db8::/64").contains(addr));
        assert!(global.has_addr(addr).await.unwrap());
    }

    #[tokio::test]
    async fn failed_check_inserts_nothing() {
        let global = temp_global().await;
        global.set_prefix(net("2001:db8::/64")).await.unwrap();
        let spawner = Spawner::new(global.clone(), Arc::new(StaticProber::new(false)));

        assert!(matches!(spawner.spawn_one().await, Err(PoolError::CheckFailed(_))));
        assert_eq!(global.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn collision_budget_is_bounded() {
        let global = temp_global().await;
        // A /127 has two addresses; seed both so every draw collides.
        global.set_prefix(net("2001:db8::/127")).await.unwrap();
        global.add_addr("2001:db8::".parse().unwrap()).await.unwrap();
        global.add_addr("2001:db8::1".parse().unwrap()).await.unwrap();

        let spawner = Spawner::new(global, Arc::new(StaticProber::new(true)));
        assert!(matches!(spawner.spawn_one().await, Err(PoolError::Internal(_))));
    }

    #[tokio::test]
    async fn collision_retry_finds_the_free_slot() {
        let global = temp_global().await;
        // One of two addresses taken: 16 draws find the other with
        // probability 1 - 2^-16.
        global.set_prefix(net("2001:db8::/127")).await.unwrap();
        global.add_addr("2001:db8::".parse().unwrap()).await.unwrap();

        let spawner = Spawner::new(global.clone(), Arc::new(StaticProber::new(true)));
        if let Ok(addr) = spawner.spawn_one().await {
            assert_eq!(addr, "2001:db8::1".parse::<std::net::Ipv6Addr>().unwrap());
        }
    }

    #[tokio::test]
    async fn prefix_change_during_probe_drops_candidate() {
        // A prober that moves the prefix while "probing" — the spawn in
        // flight must not land in the new pool.
        struct MovingPrefixProber {
            global: GlobalDb,
        }

        #[async_trait::async_trait]
        impl AddrProber for MovingPrefixProber {
            async fn check(&self, _addr: std::net::Ipv6Addr) -> bool {
                self.global.set_prefix(net("2001:db8:ffff::/64")).await.unwrap();
                true
            }
        }

        let global = temp_global().await;
        global.set_prefix(net("2001:db8::/64")).await.unwrap();
        let prober = Arc::new(MovingPrefixProber { global: global.clone() });
        let spawner = Spawner::new(global.clone(), prober);

        assert!(matches!(spawner.spawn_one().await, Err(PoolError::NoPrefix)));
        assert_eq!(global.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn spawn_many_reports_completeness() {
        let global = temp_global().await;
        global.set_prefix(net("2001:db8::/64")).await.unwrap();

        let ok = Spawner::new(global.clone(), Arc::new(StaticProber::new(true)));
        let (addrs, complete) = ok.spawn_many(5).await.unwrap();
        assert_eq!(addrs.len(), 5);
        assert!(complete);

        let dead = Spawner::new(global.clone(), Arc::new(StaticProber::new(false)));
        let (addrs, complete) = dead.spawn_many(3).await.unwrap();
        assert!(addrs.is_empty());
        assert!(!complete);
    }
}
