//! Pool service — ties the prefixer, route controller, spawner, and
//! the DBs together, and runs the background loops.
//!
//! Loop layout (one tokio task each, started by `start`):
//! - route monitor: reconcile kernel + proxy with the detected prefix;
//!   a prefix change invalidates every DB.
//! - replenisher: tops the global DB up to `usable_num`. Woken by
//!   picks that find the pool starved, plus a periodic fallback tick.
//! - mirror sync: reconciles every live mirror against the global set.
//! - persistence: drains dirty flags into batched saves.
//!
//! Loops never crash the service: every tick catches and logs. The
//! RPC layer calls the `pick`/`report`/`spawn`/... methods directly.

use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;

use sixpool_core::{AddrReportInfo, GlobalStats, MirrorStats, PoolError, ServiceConfig};

use crate::checker::AddrProber;
use crate::global_db::GlobalDb;
use crate::mirror_db::MirrorDb;
use crate::prefixer::PrefixSource;
use crate::route::RouteControl;
use crate::spawner::Spawner;

struct Inner {
    cfg: ServiceConfig,
    global: GlobalDb,
    mirrors: DashMap<String, MirrorDb>,
    prefixes: Arc<dyn PrefixSource>,
    prober: Arc<dyn AddrProber>,
    routes: Arc<dyn RouteControl>,
    spawner: Spawner,

    /// Exclusive while the route layer reconfigures, shared while
    /// spawning — a spawn must never probe through a half-configured
    /// proxy.
    route_lock: RwLock<()>,
    /// Wakes the replenisher ahead of its periodic tick.
    replenish_wake: Notify,
    /// False until the route monitor has seen a good prefix; parks the
    /// replenisher while the interface is down.
    route_ok: AtomicBool,
    /// Set on prefix change (and at startup); cleared after the route
    /// layer reconciles successfully. Survives failed attempts so the
    /// next tick retries.
    needs_reconcile: AtomicBool,

    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct PoolService {
    inner: Arc<Inner>,
}

impl PoolService {
    pub async fn new(
        cfg: ServiceConfig,
        prefixes: Arc<dyn PrefixSource>,
        prober: Arc<dyn AddrProber>,
        routes: Arc<dyn RouteControl>,
    ) -> Result<Self, PoolError> {
        tokio::fs::create_dir_all(cfg.mirror_dir())
            .await
            .map_err(|e| PoolError::Internal(format!("create db root: {e}")))?;

        let global = GlobalDb::open(cfg.global_db_path(), cfg.lock_ceiling()).await;
        let spawner = Spawner::new(global.clone(), prober.clone());

        let service = Self {
            inner: Arc::new(Inner {
                cfg,
                global,
                mirrors: DashMap::new(),
                prefixes,
                prober,
                routes,
                spawner,
                route_lock: RwLock::new(()),
                replenish_wake: Notify::new(),
                route_ok: AtomicBool::new(false),
                needs_reconcile: AtomicBool::new(true),
                tasks: std::sync::Mutex::new(Vec::new()),
            }),
        };
        service.load_existing_mirrors().await;
        Ok(service)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.cfg
    }

    async fn load_existing_mirrors(&self) {
        let Ok(mut dir) = tokio::fs::read_dir(self.inner.cfg.mirror_dir()).await else {
            return;
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(dbname) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Err(e) = self.ensure_mirror(dbname).await {
                tracing::warn!(dbname, error = %e, "failed to load mirror");
            }
        }
    }

    async fn ensure_mirror(&self, dbname: &str) -> Result<MirrorDb, PoolError> {
        if let Some(mirror) = self.inner.mirrors.get(dbname) {
            return Ok(mirror.clone());
        }
        let mirror = MirrorDb::open(
            dbname,
            &self.inner.cfg.mirror_dir(),
            self.inner.cfg.lock_ceiling(),
        )
        .await;
        mirror
            .sync_from_global(&self.inner.global.get_all_addrs().await?)
            .await?;
        let mirror = self
            .inner
            .mirrors
            .entry(dbname.to_string())
            .or_insert(mirror)
            .clone();
        tracing::info!(dbname, "mirror ready");
        Ok(mirror)
    }

    // ── Background ticks ──────────────────────────────────────────────────────

    /// One reconcile cycle. Flush happens before kernel/proxy work: a
    /// failure past that point leaves the flag set and the next tick
    /// retries with the pool already invalidated.
    pub async fn route_tick(&self) -> Result<(), PoolError> {
        let prefix = match self.inner.prefixes.current_prefix().await {
            Ok(prefix) => prefix,
            Err(e) => {
                self.inner.route_ok.store(false, Ordering::Release);
                return Err(e);
            }
        };

        let installed = self.inner.global.get_prefix().await?;
        if installed != Some(prefix.net) {
            tracing::info!(
                old = %installed.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
                new = %prefix.net,
                "prefix changed, invalidating pool"
            );
            self.flush_everything().await?;
            self.inner.global.set_prefix(prefix.net).await?;
            self.inner.needs_reconcile.store(true, Ordering::Release);
        }

        if self.inner.needs_reconcile.load(Ordering::Acquire) {
            let _pause = self.inner.route_lock.write().await;
            match self.inner.routes.reconcile(&prefix).await {
                Ok(()) => self.inner.needs_reconcile.store(false, Ordering::Release),
                Err(e) => {
                    self.inner.route_ok.store(false, Ordering::Release);
                    return Err(e);
                }
            }
        }

        self.inner.route_ok.store(true, Ordering::Release);
        self.inner.replenish_wake.notify_one();
        Ok(())
    }

    /// Top the global DB up to `usable_num`. Returns how many
    /// addresses were minted.
    pub async fn replenish_tick(&self) -> Result<usize, PoolError> {
        if !self.inner.route_ok.load(Ordering::Acquire) {
            return Ok(0);
        }
        let _shared = self.inner.route_lock.read().await;

        let have = self.inner.global.count().await?;
        let want = self.inner.cfg.usable_num;
        if have >= want {
            return Ok(0);
        }

        tracing::info!(have, want, "replenishing global pool");
        let (spawned, complete) = self.inner.spawner.spawn_many(want - have).await?;
        if !complete {
            tracing::warn!(
                got = spawned.len(),
                asked = want - have,
                "replenish fell short of target"
            );
        }
        if !spawned.is_empty() {
            self.sync_tick().await;
        }
        Ok(spawned.len())
    }

    /// Snapshot of the live mirrors. Shard guards must not be held
    /// across awaits, so loops work off this copy.
    fn live_mirrors(&self) -> Vec<MirrorDb> {
        self.inner.mirrors.iter().map(|m| m.clone()).collect()
    }

    /// Reconcile every live mirror against the global set.
    pub async fn sync_tick(&self) {
        let addrs = match self.inner.global.get_all_addrs().await {
            Ok(addrs) => addrs,
            Err(e) => {
                tracing::warn!(error = %e, "mirror sync skipped");
                return;
            }
        };
        for mirror in self.live_mirrors() {
            if let Err(e) = mirror.sync_from_global(&addrs).await {
                tracing::warn!(dbname = mirror.dbname(), error = %e, "mirror sync failed");
            }
        }
    }

    /// Drain dirty flags into saves.
    pub async fn persist_tick(&self) {
        if let Err(e) = self.inner.global.save_if_dirty().await {
            tracing::warn!(error = %e, "global db save failed");
        }
        for mirror in self.live_mirrors() {
            if let Err(e) = mirror.save_if_dirty().await {
                tracing::warn!(dbname = mirror.dbname(), error = %e, "mirror save failed");
            }
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Launch the background loops. Calling twice is a no-op.
    pub fn start(&self) {
        let mut tasks = self.inner.tasks.lock().unwrap();
        if !tasks.is_empty() {
            return;
        }

        let svc = self.clone();
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(svc.inner.cfg.route_check_interval());
            loop {
                tick.tick().await;
                if let Err(e) = svc.route_tick().await {
                    tracing::warn!(error = %e, "route monitor tick failed");
                }
            }
        }));

        let svc = self.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = svc.inner.replenish_wake.notified() => {}
                    _ = tokio::time::sleep(svc.inner.cfg.replenish_interval()) => {}
                }
                match svc.replenish_tick().await {
                    Ok(n) if n > 0 => tracing::info!(spawned = n, "replenish complete"),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "replenish tick failed"),
                }
            }
        }));

        let svc = self.clone();
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(svc.inner.cfg.mirror_sync_interval());
            loop {
                tick.tick().await;
                svc.sync_tick().await;
            }
        }));

        let svc = self.clone();
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(svc.inner.cfg.save_interval());
            loop {
                tick.tick().await;
                svc.persist_tick().await;
            }
        }));

        tracing::info!("background loops started");
    }

    /// Stop the loops and persist everything. Idempotent, bounded:
    /// aborted tasks are joined, not waited out.
    pub async fn stop(&self) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.inner.tasks.lock().unwrap();
            guard.drain(..).collect()
        };
        if tasks.is_empty() {
            return;
        }
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
        if let Err(e) = self.save().await {
            tracing::warn!(error = %e, "final save failed");
        }
        tracing::info!("background loops stopped");
    }

    // ── Service methods (the RPC surface calls these) ─────────────────────────

    pub async fn spawn(&self) -> Result<Ipv6Addr, PoolError> {
        let _shared = self.inner.route_lock.read().await;
        self.inner.spawner.spawn_one().await
    }

    pub async fn spawns(&self, num: usize) -> Result<(Vec<Ipv6Addr>, bool), PoolError> {
        let _shared = self.inner.route_lock.read().await;
        self.inner.spawner.spawn_many(num).await
    }

    pub async fn check(&self, addr: Ipv6Addr) -> bool {
        self.inner.prober.check(addr).await
    }

    pub async fn checks(&self, addrs: &[Ipv6Addr]) -> Vec<bool> {
        self.inner.prober.checks(addrs).await
    }

    /// Hand out an idle address from the tenant's mirror, creating the
    /// mirror on first use. An empty mirror gets one immediate sync
    /// before giving up; starvation wakes the replenisher and surfaces
    /// `NoAddress` — retry is the client's job.
    pub async fn pick(&self, dbname: &str) -> Result<Ipv6Addr, PoolError> {
        let mirror = self.ensure_mirror(dbname).await?;
        if mirror.is_empty().await? {
            mirror
                .sync_from_global(&self.inner.global.get_all_addrs().await?)
                .await?;
        }
        match mirror.get_idle_addr().await? {
            Some(addr) => {
                if mirror.idle_count().await? < self.inner.cfg.usable_num {
                    self.inner.replenish_wake.notify_one();
                }
                tracing::debug!(dbname, %addr, "picked");
                Ok(addr)
            }
            None => {
                self.inner.replenish_wake.notify_one();
                Err(PoolError::NoAddress)
            }
        }
    }

    /// Up to `num` addresses; a short return is fine, an empty one is
    /// `NoAddress`.
    pub async fn picks(&self, dbname: &str, num: usize) -> Result<Vec<Ipv6Addr>, PoolError> {
        let mut addrs = Vec::new();
        for _ in 0..num {
            match self.pick(dbname).await {
                Ok(addr) => addrs.push(addr),
                Err(PoolError::NoAddress) => break,
                Err(e) => return Err(e),
            }
        }
        if addrs.is_empty() {
            return Err(PoolError::NoAddress);
        }
        Ok(addrs)
    }

    /// Apply a tenant's verdict. Unknown mirrors are an error; unknown
    /// addresses are not — reports can outlive a flush or get replayed.
    pub async fn report(&self, dbname: &str, info: &AddrReportInfo) -> Result<bool, PoolError> {
        info.validate()?;
        let mirror = self
            .inner
            .mirrors
            .get(dbname)
            .map(|m| m.clone())
            .ok_or_else(|| PoolError::NoMirror(dbname.to_string()))?;
        mirror.release_addr(info).await
    }

    pub async fn reports(
        &self,
        dbname: &str,
        infos: &[AddrReportInfo],
    ) -> Result<bool, PoolError> {
        for info in infos {
            info.validate()?;
        }
        let mut all = true;
        for info in infos {
            all &= self.report(dbname, info).await?;
        }
        Ok(all)
    }

    pub async fn save(&self) -> Result<(), PoolError> {
        self.inner.global.save().await?;
        for mirror in self.live_mirrors() {
            mirror.save().await?;
        }
        Ok(())
    }

    pub async fn load(&self) -> Result<(), PoolError> {
        self.inner.global.load().await;
        for mirror in self.live_mirrors() {
            mirror.load().await;
        }
        Ok(())
    }

    /// Flush one mirror (then resync it from global), or everything.
    pub async fn flush(&self, dbname: Option<&str>) -> Result<(), PoolError> {
        match dbname {
            None => self.flush_everything().await,
            Some(dbname) => {
                let mirror = self
                    .inner
                    .mirrors
                    .get(dbname)
                    .map(|m| m.clone())
                    .ok_or_else(|| PoolError::NoMirror(dbname.to_string()))?;
                mirror.flush().await?;
                mirror
                    .sync_from_global(&self.inner.global.get_all_addrs().await?)
                    .await
            }
        }
    }

    async fn flush_everything(&self) -> Result<(), PoolError> {
        self.inner.global.flush().await?;
        for mirror in self.live_mirrors() {
            mirror.flush().await?;
        }
        Ok(())
    }

    pub async fn global_stats(&self) -> Result<GlobalStats, PoolError> {
        self.inner.global.stats().await
    }

    pub async fn mirror_stats(&self, dbname: &str) -> Result<MirrorStats, PoolError> {
        let mirror = self
            .inner
            .mirrors
            .get(dbname)
            .map(|m| m.clone())
            .ok_or_else(|| PoolError::NoMirror(dbname.to_string()))?;
        mirror.get_stats().await
    }

    pub fn mirror_names(&self) -> Vec<String> {
        self.inner.mirrors.iter().map(|m| m.key().clone()).collect()
    }
}
