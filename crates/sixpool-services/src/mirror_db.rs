//! Per-tenant mirror of the global address set.
//!
//! A mirror tracks one tenant's view: the same addresses as the global
//! DB (as of the last sync) plus a per-address status. Transitions are
//! narrow on purpose: idle→using only through `get_idle_addr`,
//! using→idle|bad only through `release_addr`, and bad stays bad until
//! a flush.

use std::collections::BTreeMap;
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;

use sixpool_core::{AddrReportInfo, AddrStatus, MirrorStats, PoolError};

use crate::persist;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MirrorEntry {
    status: AddrStatus,
    /// Unix seconds of the last status transition. Drives LRU picks.
    ts: u64,
    #[serde(default)]
    use_count: u64,
}

impl MirrorEntry {
    fn fresh() -> Self {
        Self { status: AddrStatus::Idle, ts: now_secs(), use_count: 0 }
    }
}

/// Serialized form: `{"addrs": {"2001:db8::1": {"status": "idle", "ts": ...}, ...}}`.
#[derive(Debug, Serialize, Deserialize)]
struct MirrorFile {
    addrs: BTreeMap<String, MirrorEntry>,
}

struct MirrorInner {
    dbname: String,
    path: PathBuf,
    ceiling: Duration,
    state: Mutex<BTreeMap<Ipv6Addr, MirrorEntry>>,
    dirty: AtomicBool,
}

#[derive(Clone)]
pub struct MirrorDb {
    inner: Arc<MirrorInner>,
}

impl MirrorDb {
    /// Open (or create) the mirror for `dbname` under the mirrors
    /// directory, loading any persisted state.
    pub async fn open(dbname: &str, dir: &Path, ceiling: Duration) -> Self {
        let db = Self {
            inner: Arc::new(MirrorInner {
                dbname: dbname.to_string(),
                path: dir.join(format!("{dbname}.json")),
                ceiling,
                state: Mutex::new(BTreeMap::new()),
                dirty: AtomicBool::new(false),
            }),
        };
        db.load().await;
        db
    }

    pub fn dbname(&self) -> &str {
        &self.inner.dbname
    }

    async fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<Ipv6Addr, MirrorEntry>>, PoolError> {
        timeout(self.inner.ceiling, self.inner.state.lock())
            .await
            .map_err(|_| PoolError::Busy)
    }

    fn mark_dirty(&self) {
        self.inner.dirty.store(true, Ordering::Release);
    }

    /// One atomic reconciliation against the global address set:
    /// unknown addresses come in as idle, departed addresses drop out,
    /// everything else keeps its status — including bad.
    pub async fn sync_from_global<'a>(
        &self,
        global_addrs: impl IntoIterator<Item = &'a Ipv6Addr>,
    ) -> Result<(), PoolError> {
        let mut state = self.lock().await?;
        let global: std::collections::BTreeSet<Ipv6Addr> =
            global_addrs.into_iter().copied().collect();

        let before = state.len();
        state.retain(|a, _| global.contains(a));
        let mut changed = state.len() != before;
        for a in &global {
            if !state.contains_key(a) {
                state.insert(*a, MirrorEntry::fresh());
                changed = true;
            }
        }
        if changed {
            self.mark_dirty();
        }
        Ok(())
    }

    /// Hand out the least-recently-transitioned idle address, flipping
    /// it to `using` under the same lock. Textual order breaks ties.
    /// An empty pool is not an error — the caller decides what empty
    /// means.
    pub async fn get_idle_addr(&self) -> Result<Option<Ipv6Addr>, PoolError> {
        let mut state = self.lock().await?;
        let picked = state
            .iter()
            .filter(|(_, e)| e.status == AddrStatus::Idle)
            .min_by_key(|(_, e)| e.ts)
            .map(|(a, _)| *a);
        if let Some(addr) = picked {
            if let Some(entry) = state.get_mut(&addr) {
                entry.status = AddrStatus::Using;
                entry.ts = now_secs();
                entry.use_count += 1;
            }
            self.mark_dirty();
        }
        Ok(picked)
    }

    /// Apply a client report. Only a `using` address can be released;
    /// anything else (including an address the mirror has never seen)
    /// is a no-op returning false — reports may race syncs and
    /// flushes, and the network may replay them.
    pub async fn release_addr(&self, report: &AddrReportInfo) -> Result<bool, PoolError> {
        let mut state = self.lock().await?;
        let Some(entry) = state.get_mut(&report.addr) else {
            return Ok(false);
        };
        if entry.status != AddrStatus::Using {
            return Ok(false);
        }
        entry.status = report.status;
        entry.ts = now_secs();
        self.mark_dirty();
        if report.status == AddrStatus::Bad {
            tracing::info!(
                dbname = %self.inner.dbname,
                addr = %report.addr,
                reason = report.reason.as_deref().unwrap_or("-"),
                "address marked bad"
            );
        }
        Ok(true)
    }

    pub async fn get_stats(&self) -> Result<MirrorStats, PoolError> {
        let state = self.lock().await?;
        let mut stats = MirrorStats { total: state.len(), idle: 0, using: 0, bad: 0 };
        for entry in state.values() {
            match entry.status {
                AddrStatus::Idle => stats.idle += 1,
                AddrStatus::Using => stats.using += 1,
                AddrStatus::Bad => stats.bad += 1,
            }
        }
        Ok(stats)
    }

    pub async fn idle_count(&self) -> Result<usize, PoolError> {
        Ok(self.get_stats().await?.idle)
    }

    pub async fn is_empty(&self) -> Result<bool, PoolError> {
        Ok(self.lock().await?.is_empty())
    }

    pub async fn save(&self) -> Result<(), PoolError> {
        let state = self.lock().await?;
        let file = MirrorFile {
            addrs: state.iter().map(|(a, e)| (a.to_string(), e.clone())).collect(),
        };
        let bytes = serde_json::to_vec_pretty(&file)
            .map_err(|e| PoolError::Internal(format!("serialize mirror {}: {e}", self.inner.dbname)))?;
        persist::write_atomic(&self.inner.path, &bytes)
            .await
            .map_err(|e| PoolError::Internal(format!("write mirror {}: {e}", self.inner.dbname)))?;
        tracing::debug!(dbname = %self.inner.dbname, addrs = file.addrs.len(), "mirror saved");
        Ok(())
    }

    pub async fn save_if_dirty(&self) -> Result<(), PoolError> {
        if !self.inner.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = self.save().await {
            self.inner.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }

    pub async fn load(&self) {
        let Some(file) = persist::load_json::<MirrorFile>(&self.inner.path).await else {
            return;
        };
        let addrs: BTreeMap<Ipv6Addr, MirrorEntry> = file
            .addrs
            .into_iter()
            .filter_map(|(a, e)| a.parse().ok().map(|a| (a, e)))
            .collect();
        tracing::info!(dbname = %self.inner.dbname, addrs = addrs.len(), "mirror loaded");
        *self.inner.state.lock().await = addrs;
    }

    /// Drop every entry — including bad and using ones — and persist
    /// the empty state. The only way bad addresses leave a mirror.
    pub async fn flush(&self) -> Result<(), PoolError> {
        self.lock().await?.clear();
        self.inner.dirty.store(false, Ordering::Release);
        self.save().await
    }
}
