//! Global address database — the set of verified-usable addresses for
//! this host, versioned by the prefix they were verified under.
//!
//! Invariants:
//! - every stored address lies inside the installed prefix;
//! - addresses are inserted only after a successful usability check
//!   (the spawner's job — this module just refuses prefix violations);
//! - installing a different prefix empties the set first.
//!
//! One exclusive writer, many concurrent readers. Disk writes are
//! batched: mutations set a dirty flag that the persistence loop
//! drains on its own cadence, and `save` itself is atomic.

use std::collections::BTreeSet;
use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ipnetwork::Ipv6Network;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::time::timeout;

use sixpool_core::{GlobalStats, PoolError};

use crate::persist;

#[derive(Debug, Default)]
struct GlobalState {
    prefix: Option<Ipv6Network>,
    addrs: BTreeSet<Ipv6Addr>,
}

/// Serialized form: `{"prefix": "2001:db8::/64", "addrs": ["...", ...]}`.
/// `addrs` is sorted by construction, so mutation-free saves are
/// byte-identical.
#[derive(Debug, Serialize, Deserialize)]
struct GlobalFile {
    prefix: Option<String>,
    addrs: Vec<String>,
}

struct GlobalDbInner {
    path: PathBuf,
    ceiling: Duration,
    state: RwLock<GlobalState>,
    dirty: AtomicBool,
}

#[derive(Clone)]
pub struct GlobalDb {
    inner: Arc<GlobalDbInner>,
}

impl GlobalDb {
    /// Open the database at `path`, loading any existing state.
    /// A missing file is an empty database; a corrupt one is
    /// quarantined.
    pub async fn open(path: PathBuf, ceiling: Duration) -> Self {
        let db = Self {
            inner: Arc::new(GlobalDbInner {
                path,
                ceiling,
                state: RwLock::new(GlobalState::default()),
                dirty: AtomicBool::new(false),
            }),
        };
        db.load().await;
        db
    }

    async fn read(&self) -> Result<RwLockReadGuard<'_, GlobalState>, PoolError> {
        timeout(self.inner.ceiling, self.inner.state.read())
            .await
            .map_err(|_| PoolError::Busy)
    }

    async fn write(&self) -> Result<RwLockWriteGuard<'_, GlobalState>, PoolError> {
        timeout(self.inner.ceiling, self.inner.state.write())
            .await
            .map_err(|_| PoolError::Busy)
    }

    /// Insert a verified address. Returns false on a duplicate or an
    /// address outside the installed prefix (a spawn that lost a race
    /// with a prefix change); errors only when no prefix is installed.
    pub async fn add_addr(&self, addr: Ipv6Addr) -> Result<bool, PoolError> {
        let mut state = self.write().await?;
        let prefix = state.prefix.ok_or(PoolError::NoPrefix)?;
        if !prefix.contains(addr) {
            tracing::debug!(%addr, %prefix, "rejecting address outside installed prefix");
            return Ok(false);
        }
        let inserted = state.addrs.insert(addr);
        if inserted {
            self.inner.dirty.store(true, Ordering::Release);
        }
        Ok(inserted)
    }

    pub async fn has_addr(&self, addr: Ipv6Addr) -> Result<bool, PoolError> {
        Ok(self.read().await?.addrs.contains(&addr))
    }

    pub async fn count(&self) -> Result<usize, PoolError> {
        Ok(self.read().await?.addrs.len())
    }

    pub async fn get_all_addrs(&self) -> Result<BTreeSet<Ipv6Addr>, PoolError> {
        Ok(self.read().await?.addrs.clone())
    }

    pub async fn get_prefix(&self) -> Result<Option<Ipv6Network>, PoolError> {
        Ok(self.read().await?.prefix)
    }

    /// Install a prefix. Installing a different network empties the
    /// address set — stale addresses must never survive into the new
    /// prefix.
    pub async fn set_prefix(&self, net: Ipv6Network) -> Result<(), PoolError> {
        let mut state = self.write().await?;
        if state.prefix == Some(net) {
            return Ok(());
        }
        if state.prefix.is_some() {
            state.addrs.clear();
        }
        state.prefix = Some(net);
        self.inner.dirty.store(true, Ordering::Release);
        Ok(())
    }

    pub async fn stats(&self) -> Result<GlobalStats, PoolError> {
        let state = self.read().await?;
        Ok(GlobalStats {
            total: state.addrs.len(),
            prefix: state.prefix.map(|p| p.to_string()),
        })
    }

    /// Persist current state. Held read lock keeps writers out for the
    /// duration, so a save never interleaves with a mutation.
    pub async fn save(&self) -> Result<(), PoolError> {
        let state = self.read().await?;
        let file = GlobalFile {
            prefix: state.prefix.map(|p| p.to_string()),
            addrs: state.addrs.iter().map(|a| a.to_string()).collect(),
        };
        let bytes = serde_json::to_vec_pretty(&file)
            .map_err(|e| PoolError::Internal(format!("serialize global db: {e}")))?;
        persist::write_atomic(&self.inner.path, &bytes)
            .await
            .map_err(|e| PoolError::Internal(format!("write global db: {e}")))?;
        tracing::debug!(addrs = file.addrs.len(), "global db saved");
        Ok(())
    }

    /// Persistence-loop entry: save only when something changed since
    /// the last save. Coalesces bursts of mutations into one write.
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

    /// Replace in-memory state from disk.
    pub async fn load(&self) {
        let Some(file) = persist::load_json::<GlobalFile>(&self.inner.path).await else {
            return;
        };
        let prefix = file.prefix.as_deref().and_then(|p| p.parse().ok());
        let addrs: BTreeSet<Ipv6Addr> = file
            .addrs
            .iter()
            .filter_map(|a| a.parse().ok())
            .filter(|a| prefix.map(|p: Ipv6Network| p.contains(*a)).unwrap_or(false))
            .collect();
        let mut state = self.inner.state.write().await;
        tracing::info!(addrs = addrs.len(), prefix = ?prefix, "global db loaded");
        state.prefix = prefix;
        state.addrs = addrs;
    }

    /// Clear in-memory state and the on-disk file. The prefix itself
    /// survives a flush; only the addresses are invalidated.
    pub async fn flush(&self) -> Result<(), PoolError> {
        {
            let mut state = self.write().await?;
            state.addrs.clear();
        }
        self.inner.dirty.store(false, Ordering::Release);
        self.save().await
    }
}
