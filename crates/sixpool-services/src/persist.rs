//! On-disk persistence helpers shared by the DB modules.
//!
//! Writes are atomic: write to a temp file, fsync, then rename. A
//! partial write can at worst leave a stale `.tmp` behind, never a
//! corrupt state file. A file that fails to parse is quarantined with
//! a `.corrupt` suffix and treated as empty.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;

pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
    }
    tokio::fs::rename(&tmp, path).await
}

/// Load a JSON state file. Missing → `None` (fresh state). Unparseable
/// → quarantined and `None`.
pub async fn load_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(_) => return None,
    };
    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            let quarantine = corrupt_path(path);
            tracing::warn!(
                path = %path.display(),
                error = %e,
                quarantine = %quarantine.display(),
                "state file unreadable, starting fresh"
            );
            let _ = tokio::fs::rename(path, &quarantine).await;
            None
        }
    }
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".corrupt");
    PathBuf::from(name)
}
