//! Advisory record of downloaded workshop items.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
}

pub type DownloadHistory = BTreeMap<String, HistoryEntry>;

/// Reads the history file. Missing or corrupt files read as empty.
pub async fn load(path: &Path) -> DownloadHistory {
    match fs::read_to_string(path).await {
        Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
            log::warn!("Ignoring unreadable history {}: {}", path.display(), e);
            DownloadHistory::new()
        }),
        Err(_) => DownloadHistory::new(),
    }
}

/// Records `id` as downloaded to `item_dir`.
pub async fn append(path: &Path, id: &str, item_dir: &Path) -> Result<()> {
    let mut history = load(path).await;
    history.insert(
        id.to_string(),
        HistoryEntry {
            timestamp: Utc::now(),
            path: item_dir.to_path_buf(),
        },
    );
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, serde_json::to_string_pretty(&history)?).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_keeps_previous_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallpaper_history.json");

        append(&path, "111", &dir.path().join("111")).await.unwrap();
        append(&path, "222", &dir.path().join("222")).await.unwrap();

        let history = load(&path).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history["222"].path, dir.path().join("222"));
    }

    #[tokio::test]
    async fn test_corrupt_history_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallpaper_history.json");
        std::fs::write(&path, "garbage").unwrap();

        append(&path, "9", dir.path()).await.unwrap();
        assert_eq!(load(&path).await.len(), 1);
    }
}
