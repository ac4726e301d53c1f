use crate::error::{Result, WallError};
use log::{debug, warn};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;

const APP_DIR_NAME: &str = "WallRotate";
const PART_EXT: &str = "part";

pub fn init_app_data_dir(override_dir: Option<&Path>) -> std::io::Result<PathBuf> {
    let app_data_path = if let Some(dir) = override_dir {
        dir.to_path_buf()
    } else if let Ok(s) = std::env::var("APPDATA") {
        PathBuf::from(s).join(APP_DIR_NAME)
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config").join(APP_DIR_NAME)
    } else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Failed to determine app data directory",
        ));
    };

    std::fs::create_dir_all(app_data_path.join("logs"))?;
    Ok(app_data_path)
}

/// Downloads `url` to `dest`. The body lands in a `.part` file first and is
/// renamed into place, so an aborted transfer never leaves a truncated image.
///
/// `cancel` interrupts the transfer. Once the body is in memory the write and
/// rename run on a blocking thread and finish even if this future is dropped.
pub async fn download_file(
    client: &Client,
    url: &str,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    if dest.exists() {
        debug!("File {} already exists, skipping download.", dest.display());
        return Ok(());
    }

    debug!("Downloading {} to {}", url, dest.display());
    let bytes = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(WallError::Cancelled),
        bytes = fetch_body(client, url) => bytes?,
    };

    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomically(&dest, &bytes))
        .await
        .map_err(|e| WallError::Process(format!("Write task failed: {}", e)))?
        .map_err(WallError::from)
}

async fn fetch_body(client: &Client, url: &str) -> Result<Vec<u8>> {
    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        return Err(WallError::Network(format!(
            "Failed to download {}: Status {}",
            url,
            resp.status()
        )));
    }
    Ok(resp.bytes().await?.to_vec())
}

fn write_atomically(dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let part = part_path(dest);
    if let Err(e) = std::fs::write(&part, bytes).and_then(|()| std::fs::rename(&part, dest)) {
        let _ = std::fs::remove_file(&part);
        return Err(e);
    }
    Ok(())
}

/// Removes `.part` files left in `dir` by a transfer that was killed midway.
/// Returns how many were removed.
pub fn remove_partials(dir: &Path) -> usize {
    let Ok(read) = std::fs::read_dir(dir) else {
        return 0;
    };
    let mut removed = 0;
    for path in read.flatten().map(|e| e.path()) {
        let is_part = path.extension().is_some_and(|ext| ext == PART_EXT);
        if !is_part || !path.is_file() {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed stale partial {}", path.display());
                removed += 1;
            }
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
    removed
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(PART_EXT);
    dest.with_file_name(name)
}

/// Which directory entries a sweep or lookup considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular files with this extension (case-insensitive, no dot).
    Files(&'static str),
    Directories,
}

impl EntryKind {
    fn matches(self, path: &Path, is_dir: bool) -> bool {
        match self {
            EntryKind::Directories => is_dir,
            EntryKind::Files(ext) => {
                !is_dir
                    && path
                        .extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
            }
        }
    }
}

/// Matching entries of `dir`, oldest first. Creation time is used where the
/// platform reports it, modification time otherwise. A missing directory is
/// treated as empty.
pub fn entries_by_age(dir: &Path, kind: EntryKind) -> std::io::Result<Vec<PathBuf>> {
    let read = match std::fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut entries: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in read {
        let entry = entry?;
        let path = entry.path();
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(e) => {
                debug!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        if !kind.matches(&path, meta.is_dir()) {
            continue;
        }
        let stamp = meta
            .created()
            .or_else(|_| meta.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        entries.push((stamp, path));
    }
    entries.sort();
    Ok(entries.into_iter().map(|(_, path)| path).collect())
}

/// The most recently created matching entry.
pub fn latest_entry(dir: &Path, kind: EntryKind) -> Option<PathBuf> {
    entries_by_age(dir, kind).ok()?.pop()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_entries_by_age_filters_and_orders() {
        let dir = TempDir::new().unwrap();
        for name in ["a.jpg", "b.JPG", "c.png"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
            std::thread::sleep(Duration::from_millis(30));
        }
        std::fs::create_dir(dir.path().join("sub.jpg")).unwrap();

        let files = entries_by_age(dir.path(), EntryKind::Files("jpg")).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.JPG"]);

        let dirs = entries_by_age(dir.path(), EntryKind::Directories).unwrap();
        assert_eq!(dirs.len(), 1);
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(entries_by_age(&missing, EntryKind::Directories)
            .unwrap()
            .is_empty());
        assert!(latest_entry(&missing, EntryKind::Files("jpg")).is_none());
    }

    #[test]
    fn test_latest_entry_picks_newest() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("old.jpg"), b"x").unwrap();
        std::thread::sleep(Duration::from_millis(30));
        std::fs::write(dir.path().join("new.jpg"), b"x").unwrap();
        let latest = latest_entry(dir.path(), EntryKind::Files("jpg")).unwrap();
        assert_eq!(latest.file_name().unwrap(), "new.jpg");
    }

    #[test]
    fn test_write_atomically_leaves_no_partial() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("w").join("1_bob.jpg");
        write_atomically(&dest, b"jpeg").unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"jpeg");
        assert!(!part_path(&dest).exists());
    }

    #[test]
    fn test_remove_partials_only_touches_part_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("1_bob.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("2_ann.jpg.part"), b"x").unwrap();
        std::fs::write(dir.path().join("3_eve.jpg.part"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("dir.part")).unwrap();

        assert_eq!(remove_partials(dir.path()), 2);
        assert!(dir.path().join("1_bob.jpg").is_file());
        assert!(dir.path().join("dir.part").is_dir());
        assert_eq!(remove_partials(&dir.path().join("missing")), 0);
    }

    #[tokio::test]
    async fn test_cancelled_download_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("1_bob.jpg");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = download_file(&Client::new(), "http://127.0.0.1:9/x.jpg", &dest, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/tmp/w/1_bob.jpg")),
            PathBuf::from("/tmp/w/1_bob.jpg.part")
        );
    }
}
