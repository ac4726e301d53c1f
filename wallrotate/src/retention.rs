//! Keeps an output directory at a fixed number of wallpapers, oldest first.

use crate::file_manager::{entries_by_age, EntryKind};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetentionReport {
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

/// Deletes all but the `keep` most recent entries of `dir`.
///
/// Failures are logged per entry and the sweep carries on with the rest.
pub fn enforce(dir: &Path, keep: usize, kind: EntryKind) -> RetentionReport {
    let keep = keep.max(1);
    let mut report = RetentionReport::default();

    let entries = match entries_by_age(dir, kind) {
        Ok(entries) => entries,
        Err(e) => {
            error!("Failed to list {} for cleanup: {}", dir.display(), e);
            return report;
        }
    };
    if entries.len() <= keep {
        return report;
    }

    let excess = entries.len() - keep;
    for path in entries.into_iter().take(excess) {
        info!("Deleting old wallpaper: {}", path.display());
        let result = match kind {
            EntryKind::Directories => remove_dir_forcefully(&path),
            EntryKind::Files(_) => std::fs::remove_file(&path),
        };
        match result {
            Ok(()) => report.deleted.push(path),
            Err(e) => {
                error!("Failed to delete {}: {}", path.display(), e);
                report.failed.push(path);
            }
        }
    }
    report
}

fn remove_dir_forcefully(dir: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if let Err(e) = make_writable(entry.path()) {
            warn!("Could not clear read-only flag on {}: {}", entry.path().display(), e);
        }
    }
    std::fs::remove_dir_all(dir)
}

#[cfg(unix)]
fn make_writable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let meta = std::fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Ok(());
    }
    let mode = meta.permissions().mode();
    let wanted = if meta.is_dir() { mode | 0o700 } else { mode | 0o600 };
    if wanted != mode {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(wanted))?;
    }
    Ok(())
}

#[cfg(not(unix))]
#[allow(clippy::permissions_set_readonly_false)]
fn make_writable(path: &Path) -> std::io::Result<()> {
    let mut perms = std::fs::metadata(path)?.permissions();
    if perms.readonly() {
        perms.set_readonly(false);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}
