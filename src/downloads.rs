//! Download reconciliation.
//!
//! The browser driver writes downloads to `{scratch_root}/browser_use_agent_*/
//! browseruse_agent_data/` and ignores the configured downloads path (a CDP
//! download-handling limitation). After each task we sweep those scratch
//! directories and move their files into the task's download directory,
//! renaming on collision instead of overwriting.

use std::path::{Path, PathBuf};

/// Scratch directory prefix the driver names its per-agent temp dirs with.
const SCRATCH_DIR_PREFIX: &str = "browser_use_agent_";

/// Child directory inside a scratch dir that holds the downloaded files.
const SCRATCH_DATA_DIR: &str = "browseruse_agent_data";

/// Moves driver-dropped downloads into their task directory.
#[derive(Debug, Clone)]
pub struct DownloadReconciler {
    scratch_root: PathBuf,
    downloads_root: PathBuf,
}

impl DownloadReconciler {
    pub fn new(scratch_root: PathBuf, downloads_root: PathBuf) -> Self {
        Self {
            scratch_root,
            downloads_root,
        }
    }

    /// Move every file found in driver scratch directories into `target_dir`.
    ///
    /// Returns the moved files' paths relative to the downloads root, in
    /// stable (sorted) order. A failed move is logged and skipped; one bad
    /// file never aborts the rest. No scratch directories is the common case
    /// and yields an empty list.
    pub fn reconcile(&self, target_dir: &Path) -> Vec<String> {
        let mut moved = Vec::new();

        let scratch_dirs = self.find_scratch_dirs();
        if scratch_dirs.is_empty() {
            tracing::debug!("No driver download directories found in {}", self.scratch_root.display());
            return moved;
        }

        tracing::info!(
            "Found {} driver download directories in {}",
            scratch_dirs.len(),
            self.scratch_root.display()
        );

        for scratch_dir in scratch_dirs {
            tracing::info!("Processing download directory: {}", scratch_dir.display());

            for file in sorted_entries(&scratch_dir) {
                if !file.is_file() {
                    continue;
                }

                let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
                    tracing::warn!("Skipping download with non-UTF-8 name: {}", file.display());
                    continue;
                };

                let mut dest = target_dir.join(name);
                if dest.exists() {
                    dest = target_dir.join(collision_name(&dest));
                    tracing::warn!(
                        "File conflict, renaming: {} -> {}",
                        name,
                        dest.file_name().and_then(|n| n.to_str()).unwrap_or(name)
                    );
                }

                match move_file(&file, &dest) {
                    Ok(()) => {
                        tracing::info!("Moved downloaded file: {} -> {}", name, dest.display());
                        let relative = dest
                            .strip_prefix(&self.downloads_root)
                            .unwrap_or(&dest)
                            .to_string_lossy()
                            .into_owned();
                        moved.push(relative);
                    }
                    Err(e) => {
                        tracing::error!("Failed to move file {}: {}", file.display(), e);
                    }
                }
            }

            // Drop the emptied data dir and, if nothing else lives there, its
            // parent scratch dir too.
            if let Err(e) = std::fs::remove_dir_all(&scratch_dir) {
                tracing::warn!("Failed to remove temp directory {}: {}", scratch_dir.display(), e);
            } else {
                tracing::info!("Cleaned up temp directory: {}", scratch_dir.display());
                if let Some(parent) = scratch_dir.parent() {
                    let _ = std::fs::remove_dir(parent);
                }
            }
        }

        moved
    }

    /// Locate `browser_use_agent_*/browseruse_agent_data` dirs under the
    /// scratch root, sorted for deterministic processing order.
    fn find_scratch_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = sorted_entries(&self.scratch_root)
            .into_iter()
            .filter(|p| {
                p.is_dir()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(SCRATCH_DIR_PREFIX))
            })
            .map(|p| p.join(SCRATCH_DATA_DIR))
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();
        dirs
    }
}

/// Directory entries sorted by name. Missing/unreadable dirs yield nothing.
fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(iter) => iter.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    };
    entries.sort();
    entries
}

/// Timestamp-suffixed filename for a colliding destination.
fn collision_name(dest: &Path) -> String {
    let stem = dest
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("download");
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    match dest.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_{}.{}", stem, timestamp, ext),
        None => format!("{}_{}", stem, timestamp),
    }
}

/// Move a file, falling back to copy+remove when rename crosses filesystems
/// (scratch lives under /tmp, downloads usually on another mount).
fn move_file(src: &Path, dest: &Path) -> std::io::Result<()> {
    match std::fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(src, dest)?;
            std::fs::remove_file(src)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_scratch_file(scratch_root: &Path, agent_dir: &str, name: &str, contents: &[u8]) {
        let data_dir = scratch_root
            .join(format!("{}{}", SCRATCH_DIR_PREFIX, agent_dir))
            .join(SCRATCH_DATA_DIR);
        std::fs::create_dir_all(&data_dir).unwrap();
        std::fs::write(data_dir.join(name), contents).unwrap();
    }

    #[test]
    fn no_scratch_dirs_yields_empty_list() {
        let scratch = tempdir().unwrap();
        let downloads = tempdir().unwrap();
        let target = downloads.path().join("default/task_1");
        std::fs::create_dir_all(&target).unwrap();

        let reconciler =
            DownloadReconciler::new(scratch.path().to_path_buf(), downloads.path().to_path_buf());
        assert!(reconciler.reconcile(&target).is_empty());
    }

    #[test]
    fn moves_files_and_removes_scratch_dir() {
        let scratch = tempdir().unwrap();
        let downloads = tempdir().unwrap();
        let target = downloads.path().join("customer_1/task_ab");
        std::fs::create_dir_all(&target).unwrap();

        write_scratch_file(scratch.path(), "x1", "report.pdf", b"pdf bytes");

        let reconciler =
            DownloadReconciler::new(scratch.path().to_path_buf(), downloads.path().to_path_buf());
        let moved = reconciler.reconcile(&target);

        assert_eq!(moved, vec!["customer_1/task_ab/report.pdf".to_string()]);
        assert_eq!(std::fs::read(target.join("report.pdf")).unwrap(), b"pdf bytes");
        assert!(!scratch
            .path()
            .join(format!("{}x1", SCRATCH_DIR_PREFIX))
            .exists());
    }

    #[test]
    fn collision_keeps_both_files() {
        let scratch = tempdir().unwrap();
        let downloads = tempdir().unwrap();
        let target = downloads.path().join("default/task_cd");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("report.pdf"), b"original").unwrap();

        write_scratch_file(scratch.path(), "x2", "report.pdf", b"new download");

        let reconciler =
            DownloadReconciler::new(scratch.path().to_path_buf(), downloads.path().to_path_buf());
        let moved = reconciler.reconcile(&target);

        assert_eq!(moved.len(), 1);
        let renamed = &moved[0];
        assert_ne!(renamed, "default/task_cd/report.pdf");
        assert!(renamed.starts_with("default/task_cd/report_"));
        assert!(renamed.ends_with(".pdf"));

        // Last write wins under its new name; the original is untouched
        assert_eq!(std::fs::read(target.join("report.pdf")).unwrap(), b"original");
        let renamed_file = downloads.path().join(renamed);
        assert_eq!(std::fs::read(renamed_file).unwrap(), b"new download");
    }

    #[test]
    fn sweeps_multiple_scratch_dirs() {
        let scratch = tempdir().unwrap();
        let downloads = tempdir().unwrap();
        let target = downloads.path().join("default/task_ef");
        std::fs::create_dir_all(&target).unwrap();

        write_scratch_file(scratch.path(), "a", "one.txt", b"1");
        write_scratch_file(scratch.path(), "b", "two.txt", b"2");

        let reconciler =
            DownloadReconciler::new(scratch.path().to_path_buf(), downloads.path().to_path_buf());
        let moved = reconciler.reconcile(&target);

        assert_eq!(
            moved,
            vec![
                "default/task_ef/one.txt".to_string(),
                "default/task_ef/two.txt".to_string()
            ]
        );
    }

    #[test]
    fn skips_directories_inside_data_dir() {
        let scratch = tempdir().unwrap();
        let downloads = tempdir().unwrap();
        let target = downloads.path().join("default/task_gh");
        std::fs::create_dir_all(&target).unwrap();

        write_scratch_file(scratch.path(), "c", "file.bin", b"data");
        let nested = scratch
            .path()
            .join(format!("{}c", SCRATCH_DIR_PREFIX))
            .join(SCRATCH_DATA_DIR)
            .join("nested");
        std::fs::create_dir_all(&nested).unwrap();

        let reconciler =
            DownloadReconciler::new(scratch.path().to_path_buf(), downloads.path().to_path_buf());
        let moved = reconciler.reconcile(&target);

        assert_eq!(moved, vec!["default/task_gh/file.bin".to_string()]);
    }

    #[test]
    fn unrelated_tmp_dirs_are_left_alone() {
        let scratch = tempdir().unwrap();
        let downloads = tempdir().unwrap();
        let target = downloads.path().join("default/task_ij");
        std::fs::create_dir_all(&target).unwrap();

        let unrelated = scratch.path().join("systemd-private-xyz");
        std::fs::create_dir_all(&unrelated).unwrap();
        std::fs::write(unrelated.join("keep.txt"), b"keep").unwrap();

        let reconciler =
            DownloadReconciler::new(scratch.path().to_path_buf(), downloads.path().to_path_buf());
        assert!(reconciler.reconcile(&target).is_empty());
        assert!(unrelated.join("keep.txt").exists());
    }
}
