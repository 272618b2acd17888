//! Detecting finished downloads from the download directory alone.
//!
//! The browser gives no "download finished" event, so a download counts as
//! done once a new file with the wanted extension exists, nothing in the
//! directory still carries the in-progress suffix, and the file's size holds
//! across one more sampling interval.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

/// Suffix Chromium gives files that are still being written.
pub const IN_PROGRESS_SUFFIX: &str = "crdownload";

/// Paths currently in `dir`. An unreadable directory yields an empty set.
pub fn snapshot(dir: &Path) -> HashSet<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(e) => {
            warn!("Could not list {}: {}", dir.display(), e);
            HashSet::new()
        }
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

fn modified(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Watches one directory for the file produced by a triggered download.
#[derive(Debug, Clone)]
pub struct CompletionPoller {
    dir: PathBuf,
    extension: String,
    interval: Duration,
}

impl CompletionPoller {
    pub fn new(dir: &Path, extension: &str, interval: Duration) -> Self {
        Self {
            dir: dir.to_path_buf(),
            extension: extension.to_string(),
            interval,
        }
    }

    pub fn snapshot(&self) -> HashSet<PathBuf> {
        snapshot(&self.dir)
    }

    /// Newest new file with the wanted extension, provided no download is
    /// still in progress anywhere in the directory.
    fn candidate(&self, before: &HashSet<PathBuf>) -> Option<PathBuf> {
        let current = self.snapshot();
        if current.iter().any(|p| has_extension(p, IN_PROGRESS_SUFFIX)) {
            return None;
        }
        current
            .into_iter()
            .filter(|p| !before.contains(p) && has_extension(p, &self.extension))
            .max_by_key(|p| modified(p))
    }

    /// Waits for a new file that is not in `before` and whose size is stable
    /// across two samples. `None` once `timeout` has passed.
    pub async fn wait_for_new_stable_file(
        &self,
        before: &HashSet<PathBuf>,
        timeout: Duration,
    ) -> Option<PathBuf> {
        self.wait_until_cancelled(before, timeout, &AtomicBool::new(false))
            .await
    }

    /// Like [`CompletionPoller::wait_for_new_stable_file`], but gives up as
    /// soon as `cancel` is set.
    pub async fn wait_until_cancelled(
        &self,
        before: &HashSet<PathBuf>,
        timeout: Duration,
        cancel: &AtomicBool,
    ) -> Option<PathBuf> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if cancel.load(Ordering::SeqCst) {
                debug!("Stopped waiting for a download in {}", self.dir.display());
                return None;
            }
            if let Some(target) = self.candidate(before) {
                if let Ok(first) = fs::metadata(&target).map(|m| m.len()) {
                    async_std::task::sleep(self.interval).await;
                    match fs::metadata(&target) {
                        Ok(m) if m.len() == first => {
                            debug!("{} stable at {} bytes", target.display(), first);
                            return Some(target);
                        }
                        Ok(m) => debug!(
                            "{} still growing ({} -> {} bytes)",
                            target.display(),
                            first,
                            m.len()
                        ),
                        Err(_) => debug!("{} vanished while sampling", target.display()),
                    }
                }
            }
            async_std::task::sleep(self.interval).await;
        }
        None
    }
}
