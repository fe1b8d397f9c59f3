//! Watches files the engine could not touch because they were locked.
//!
//! Every check interval each watched file is probed; the ones that are no
//! longer locked are handed back so their folder can be synced again.

use crate::timer::Periodic;
use bridge_traits::LocalFileSystem;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct LockWatcher {
    watched: BTreeSet<PathBuf>,
    tick: Periodic,
    interval: Duration,
}

impl LockWatcher {
    pub fn new(now: Instant, interval: Duration) -> Self {
        Self {
            watched: BTreeSet::new(),
            tick: Periodic::new(now, interval),
            interval,
        }
    }

    pub fn add_file(&mut self, now: Instant, path: impl Into<PathBuf>) {
        let path = path.into();
        if self.watched.is_empty() {
            // Restart the period so the first probe is a full interval away
            self.tick = Periodic::new(now, self.interval);
        }
        if self.watched.insert(path.clone()) {
            debug!(path = %path.display(), "Watching locked file");
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.watched.contains(path)
    }

    pub fn len(&self) -> usize {
        self.watched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watched.is_empty()
    }

    /// Only armed while something is watched.
    pub fn next_deadline(&self) -> Option<Instant> {
        (!self.watched.is_empty()).then(|| self.tick.deadline())
    }

    /// Probes watched files when due; returns the ones that got unlocked.
    pub fn check(&mut self, now: Instant, fs: &dyn LocalFileSystem) -> Vec<PathBuf> {
        if self.watched.is_empty() || !self.tick.fire(now) {
            return Vec::new();
        }

        let unlocked: Vec<PathBuf> = self
            .watched
            .iter()
            .filter(|path| !fs.exists(path) || !fs.is_file_locked(path))
            .cloned()
            .collect();
        for path in &unlocked {
            self.watched.remove(path);
            info!(path = %path.display(), "Locked file became available");
        }
        unlocked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::FileStat;
    use std::sync::Mutex;

    #[derive(Default)]
    struct LockedFs {
        locked: Mutex<BTreeSet<PathBuf>>,
    }

    impl LocalFileSystem for LockedFs {
        fn stat(&self, _path: &Path) -> Option<FileStat> {
            Some(FileStat {
                size: 1,
                modtime: 1,
                is_dir: false,
            })
        }
        fn is_readable(&self, _path: &Path) -> bool {
            true
        }
        fn is_writable(&self, _path: &Path) -> bool {
            true
        }
        fn remove_file(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
        fn is_file_locked(&self, path: &Path) -> bool {
            self.locked.lock().unwrap().contains(path)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reports_unlocked_files_after_interval() {
        let start = Instant::now();
        let fs = LockedFs::default();
        fs.locked.lock().unwrap().insert(PathBuf::from("/w/a.docx"));
        fs.locked.lock().unwrap().insert(PathBuf::from("/w/b.xlsx"));

        let mut watcher = LockWatcher::new(start, Duration::from_secs(20));
        assert_eq!(watcher.next_deadline(), None);
        watcher.add_file(start, "/w/a.docx");
        watcher.add_file(start, "/w/b.xlsx");
        assert_eq!(watcher.next_deadline(), Some(start + Duration::from_secs(20)));

        fs.locked.lock().unwrap().remove(Path::new("/w/a.docx"));
        assert!(watcher.check(start + Duration::from_secs(10), &fs).is_empty());

        let unlocked = watcher.check(start + Duration::from_secs(20), &fs);
        assert_eq!(unlocked, vec![PathBuf::from("/w/a.docx")]);
        assert!(watcher.contains(Path::new("/w/b.xlsx")));
        assert_eq!(watcher.len(), 1);
    }
}
