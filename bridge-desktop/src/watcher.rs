//! Folder watcher using `notify`

use bridge_traits::{
    error::{BridgeError, Result},
    watcher::{FileWatcher, WatcherEvent, WatcherEventSender},
};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One recursive `notify` watcher per sync root.
///
/// Raw events are forwarded as [`WatcherEvent::PathChanged`]; watcher
/// errors (for instance an exhausted inotify watch limit) turn into
/// [`WatcherEvent::Unreliable`] for the root they belong to.
pub struct NotifyFolderWatcher {
    events: WatcherEventSender,
    watchers: HashMap<String, RecommendedWatcher>,
}

impl NotifyFolderWatcher {
    pub fn new(events: WatcherEventSender) -> Self {
        Self {
            events,
            watchers: HashMap::new(),
        }
    }

    /// Paths from a notify event worth reporting.
    fn changed_paths(event: Event) -> Vec<PathBuf> {
        match event.kind {
            EventKind::Access(_) => Vec::new(),
            _ => event
                .paths
                .into_iter()
                .filter(|p| !is_journal_file(p))
                .collect(),
        }
    }
}

/// Journal databases live inside the sync root and change on every run.
fn is_journal_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|name| {
            name.starts_with(".sync_") || name.starts_with("._sync_") || name.starts_with(".csync_journal.db")
        })
        .unwrap_or(false)
}

impl FileWatcher for NotifyFolderWatcher {
    fn watch(&mut self, alias: &str, root: &Path) -> Result<()> {
        if self.watchers.contains_key(alias) {
            return Ok(());
        }

        let events = self.events.clone();
        let owner = alias.to_string();
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if event.need_rescan() {
                        events
                            .send(WatcherEvent::Unreliable {
                                alias: owner.clone(),
                                message: "The file watcher dropped events".to_string(),
                            })
                            .ok();
                    }
                    for path in Self::changed_paths(event) {
                        if events.send(WatcherEvent::PathChanged(path)).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!(alias = %owner, error = %e, "Watch error");
                    events
                        .send(WatcherEvent::Unreliable {
                            alias: owner.clone(),
                            message: e.to_string(),
                        })
                        .ok();
                }
            },
            Config::default(),
        )
        .map_err(|e| BridgeError::OperationFailed(format!("Failed to create watcher: {}", e)))?;

        watcher.watch(root, RecursiveMode::Recursive).map_err(|e| {
            BridgeError::OperationFailed(format!("Failed to watch {}: {}", root.display(), e))
        })?;
        info!(alias, path = %root.display(), "Watching folder");
        self.watchers.insert(alias.to_string(), watcher);
        Ok(())
    }

    fn unwatch(&mut self, alias: &str) {
        if self.watchers.remove(alias).is_some() {
            debug!(alias, "Stopped watching folder");
        }
    }

    fn is_watching(&self, alias: &str) -> bool {
        self.watchers.contains_key(alias)
    }
}
