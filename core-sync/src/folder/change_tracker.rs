//! Local change notifications for a folder.
//!
//! Watcher notifications are noisy: the engine's own writes, attribute
//! changes and editors touching files without modifying them all show up.
//! This filters them before asking for a sync.

use super::Folder;
use crate::paths::relative_to;
use bridge_traits::{ErrorCategory, FileRecord, FileStat, PinState, SelectiveSyncListType};
use core_runtime::events::{FolderEvent, UserNotification};
use core_runtime::logging::strip_path;
use std::path::Path;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Why a path is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeReason {
    Other,
    /// A previously locked file became accessible.
    UnLock,
}

/// What [`Folder::on_path_changed`] did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathChangeOutcome {
    OutsideFolder,
    /// Written by the running sync itself.
    TouchedBySync,
    /// Size and mtime match the journal.
    Spurious,
    Scheduled,
}

/// A notification is spurious when the journal already knows the file with
/// the same size and mtime, and its pin state does not ask for a
/// (de)hydration.
pub fn is_spurious(record: Option<&FileRecord>, stat: Option<FileStat>, pin: Option<PinState>) -> bool {
    let (Some(record), Some(stat)) = (record, stat) else {
        return false;
    };
    if record.size != stat.size || record.modtime != stat.modtime {
        return false;
    }
    match pin {
        Some(PinState::AlwaysLocal) if record.is_virtual_file() => false,
        Some(PinState::OnlineOnly) if record.is_file() => false,
        _ => true,
    }
}

impl Folder {
    /// Handles one watcher notification for an absolute path.
    pub fn on_path_changed(
        &mut self,
        path: &Path,
        reason: ChangeReason,
        now: Instant,
    ) -> PathChangeOutcome {
        let absolute = path.to_string_lossy().replace('\\', "/");
        let root = self.path_str();
        // The root itself is not an entry of the folder
        let Some(relative) = relative_to(&absolute, &root)
            .filter(|relative| !relative.is_empty())
            .map(str::to_string)
        else {
            debug!(file = strip_path(&absolute), "Changed path is not contained in folder, ignoring");
            return PathChangeOutcome::OutsideFolder;
        };

        if reason == ChangeReason::UnLock {
            self.wipe_local_soft_errors(&relative);
        }

        // Recorded before any filtering so nothing relevant is lost
        self.discovery.add_touched_path(relative.as_str());

        if !cfg!(target_os = "macos") {
            // The macOS watcher already leaves out our own writes
            let touched = self
                .engine
                .as_ref()
                .is_some_and(|engine| engine.was_file_touched(&relative));
            if touched {
                debug!(path = %absolute, "Changed path was touched by the sync, ignoring");
                return PathChangeOutcome::TouchedBySync;
            }
        }

        let record = self.file_record(&relative);
        if reason != ChangeReason::UnLock {
            let stat = self.fs.stat(path);
            let pin = self.pin_state(&relative);
            if is_spurious(record.as_ref(), stat, pin) {
                info!(path = %relative, "Ignoring spurious notification");
                return PathChangeOutcome::Spurious;
            }
        }
        self.warn_on_new_excluded_item(record.as_ref(), &relative);

        let alias = self.definition.alias.clone();
        self.emit(FolderEvent::FileChangedExternally {
            alias,
            path: absolute,
        });
        self.schedule_this_folder_soon(now);
        PathChangeOutcome::Scheduled
    }

    /// Drops local soft-error markers for a path and all of its parents.
    fn wipe_local_soft_errors(&mut self, relative: &str) {
        let Some(journal) = self.journal.as_mut() else {
            return;
        };
        let mut candidates = vec![relative.to_string()];
        let mut current = relative;
        while let Some(index) = current.rfind('/') {
            current = &current[..index];
            candidates.push(current.to_string());
        }
        for candidate in candidates {
            // Only entries of the local soft error category are dropped
            if let Err(e) = journal.wipe_error_blacklist_entry(&candidate, ErrorCategory::LocalSoftError) {
                warn!(path = %candidate, error = %e, "Could not wipe error blacklist entry");
            }
        }
    }

    /// Warns when a path excluded earlier by the user shows up locally again.
    pub fn warn_on_new_excluded_item(&mut self, record: Option<&FileRecord>, relative: &str) {
        if record.is_some() {
            return;
        }
        let full = self.definition.local_path.join(relative);
        let Some(stat) = self.fs.stat(&full) else {
            return;
        };
        let Some(journal) = self.journal.as_ref() else {
            return;
        };
        let blacklist = match journal.selective_sync_list(SelectiveSyncListType::BlackList) {
            Ok(list) => list,
            Err(_) => return,
        };
        let with_slash = format!("{relative}/");
        if !blacklist.iter().any(|entry| *entry == with_slash || entry == relative) {
            return;
        }

        let shown = full.display();
        let message = if stat.is_dir {
            format!(
                "The folder {shown} was created but was excluded from synchronization previously. \
                 Data inside it will not be synchronized."
            )
        } else {
            format!(
                "The file {shown} was created but was excluded from synchronization previously. \
                 It will not be synchronized."
            )
        };
        let title = self.config.application_name.clone();
        self.notify(UserNotification::warning(title, message));
    }

    /// The watcher dropped events; only full discovery can be trusted now.
    pub fn on_watcher_unreliable(&mut self, message: &str) {
        warn!(alias = %self.alias(), %message, "Folder watcher became unreliable");
        self.watcher_reliable = false;
        self.force_next_full_local_discovery();

        let full = format!(
            "Changes in synchronized folders could not be tracked reliably.\n\n\
             This means that the synchronization client might not upload local changes \
             immediately and will instead only scan for local changes and upload them \
             occasionally (every two hours by default).\n\n{message}"
        );
        let alias = self.definition.alias.clone();
        self.emit(FolderEvent::WatcherUnreliable {
            alias,
            message: message.to_string(),
        });
        let title = self.config.application_name.clone();
        self.notify(UserNotification::warning(title, full));
    }

    /// Watcher missed events; the next run walks everything.
    pub fn on_watcher_lost_changes(&mut self) {
        self.force_next_full_local_discovery();
    }
}
