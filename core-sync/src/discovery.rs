//! Tracks which local paths the next sync has to look at.
//!
//! Paths reported by the watcher are collected here. A partial discovery
//! hands the collected set to the engine and keeps it as "previous" until
//! the run ends; items that failed are put back so the following run
//! retries them.

use bridge_traits::{Instruction, ItemStatus, SyncFileItem};
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Default, Clone)]
pub struct LocalDiscoveryTracker {
    local_discovery_paths: BTreeSet<String>,
    previous_local_discovery_paths: BTreeSet<String>,
}

impl LocalDiscoveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_touched_path(&mut self, relative_path: impl Into<String>) {
        let path = relative_path.into();
        debug!(path = %path, "Touched path");
        self.local_discovery_paths.insert(path);
    }

    /// Paths collected since the last run started.
    pub fn local_discovery_paths(&self) -> &BTreeSet<String> {
        &self.local_discovery_paths
    }

    /// Paths handed to the running sync.
    pub fn previous_local_discovery_paths(&self) -> &BTreeSet<String> {
        &self.previous_local_discovery_paths
    }

    /// A full walk covers everything; nothing needs remembering.
    pub fn start_sync_full_discovery(&mut self) {
        self.local_discovery_paths.clear();
        self.previous_local_discovery_paths.clear();
    }

    /// Moves the collected set into "previous" and returns it sorted.
    pub fn start_sync_partial_discovery(&mut self) -> Vec<String> {
        self.previous_local_discovery_paths = std::mem::take(&mut self.local_discovery_paths);
        self.previous_local_discovery_paths.iter().cloned().collect()
    }

    pub fn slot_item_completed(&mut self, item: &SyncFileItem) {
        let done = matches!(
            item.status,
            ItemStatus::Success | ItemStatus::FileIgnored | ItemStatus::Restoration | ItemStatus::Conflict
        ) || (item.status == ItemStatus::NoStatus
            && matches!(item.instruction, Instruction::None | Instruction::UpdateMetadata));

        let destination = item.rename_target.as_deref().unwrap_or(&item.file);
        if done {
            if self.previous_local_discovery_paths.remove(destination) {
                debug!(path = %destination, "Wiped successful item");
            }
            if destination != item.file {
                self.previous_local_discovery_paths.remove(&item.file);
            }
        } else {
            self.local_discovery_paths.insert(destination.to_string());
        }
    }

    /// On failure every path of the run is looked at again next time.
    pub fn sync_finished(&mut self, success: bool) {
        if success {
            self.previous_local_discovery_paths.clear();
        } else {
            let previous = std::mem::take(&mut self.previous_local_discovery_paths);
            self.local_discovery_paths.extend(previous);
        }
    }
}
