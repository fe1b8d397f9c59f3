//! # Sync Result
//!
//! Status of a folder plus a summary of what its last run did.
//!
//! ## State Machine
//!
//! ```text
//! NotYetStarted → SyncPrepare → SyncRunning → Success
//!                                    │      → Problem
//!                                    │      → Error
//!                                    └────→ SyncAbortRequested
//! Paused, SetupError: reachable from anywhere
//! ```

use crate::{Result, SyncError};
use bridge_traits::{Direction, Instruction, ItemStatus, SyncFileItem};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Status Types
// ============================================================================

/// Sync status of a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncStatus {
    #[default]
    Undefined,
    NotYetStarted,
    SyncPrepare,
    SyncRunning,
    SyncAbortRequested,
    Success,
    /// Finished, but some files were not synced
    Problem,
    Error,
    /// Cannot sync until reconfigured
    SetupError,
    Paused,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Undefined => "Undefined",
            SyncStatus::NotYetStarted => "NotYetStarted",
            SyncStatus::SyncPrepare => "SyncPrepare",
            SyncStatus::SyncRunning => "SyncRunning",
            SyncStatus::SyncAbortRequested => "SyncAbortRequested",
            SyncStatus::Success => "Success",
            SyncStatus::Problem => "Problem",
            SyncStatus::Error => "Error",
            SyncStatus::SetupError => "SetupError",
            SyncStatus::Paused => "Paused",
        }
    }

    /// A run is between prepare and finish.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncStatus::SyncPrepare | SyncStatus::SyncRunning | SyncStatus::SyncAbortRequested
        )
    }

    /// Statuses worth refreshing the file manager for.
    pub fn refreshes_folder_view(&self) -> bool {
        matches!(
            self,
            SyncStatus::SyncPrepare
                | SyncStatus::Success
                | SyncStatus::Paused
                | SyncStatus::Problem
                | SyncStatus::Error
                | SyncStatus::SetupError
        )
    }
}

impl FromStr for SyncStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let status = match s {
            "Undefined" => SyncStatus::Undefined,
            "NotYetStarted" => SyncStatus::NotYetStarted,
            "SyncPrepare" => SyncStatus::SyncPrepare,
            "SyncRunning" => SyncStatus::SyncRunning,
            "SyncAbortRequested" => SyncStatus::SyncAbortRequested,
            "Success" => SyncStatus::Success,
            "Problem" => SyncStatus::Problem,
            "Error" => SyncStatus::Error,
            "SetupError" => SyncStatus::SetupError,
            "Paused" => SyncStatus::Paused,
            other => {
                return Err(SyncError::InvalidState(format!(
                    "unknown sync status '{other}'"
                )))
            }
        };
        Ok(status)
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Sync Result
// ============================================================================

/// Summary of the current or last run of a folder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    status: SyncStatus,
    errors: Vec<String>,
    found_files_not_synced: bool,
    folder_structure_was_changed: bool,
    sync_time: Option<DateTime<Utc>>,

    pub num_new_items: u32,
    pub num_removed_items: u32,
    pub num_updated_items: u32,
    pub num_renamed_items: u32,
    pub num_new_conflict_items: u32,
    pub num_old_conflict_items: u32,
    pub num_error_items: u32,
    pub num_locked_items: u32,

    pub first_item_new: Option<SyncFileItem>,
    pub first_item_deleted: Option<SyncFileItem>,
    pub first_item_updated: Option<SyncFileItem>,
    pub first_item_renamed: Option<SyncFileItem>,
    pub first_new_conflict_item: Option<SyncFileItem>,
    pub first_item_error: Option<SyncFileItem>,
    pub first_item_locked: Option<SyncFileItem>,
}

impl SyncResult {
    pub fn new(status: SyncStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Clears everything except the status.
    pub fn reset(&mut self) {
        *self = Self::new(self.status);
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn set_status(&mut self, status: SyncStatus) {
        self.status = status;
        self.sync_time = Some(Utc::now());
    }

    pub fn sync_time(&self) -> Option<DateTime<Utc>> {
        self.sync_time
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn append_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn found_files_not_synced(&self) -> bool {
        self.found_files_not_synced
    }

    pub fn folder_structure_was_changed(&self) -> bool {
        self.folder_structure_was_changed
    }

    /// Whether the run changed anything worth re-checking the server for.
    pub fn has_changes(&self) -> bool {
        self.first_item_new.is_some()
            || self.first_item_deleted.is_some()
            || self.first_item_renamed.is_some()
            || self.first_item_updated.is_some()
            || self.first_new_conflict_item.is_some()
    }

    /// Accounts one completed item.
    pub fn process_completed_item(&mut self, item: &SyncFileItem) {
        if item.status.is_warning_kind() {
            self.found_files_not_synced = true;
        }

        if item.is_directory
            && matches!(
                item.instruction,
                Instruction::New | Instruction::TypeChange | Instruction::Remove | Instruction::Rename
            )
        {
            self.folder_structure_was_changed = true;
        }

        if item.status == ItemStatus::FileLocked {
            self.num_locked_items += 1;
            self.first_item_locked.get_or_insert_with(|| item.clone());
        }

        if item.has_error_status() {
            self.errors.push(format!(
                "{}: {}",
                item.file,
                item.error_string.as_deref().unwrap_or("unknown error")
            ));
            self.num_error_items += 1;
            self.first_item_error.get_or_insert_with(|| item.clone());
        } else if item.status == ItemStatus::Conflict {
            if item.instruction == Instruction::Conflict {
                self.num_new_conflict_items += 1;
                self.first_new_conflict_item
                    .get_or_insert_with(|| item.clone());
            } else {
                self.num_old_conflict_items += 1;
            }
        } else if item.status != ItemStatus::FileIgnored && item.direction != Direction::None {
            match item.instruction {
                Instruction::New | Instruction::TypeChange => {
                    self.num_new_items += 1;
                    self.first_item_new.get_or_insert_with(|| item.clone());
                }
                Instruction::Remove => {
                    self.num_removed_items += 1;
                    self.first_item_deleted.get_or_insert_with(|| item.clone());
                }
                Instruction::Sync => {
                    self.num_updated_items += 1;
                    self.first_item_updated.get_or_insert_with(|| item.clone());
                }
                Instruction::Rename => {
                    self.num_renamed_items += 1;
                    self.first_item_renamed.get_or_insert_with(|| item.clone());
                }
                _ => {}
            }
        }
    }
}
