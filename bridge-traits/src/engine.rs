//! Transfer engine contract.
//!
//! The engine performs discovery, reconciliation and propagation for one
//! folder. The core only starts it, aborts it and listens to the events it
//! posts back through an [`EngineEventSender`].

use crate::error::Result;
use crate::vfs::VfsMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// How the local side of a sync run is inventoried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocalDiscoveryStyle {
    /// Walk the whole local tree.
    FilesystemOnly,
    /// Trust the journal and only look at the provided path hints.
    DatabaseAndFilesystem,
}

impl LocalDiscoveryStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FilesystemOnly => "filesystem_only",
            Self::DatabaseAndFilesystem => "database_and_filesystem",
        }
    }
}

/// Follow-up request reported by the engine at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AnotherSyncNeeded {
    #[default]
    NoFollowUpSync,
    /// Files were still changing; sync again right away.
    ImmediateFollowUp,
    /// Something should be retried later (e.g. a soft error).
    DelayedFollowUp,
}

/// Direction of a propagated item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    None,
    Up,
    Down,
}

/// Reconciliation instruction for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    None,
    UpdateMetadata,
    New,
    TypeChange,
    Remove,
    Sync,
    Rename,
    Conflict,
    Ignore,
    Error,
}

/// Outcome of propagating a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    NoStatus,
    Success,
    Conflict,
    FileIgnored,
    FileLocked,
    Restoration,
    SoftError,
    NormalError,
    FatalError,
    DetailError,
    BlacklistedError,
    Excluded,
}

impl ItemStatus {
    /// Statuses that leave something unsynced and deserve user attention.
    pub fn is_warning_kind(&self) -> bool {
        matches!(
            self,
            Self::SoftError
                | Self::NormalError
                | Self::FatalError
                | Self::FileIgnored
                | Self::Conflict
                | Self::Restoration
                | Self::DetailError
                | Self::BlacklistedError
                | Self::FileLocked
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::SoftError
                | Self::NormalError
                | Self::FatalError
                | Self::DetailError
                | Self::BlacklistedError
        )
    }
}

/// A completed item as reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncFileItem {
    /// Path relative to the folder root, `/` separated
    pub file: String,
    pub rename_target: Option<String>,
    pub status: ItemStatus,
    pub instruction: Instruction,
    pub direction: Direction,
    pub is_directory: bool,
    pub error_string: Option<String>,
}

impl SyncFileItem {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            rename_target: None,
            status: ItemStatus::NoStatus,
            instruction: Instruction::None,
            direction: Direction::None,
            is_directory: false,
            error_string: None,
        }
    }

    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_instruction(mut self, instruction: Instruction) -> Self {
        self.instruction = instruction;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_string = Some(message.into());
        self
    }

    pub fn with_rename_target(mut self, target: impl Into<String>) -> Self {
        self.rename_target = Some(target.into());
        self
    }

    pub fn directory(mut self) -> Self {
        self.is_directory = true;
        self
    }

    pub fn has_error_status(&self) -> bool {
        self.status.is_error()
    }
}

/// Per-run options handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOptions {
    pub ignore_hidden_files: bool,
    pub vfs_mode: VfsMode,
    pub parallel_network_jobs: u32,
    pub initial_chunk_size: u64,
    pub min_chunk_size: u64,
    pub max_chunk_size: u64,
    pub target_chunk_upload_duration_secs: u64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            ignore_hidden_files: true,
            vfs_mode: VfsMode::Off,
            parallel_network_jobs: 6,
            initial_chunk_size: 10 * 1000 * 1000,
            min_chunk_size: 1000 * 1000,
            max_chunk_size: 100 * 1000 * 1000,
            target_chunk_upload_duration_secs: 60,
        }
    }
}

/// Everything the engine needs to start one run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRequest {
    pub alias: String,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub discovery_style: LocalDiscoveryStyle,
    /// Relative paths to look at when `discovery_style` is partial, sorted
    pub local_discovery_paths: Vec<String>,
    pub options: SyncOptions,
}

/// Cheap progress snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressInfo {
    pub completed_files: u64,
    pub total_files: u64,
    pub completed_bytes: u64,
    pub total_bytes: u64,
}

/// Events posted by an engine back into the scheduling loop.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Started,
    ItemCompleted(SyncFileItem),
    Progress(ProgressInfo),
    Finished {
        success: bool,
        another_sync_needed: AnotherSyncNeeded,
    },
    SyncError {
        message: String,
    },
    /// The run would delete every file on one side; the engine waits for
    /// [`SyncEngine::respond_remove_all`].
    AboutToRemoveAllFiles {
        direction: Direction,
    },
    NewBigFolder {
        path: String,
        is_external: bool,
    },
    RootEtag {
        etag: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    SeenLockedFile {
        path: PathBuf,
    },
    /// Overlay status of an absolute path changed.
    FileStatusChanged {
        path: PathBuf,
        status: SyncFileStatus,
    },
}

/// Engine event tagged with the folder it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineMessage {
    pub alias: String,
    pub event: EngineEvent,
}

pub type EngineEventSender = mpsc::UnboundedSender<EngineMessage>;
pub type EngineEventReceiver = mpsc::UnboundedReceiver<EngineMessage>;

/// Aggregated status of a path, as shown by shell overlays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncFileStatusTag {
    None,
    Sync,
    Warning,
    UpToDate,
    Error,
    Excluded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFileStatus {
    pub tag: SyncFileStatusTag,
    pub shared: bool,
}

impl SyncFileStatus {
    pub fn new(tag: SyncFileStatusTag) -> Self {
        Self { tag, shared: false }
    }

    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    /// Wire representation used by the shell protocol.
    pub fn to_socket_api_string(&self) -> String {
        let (base, can_be_shared) = match self.tag {
            SyncFileStatusTag::None => ("NOP", false),
            SyncFileStatusTag::Sync => ("SYNC", true),
            SyncFileStatusTag::Warning => ("IGNORE", false),
            SyncFileStatusTag::UpToDate => ("OK", true),
            SyncFileStatusTag::Error => ("ERROR", false),
            SyncFileStatusTag::Excluded => ("IGNORE", false),
        };
        if can_be_shared && self.shared {
            format!("{base}+SWM")
        } else {
            base.to_string()
        }
    }
}

/// Transfer engine for one folder.
///
/// Calls are non-blocking: work happens elsewhere and progress comes back as
/// [`EngineEvent`]s.
pub trait SyncEngine: Send + Sync {
    /// Start a run. Must only be called while no run is active.
    fn start_sync(&self, request: SyncRequest) -> Result<()>;

    /// Ask the running sync to stop at the next safe point.
    fn abort(&self);

    /// Whether the current run itself wrote to `relative_path` recently.
    fn was_file_touched(&self, relative_path: &str) -> bool;

    /// Overlay status of a relative path (`""` is the folder root).
    fn file_status(&self, relative_path: &str) -> SyncFileStatus;

    /// Answer to [`EngineEvent::AboutToRemoveAllFiles`].
    fn respond_remove_all(&self, keep_files: bool);
}
