//! # Folder Sync Scheduling
//!
//! Per-folder sync state and the scheduler deciding which folder runs.
//!
//! ## Overview
//!
//! The actual propagation (discovery, up/download, conflict handling) is
//! done by a `SyncEngine` obtained from a `SyncBackend`. This crate drives
//! it:
//! - tracks each folder's status, pause flag and error counters
//! - filters local change notifications and schedules folders
//! - polls remote root etags and retries failed runs
//! - watches files that were locked during a run
//! - switches the virtual file mode of a folder
//!
//! ## Components
//!
//! - **Folder** (`folder`): one sync root and its state machine
//! - **Scheduler** (`scheduler`): `FolderMan`, the queue and all timers
//! - **Etag Queue** (`etag`): serialized remote etag checks
//! - **Lock Watcher** (`lock_watcher`): polls locked files
//! - **Discovery** (`discovery`): local discovery bookkeeping
//! - **Sync Result** (`result`): run outcome and folder status
//!
//! Nothing in here sleeps or spawns; deadlines are exposed and the caller
//! drives them, which keeps everything testable with a paused tokio clock.

pub mod account;
pub mod discovery;
pub mod error;
pub mod etag;
pub mod folder;
pub mod lock_watcher;
pub mod paths;
pub mod result;
pub mod scheduler;
pub mod timer;
pub mod vfs;

pub use account::{AccountCapabilities, AccountState};
pub use discovery::LocalDiscoveryTracker;
pub use error::{Result, SyncError};
pub use etag::EtagQueue;
pub use folder::{best_available_vfs_mode, ChangeReason, FinalizeOutcome, Folder, PathChangeOutcome};
pub use lock_watcher::LockWatcher;
pub use result::{SyncResult, SyncStatus};
pub use scheduler::FolderMan;
pub use vfs::{create_vfs, upgrade_vfs, VfsOff};
