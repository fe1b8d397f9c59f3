//! # Host Bridge Traits
//!
//! Contracts between the scheduling core and the collaborators it drives but
//! does not implement.
//!
//! ## Overview
//!
//! The core decides *when* folders sync. Everything that actually touches
//! bytes, databases or the network lives behind the traits in this crate so
//! that the scheduler, the change tracker and the shell protocol can be
//! exercised with in-memory fakes.
//!
//! ## Traits
//!
//! ### Sync machinery
//! - [`SyncEngine`](engine::SyncEngine) - Discovery and propagation for one folder
//! - [`JournalDb`](journal::JournalDb) - Per-folder change-tracking database
//! - [`Vfs`](vfs::Vfs) - Placeholder (virtual file) backend
//! - [`SyncBackend`](backend::SyncBackend) - Factory for the three above
//!
//! ### Platform
//! - [`LocalFileSystem`](filesystem::LocalFileSystem) - Stat, access and lock probes
//! - [`RemoteEtagFetcher`](remote::RemoteEtagFetcher) - Remote root state-tag lookup
//! - [`SettingsStore`](storage::SettingsStore) - Key-value settings persistence
//! - [`FileWatcher`](watcher::FileWatcher) - Recursive change notifications per sync root
//! - [`Clock`](time::Clock) - Wall-clock source for deterministic tests
//!
//! ## Threading
//!
//! The engine, the etag fetcher and the settings store are used from async
//! tasks and require `Send + Sync`. The journal and the VFS are owned by a
//! single folder on the scheduling task and only require `Send`.
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type.
//! Implementations should convert platform errors and include the path or
//! url involved in the message.

pub mod backend;
pub mod engine;
pub mod error;
pub mod filesystem;
pub mod journal;
pub mod remote;
pub mod storage;
pub mod time;
pub mod vfs;
pub mod watcher;

pub use error::BridgeError;

pub use backend::{EngineSetup, SyncBackend};
pub use engine::{
    AnotherSyncNeeded, Direction, EngineEvent, EngineEventReceiver, EngineEventSender,
    EngineMessage, Instruction, ItemStatus, LocalDiscoveryStyle, ProgressInfo, SyncEngine,
    SyncFileItem, SyncFileStatus, SyncFileStatusTag, SyncOptions, SyncRequest,
};
pub use filesystem::{FileStat, LocalFileSystem};
pub use journal::{
    DownloadInfo, ErrorBlacklistRecord, ErrorCategory, FileRecord, ItemType, JournalDb,
    RemotePermissions, SelectiveSyncListType,
};
pub use remote::{EtagRequest, EtagResponse, RemoteEtagFetcher};
pub use storage::SettingsStore;
pub use time::{Clock, FixedClock, SystemClock};
pub use vfs::{
    AvailabilityError, PinState, Vfs, VfsEvent, VfsEventReceiver, VfsEventSender, VfsItemAvailability,
    VfsMessage, VfsMode, VfsSetupParams,
};
pub use watcher::{FileWatcher, WatcherEvent, WatcherEventReceiver, WatcherEventSender};
