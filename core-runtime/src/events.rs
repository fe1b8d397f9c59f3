//! # Event Bus System
//!
//! Typed events describing what the sync scheduler, the folders and the shell
//! protocol are doing, published through a `tokio::sync::broadcast` channel.
//!
//! ## Overview
//!
//! - **Event Types**: [`CoreEvent`] wraps one enum per domain
//!   ([`FolderEvent`], [`SchedulerEvent`], [`ShellEvent`]) plus plain
//!   [`UserNotification`]s meant for a tray or a notification center.
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Receiver wrapper with an optional predicate filter
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  drain   ┌──────────────┐   emit   ┌──────────┐  subscribe  ┌────────┐
//! │ FolderMan  ├─────────>│ service loop ├─────────>│ EventBus ├────────────>│ GUI... │
//! └────────────┘          └──────────────┘          └──────────┘             └────────┘
//! ```
//!
//! The scheduler never talks to the bus itself: it queues events which the
//! service loop drains, reacts to (persisting definitions, pushing overlay
//! statuses) and then republishes here.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SchedulerEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Scheduler(SchedulerEvent::SyncEnabledChanged { enabled: false }))
//!     .ok();
//!
//! let event = rx.recv().await.unwrap();
//! assert_eq!(event.description(), "Global sync toggled");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; keep going.
//! - **`RecvError::Closed`**: every sender is gone, treat it as shutdown.
//!
//! `emit` fails when nobody is subscribed. Publishers ignore that with `.ok()`.

use bridge_traits::{Direction, SyncFileStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that fall further behind receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Per-folder lifecycle and sync events
    Folder(FolderEvent),
    /// Queue and admission events
    Scheduler(SchedulerEvent),
    /// Requests coming from file manager integrations
    Shell(ShellEvent),
    /// Message that should be surfaced to the user
    Notification(UserNotification),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Folder(e) => e.description(),
            CoreEvent::Scheduler(e) => e.description(),
            CoreEvent::Shell(e) => e.description(),
            CoreEvent::Notification(_) => "User notification",
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Notification(n) => n.severity,
            CoreEvent::Folder(FolderEvent::SyncFinished { errors, .. }) if !errors.is_empty() => {
                EventSeverity::Warning
            }
            CoreEvent::Folder(FolderEvent::WatcherUnreliable { .. })
            | CoreEvent::Folder(FolderEvent::AboutToRemoveAllFiles { .. })
            | CoreEvent::Folder(FolderEvent::NewBigFolder { .. }) => EventSeverity::Warning,
            CoreEvent::Folder(FolderEvent::SyncStarted { .. })
            | CoreEvent::Folder(FolderEvent::SyncFinished { .. })
            | CoreEvent::Folder(FolderEvent::Added { .. })
            | CoreEvent::Folder(FolderEvent::Removed { .. })
            | CoreEvent::Scheduler(SchedulerEvent::SyncEnabledChanged { .. })
            | CoreEvent::Scheduler(SchedulerEvent::RemoteChangeDetected { .. }) => {
                EventSeverity::Info
            }
            _ => EventSeverity::Debug,
        }
    }

    /// Alias of the folder the event concerns, if any.
    pub fn alias(&self) -> Option<&str> {
        match self {
            CoreEvent::Folder(e) => Some(e.alias()),
            CoreEvent::Scheduler(SchedulerEvent::EtagCheckQueued { alias })
            | CoreEvent::Scheduler(SchedulerEvent::RemoteChangeDetected { alias, .. }) => {
                Some(alias)
            }
            CoreEvent::Shell(ShellEvent::ShareRequested { alias, .. })
            | CoreEvent::Shell(ShellEvent::PrivateLinkRequested { alias, .. })
            | CoreEvent::Shell(ShellEvent::PublicLinkRequested { alias, .. }) => Some(alias),
            _ => None,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Folder Events
// ============================================================================

/// Events emitted by a single sync folder.
///
/// `status` fields carry the folder's sync status in its settings spelling
/// (`"SyncRunning"`, `"Success"`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum FolderEvent {
    SyncStateChanged {
        alias: String,
        status: String,
    },
    SyncStarted {
        alias: String,
        /// Local discovery style chosen for this run.
        discovery: String,
    },
    SyncFinished {
        alias: String,
        status: String,
        errors: Vec<String>,
    },
    ProgressUpdated {
        alias: String,
        completed_files: u64,
        total_files: u64,
    },
    /// A local change that was not caused by the sync itself.
    FileChangedExternally {
        alias: String,
        path: String,
    },
    /// The engine found a new remote folder above the size limit.
    NewBigFolder {
        alias: String,
        path: String,
        is_external: bool,
    },
    /// The run would delete every file on one side and waits for an answer.
    AboutToRemoveAllFiles {
        alias: String,
        direction: Direction,
    },
    SyncPausedChanged {
        alias: String,
        paused: bool,
    },
    /// Persisted configuration of the folder changed and should be saved.
    DefinitionChanged {
        alias: String,
    },
    Added {
        alias: String,
    },
    Removed {
        alias: String,
    },
    WatcherUnreliable {
        alias: String,
        message: String,
    },
    /// Overlay status of an absolute path changed.
    FileStatusChanged {
        alias: String,
        path: PathBuf,
        status: SyncFileStatus,
    },
}

impl FolderEvent {
    fn description(&self) -> &str {
        match self {
            FolderEvent::SyncStateChanged { .. } => "Folder sync state changed",
            FolderEvent::SyncStarted { .. } => "Folder sync started",
            FolderEvent::SyncFinished { .. } => "Folder sync finished",
            FolderEvent::ProgressUpdated { .. } => "Folder sync progress",
            FolderEvent::FileChangedExternally { .. } => "File changed externally",
            FolderEvent::NewBigFolder { .. } => "New big folder discovered",
            FolderEvent::AboutToRemoveAllFiles { .. } => "Sync would remove all files",
            FolderEvent::SyncPausedChanged { .. } => "Folder pause toggled",
            FolderEvent::DefinitionChanged { .. } => "Folder definition changed",
            FolderEvent::Added { .. } => "Folder added",
            FolderEvent::Removed { .. } => "Folder removed",
            FolderEvent::WatcherUnreliable { .. } => "File watcher unreliable",
            FolderEvent::FileStatusChanged { .. } => "File status changed",
        }
    }

    pub fn alias(&self) -> &str {
        match self {
            FolderEvent::SyncStateChanged { alias, .. }
            | FolderEvent::SyncStarted { alias, .. }
            | FolderEvent::SyncFinished { alias, .. }
            | FolderEvent::ProgressUpdated { alias, .. }
            | FolderEvent::FileChangedExternally { alias, .. }
            | FolderEvent::NewBigFolder { alias, .. }
            | FolderEvent::AboutToRemoveAllFiles { alias, .. }
            | FolderEvent::SyncPausedChanged { alias, .. }
            | FolderEvent::DefinitionChanged { alias }
            | FolderEvent::Added { alias }
            | FolderEvent::Removed { alias }
            | FolderEvent::WatcherUnreliable { alias, .. }
            | FolderEvent::FileStatusChanged { alias, .. } => alias,
        }
    }
}

// ============================================================================
// Scheduler Events
// ============================================================================

/// Events emitted by the folder scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SchedulerEvent {
    /// Queue content changed; `queue` lists aliases front to back.
    QueueChanged { queue: Vec<String> },
    SyncEnabledChanged { enabled: bool },
    EtagCheckQueued { alias: String },
    RemoteChangeDetected { alias: String, etag: String },
}

impl SchedulerEvent {
    fn description(&self) -> &str {
        match self {
            SchedulerEvent::QueueChanged { .. } => "Schedule queue changed",
            SchedulerEvent::SyncEnabledChanged { .. } => "Global sync toggled",
            SchedulerEvent::EtagCheckQueued { .. } => "Remote etag check queued",
            SchedulerEvent::RemoteChangeDetected { .. } => "Remote change detected",
        }
    }
}

// ============================================================================
// Shell Events
// ============================================================================

/// Requests and connection changes coming from shell integrations.
///
/// Most of these ask the embedding application to open a dialog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ShellEvent {
    ListenerConnected {
        listener_id: u64,
    },
    ListenerDisconnected {
        listener_id: u64,
    },
    ShareRequested {
        alias: String,
        local_path: PathBuf,
        remote_path: String,
        /// `"people"` for the share dialog, `"links"` for public link management.
        start_page: String,
    },
    PrivateLinkRequested {
        alias: String,
        remote_path: String,
        /// `"copy"`, `"email"`, `"open"` or `"versions"`.
        action: String,
    },
    PublicLinkRequested {
        alias: String,
        remote_path: String,
    },
    DeleteItemRequested {
        local_path: PathBuf,
    },
    MoveItemRequested {
        local_path: PathBuf,
    },
}

impl ShellEvent {
    fn description(&self) -> &str {
        match self {
            ShellEvent::ListenerConnected { .. } => "Shell integration connected",
            ShellEvent::ListenerDisconnected { .. } => "Shell integration disconnected",
            ShellEvent::ShareRequested { .. } => "Share dialog requested",
            ShellEvent::PrivateLinkRequested { .. } => "Private link requested",
            ShellEvent::PublicLinkRequested { .. } => "Public link requested",
            ShellEvent::DeleteItemRequested { .. } => "Delete requested",
            ShellEvent::MoveItemRequested { .. } => "Move requested",
        }
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Text meant for the user, e.g. a desktop notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserNotification {
    pub title: String,
    pub message: String,
    pub severity: EventSeverity,
}

impl UserNotification {
    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity: EventSeverity::Warning,
        }
    }

    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity: EventSeverity::Info,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast channel shared by every publisher and subscriber.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::default();
/// let folder_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Folder(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only yield events for which `predicate` returns true.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Only yield events about one folder.
    pub fn for_alias(self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        self.filter(move |event| event.alias() == Some(alias.as_str()))
    }

    /// Only yield events at or above `min`.
    pub fn with_min_severity(self, min: EventSeverity) -> Self {
        self.filter(move |event| event.severity() >= min)
    }

    /// Receives the next matching event.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            match &self.filter {
                Some(filter) if !filter(&event) => continue,
                _ => return Ok(event),
            }
        }
    }

    /// Attempts to receive a matching event without blocking.
    ///
    /// Returns `None` if no events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };
                    if filter(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
