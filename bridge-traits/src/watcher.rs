//! Local change notifications.
//!
//! A watcher reports raw paths; debouncing and the spurious-change filter
//! happen in the folder that owns the path.

use crate::error::Result;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherEvent {
    /// Something under a watched root changed.
    PathChanged(PathBuf),
    /// Notifications for `alias` may be incomplete from now on.
    Unreliable { alias: String, message: String },
}

pub type WatcherEventSender = mpsc::UnboundedSender<WatcherEvent>;
pub type WatcherEventReceiver = mpsc::UnboundedReceiver<WatcherEvent>;

/// Recursive watch over sync roots, one per folder alias.
pub trait FileWatcher: Send {
    fn watch(&mut self, alias: &str, root: &Path) -> Result<()>;

    /// No-op for aliases that are not watched.
    fn unwatch(&mut self, alias: &str);

    fn is_watching(&self, alias: &str) -> bool;
}
