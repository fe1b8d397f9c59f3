//! Factory for the per-folder collaborators.

use crate::engine::SyncEngine;
use crate::error::Result;
use crate::journal::JournalDb;
use crate::vfs::{Vfs, VfsMode};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identity handed to the engine factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSetup {
    pub alias: String,
    pub account_id: String,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub journal_path: PathBuf,
}

/// Creates journals, engines and placeholder backends for folders.
///
/// Engines post their events through a channel the host wires up when it
/// builds the backend.
pub trait SyncBackend: Send + Sync {
    fn open_journal(&self, local_path: &Path, journal_file: &str) -> Result<Box<dyn JournalDb>>;

    fn create_engine(&self, setup: &EngineSetup) -> Result<Arc<dyn SyncEngine>>;

    /// Build a placeholder backend. `VfsMode::Off` is handled by the core.
    fn create_vfs(&self, mode: VfsMode) -> Result<Box<dyn Vfs>>;

    fn is_vfs_available(&self, mode: VfsMode) -> bool;
}
