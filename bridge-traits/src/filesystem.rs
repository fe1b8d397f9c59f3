//! Local file system probe.
//!
//! The scheduler only needs cheap, synchronous answers about local paths:
//! does it exist, what are its size and mtime, can we read and write it, is
//! it locked by another process.

use crate::error::Result;
use std::path::Path;

/// Size and modification time of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    /// Seconds since the Unix epoch
    pub modtime: i64,
    pub is_dir: bool,
}

/// Synchronous file system access used on the scheduling thread.
pub trait LocalFileSystem: Send + Sync {
    /// Metadata of `path`, `None` when it does not exist.
    fn stat(&self, path: &Path) -> Option<FileStat>;

    fn exists(&self, path: &Path) -> bool {
        self.stat(path).is_some()
    }

    fn is_readable(&self, path: &Path) -> bool;

    fn is_writable(&self, path: &Path) -> bool;

    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Whether another process holds a lock preventing us from writing.
    fn is_file_locked(&self, path: &Path) -> bool;
}
