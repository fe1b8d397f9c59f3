//! Local file system probe using `std::fs`

use bridge_traits::{
    error::{BridgeError, Result},
    filesystem::{FileStat, LocalFileSystem},
};
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::debug;

/// Synchronous probe over the real file system.
///
/// Symlinks are not followed for `stat`, so a dangling link still exists.
#[derive(Debug, Clone, Default)]
pub struct DesktopFileSystem;

impl DesktopFileSystem {
    pub fn new() -> Self {
        Self
    }
}

impl LocalFileSystem for DesktopFileSystem {
    fn stat(&self, path: &Path) -> Option<FileStat> {
        let meta = fs::symlink_metadata(path).ok()?;
        let modtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        Some(FileStat {
            size: meta.len(),
            modtime,
            is_dir: meta.is_dir(),
        })
    }

    fn is_readable(&self, path: &Path) -> bool {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => fs::read_dir(path).is_ok(),
            Ok(_) => fs::File::open(path).is_ok(),
            Err(_) => false,
        }
    }

    fn is_writable(&self, path: &Path) -> bool {
        fs::metadata(path)
            .map(|meta| !meta.permissions().readonly())
            .unwrap_or(false)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|e| {
            BridgeError::OperationFailed(format!("Failed to remove {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Removed file");
        Ok(())
    }

    fn is_file_locked(&self, path: &Path) -> bool {
        is_locked(path)
    }
}

#[cfg(windows)]
fn is_locked(path: &Path) -> bool {
    use std::os::windows::fs::OpenOptionsExt;

    const ERROR_SHARING_VIOLATION: i32 = 32;

    // Exclusive open fails with a sharing violation while another process holds it
    match fs::OpenOptions::new().read(true).share_mode(0).open(path) {
        Ok(_) => false,
        Err(e) => e.raw_os_error() == Some(ERROR_SHARING_VIOLATION),
    }
}

#[cfg(not(windows))]
fn is_locked(_path: &Path) -> bool {
    false
}
