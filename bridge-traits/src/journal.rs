//! Change-tracking database contract.
//!
//! Each folder owns exactly one journal for its whole lifetime. The journal
//! is a local store, so its API is synchronous.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemType {
    File,
    Directory,
    SoftLink,
    /// Dehydrated placeholder
    VirtualFile,
    VirtualFileDownload,
    VirtualFileDehydration,
}

/// Server permission bits attached to a record.
///
/// An empty mask means "unknown": the server never told us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemotePermissions(u16);

impl RemotePermissions {
    pub const CAN_WRITE: u16 = 1 << 0;
    pub const CAN_DELETE: u16 = 1 << 1;
    pub const CAN_RENAME: u16 = 1 << 2;
    pub const CAN_MOVE: u16 = 1 << 3;
    pub const CAN_ADD_FILE: u16 = 1 << 4;
    pub const CAN_ADD_SUB_DIRECTORIES: u16 = 1 << 5;
    pub const CAN_RESHARE: u16 = 1 << 6;
    pub const IS_SHARED: u16 = 1 << 7;
    pub const IS_MOUNTED: u16 = 1 << 8;
    /// Marks the mask as known even when no permission is granted
    const NOT_NULL: u16 = 1 << 15;

    pub fn null() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u16) -> Self {
        Self(bits | Self::NOT_NULL)
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn has(&self, permission: u16) -> bool {
        self.0 & permission == permission
    }
}

/// Last-known state of a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub item_type: ItemType,
    pub size: u64,
    /// Seconds since the Unix epoch
    pub modtime: i64,
    pub etag: String,
    pub file_id: String,
    pub remote_perm: RemotePermissions,
}

impl FileRecord {
    pub fn is_directory(&self) -> bool {
        self.item_type == ItemType::Directory
    }

    pub fn is_file(&self) -> bool {
        matches!(self.item_type, ItemType::File | ItemType::VirtualFileDehydration)
    }

    pub fn is_virtual_file(&self) -> bool {
        matches!(
            self.item_type,
            ItemType::VirtualFile | ItemType::VirtualFileDownload
        )
    }
}

/// Named selective-sync lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectiveSyncListType {
    /// Excluded by the user
    BlackList,
    /// Explicitly included big folders
    WhiteList,
    /// Big folders waiting for a user decision
    UndecidedList,
}

/// Error-blacklist categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Normal,
    InsufficientRemoteStorage,
    /// Soft errors produced locally, e.g. a file locked by another process
    LocalSoftError,
}

/// Entry of the error blacklist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBlacklistRecord {
    pub file: String,
    pub category: ErrorCategory,
    pub error_string: String,
    pub retry_count: u32,
}

/// Partially downloaded file left behind by an interrupted run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadInfo {
    pub file: String,
    pub tmpfile: String,
}

/// Per-folder change-tracking database.
pub trait JournalDb: Send {
    /// Absolute path of the database file.
    fn database_path(&self) -> PathBuf;

    fn file_record(&self, relative_path: &str) -> Result<Option<FileRecord>>;

    fn selective_sync_list(&self, list: SelectiveSyncListType) -> Result<Vec<String>>;

    fn set_selective_sync_list(
        &mut self,
        list: SelectiveSyncListType,
        entries: Vec<String>,
    ) -> Result<()>;

    fn error_blacklist_entry(&self, relative_path: &str) -> Result<Option<ErrorBlacklistRecord>>;

    /// Drop the entry for `relative_path` when it has the given category.
    fn wipe_error_blacklist_entry(
        &mut self,
        relative_path: &str,
        category: ErrorCategory,
    ) -> Result<()>;

    fn wipe_error_blacklist_category(&mut self, category: ErrorCategory) -> Result<()>;

    /// Forget partial downloads and return them so their temp files can go.
    fn take_download_infos(&mut self) -> Result<Vec<DownloadInfo>>;

    fn close(&mut self);
}

/// Files that live next to the journal and must be removed with it.
pub fn journal_sidecar_files(database_path: &std::path::Path) -> Vec<PathBuf> {
    let base = database_path.as_os_str().to_string_lossy().to_string();
    let mut files = vec![database_path.to_path_buf()];
    for suffix in [".ctmp", "-shm", "-wal", "-journal"] {
        files.push(PathBuf::from(format!("{base}{suffix}")));
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissions_null_vs_empty() {
        assert!(RemotePermissions::null().is_null());
        let none_granted = RemotePermissions::from_bits(0);
        assert!(!none_granted.is_null());
        assert!(!none_granted.has(RemotePermissions::CAN_RESHARE));

        let perms = RemotePermissions::from_bits(
            RemotePermissions::CAN_DELETE | RemotePermissions::CAN_MOVE,
        );
        assert!(perms.has(RemotePermissions::CAN_DELETE));
        assert!(!perms.has(RemotePermissions::CAN_RENAME));
    }

    #[test]
    fn sidecars_cover_sqlite_files() {
        let files = journal_sidecar_files(std::path::Path::new("/tmp/.sync_abc.db"));
        assert_eq!(files.len(), 5);
        assert!(files.contains(&PathBuf::from("/tmp/.sync_abc.db-wal")));
        assert!(files.contains(&PathBuf::from("/tmp/.sync_abc.db.ctmp")));
    }
}
