//! Resolution of a local path named by a shell request.

use bridge_traits::FileRecord;
use core_sync::paths::{clean_path, parent_dir};
use core_sync::{Folder, FolderMan};
use std::path::Path;

/// A local path together with the folder that contains it.
#[derive(Debug)]
pub struct FileData<'a> {
    pub folder: Option<&'a Folder>,
    /// Cleaned absolute path, no trailing separator
    pub local_path: String,
    pub folder_relative_path: String,
    /// Path on the server, relative to the account's DAV root
    pub server_relative_path: String,
}

impl<'a> FileData<'a> {
    pub fn get(folders: &'a FolderMan, local_file: &str) -> Self {
        let mut local_path = clean_path(local_file);
        if local_path.len() > 1 && local_path.ends_with('/') {
            local_path.pop();
        }

        let Some((folder, relative)) = folders.folder_for_path(Path::new(&local_path)) else {
            return Self {
                folder: None,
                local_path,
                folder_relative_path: String::new(),
                server_relative_path: String::new(),
            };
        };

        let remote = folder.remote_path().trim_end_matches('/');
        let mut server_relative_path = if relative.is_empty() && remote.is_empty() {
            "/".to_string()
        } else if relative.is_empty() {
            remote.to_string()
        } else {
            format!("{remote}/{relative}")
        };
        if folder.is_ready() {
            if let Some(vfs) = folder.vfs() {
                server_relative_path = vfs.underlying_file_name(&server_relative_path);
            }
        }

        Self {
            folder: Some(folder),
            local_path,
            folder_relative_path: relative,
            server_relative_path,
        }
    }

    /// Journal record of the path; `None` outside a folder or when unknown.
    pub fn journal_record(&self) -> Option<FileRecord> {
        self.folder?.file_record(&self.folder_relative_path)
    }

    /// Data of the directory containing this path.
    pub fn parent_folder(&self, folders: &'a FolderMan) -> FileData<'a> {
        FileData::get(folders, parent_dir(&self.local_path))
    }

    pub fn alias(&self) -> Option<&str> {
        self.folder.map(Folder::alias)
    }
}
