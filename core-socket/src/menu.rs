//! Context menu entries and localized strings offered to file managers.

use crate::file_data::FileData;
use crate::message::split_files;
use bridge_traits::{AvailabilityError, RemotePermissions, VfsItemAvailability, VfsMode};
use core_runtime::ClientConfig;
use core_sync::paths::is_conflict_file;
use core_sync::FolderMan;
use std::path::Path;

/// `(key, text)` pairs answered by `GET_STRINGS`.
pub fn strings(config: &ClientConfig) -> Vec<(&'static str, String)> {
    vec![
        ("SHARE_MENU_TITLE", "Share...".to_string()),
        ("CONTEXT_MENU_TITLE", config.application_name.clone()),
        (
            "COPY_PRIVATE_LINK_MENU_TITLE",
            "Copy private link to clipboard".to_string(),
        ),
        (
            "EMAIL_PRIVATE_LINK_MENU_TITLE",
            "Send private link by email...".to_string(),
        ),
    ]
}

/// Lines of a `GET_STRINGS` reply; an empty argument asks for every key.
pub fn strings_reply(argument: &str, config: &ClientConfig) -> Vec<String> {
    let mut lines = vec!["GET_STRINGS:BEGIN".to_string()];
    lines.extend(
        strings(config)
            .into_iter()
            .filter(|(key, _)| argument.is_empty() || argument == *key)
            .map(|(key, value)| format!("STRING:{key}:{value}")),
    );
    lines.push("GET_STRINGS:END".to_string());
    lines
}

pub fn availability_text(availability: VfsItemAvailability) -> &'static str {
    match availability {
        VfsItemAvailability::AlwaysLocal => "Always available locally",
        VfsItemAvailability::AllHydrated => "Currently available locally",
        VfsItemAvailability::Mixed => "Some available online only",
        VfsItemAvailability::AllDehydrated | VfsItemAvailability::OnlineOnly => {
            "Available online only"
        }
    }
}

/// Lines of a `GET_MENU_ITEMS` reply for a record-separated file list.
pub fn menu_items_reply(folders: &FolderMan, argument: &str) -> Vec<String> {
    let files = split_files(argument);
    let mut lines = vec!["GET_MENU_ITEMS:BEGIN".to_string()];

    if let [file] = files.as_slice() {
        single_file_items(folders, file, &mut lines);
    }
    pin_items(folders, &files, &mut lines);

    lines.push("GET_MENU_ITEMS:END".to_string());
    lines
}

/// Alias of the folder containing every file, `None` if they differ.
fn common_folder<'a>(folders: &'a FolderMan, files: &[&str]) -> Option<&'a str> {
    let mut common: Option<&str> = None;
    for file in files {
        let alias = folders
            .folder_for_path(Path::new(file))
            .map(|(folder, _)| folder.alias());
        match (common, alias) {
            (_, None) => return None,
            (None, Some(alias)) => common = Some(alias),
            (Some(current), Some(alias)) if current != alias => return None,
            _ => {}
        }
    }
    common
}

fn single_file_items(folders: &FolderMan, file: &str, lines: &mut Vec<String>) {
    let data = FileData::get(folders, file);
    let Some(folder) = data.folder else {
        return;
    };
    let Some(account) = folders.account(folder.account_id()) else {
        return;
    };
    if !account.connected {
        return;
    }

    let record = data.journal_record();
    let on_server = record.is_some();
    let flag = if on_server { "::" } else { ":d:" };

    sharing_items(folders, &data, lines);
    lines.push(format!("MENU_ITEM:OPEN_PRIVATE_LINK{flag}Open in browser"));

    let capabilities = &account.capabilities;
    let is_directory = record.as_ref().is_some_and(|r| r.is_directory());
    if capabilities.versioning && capabilities.private_link_details && on_server && !is_directory {
        lines.push(format!(
            "MENU_ITEM:OPEN_PRIVATE_LINK_VERSIONS{flag}Show file versions in browser"
        ));
    }

    let is_conflict = is_conflict_file(&data.folder_relative_path);
    if !is_conflict && on_server {
        return;
    }

    let stat = folders.file_system().stat(Path::new(&data.local_path));
    let is_dir = stat.is_some_and(|s| s.is_dir);
    let is_file = stat.is_some_and(|s| !s.is_dir);
    let parent_perm = data
        .parent_folder(folders)
        .journal_record()
        .map(|r| r.remote_perm)
        .unwrap_or_default();
    // Unknown parent permissions: assume we may add there
    let can_add_to_dir = parent_perm.is_null()
        || (is_file && !parent_perm.has(RemotePermissions::CAN_ADD_FILE))
        || (is_dir && !parent_perm.has(RemotePermissions::CAN_ADD_SUB_DIRECTORIES));
    let can_change_file = match &record {
        None => true,
        Some(record) => record.remote_perm.has(
            RemotePermissions::CAN_DELETE | RemotePermissions::CAN_MOVE | RemotePermissions::CAN_RENAME,
        ),
    };

    if is_conflict && can_change_file {
        let label = match (can_add_to_dir, on_server) {
            (true, true) => "Rename...",
            (true, false) => "Rename and upload...",
            (false, true) => "Move and rename...",
            (false, false) => "Move, rename and upload...",
        };
        lines.push(format!("MENU_ITEM:MOVE_ITEM::{label}"));
        lines.push("MENU_ITEM:DELETE_ITEM::Delete local changes".to_string());
    }

    if !is_conflict && !on_server && !can_add_to_dir {
        lines.push("MENU_ITEM:MOVE_ITEM::Move and upload...".to_string());
        lines.push("MENU_ITEM:DELETE_ITEM::Delete".to_string());
    }
}

fn sharing_items(folders: &FolderMan, data: &FileData<'_>, lines: &mut Vec<String>) {
    let Some(account) = data.folder.and_then(|f| folders.account(f.account_id())) else {
        return;
    };
    let config = folders.config();
    let capabilities = &account.capabilities;
    let public_links_enabled = config.link_sharing && capabilities.share_public_link;
    if !capabilities.share_api || !(config.user_group_sharing || public_links_enabled) {
        return;
    }

    let record = data.journal_record();
    let flag = if record.is_some() { "::" } else { ":d:" };

    match &record {
        Some(record)
            if !record.remote_perm.is_null()
                && !record.remote_perm.has(RemotePermissions::CAN_RESHARE) =>
        {
            let what = if record.is_directory() { "folder" } else { "file" };
            lines.push(format!(
                "MENU_ITEM:DISABLED:d:Resharing this {what} is not allowed"
            ));
        }
        _ => {
            lines.push(format!("MENU_ITEM:SHARE{flag}Share..."));
            if account.can_copy_public_link(config.link_sharing) {
                lines.push(format!(
                    "MENU_ITEM:COPY_PUBLIC_LINK{flag}Create and copy public link to clipboard"
                ));
            } else if public_links_enabled {
                lines.push(format!(
                    "MENU_ITEM:MANAGE_PUBLIC_LINKS{flag}Copy public link to clipboard"
                ));
            }
        }
    }

    lines.push(format!(
        "MENU_ITEM:COPY_PRIVATE_LINK{flag}Copy private link to clipboard"
    ));
}

fn pin_items(folders: &FolderMan, files: &[&str], lines: &mut Vec<String>) {
    let Some(folder) = common_folder(folders, files).and_then(|alias| folders.folder(alias)) else {
        return;
    };
    let shown = folder.is_ready()
        && folder.vfs_mode() != VfsMode::Off
        && folder.vfs().is_some_and(|vfs| vfs.pin_actions_shown());
    if !shown {
        return;
    }

    let mut combined: Option<VfsItemAvailability> = None;
    for file in files {
        let data = FileData::get(folders, file);
        let availability = match folder.availability(&data.folder_relative_path) {
            Ok(availability) => availability,
            Err(AvailabilityError::DbError) => VfsItemAvailability::Mixed,
            Err(AvailabilityError::NoSuchItem) => continue,
        };
        combined = Some(match combined {
            Some(current) => current.merge(availability),
            None => availability,
        });
    }
    let Some(combined) = combined else {
        return;
    };

    let (make_local, free_space) = match combined {
        VfsItemAvailability::AlwaysLocal => (false, true),
        VfsItemAvailability::AllHydrated | VfsItemAvailability::Mixed => (true, true),
        VfsItemAvailability::AllDehydrated | VfsItemAvailability::OnlineOnly => (true, false),
    };
    let enabled = |on: bool| if on { ":" } else { "d:" };

    lines.push("MENU_SEPARATOR:d::".to_string());
    lines.push(format!(
        "MENU_ITEM:CURRENT_PIN:d:{}",
        availability_text(combined)
    ));
    lines.push(format!(
        "MENU_ITEM:MAKE_AVAILABLE_LOCALLY:{}Make always available locally",
        enabled(make_local)
    ));
    lines.push(format!(
        "MENU_ITEM:MAKE_ONLINE_ONLY:{}Free up local space",
        enabled(free_space)
    ));
}
