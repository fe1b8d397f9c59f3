//! # Settings Adapter
//!
//! Reads and writes [`FolderDefinition`]s through any
//! [`SettingsStore`](bridge_traits::SettingsStore).
//!
//! ## Key Layout
//!
//! ```text
//! Accounts/version                                  = 2
//! Accounts/<account>/version                        = 1
//! Accounts/<account>/<group>/<alias>/localPath
//! Accounts/<account>/<group>/<alias>/journalPath
//! Accounts/<account>/<group>/<alias>/targetPath
//! Accounts/<account>/<group>/<alias>/paused
//! Accounts/<account>/<group>/<alias>/ignoreHiddenFiles
//! Accounts/<account>/<group>/<alias>/virtualFilesMode
//! Accounts/<account>/<group>/<alias>/upgradeVfsMode
//! Accounts/<account>/<group>/<alias>/version
//! ```
//!
//! `<group>` is `Folders` for current records. `Multifolders` and
//! `FoldersWithPlaceholders` are read for older installations; the latter
//! implies suffix placeholders when no mode is stored. Saving a definition
//! always writes it to `Folders` and drops any legacy copy.
//!
//! ## Versioning
//!
//! Records written by a newer client are either skipped or deleted, see
//! [`check_settings_version`].

use crate::config::{FolderDefinition, ACCOUNTS_VERSION, ACCOUNT_VERSION, FOLDER_DEFINITION_VERSION};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{SettingsStore, VfsMode};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const ACCOUNTS: &str = "Accounts";
const FOLDERS_GROUP: &str = "Folders";
const LEGACY_GROUPS: [&str; 2] = ["Multifolders", "FoldersWithPlaceholders"];
const PLACEHOLDER_GROUP: &str = "FoldersWithPlaceholders";

/// What to do with a record whose version is newer than supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TooNewPolicy {
    /// Leave the keys alone and ignore the record.
    #[default]
    Skip,
    /// Remove the keys so the record is rebuilt from scratch.
    Delete,
}

/// Result of comparing a stored version against the supported one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    Compatible,
    SkipTooNew,
    DeleteTooNew,
}

/// Pure version gate. A missing version counts as the oldest format.
pub fn check_settings_version(found: Option<i64>, max_supported: i64, policy: TooNewPolicy) -> VersionCheck {
    match found {
        Some(version) if version > max_supported => match policy {
            TooNewPolicy::Skip => VersionCheck::SkipTooNew,
            TooNewPolicy::Delete => VersionCheck::DeleteTooNew,
        },
        _ => VersionCheck::Compatible,
    }
}

/// Folder definition persistence on top of a [`SettingsStore`].
#[derive(Clone)]
pub struct SettingsAdapter {
    store: Arc<dyn SettingsStore>,
}

impl std::fmt::Debug for SettingsAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsAdapter").finish_non_exhaustive()
    }
}

impl SettingsAdapter {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    fn folder_prefix(account_id: &str, group: &str, alias: &str) -> String {
        format!("{ACCOUNTS}/{account_id}/{group}/{alias}/")
    }

    /// Checks the global and per-account versions, writing them when absent.
    ///
    /// Returns `Err(IncompatibleVersion)` when a newer client owns the
    /// accounts group and `policy` is [`TooNewPolicy::Skip`].
    pub async fn prepare_account(&self, account_id: &str, policy: TooNewPolicy) -> Result<()> {
        let accounts_key = format!("{ACCOUNTS}/version");
        let found = self.store.get_i64(&accounts_key).await?;
        match check_settings_version(found, ACCOUNTS_VERSION, policy) {
            VersionCheck::Compatible => {}
            VersionCheck::SkipTooNew => {
                return Err(Error::IncompatibleVersion {
                    key: accounts_key,
                    found: found.unwrap_or_default(),
                    supported: ACCOUNTS_VERSION,
                })
            }
            VersionCheck::DeleteTooNew => {
                warn!(found = ?found, "Discarding accounts written by a newer client");
                self.store.remove_prefix(&format!("{ACCOUNTS}/")).await?;
            }
        }
        if found != Some(ACCOUNTS_VERSION) {
            self.store.set_i64(&accounts_key, ACCOUNTS_VERSION).await?;
        }

        let account_key = format!("{ACCOUNTS}/{account_id}/version");
        let found = self.store.get_i64(&account_key).await?;
        match check_settings_version(found, ACCOUNT_VERSION, policy) {
            VersionCheck::Compatible => {}
            VersionCheck::SkipTooNew => {
                return Err(Error::IncompatibleVersion {
                    key: account_key,
                    found: found.unwrap_or_default(),
                    supported: ACCOUNT_VERSION,
                })
            }
            VersionCheck::DeleteTooNew => {
                warn!(account_id, found = ?found, "Discarding account written by a newer client");
                self.store
                    .remove_prefix(&format!("{ACCOUNTS}/{account_id}/"))
                    .await?;
            }
        }
        if found != Some(ACCOUNT_VERSION) {
            self.store.set_i64(&account_key, ACCOUNT_VERSION).await?;
        }
        Ok(())
    }

    /// Account ids that have a settings subtree.
    pub async fn account_ids(&self) -> Result<Vec<String>> {
        let prefix = format!("{ACCOUNTS}/");
        let mut ids: Vec<String> = Vec::new();
        for key in self.store.list_keys(&prefix).await? {
            let rest = &key[prefix.len()..];
            if let Some((id, _)) = rest.split_once('/') {
                ids.push(id.to_string());
            }
        }
        ids.dedup();
        Ok(ids)
    }

    /// Loads every folder of an account from all groups.
    ///
    /// Definitions in `Folders` win over legacy copies with the same alias.
    pub async fn load_folders(
        &self,
        account_id: &str,
        policy: TooNewPolicy,
    ) -> Result<Vec<FolderDefinition>> {
        let mut by_alias: BTreeMap<String, FolderDefinition> = BTreeMap::new();

        for group in LEGACY_GROUPS.iter().copied().chain([FOLDERS_GROUP]) {
            for alias in self.aliases_in_group(account_id, group).await? {
                let prefix = Self::folder_prefix(account_id, group, &alias);
                let version = self.store.get_i64(&format!("{prefix}version")).await?;
                match check_settings_version(version, FOLDER_DEFINITION_VERSION, policy) {
                    VersionCheck::Compatible => {}
                    VersionCheck::SkipTooNew => {
                        warn!(alias = %alias, group, version = ?version, "Skipping folder from a newer client");
                        continue;
                    }
                    VersionCheck::DeleteTooNew => {
                        warn!(alias = %alias, group, version = ?version, "Deleting folder from a newer client");
                        self.store.remove_prefix(&prefix).await?;
                        continue;
                    }
                }

                match self.read_definition(account_id, group, &alias).await? {
                    Some(definition) => {
                        debug!(alias = %alias, group, "Loaded folder definition");
                        by_alias.insert(alias, definition);
                    }
                    None => warn!(alias = %alias, group, "Folder definition without local path"),
                }
            }
        }

        Ok(by_alias.into_values().collect())
    }

    async fn aliases_in_group(&self, account_id: &str, group: &str) -> Result<Vec<String>> {
        let prefix = format!("{ACCOUNTS}/{account_id}/{group}/");
        let mut aliases: Vec<String> = self
            .store
            .list_keys(&prefix)
            .await?
            .into_iter()
            .filter_map(|key| {
                key[prefix.len()..]
                    .split_once('/')
                    .map(|(alias, _)| alias.to_string())
            })
            .collect();
        aliases.dedup();
        Ok(aliases)
    }

    async fn read_definition(
        &self,
        account_id: &str,
        group: &str,
        alias: &str,
    ) -> Result<Option<FolderDefinition>> {
        let prefix = Self::folder_prefix(account_id, group, alias);
        let Some(local_path) = self.store.get_string(&format!("{prefix}localPath")).await? else {
            return Ok(None);
        };
        let target_path = self
            .store
            .get_string(&format!("{prefix}targetPath"))
            .await?
            .unwrap_or_default();

        let mut definition =
            FolderDefinition::new(alias, account_id, PathBuf::from(local_path), &target_path)
                .with_journal_path(
                    self.store
                        .get_string(&format!("{prefix}journalPath"))
                        .await?
                        .unwrap_or_default(),
                )
                .with_paused(
                    self.store
                        .get_bool(&format!("{prefix}paused"))
                        .await?
                        .unwrap_or(false),
                )
                .with_ignore_hidden_files(
                    self.store
                        .get_bool(&format!("{prefix}ignoreHiddenFiles"))
                        .await?
                        .unwrap_or(true),
                );

        let mode = match self.store.get_string(&format!("{prefix}virtualFilesMode")).await? {
            Some(raw) => raw.parse::<VfsMode>().unwrap_or_else(|_| {
                warn!(alias, mode = %raw, "Unknown virtual files mode, using off");
                VfsMode::Off
            }),
            None => VfsMode::Off,
        };
        definition.virtual_files_mode = if group == PLACEHOLDER_GROUP && mode == VfsMode::Off {
            VfsMode::WithSuffix
        } else {
            mode
        };
        definition.upgrade_vfs_mode = self
            .store
            .get_bool(&format!("{prefix}upgradeVfsMode"))
            .await?
            .unwrap_or(false);

        Ok(Some(definition))
    }

    /// Writes a definition under `Folders` and removes legacy copies.
    pub async fn save_folder(&self, definition: &FolderDefinition) -> Result<()> {
        if definition.alias.is_empty() || definition.alias.contains('/') {
            return Err(Error::Config(format!(
                "invalid folder alias '{}'",
                definition.alias
            )));
        }

        let account = &definition.account_id;
        let prefix = Self::folder_prefix(account, FOLDERS_GROUP, &definition.alias);
        let store = &self.store;

        store
            .set_string(
                &format!("{prefix}localPath"),
                &definition.local_path.to_string_lossy(),
            )
            .await?;
        store
            .set_string(&format!("{prefix}journalPath"), &definition.journal_path)
            .await?;
        store
            .set_string(&format!("{prefix}targetPath"), &definition.target_path)
            .await?;
        store
            .set_bool(&format!("{prefix}paused"), definition.paused)
            .await?;
        store
            .set_bool(
                &format!("{prefix}ignoreHiddenFiles"),
                definition.ignore_hidden_files,
            )
            .await?;
        store
            .set_string(
                &format!("{prefix}virtualFilesMode"),
                definition.virtual_files_mode.as_str(),
            )
            .await?;
        if definition.upgrade_vfs_mode {
            store
                .set_bool(&format!("{prefix}upgradeVfsMode"), true)
                .await?;
        } else {
            store.delete(&format!("{prefix}upgradeVfsMode")).await?;
        }
        store
            .set_i64(&format!("{prefix}version"), FOLDER_DEFINITION_VERSION)
            .await?;

        for group in LEGACY_GROUPS {
            let legacy = Self::folder_prefix(account, group, &definition.alias);
            let removed = store.remove_prefix(&legacy).await?;
            if removed > 0 {
                info!(alias = %definition.alias, group, "Migrated legacy folder definition");
            }
        }
        Ok(())
    }

    /// Removes every stored copy of a folder.
    pub async fn remove_folder(&self, account_id: &str, alias: &str) -> Result<()> {
        for group in LEGACY_GROUPS.iter().copied().chain([FOLDERS_GROUP]) {
            self.store
                .remove_prefix(&Self::folder_prefix(account_id, group, alias))
                .await?;
        }
        Ok(())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Non-persistent [`SettingsStore`], handy for tests and ephemeral runs.
#[derive(Debug, Default, Clone)]
pub struct MemorySettingsStore {
    values: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_values<T>(&self, f: impl FnOnce(&mut BTreeMap<String, String>) -> T) -> T {
        let mut guard = match self.values.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()> {
        self.with_values(|v| v.insert(key.to_string(), value.to_string()));
        Ok(())
    }

    async fn get_string(&self, key: &str) -> BridgeResult<Option<String>> {
        Ok(self.with_values(|v| v.get(key).cloned()))
    }

    async fn set_bool(&self, key: &str, value: bool) -> BridgeResult<()> {
        self.set_string(key, if value { "true" } else { "false" }).await
    }

    async fn get_bool(&self, key: &str) -> BridgeResult<Option<bool>> {
        Ok(self.get_string(key).await?.map(|s| s == "true"))
    }

    async fn set_i64(&self, key: &str, value: i64) -> BridgeResult<()> {
        self.set_string(key, &value.to_string()).await
    }

    async fn get_i64(&self, key: &str) -> BridgeResult<Option<i64>> {
        Ok(self.get_string(key).await?.and_then(|s| s.parse().ok()))
    }

    async fn delete(&self, key: &str) -> BridgeResult<()> {
        self.with_values(|v| v.remove(key));
        Ok(())
    }

    async fn has_key(&self, key: &str) -> BridgeResult<bool> {
        Ok(self.with_values(|v| v.contains_key(key)))
    }

    async fn list_keys(&self, prefix: &str) -> BridgeResult<Vec<String>> {
        Ok(self.with_values(|v| {
            v.range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, _)| k.clone())
                .collect()
        }))
    }

    async fn remove_prefix(&self, prefix: &str) -> BridgeResult<u64> {
        Ok(self.with_values(|v| {
            let before = v.len();
            v.retain(|k, _| !k.starts_with(prefix));
            (before - v.len()) as u64
        }))
    }
}
