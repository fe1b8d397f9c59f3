//! # Client Configuration
//!
//! Timing constants and feature toggles of the sync scheduler, plus the
//! persisted description of a single sync folder.
//!
//! ## Overview
//!
//! [`ClientConfig`] starts from sensible defaults and is adjusted with
//! `with_*` builder methods. Call [`ClientConfig::validate`] before handing it
//! to the scheduler; zero intervals would make timers spin.
//!
//! ```rust
//! use core_runtime::config::ClientConfig;
//! use std::time::Duration;
//!
//! let config = ClientConfig::default()
//!     .with_remote_poll_interval(Duration::from_secs(60))
//!     .with_max_follow_up_syncs(5)
//!     .with_application_name("Nimbus");
//! config.validate().unwrap();
//! ```
//!
//! [`FolderDefinition`] is the schema-versioned record stored through the
//! settings adapter. Its current version is [`FOLDER_DEFINITION_VERSION`].

use crate::error::{Error, Result};
use bridge_traits::VfsMode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Schema version written for every folder definition.
pub const FOLDER_DEFINITION_VERSION: i64 = 2;

/// Schema version of the accounts group.
pub const ACCOUNTS_VERSION: i64 = 2;

/// Schema version of a single account entry.
pub const ACCOUNT_VERSION: i64 = 1;

/// Version spoken on the shell integration socket.
pub const SOCKET_PROTOCOL_VERSION: &str = "1.1";

// ============================================================================
// Client Configuration
// ============================================================================

/// Scheduler timings and client-wide switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Local minimum between two remote etag polls of a folder.
    pub remote_poll_interval: Duration,

    /// A folder is synced at least this often even without any trigger.
    pub force_sync_interval: Duration,

    /// Interval after which a full local discovery is forced again.
    /// `None` never forces one once the first has happened.
    pub full_local_discovery_interval: Option<Duration>,

    /// Debounce applied to local change notifications before scheduling.
    pub minimum_file_age_for_upload: Duration,

    /// Delay between the engine finishing and the folder publishing it.
    pub finalize_delay: Duration,

    /// Consecutive `ImmediateFollowUp` requests honoured before giving up.
    pub max_follow_up_syncs: u32,

    /// Period of the force-sync/retry scan.
    pub time_scheduler_interval: Duration,

    /// Period of the remote etag due-check.
    pub etag_poll_interval: Duration,

    /// How often files reported as locked are probed again.
    pub lock_check_interval: Duration,

    /// Retry delay after the first failed sync.
    pub first_retry_delay: Duration,

    /// Retry delay after two or more consecutive failures.
    pub retry_delay: Duration,

    /// How long folder removal waits for `UNREGISTER_PATH` to be flushed.
    pub unregister_flush_timeout: Duration,

    /// Socket for the shell integration; platform default when unset.
    pub socket_path: Option<PathBuf>,

    /// Version string reported to shell integrations.
    pub client_version: String,

    /// Product name used in menus and notifications.
    pub application_name: String,

    /// User and group sharing from the file manager.
    pub user_group_sharing: bool,

    /// Public link sharing from the file manager.
    pub link_sharing: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote_poll_interval: Duration::from_secs(30),
            force_sync_interval: Duration::from_secs(2 * 60 * 60),
            full_local_discovery_interval: Some(Duration::from_secs(60 * 60)),
            minimum_file_age_for_upload: Duration::from_secs(2),
            finalize_delay: Duration::from_millis(200),
            max_follow_up_syncs: 3,
            time_scheduler_interval: Duration::from_secs(5),
            etag_poll_interval: Duration::from_secs(1),
            lock_check_interval: Duration::from_secs(20),
            first_retry_delay: Duration::from_secs(10),
            retry_delay: Duration::from_secs(60),
            unregister_flush_timeout: Duration::from_secs(1),
            socket_path: None,
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            application_name: "FolderSync".to_string(),
            user_group_sharing: true,
            link_sharing: true,
        }
    }
}

impl ClientConfig {
    pub fn with_remote_poll_interval(mut self, interval: Duration) -> Self {
        self.remote_poll_interval = interval;
        self
    }

    pub fn with_force_sync_interval(mut self, interval: Duration) -> Self {
        self.force_sync_interval = interval;
        self
    }

    pub fn with_full_local_discovery_interval(mut self, interval: Option<Duration>) -> Self {
        self.full_local_discovery_interval = interval;
        self
    }

    pub fn with_minimum_file_age(mut self, age: Duration) -> Self {
        self.minimum_file_age_for_upload = age;
        self
    }

    pub fn with_finalize_delay(mut self, delay: Duration) -> Self {
        self.finalize_delay = delay;
        self
    }

    pub fn with_max_follow_up_syncs(mut self, max: u32) -> Self {
        self.max_follow_up_syncs = max;
        self
    }

    pub fn with_time_scheduler_interval(mut self, interval: Duration) -> Self {
        self.time_scheduler_interval = interval;
        self
    }

    pub fn with_etag_poll_interval(mut self, interval: Duration) -> Self {
        self.etag_poll_interval = interval;
        self
    }

    pub fn with_lock_check_interval(mut self, interval: Duration) -> Self {
        self.lock_check_interval = interval;
        self
    }

    pub fn with_retry_delays(mut self, first: Duration, subsequent: Duration) -> Self {
        self.first_retry_delay = first;
        self.retry_delay = subsequent;
        self
    }

    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    pub fn with_client_version(mut self, version: impl Into<String>) -> Self {
        self.client_version = version.into();
        self
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    pub fn with_sharing(mut self, user_group: bool, links: bool) -> Self {
        self.user_group_sharing = user_group;
        self.link_sharing = links;
        self
    }

    /// Rejects values that would stall or spin the scheduler.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("remote_poll_interval", self.remote_poll_interval),
            ("force_sync_interval", self.force_sync_interval),
            ("time_scheduler_interval", self.time_scheduler_interval),
            ("etag_poll_interval", self.etag_poll_interval),
            ("lock_check_interval", self.lock_check_interval),
        ];
        for (name, value) in positive {
            if value.is_zero() {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }

        if let Some(interval) = self.full_local_discovery_interval {
            if interval.is_zero() {
                return Err(Error::Config(
                    "full_local_discovery_interval must be greater than zero; use None to disable"
                        .to_string(),
                ));
            }
        }

        if self.first_retry_delay > self.retry_delay {
            return Err(Error::Config(format!(
                "first_retry_delay ({:?}) must not exceed retry_delay ({:?})",
                self.first_retry_delay, self.retry_delay
            )));
        }

        if self.application_name.trim().is_empty() {
            return Err(Error::Config("application_name cannot be empty".to_string()));
        }

        if self.client_version.contains(':') {
            return Err(Error::Config(
                "client_version cannot contain ':' (it is sent on the socket)".to_string(),
            ));
        }

        Ok(())
    }

    /// Effective remote poll interval given a server-mandated minimum.
    pub fn effective_poll_interval(&self, server_minimum: Option<Duration>) -> Duration {
        match server_minimum {
            Some(server) => server.max(self.remote_poll_interval),
            None => self.remote_poll_interval,
        }
    }
}

// ============================================================================
// Folder Definition
// ============================================================================

/// Persisted configuration of one sync folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderDefinition {
    /// Unique key of the folder.
    pub alias: String,
    /// Account the folder belongs to.
    pub account_id: String,
    /// Absolute local path, always ending with `/`.
    pub local_path: PathBuf,
    /// Journal file name, relative to `local_path` unless absolute.
    pub journal_path: String,
    /// Remote path, always starting with `/` and without trailing `/`.
    pub target_path: String,
    pub paused: bool,
    pub ignore_hidden_files: bool,
    pub virtual_files_mode: VfsMode,
    /// Replace an older placeholder backend with the platform one on start-up.
    pub upgrade_vfs_mode: bool,
}

impl FolderDefinition {
    pub fn new(
        alias: impl Into<String>,
        account_id: impl Into<String>,
        local_path: impl AsRef<Path>,
        target_path: &str,
    ) -> Self {
        Self {
            alias: alias.into(),
            account_id: account_id.into(),
            local_path: Self::prepare_local_path(local_path.as_ref()),
            journal_path: String::new(),
            target_path: Self::prepare_target_path(target_path),
            paused: false,
            ignore_hidden_files: true,
            virtual_files_mode: VfsMode::Off,
            upgrade_vfs_mode: false,
        }
    }

    pub fn with_journal_path(mut self, journal_path: impl Into<String>) -> Self {
        self.journal_path = journal_path.into();
        self
    }

    pub fn with_paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    pub fn with_ignore_hidden_files(mut self, ignore: bool) -> Self {
        self.ignore_hidden_files = ignore;
        self
    }

    pub fn with_virtual_files_mode(mut self, mode: VfsMode) -> Self {
        self.virtual_files_mode = mode;
        self
    }

    /// Local path with a guaranteed trailing separator.
    pub fn prepare_local_path(path: &Path) -> PathBuf {
        let mut s = path.to_string_lossy().replace('\\', "/");
        while s.len() > 1 && s.ends_with("//") {
            s.pop();
        }
        if !s.ends_with('/') {
            s.push('/');
        }
        PathBuf::from(s)
    }

    /// Remote path with a leading `/` and no trailing one (except root).
    pub fn prepare_target_path(path: &str) -> String {
        let trimmed = path.trim_end_matches('/');
        if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        }
    }

    /// Journal file name derived from the account user, server url and
    /// remote path, so two folders never share a journal.
    pub fn default_journal_path(user: &str, dav_url: &str, target_path: &str) -> String {
        let key = format!("{user}@{dav_url}:{target_path}");
        let digest = Sha256::digest(key.as_bytes());
        let hex: String = digest[..6].iter().map(|b| format!("{b:02x}")).collect();
        format!(".sync_{hex}.db")
    }

    /// Absolute location of the journal database.
    pub fn absolute_journal_path(&self) -> PathBuf {
        let journal = Path::new(&self.journal_path);
        if journal.is_absolute() {
            journal.to_path_buf()
        } else {
            self.local_path.join(journal)
        }
    }

    /// `local_path` as a string without the trailing separator.
    pub fn local_path_trimmed(&self) -> String {
        let s = self.local_path.to_string_lossy();
        match s.strip_suffix('/') {
            Some(stripped) if !stripped.is_empty() => stripped.to_string(),
            _ => s.into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_follow_up_syncs, 3);
        assert_eq!(config.remote_poll_interval, Duration::from_secs(30));
        assert_eq!(config.finalize_delay, Duration::from_millis(200));
    }

    #[test]
    fn zero_interval_rejected() {
        let config = ClientConfig::default().with_etag_poll_interval(Duration::ZERO);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("etag_poll_interval"));
    }

    #[test]
    fn zero_full_discovery_interval_rejected() {
        let config =
            ClientConfig::default().with_full_local_discovery_interval(Some(Duration::ZERO));
        assert!(config.validate().is_err());

        let disabled = ClientConfig::default().with_full_local_discovery_interval(None);
        assert!(disabled.validate().is_ok());
    }

    #[test]
    fn retry_delays_must_be_ordered() {
        let config = ClientConfig::default()
            .with_retry_delays(Duration::from_secs(90), Duration::from_secs(60));
        assert!(config.validate().is_err());
    }

    #[test]
    fn server_minimum_wins_when_larger() {
        let config = ClientConfig::default();
        assert_eq!(
            config.effective_poll_interval(Some(Duration::from_secs(300))),
            Duration::from_secs(300)
        );
        assert_eq!(
            config.effective_poll_interval(Some(Duration::from_secs(5))),
            Duration::from_secs(30)
        );
        assert_eq!(config.effective_poll_interval(None), Duration::from_secs(30));
    }

    #[test]
    fn definition_normalizes_paths() {
        let def = FolderDefinition::new("work", "acc", "/home/u/work", "Documents/");
        assert_eq!(def.local_path, PathBuf::from("/home/u/work/"));
        assert_eq!(def.target_path, "/Documents");
        assert_eq!(def.local_path_trimmed(), "/home/u/work");

        let root = FolderDefinition::new("root", "acc", "/home/u/all/", "/");
        assert_eq!(root.target_path, "/");
        assert_eq!(root.local_path, PathBuf::from("/home/u/all/"));
    }

    #[test]
    fn journal_path_resolution() {
        let def = FolderDefinition::new("work", "acc", "/home/u/work", "/")
            .with_journal_path(".sync_abc.db");
        assert_eq!(
            def.absolute_journal_path(),
            PathBuf::from("/home/u/work/.sync_abc.db")
        );

        let name = FolderDefinition::default_journal_path("alice", "https://x/dav", "/");
        assert!(name.starts_with(".sync_"));
        assert!(name.ends_with(".db"));
        assert_eq!(name.len(), ".sync_".len() + 12 + ".db".len());
        assert_ne!(
            name,
            FolderDefinition::default_journal_path("alice", "https://x/dav", "/Photos")
        );
    }
}
