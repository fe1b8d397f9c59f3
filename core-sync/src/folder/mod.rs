//! # Sync Folder
//!
//! One local directory synced against one remote directory.
//!
//! ## Overview
//!
//! A folder owns its journal, its placeholder backend and a handle to its
//! transfer engine. It never talks to the scheduler directly: everything it
//! wants to tell the outside world is queued as a [`CoreEvent`] and drained
//! by [`FolderMan`](crate::FolderMan) right after each call, and requests to
//! be scheduled are picked up the same way.
//!
//! ## Lifecycle
//!
//! ```text
//! new() ─► NotYetStarted ─► start_sync() ─► SyncPrepare ─► SyncRunning
//!   │                                                         │
//!   └─► SetupError (path or journal unusable)      Finished ◄─┘
//!                                                      │
//!                          finalize timer ◄────────────┘
//! ```
//!
//! All timing is driven by the caller through `now` arguments; the folder
//! only stores deadlines.

mod change_tracker;

pub use change_tracker::{ChangeReason, PathChangeOutcome};

use crate::account::AccountState;
use crate::discovery::LocalDiscoveryTracker;
use crate::paths::with_trailing_slash;
use crate::result::{SyncResult, SyncStatus};
use crate::timer::{earliest, SingleShot};
use crate::vfs::{create_vfs, upgrade_vfs};
use crate::{Result, SyncError};
use bridge_traits::journal::journal_sidecar_files;
use bridge_traits::{
    AnotherSyncNeeded, AvailabilityError, EngineEvent, EngineSetup, ErrorCategory, FileRecord,
    Instruction, ItemStatus, JournalDb, LocalDiscoveryStyle, LocalFileSystem, PinState,
    SelectiveSyncListType, SyncBackend, SyncEngine, SyncFileStatus, SyncFileStatusTag,
    SyncOptions, SyncRequest, Vfs, VfsEvent, VfsEventSender, VfsItemAvailability, VfsMode,
    VfsSetupParams,
};
use core_runtime::events::{CoreEvent, FolderEvent, UserNotification};
use core_runtime::{ClientConfig, FolderDefinition};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// What the scheduler should do once a finished run is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FinalizeOutcome {
    /// The run changed something; ask the server right away whether more
    /// changed meanwhile.
    pub run_etag_check: bool,
    /// The folder was scheduled while it was running.
    pub reschedule: bool,
}

pub struct Folder {
    definition: FolderDefinition,
    account_id: String,
    journal: Option<Box<dyn JournalDb>>,
    engine: Option<Arc<dyn SyncEngine>>,
    vfs: Option<Box<dyn Vfs>>,
    vfs_ready: bool,
    vfs_events: Option<VfsEventSender>,
    fs: Arc<dyn LocalFileSystem>,
    config: Arc<ClientConfig>,

    sync_result: SyncResult,
    engine_running: bool,
    last_etag: Option<String>,
    etag_job_pending: bool,

    sync_started_at: Instant,
    last_sync_done: Instant,
    last_etag_check_done: Instant,
    last_full_local_discovery: Option<Instant>,
    last_sync_duration: Duration,
    consecutive_failing_syncs: u32,
    consecutive_follow_up_syncs: u32,
    last_another_sync_needed: AnotherSyncNeeded,
    last_discovery_style: LocalDiscoveryStyle,

    discovery: LocalDiscoveryTracker,
    schedule_self_timer: SingleShot,
    finalize_timer: SingleShot,
    watcher_reliable: bool,
    pending_reschedule: bool,
    schedule_requested: bool,

    account_connected: bool,
    server_poll_interval: Option<Duration>,

    events: Vec<CoreEvent>,
}

impl std::fmt::Debug for Folder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Folder")
            .field("alias", &self.definition.alias)
            .field("path", &self.definition.local_path)
            .field("status", &self.sync_result.status())
            .field("engine_running", &self.engine_running)
            .finish_non_exhaustive()
    }
}

impl Folder {
    /// Builds a folder from its definition.
    ///
    /// Never fails: problems with the local directory, the journal or the
    /// placeholder backend leave the folder in `SetupError` with the reason
    /// in its result.
    pub fn new(
        mut definition: FolderDefinition,
        account: &AccountState,
        backend: &dyn SyncBackend,
        fs: Arc<dyn LocalFileSystem>,
        config: Arc<ClientConfig>,
        vfs_events: Option<VfsEventSender>,
        now: Instant,
    ) -> Self {
        let mut definition_changed = false;
        if definition.journal_path.is_empty() {
            definition.journal_path = FolderDefinition::default_journal_path(
                &account.user,
                &account.dav_url,
                &definition.target_path,
            );
            definition_changed = true;
        }

        let initial = if definition.paused {
            SyncStatus::Paused
        } else {
            SyncStatus::NotYetStarted
        };

        let mut folder = Self {
            account_id: account.id.clone(),
            definition,
            journal: None,
            engine: None,
            vfs: None,
            vfs_ready: false,
            vfs_events,
            fs,
            config,
            sync_result: SyncResult::new(initial),
            engine_running: false,
            last_etag: None,
            etag_job_pending: false,
            sync_started_at: now,
            last_sync_done: now,
            last_etag_check_done: now,
            last_full_local_discovery: None,
            last_sync_duration: Duration::ZERO,
            consecutive_failing_syncs: 0,
            consecutive_follow_up_syncs: 0,
            last_another_sync_needed: AnotherSyncNeeded::NoFollowUpSync,
            last_discovery_style: LocalDiscoveryStyle::FilesystemOnly,
            discovery: LocalDiscoveryTracker::new(),
            schedule_self_timer: SingleShot::new(),
            finalize_timer: SingleShot::new(),
            watcher_reliable: true,
            pending_reschedule: false,
            schedule_requested: false,
            account_connected: account.connected,
            server_poll_interval: account.server_poll_interval,
            events: Vec::new(),
        };

        if folder.setup(backend) {
            folder.setup_vfs(backend, &mut definition_changed);
            folder.start_vfs(backend);
        }
        if definition_changed {
            folder.emit(FolderEvent::DefinitionChanged {
                alias: folder.definition.alias.clone(),
            });
        }
        folder
    }

    fn setup(&mut self, backend: &dyn SyncBackend) -> bool {
        if let Err(message) = self.check_local_path() {
            self.set_setup_error(message);
            return false;
        }

        let mut journal = match backend
            .open_journal(&self.definition.local_path, &self.definition.journal_path)
        {
            Ok(journal) => journal,
            Err(e) => {
                warn!(alias = %self.alias(), error = %e, "Journal could not be opened");
                self.set_setup_error(format!(
                    "{} failed to open the database.",
                    self.definition.local_path.display()
                ));
                return false;
            }
        };

        // Local soft errors must not survive a restart
        if let Err(e) = journal.wipe_error_blacklist_category(ErrorCategory::LocalSoftError) {
            warn!(alias = %self.alias(), error = %e, "Could not wipe local soft errors");
        }
        self.journal = Some(journal);

        let setup = EngineSetup {
            alias: self.definition.alias.clone(),
            account_id: self.account_id.clone(),
            local_path: self.definition.local_path.clone(),
            remote_path: self.definition.target_path.clone(),
            journal_path: self.definition.absolute_journal_path(),
        };
        match backend.create_engine(&setup) {
            Ok(engine) => {
                self.engine = Some(engine);
                true
            }
            Err(e) => {
                self.set_setup_error(format!("Could not create the sync engine: {e}"));
                false
            }
        }
    }

    fn check_local_path(&self) -> std::result::Result<(), String> {
        let path = self.definition.local_path.as_path();
        let shown = path.display();
        match self.fs.stat(path) {
            None => Err(format!("Local folder {shown} does not exist.")),
            Some(stat) if !stat.is_dir => Err(format!("{shown} should be a folder but is not.")),
            Some(_) if !self.fs.is_readable(path) => Err(format!("{shown} is not readable.")),
            Some(_) if !self.fs.is_writable(path) => Err(format!("{shown} is not writable.")),
            Some(_) => {
                debug!(alias = %self.alias(), "Checked local path ok");
                Ok(())
            }
        }
    }

    fn setup_vfs(&mut self, backend: &dyn SyncBackend, definition_changed: &mut bool) {
        let mode = self.definition.virtual_files_mode;
        let vfs = match create_vfs(backend, mode) {
            Ok(vfs) => vfs,
            Err(e) => {
                self.set_setup_error(e.to_string());
                return;
            }
        };

        if mode == VfsMode::WithSuffix && self.definition.upgrade_vfs_mode {
            if backend.is_vfs_available(VfsMode::WindowsCfApi) {
                match upgrade_vfs(vfs, VfsMode::WindowsCfApi, backend) {
                    Ok(upgraded) => {
                        self.vfs = Some(upgraded);
                        self.definition.virtual_files_mode = VfsMode::WindowsCfApi;
                        self.definition.upgrade_vfs_mode = false;
                    }
                    Err(e) => {
                        self.set_setup_error(e.to_string());
                        return;
                    }
                }
            } else {
                self.vfs = Some(vfs);
            }
            *definition_changed = true;
        } else {
            self.vfs = Some(vfs);
        }
    }

    fn start_vfs(&mut self, backend: &dyn SyncBackend) {
        let Some(mode) = self.vfs.as_ref().map(|vfs| vfs.mode()) else {
            return;
        };
        if mode != VfsMode::Off && !backend.is_vfs_available(mode) {
            self.set_setup_error(format!(
                "Virtual file mode {mode} is not supported for {}",
                self.definition.local_path.display()
            ));
            return;
        }

        let params = VfsSetupParams {
            alias: self.definition.alias.clone(),
            filesystem_path: self.definition.local_path.clone(),
            remote_path: self.remote_path_trailing_slash(),
            provider_name: self.config.application_name.clone(),
            events: self.vfs_events.clone(),
        };
        let journal_path = self.journal.as_ref().map(|j| j.database_path());
        let Some(vfs) = self.vfs.as_mut() else {
            return;
        };
        if let Err(e) = vfs.start(&params) {
            self.vfs_ready = false;
            self.set_setup_error(e.to_string());
            return;
        }

        // SQLite temporaries are recreated on every open
        if let Some(db) = journal_path {
            let excluded = SyncFileStatus::new(SyncFileStatusTag::Excluded);
            for suffix in ["-wal", "-shm"] {
                let mut name = db.clone().into_os_string();
                name.push(suffix);
                vfs.file_status_changed(Path::new(&name), excluded);
            }
        }
        self.vfs_ready = true;
    }

    fn set_setup_error(&mut self, message: String) {
        error!(alias = %self.alias(), "{message}");
        self.sync_result.append_error(message);
        self.sync_result.set_status(SyncStatus::SetupError);
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn alias(&self) -> &str {
        &self.definition.alias
    }

    pub fn definition(&self) -> &FolderDefinition {
        &self.definition
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Local root, always ending with `/`.
    pub fn path(&self) -> &Path {
        &self.definition.local_path
    }

    /// Local root as a string with a trailing `/`.
    pub fn path_str(&self) -> String {
        with_trailing_slash(&self.definition.local_path.to_string_lossy())
    }

    /// Local root without the trailing separator.
    pub fn clean_path(&self) -> String {
        self.definition.local_path_trimmed()
    }

    pub fn remote_path(&self) -> &str {
        &self.definition.target_path
    }

    pub fn remote_path_trailing_slash(&self) -> String {
        with_trailing_slash(&self.definition.target_path)
    }

    pub fn sync_result(&self) -> &SyncResult {
        &self.sync_result
    }

    pub fn status(&self) -> SyncStatus {
        self.sync_result.status()
    }

    pub fn has_setup_error(&self) -> bool {
        self.sync_result.status() == SyncStatus::SetupError
    }

    pub fn is_ready(&self) -> bool {
        self.vfs_ready && !self.has_setup_error()
    }

    pub fn sync_paused(&self) -> bool {
        self.definition.paused
    }

    pub fn can_sync(&self) -> bool {
        !self.sync_paused() && self.account_connected && self.is_ready()
    }

    pub fn is_sync_running(&self) -> bool {
        !self.has_setup_error()
            && (self.engine_running || self.vfs.as_ref().is_some_and(|vfs| vfs.is_hydrating()))
    }

    /// Whether the remote root should be checked for changes now.
    pub fn due_to_sync(&self, now: Instant) -> bool {
        if self.is_sync_running() || self.etag_job_pending || !self.can_sync() {
            return false;
        }
        let poll = self.config.effective_poll_interval(self.server_poll_interval);
        now.saturating_duration_since(self.last_etag_check_done) >= poll
    }

    pub fn journal(&self) -> Option<&dyn JournalDb> {
        self.journal.as_deref()
    }

    pub fn vfs(&self) -> Option<&dyn Vfs> {
        self.vfs.as_deref()
    }

    pub fn vfs_mode(&self) -> VfsMode {
        self.definition.virtual_files_mode
    }

    pub fn engine(&self) -> Option<&Arc<dyn SyncEngine>> {
        self.engine.as_ref()
    }

    pub fn last_etag(&self) -> Option<&str> {
        self.last_etag.as_deref()
    }

    pub fn etag_job_pending(&self) -> bool {
        self.etag_job_pending
    }

    pub fn last_sync_duration(&self) -> Duration {
        self.last_sync_duration
    }

    pub fn time_since_last_sync_done(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_sync_done)
    }

    pub fn consecutive_failing_syncs(&self) -> u32 {
        self.consecutive_failing_syncs
    }

    pub fn consecutive_follow_up_syncs(&self) -> u32 {
        self.consecutive_follow_up_syncs
    }

    pub fn last_another_sync_needed(&self) -> AnotherSyncNeeded {
        self.last_another_sync_needed
    }

    pub fn discovery(&self) -> &LocalDiscoveryTracker {
        &self.discovery
    }

    pub fn watcher_reliable(&self) -> bool {
        self.watcher_reliable
    }

    pub fn account_connected(&self) -> bool {
        self.account_connected
    }

    /// Journal record of a relative path, `None` when unknown or unreadable.
    pub fn file_record(&self, relative_path: &str) -> Option<FileRecord> {
        let journal = self.journal.as_ref()?;
        match journal.file_record(relative_path) {
            Ok(record) => record,
            Err(e) => {
                warn!(alias = %self.alias(), path = relative_path, error = %e, "Journal lookup failed");
                None
            }
        }
    }

    /// Overlay status of a relative path (`""` is the root).
    pub fn file_status(&self, relative_path: &str) -> SyncFileStatus {
        if self.has_setup_error() {
            return SyncFileStatus::new(SyncFileStatusTag::Error);
        }
        match &self.engine {
            Some(engine) => engine.file_status(relative_path),
            None => SyncFileStatus::new(SyncFileStatusTag::None),
        }
    }

    pub fn pin_state(&self, relative_path: &str) -> Option<PinState> {
        self.vfs.as_ref()?.pin_state(relative_path)
    }

    pub fn availability(
        &self,
        relative_path: &str,
    ) -> std::result::Result<VfsItemAvailability, AvailabilityError> {
        match &self.vfs {
            Some(vfs) => vfs.availability(relative_path),
            None => Err(AvailabilityError::NoSuchItem),
        }
    }

    pub fn set_pin_state(&mut self, relative_path: &str, state: PinState) -> Result<()> {
        let vfs = self
            .vfs
            .as_mut()
            .ok_or_else(|| SyncError::InvalidState("virtual files not started".into()))?;
        vfs.set_pin_state(relative_path, state)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Outbox
    // ------------------------------------------------------------------

    fn emit(&mut self, event: FolderEvent) {
        self.events.push(CoreEvent::Folder(event));
    }

    fn notify(&mut self, notification: UserNotification) {
        self.events.push(CoreEvent::Notification(notification));
    }

    fn emit_state_changed(&mut self) {
        let event = FolderEvent::SyncStateChanged {
            alias: self.definition.alias.clone(),
            status: self.sync_result.status().as_str().to_string(),
        };
        self.emit(event);
    }

    /// Drains queued events in emission order.
    pub fn take_events(&mut self) -> Vec<CoreEvent> {
        std::mem::take(&mut self.events)
    }

    /// Asks the scheduler to enqueue this folder.
    pub fn request_schedule(&mut self) {
        self.schedule_requested = true;
    }

    pub fn take_schedule_request(&mut self) -> bool {
        std::mem::take(&mut self.schedule_requested)
    }

    // ------------------------------------------------------------------
    // Scheduling state
    // ------------------------------------------------------------------

    pub(crate) fn set_account_state(&mut self, connected: bool, poll: Option<Duration>) {
        self.account_connected = connected;
        self.server_poll_interval = poll;
    }

    pub(crate) fn set_pending_reschedule(&mut self) {
        self.pending_reschedule = true;
    }

    pub(crate) fn mark_etag_job_queued(&mut self) {
        self.etag_job_pending = true;
    }

    pub(crate) fn on_etag_job_finished(&mut self, now: Instant) {
        self.etag_job_pending = false;
        self.last_etag_check_done = now;
    }

    /// Arms the single-shot debounce timer unless it already runs.
    pub fn schedule_this_folder_soon(&mut self, now: Instant) {
        let delay = self.config.minimum_file_age_for_upload;
        if self.schedule_self_timer.start_if_idle(now, delay) {
            debug!(alias = %self.alias(), ?delay, "Scheduling folder soon");
        }
    }

    pub fn schedule_timer_active(&self) -> bool {
        self.schedule_self_timer.is_active()
    }

    pub fn finalize_pending(&self) -> bool {
        self.finalize_timer.is_active()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        earliest([
            self.schedule_self_timer.deadline(),
            self.finalize_timer.deadline(),
        ])
    }

    /// Fires the debounce timer; true means "schedule me".
    pub(crate) fn fire_schedule_timer(&mut self, now: Instant) -> bool {
        self.schedule_self_timer.fire(now)
    }

    pub(crate) fn fire_finalize_timer(&mut self, now: Instant) -> Option<FinalizeOutcome> {
        self.finalize_timer.fire(now).then(|| self.finalize())
    }

    /// Forces the next run to walk the whole local tree.
    pub fn force_next_full_local_discovery(&mut self) {
        self.last_full_local_discovery = None;
    }

    pub fn schedule_path_for_local_discovery(&mut self, relative_path: &str) {
        self.discovery.add_touched_path(relative_path);
    }

    // ------------------------------------------------------------------
    // Running a sync
    // ------------------------------------------------------------------

    /// Starts a run. Only the scheduler calls this.
    pub fn start_sync(&mut self, now: Instant) -> Result<()> {
        if !self.is_ready() {
            error!(alias = %self.alias(), "Sync requested for a folder that is not ready");
            return Err(SyncError::InvalidState(format!(
                "folder {} is not ready",
                self.alias()
            )));
        }
        if self.is_sync_running() {
            error!(alias = %self.alias(), "Sync is still running and a new one was requested");
            return Err(SyncError::InvalidState(format!(
                "folder {} is already syncing",
                self.alias()
            )));
        }
        let Some(engine) = self.engine.clone() else {
            return Err(SyncError::InvalidState(format!(
                "folder {} has no engine",
                self.alias()
            )));
        };

        self.sync_started_at = now;
        self.sync_result.reset();
        self.sync_result.set_status(SyncStatus::SyncPrepare);
        self.emit_state_changed();

        info!(
            alias = %self.alias(),
            remote = %self.definition.target_path,
            version = %self.config.client_version,
            "Start syncing"
        );

        let periodic_full_now = match self.config.full_local_discovery_interval {
            Some(interval) => self
                .last_full_local_discovery
                .map_or(true, |at| now.saturating_duration_since(at) >= interval),
            None => false,
        };
        let (style, paths) = if self.watcher_reliable
            && self.last_full_local_discovery.is_some()
            && !periodic_full_now
        {
            info!(alias = %self.alias(), "Allowing local discovery to read from the database");
            (
                LocalDiscoveryStyle::DatabaseAndFilesystem,
                self.discovery.start_sync_partial_discovery(),
            )
        } else {
            info!(alias = %self.alias(), "Forbidding local discovery to read from the database");
            self.discovery.start_sync_full_discovery();
            (LocalDiscoveryStyle::FilesystemOnly, Vec::new())
        };
        self.last_discovery_style = style;

        let request = SyncRequest {
            alias: self.definition.alias.clone(),
            local_path: self.definition.local_path.clone(),
            remote_path: self.definition.target_path.clone(),
            discovery_style: style,
            local_discovery_paths: paths,
            options: SyncOptions {
                ignore_hidden_files: self.definition.ignore_hidden_files,
                vfs_mode: self.definition.virtual_files_mode,
                ..SyncOptions::default()
            },
        };

        self.engine_running = true;
        if let Err(e) = engine.start_sync(request) {
            error!(alias = %self.alias(), error = %e, "Engine refused to start");
            self.sync_result.append_error(e.to_string());
            self.on_sync_finished(false, AnotherSyncNeeded::NoFollowUpSync, now);
            return Ok(());
        }

        let event = FolderEvent::SyncStarted {
            alias: self.definition.alias.clone(),
            discovery: style.as_str().to_string(),
        };
        self.emit(event);
        Ok(())
    }

    /// Applies one engine event.
    pub fn on_engine_event(&mut self, event: EngineEvent, now: Instant) {
        match event {
            EngineEvent::Started => {
                info!(alias = %self.alias(), "Propagation started");
                self.sync_result.set_status(SyncStatus::SyncRunning);
                self.emit_state_changed();
            }
            EngineEvent::ItemCompleted(item) => {
                self.discovery.slot_item_completed(&item);
                let unremarkable = item.status == ItemStatus::Success
                    && matches!(item.instruction, Instruction::None | Instruction::UpdateMetadata);
                if !unremarkable {
                    self.sync_result.process_completed_item(&item);
                }
            }
            EngineEvent::Progress(progress) => {
                let event = FolderEvent::ProgressUpdated {
                    alias: self.definition.alias.clone(),
                    completed_files: progress.completed_files,
                    total_files: progress.total_files,
                };
                self.emit(event);
            }
            EngineEvent::Finished {
                success,
                another_sync_needed,
            } => {
                if !self.engine_running {
                    warn!(alias = %self.alias(), "Finish reported without a running sync");
                    return;
                }
                self.on_sync_finished(success, another_sync_needed, now);
            }
            EngineEvent::SyncError { message } => {
                warn!(alias = %self.alias(), %message, "Sync error");
                self.sync_result.append_error(message);
            }
            EngineEvent::AboutToRemoveAllFiles { direction } => {
                let event = FolderEvent::AboutToRemoveAllFiles {
                    alias: self.definition.alias.clone(),
                    direction,
                };
                self.emit(event);
            }
            EngineEvent::NewBigFolder { path, is_external } => {
                self.on_new_big_folder(&path, is_external);
            }
            EngineEvent::RootEtag { etag, .. } => {
                info!(alias = %self.alias(), %etag, "Root etag from during sync");
                self.last_etag = Some(etag);
                self.last_etag_check_done = now;
            }
            EngineEvent::SeenLockedFile { path } => {
                debug!(alias = %self.alias(), path = %path.display(), "Engine saw a locked file");
            }
            EngineEvent::FileStatusChanged { path, status } => {
                if let Some(vfs) = self.vfs.as_mut() {
                    vfs.file_status_changed(&path, status);
                }
                let event = FolderEvent::FileStatusChanged {
                    alias: self.definition.alias.clone(),
                    path,
                    status,
                };
                self.emit(event);
            }
        }
    }

    fn on_sync_finished(&mut self, success: bool, another: AnotherSyncNeeded, now: Instant) {
        self.engine_running = false;
        let abort_requested = self.sync_result.status() == SyncStatus::SyncAbortRequested;

        let status = if self.sync_result.has_errors() {
            warn!(alias = %self.alias(), "Sync finished with errors");
            SyncStatus::Error
        } else if self.sync_result.found_files_not_synced() {
            SyncStatus::Problem
        } else if self.definition.paused {
            SyncStatus::Paused
        } else if abort_requested {
            SyncStatus::SyncAbortRequested
        } else {
            SyncStatus::Success
        };
        self.sync_result.set_status(status);

        if matches!(status, SyncStatus::Success | SyncStatus::Problem) {
            self.consecutive_failing_syncs = 0;
        } else {
            self.consecutive_failing_syncs += 1;
            info!(
                alias = %self.alias(),
                failures = self.consecutive_failing_syncs,
                "Consecutive failing syncs"
            );
        }

        if status == SyncStatus::Success && success {
            if let Some(journal) = self.journal.as_mut() {
                if let Err(e) = journal.set_selective_sync_list(SelectiveSyncListType::WhiteList, Vec::new())
                {
                    warn!(error = %e, "Could not clear the selective sync white list");
                }
            }
        }

        if matches!(status, SyncStatus::Success | SyncStatus::Problem)
            && success
            && self.last_discovery_style == LocalDiscoveryStyle::FilesystemOnly
        {
            self.last_full_local_discovery = Some(now);
        }

        self.discovery.sync_finished(success);
        self.emit_state_changed();

        // Keeps the folder marked as current a little longer so the watcher
        // notifications caused by the run arrive while it still counts.
        self.finalize_timer.start(now, self.config.finalize_delay);

        self.last_sync_duration = now.saturating_duration_since(self.sync_started_at);
        self.last_sync_done = now;
        self.last_another_sync_needed = another;

        if another == AnotherSyncNeeded::ImmediateFollowUp {
            self.consecutive_follow_up_syncs += 1;
            info!(
                alias = %self.alias(),
                count = self.consecutive_follow_up_syncs,
                "Another sync was requested by the finished sync"
            );
        } else {
            self.consecutive_follow_up_syncs = 0;
        }
        if another == AnotherSyncNeeded::ImmediateFollowUp
            && self.consecutive_follow_up_syncs <= self.config.max_follow_up_syncs
        {
            self.schedule_this_folder_soon(now);
        }
    }

    /// Publishes the result of the last run after the finalize delay.
    pub(crate) fn finalize(&mut self) -> FinalizeOutcome {
        let status = self.sync_result.status();
        let event = FolderEvent::SyncFinished {
            alias: self.definition.alias.clone(),
            status: status.as_str().to_string(),
            errors: self.sync_result.errors().to_vec(),
        };
        self.emit(event);
        info!(alias = %self.alias(), status = %status, "Sync result");

        FinalizeOutcome {
            run_etag_check: matches!(status, SyncStatus::Success | SyncStatus::Problem)
                && self.sync_result.has_changes(),
            reschedule: std::mem::take(&mut self.pending_reschedule),
        }
    }

    // ------------------------------------------------------------------
    // User actions
    // ------------------------------------------------------------------

    /// Returns whether anything changed.
    pub fn set_sync_paused(&mut self, paused: bool) -> bool {
        if self.has_setup_error() || paused == self.definition.paused {
            return false;
        }
        self.definition.paused = paused;
        let alias = self.definition.alias.clone();
        self.emit(FolderEvent::DefinitionChanged {
            alias: alias.clone(),
        });

        self.sync_result.set_status(if paused {
            SyncStatus::Paused
        } else {
            SyncStatus::NotYetStarted
        });
        self.emit(FolderEvent::SyncPausedChanged { alias, paused });
        self.emit_state_changed();

        if paused && self.engine_running {
            self.terminate();
        }
        true
    }

    pub fn set_ignore_hidden_files(&mut self, ignore: bool) {
        if self.definition.ignore_hidden_files != ignore {
            self.definition.ignore_hidden_files = ignore;
            let alias = self.definition.alias.clone();
            self.emit(FolderEvent::DefinitionChanged { alias });
        }
    }

    /// Asks the engine to stop. The outcome is known when it finishes.
    pub fn terminate(&mut self) {
        if !self.engine_running {
            return;
        }
        info!(alias = %self.alias(), "Terminating sync");
        if let Some(engine) = &self.engine {
            engine.abort();
        }
        self.sync_result.set_status(SyncStatus::SyncAbortRequested);
        self.emit_state_changed();
    }

    /// Forwards the user's answer to [`FolderEvent::AboutToRemoveAllFiles`].
    pub fn respond_remove_all(&mut self, keep_files: bool) {
        if let Some(engine) = &self.engine {
            engine.respond_remove_all(keep_files);
        }
        if keep_files {
            self.last_etag = None;
            self.request_schedule();
        }
    }

    pub fn on_vfs_event(&mut self, event: VfsEvent, now: Instant) {
        match event {
            VfsEvent::HydrationStarted => self.on_hydration_started(now),
            VfsEvent::HydrationFinished => self.on_hydration_finished(),
        }
    }

    fn on_hydration_started(&mut self, now: Instant) {
        if self.engine_running {
            self.terminate();
            self.schedule_this_folder_soon(now);
        }
        self.sync_result.reset();
        self.sync_result.set_status(SyncStatus::SyncRunning);
        self.emit_state_changed();
    }

    fn on_hydration_finished(&mut self) {
        self.sync_result.set_status(SyncStatus::Success);
        let event = FolderEvent::SyncFinished {
            alias: self.definition.alias.clone(),
            status: SyncStatus::Success.as_str().to_string(),
            errors: Vec::new(),
        };
        self.emit(event);
        self.emit_state_changed();

        // Changes seen while hydrating were deferred like for a running sync
        if std::mem::take(&mut self.pending_reschedule) {
            self.request_schedule();
        }
    }

    /// Stores the etag of a remote check; true when it changed.
    pub fn on_etag_retrieved(&mut self, etag: &str) -> bool {
        if self.last_etag.as_deref() == Some(etag) {
            debug!(alias = %self.alias(), %etag, "Etag unchanged");
            return false;
        }
        info!(
            alias = %self.alias(),
            last = ?self.last_etag,
            received = %etag,
            "Remote etag changed"
        );
        self.last_etag = Some(etag.to_string());
        true
    }

    fn on_new_big_folder(&mut self, path: &str, is_external: bool) {
        let new_folder = with_trailing_slash(path);
        let alias = self.definition.alias.clone();
        let Some(journal) = self.journal.as_mut() else {
            return;
        };

        let lists = journal
            .selective_sync_list(SelectiveSyncListType::BlackList)
            .and_then(|black| {
                journal
                    .selective_sync_list(SelectiveSyncListType::WhiteList)
                    .map(|white| (black, white))
            });
        match lists {
            Ok((mut black, white)) => {
                if !black.contains(&new_folder) && !white.contains(&new_folder) {
                    black.push(new_folder.clone());
                    if let Err(e) = journal.set_selective_sync_list(SelectiveSyncListType::BlackList, black) {
                        warn!(error = %e, "Could not update the selective sync black list");
                    }
                }
            }
            Err(e) => warn!(error = %e, "Could not read selective sync lists"),
        }

        let mut undecided = match journal.selective_sync_list(SelectiveSyncListType::UndecidedList) {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "Could not read the undecided list");
                return;
            }
        };
        let newly_undecided = !undecided.contains(&new_folder);
        if newly_undecided {
            undecided.push(new_folder.clone());
            if let Err(e) = journal.set_selective_sync_list(SelectiveSyncListType::UndecidedList, undecided) {
                warn!(error = %e, "Could not update the undecided list");
            }
        }

        if newly_undecided {
            self.emit(FolderEvent::NewBigFolder {
                alias,
                path: new_folder,
                is_external,
            });
        }
        let mut message = if is_external {
            "A folder from an external storage has been added.\n".to_string()
        } else {
            format!("A new folder larger than the size limit has been added: {path}.\n")
        };
        message.push_str("Please go in the settings to select it if you wish to download it.");
        let title = self.config.application_name.clone();
        self.notify(UserNotification::info(title, message));
    }

    /// Switches placeholders on or off. Refused while a run is active.
    pub fn set_virtual_files_enabled(
        &mut self,
        enabled: bool,
        backend: &dyn SyncBackend,
    ) -> Result<()> {
        let current = self.definition.virtual_files_mode;
        let target = if enabled && current == VfsMode::Off {
            best_available_vfs_mode(backend)
        } else if !enabled && current != VfsMode::Off {
            VfsMode::Off
        } else {
            current
        };
        if target == current {
            return Ok(());
        }
        if self.is_sync_running() {
            return Err(SyncError::InvalidState(format!(
                "cannot switch virtual files of {} while it syncs",
                self.alias()
            )));
        }

        let old = self
            .vfs
            .take()
            .ok_or_else(|| SyncError::InvalidState("virtual files not started".into()))?;
        self.vfs_ready = false;
        self.vfs = Some(upgrade_vfs(old, target, backend)?);
        self.definition.virtual_files_mode = target;
        self.start_vfs(backend);

        let alias = self.definition.alias.clone();
        self.emit(FolderEvent::DefinitionChanged { alias });
        Ok(())
    }

    /// Applies a pin state to the whole folder.
    pub fn set_root_pin_state(&mut self, state: PinState) -> Result<()> {
        self.set_pin_state("", state)?;
        // Every directory has to be visited for the new state to apply
        self.force_next_full_local_discovery();
        self.request_schedule();
        Ok(())
    }

    pub(crate) fn wipe_error_blacklist_category(&mut self, category: ErrorCategory) {
        if let Some(journal) = self.journal.as_mut() {
            if let Err(e) = journal.wipe_error_blacklist_category(category) {
                warn!(alias = %self.definition.alias, error = %e, "Could not wipe error blacklist");
            }
        }
    }

    /// Removes every local trace of the folder except the user's files.
    pub fn wipe_for_removal(&mut self) {
        if self.has_setup_error() {
            return;
        }
        self.vfs_ready = false;
        self.watcher_reliable = false;

        let root = self.definition.local_path.clone();
        if let Some(mut journal) = self.journal.take() {
            match journal.take_download_infos() {
                Ok(infos) => {
                    for info in infos {
                        let tmp = root.join(&info.tmpfile);
                        info!(path = %tmp.display(), "Deleting temporary file");
                        if let Err(e) = self.fs.remove_file(&tmp) {
                            warn!(path = %tmp.display(), error = %e, "Could not delete temporary file");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Could not read stale downloads"),
            }

            let db = journal.database_path();
            journal.close();
            for file in journal_sidecar_files(&db) {
                if self.fs.exists(&file) {
                    match self.fs.remove_file(&file) {
                        Ok(()) => info!(path = %file.display(), "Removed journal file"),
                        Err(e) => error!(path = %file.display(), error = %e, "Failed to remove journal file"),
                    }
                }
            }
        }

        if let Some(mut vfs) = self.vfs.take() {
            vfs.stop();
        }
    }
}

impl Drop for Folder {
    fn drop(&mut self) {
        if let Some(vfs) = self.vfs.as_mut() {
            vfs.stop();
        }
        if self.engine_running {
            if let Some(engine) = &self.engine {
                engine.abort();
            }
        }
    }
}

/// Platform variant if there is one, suffix placeholders otherwise.
pub fn best_available_vfs_mode(backend: &dyn SyncBackend) -> VfsMode {
    [VfsMode::WindowsCfApi, VfsMode::WithSuffix]
        .into_iter()
        .find(|mode| backend.is_vfs_available(*mode))
        .unwrap_or(VfsMode::Off)
}
