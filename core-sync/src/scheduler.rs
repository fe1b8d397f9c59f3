//! # Folder Scheduler
//!
//! Decides which folder syncs next and when.
//!
//! ## Overview
//!
//! `FolderMan` owns every [`Folder`], the accounts they belong to, the
//! schedule queue, the etag FIFO and the lock watcher. Only one folder
//! syncs at a time. A folder gets into the queue when:
//!
//! - the watcher reports a local change (after a short debounce)
//! - an etag check shows the remote root changed
//! - the last sync is older than the forced sync interval
//! - a failed sync is due for a retry
//! - its account connects
//! - the user forces it
//!
//! ## Driving it
//!
//! The scheduler never sleeps or spawns. The owner sleeps until
//! [`FolderMan::next_deadline`] and then calls [`FolderMan::on_timer`];
//! engine, VFS, watcher and etag results are fed in as they arrive.
//! Everything observable is queued as [`CoreEvent`]s and collected with
//! [`FolderMan::take_events`].
//!
//! ```ignore
//! let mut man = FolderMan::new(backend, fs, config, None, Instant::now());
//! man.upsert_account(account, now);
//! man.add_folder(definition, now)?;
//! loop {
//!     sleep_until(man.next_deadline()).await;
//!     man.on_timer(Instant::now());
//!     for event in man.take_events() { bus.emit(event).ok(); }
//! }
//! ```

use crate::account::AccountState;
use crate::etag::EtagQueue;
use crate::folder::{ChangeReason, FinalizeOutcome, Folder, PathChangeOutcome};
use crate::lock_watcher::LockWatcher;
use crate::paths::{relative_to, with_trailing_slash};
use crate::result::SyncStatus;
use crate::timer::{earliest, Periodic, SingleShot};
use crate::{Result, SyncError};
use bridge_traits::{
    AnotherSyncNeeded, BridgeError, EngineEvent, EtagRequest, EtagResponse, ErrorCategory,
    LocalFileSystem, PinState, SyncBackend, VfsEvent, VfsEventSender,
};
use core_runtime::events::{CoreEvent, FolderEvent, SchedulerEvent};
use core_runtime::{ClientConfig, FolderDefinition};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const MIN_START_DELAY: Duration = Duration::from_millis(100);
const MAX_START_DELAY: Duration = Duration::from_secs(60);

pub struct FolderMan {
    folders: BTreeMap<String, Folder>,
    accounts: BTreeMap<String, AccountState>,
    backend: Arc<dyn SyncBackend>,
    fs: Arc<dyn LocalFileSystem>,
    config: Arc<ClientConfig>,
    vfs_events: Option<VfsEventSender>,

    queue: VecDeque<String>,
    current_sync: Option<String>,
    last_sync_folder: Option<String>,
    etag_queue: EtagQueue,
    lock_watcher: LockWatcher,

    start_timer: SingleShot,
    etag_poll: Periodic,
    time_scheduler: Periodic,
    sync_enabled: bool,

    events: Vec<CoreEvent>,
}

impl FolderMan {
    pub fn new(
        backend: Arc<dyn SyncBackend>,
        fs: Arc<dyn LocalFileSystem>,
        config: Arc<ClientConfig>,
        vfs_events: Option<VfsEventSender>,
        now: Instant,
    ) -> Self {
        Self {
            folders: BTreeMap::new(),
            accounts: BTreeMap::new(),
            lock_watcher: LockWatcher::new(now, config.lock_check_interval),
            etag_poll: Periodic::new(now, config.etag_poll_interval),
            time_scheduler: Periodic::new(now, config.time_scheduler_interval),
            backend,
            fs,
            config,
            vfs_events,
            queue: VecDeque::new(),
            current_sync: None,
            last_sync_folder: None,
            etag_queue: EtagQueue::new(),
            start_timer: SingleShot::new(),
            sync_enabled: true,
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn file_system(&self) -> &dyn LocalFileSystem {
        self.fs.as_ref()
    }

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    /// Adds or replaces an account and refreshes its folders' view of it.
    pub fn upsert_account(&mut self, account: AccountState, now: Instant) {
        let id = account.id.clone();
        let connected = account.connected;
        let was_connected = self.accounts.get(&id).is_some_and(|a| a.connected);
        self.accounts.insert(id.clone(), account);
        self.refresh_account_folders(&id);
        if connected != was_connected {
            self.on_connectivity_changed(&id, connected, now);
        }
    }

    pub fn account(&self, id: &str) -> Option<&AccountState> {
        self.accounts.get(id)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &AccountState> {
        self.accounts.values()
    }

    pub fn set_account_connected(&mut self, id: &str, connected: bool, now: Instant) -> Result<()> {
        let account = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| SyncError::AccountNotFound(id.to_string()))?;
        if account.connected == connected {
            return Ok(());
        }
        account.connected = connected;
        self.refresh_account_folders(id);
        self.on_connectivity_changed(id, connected, now);
        Ok(())
    }

    /// Drops an account together with all of its folders.
    pub fn remove_account(&mut self, id: &str, now: Instant) -> Result<()> {
        if !self.accounts.contains_key(id) {
            return Err(SyncError::AccountNotFound(id.to_string()));
        }
        for alias in self.aliases_of_account(id) {
            self.remove_folder(&alias, now)?;
        }
        self.accounts.remove(id);
        Ok(())
    }

    fn refresh_account_folders(&mut self, id: &str) {
        let Some(account) = self.accounts.get(id) else {
            return;
        };
        let (connected, poll) = (account.connected, account.server_poll_interval);
        for folder in self.folders.values_mut().filter(|f| f.account_id() == id) {
            folder.set_account_state(connected, poll);
        }
    }

    fn on_connectivity_changed(&mut self, id: &str, connected: bool, now: Instant) {
        let aliases = self.aliases_of_account(id);
        if connected {
            info!(account = id, "Account connected, scheduling its folders");
            for alias in aliases {
                self.schedule_folder(&alias, now);
            }
            return;
        }

        info!(account = id, "Account disconnected, stopping its syncs");
        for alias in &aliases {
            self.with_folder(alias, now, |folder| folder.terminate());
        }
        let before = self.queue.len();
        self.queue.retain(|alias| !aliases.contains(alias));
        if self.queue.len() != before {
            self.emit_queue_changed();
        }
    }

    fn aliases_of_account(&self, id: &str) -> Vec<String> {
        self.folders
            .values()
            .filter(|f| f.account_id() == id)
            .map(|f| f.alias().to_string())
            .collect()
    }

    // ------------------------------------------------------------------
    // Folders
    // ------------------------------------------------------------------

    pub fn folder(&self, alias: &str) -> Option<&Folder> {
        self.folders.get(alias)
    }

    pub fn folders(&self) -> impl Iterator<Item = &Folder> {
        self.folders.values()
    }

    pub fn len(&self) -> usize {
        self.folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    /// Runs `f` on a folder and collects what it emitted.
    pub fn with_folder<R>(
        &mut self,
        alias: &str,
        now: Instant,
        f: impl FnOnce(&mut Folder) -> R,
    ) -> Option<R> {
        let folder = self.folders.get_mut(alias)?;
        let result = f(folder);
        let events = folder.take_events();
        let wants_schedule = folder.take_schedule_request();
        self.events.extend(events);
        if wants_schedule {
            self.schedule_folder(alias, now);
        }
        Some(result)
    }

    /// Rejects local paths that overlap an existing folder.
    pub fn check_path_validity_for_new_folder(&self, path: &Path) -> std::result::Result<(), String> {
        let candidate = with_trailing_slash(&path.to_string_lossy().replace('\\', "/"));
        for folder in self.folders.values() {
            let existing = folder.path_str();
            if existing == candidate {
                return Err(format!(
                    "The local folder {} is already used in a folder sync connection. Please pick another one!",
                    path.display()
                ));
            }
            if existing.starts_with(&candidate) {
                return Err(format!(
                    "The local folder {} already contains a folder used in a folder sync connection. Please pick another one!",
                    path.display()
                ));
            }
            if candidate.starts_with(&existing) {
                return Err(format!(
                    "The local folder {} is already contained in a folder used in a folder sync connection. Please pick another one!",
                    path.display()
                ));
            }
        }
        Ok(())
    }

    /// Creates a folder. Setup problems do not fail this call; they show up
    /// as a `SetupError` status on the new folder.
    pub fn add_folder(&mut self, definition: FolderDefinition, now: Instant) -> Result<&Folder> {
        let alias = definition.alias.clone();
        if alias.is_empty() {
            return Err(SyncError::InvalidState("folder alias must not be empty".into()));
        }
        if self.folders.contains_key(&alias) {
            return Err(SyncError::AliasInUse(alias));
        }
        let account = self
            .accounts
            .get(&definition.account_id)
            .ok_or_else(|| SyncError::AccountNotFound(definition.account_id.clone()))?;
        self.check_path_validity_for_new_folder(&definition.local_path)
            .map_err(SyncError::PathInUse)?;

        let folder = Folder::new(
            definition,
            account,
            self.backend.as_ref(),
            self.fs.clone(),
            self.config.clone(),
            self.vfs_events.clone(),
            now,
        );
        info!(alias = %alias, path = %folder.path().display(), status = %folder.status(), "Added folder");
        self.folders.insert(alias.clone(), folder);
        self.events.push(CoreEvent::Folder(FolderEvent::Added {
            alias: alias.clone(),
        }));

        let can_sync = self.with_folder(&alias, now, |f| f.can_sync()).unwrap_or(false);
        if can_sync {
            self.schedule_folder(&alias, now);
        }
        self.folders
            .get(&alias)
            .ok_or(SyncError::FolderNotFound(alias))
    }

    /// Aborts, dequeues and wipes a folder, then forgets it.
    ///
    /// Unregistering from shell integrations must happen before this call
    /// so nobody holds the journal open.
    pub fn remove_folder(&mut self, alias: &str, now: Instant) -> Result<()> {
        if !self.folders.contains_key(alias) {
            return Err(SyncError::FolderNotFound(alias.to_string()));
        }
        self.with_folder(alias, now, |folder| {
            folder.terminate();
            folder.wipe_for_removal();
        });

        let before = self.queue.len();
        self.queue.retain(|a| a != alias);
        if self.queue.len() != before {
            self.emit_queue_changed();
        }
        self.etag_queue.remove(alias);
        if self.current_sync.as_deref() == Some(alias) {
            self.current_sync = None;
        }
        if self.last_sync_folder.as_deref() == Some(alias) {
            self.last_sync_folder = None;
        }

        self.folders.remove(alias);
        info!(alias, "Removed folder");
        self.events.push(CoreEvent::Folder(FolderEvent::Removed {
            alias: alias.to_string(),
        }));
        self.start_scheduled_sync_soon(now);
        Ok(())
    }

    /// Folder containing `path` and the path relative to its root.
    pub fn folder_for_path(&self, path: &Path) -> Option<(&Folder, String)> {
        let absolute = path.to_string_lossy().replace('\\', "/");
        self.folders.values().find_map(|folder| {
            relative_to(&absolute, &folder.path_str()).map(|rel| (folder, rel.to_string()))
        })
    }

    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    pub fn queue(&self) -> Vec<String> {
        self.queue.iter().cloned().collect()
    }

    pub fn current_sync_folder(&self) -> Option<&str> {
        self.current_sync.as_deref()
    }

    pub fn is_any_sync_running(&self) -> bool {
        self.current_sync.is_some() || self.folders.values().any(|f| f.is_sync_running())
    }

    pub fn sync_enabled(&self) -> bool {
        self.sync_enabled
    }

    fn emit_queue_changed(&mut self) {
        let queue = self.queue();
        self.events
            .push(CoreEvent::Scheduler(SchedulerEvent::QueueChanged { queue }));
    }

    /// Appends a folder to the queue.
    ///
    /// A folder that is syncing (or still finalizing) is not queued; it is
    /// picked up again once its run is finalized.
    pub fn schedule_folder(&mut self, alias: &str, now: Instant) {
        let is_current = self.current_sync.as_deref() == Some(alias);
        let Some(folder) = self.folders.get_mut(alias) else {
            warn!(alias, "Cannot schedule unknown folder");
            return;
        };
        if !folder.can_sync() {
            info!(alias, "Folder cannot sync, not scheduling");
            return;
        }
        if folder.is_sync_running() || is_current {
            debug!(alias, "Folder is syncing, rescheduling after it finished");
            folder.set_pending_reschedule();
            return;
        }

        if !self.queue.iter().any(|a| a == alias) {
            info!(alias, "Scheduling folder");
            self.queue.push_back(alias.to_string());
            self.emit_queue_changed();
        }
        self.start_scheduled_sync_soon(now);
    }

    /// Puts a folder at the front of the queue.
    pub fn schedule_folder_next(&mut self, alias: &str, now: Instant) {
        let is_current = self.current_sync.as_deref() == Some(alias);
        let Some(folder) = self.folders.get_mut(alias) else {
            warn!(alias, "Cannot schedule unknown folder");
            return;
        };
        if !folder.can_sync() {
            info!(alias, "Folder cannot sync, not scheduling");
            return;
        }
        if folder.is_sync_running() || is_current {
            folder.set_pending_reschedule();
            return;
        }

        self.queue.retain(|a| a != alias);
        self.queue.push_front(alias.to_string());
        info!(alias, "Scheduling folder next");
        self.emit_queue_changed();
        self.start_scheduled_sync_soon(now);
    }

    pub fn schedule_all_folders(&mut self, now: Instant) {
        let aliases: Vec<String> = self.folders.keys().cloned().collect();
        for alias in aliases {
            self.schedule_folder(&alias, now);
        }
    }

    /// Blocks or resumes starting new syncs. The queue keeps filling.
    pub fn set_sync_enabled(&mut self, enabled: bool, now: Instant) {
        if self.sync_enabled == enabled {
            return;
        }
        info!(enabled, "Sync enabled changed");
        self.sync_enabled = enabled;
        self.events
            .push(CoreEvent::Scheduler(SchedulerEvent::SyncEnabledChanged { enabled }));
        if enabled {
            self.start_scheduled_sync_soon(now);
        }
    }

    /// Arms the start timer, pausing longer after long syncs.
    fn start_scheduled_sync_soon(&mut self, now: Instant) {
        if self.start_timer.is_active() || self.queue.is_empty() || self.is_any_sync_running() {
            return;
        }

        let mut delay = MIN_START_DELAY;
        if let Some(last) = self
            .last_sync_folder
            .as_deref()
            .and_then(|alias| self.folders.get(alias))
        {
            let last_ms = last.last_sync_duration().as_millis() as f64;
            let pause = Duration::from_millis((last_ms.sqrt() * 50.0) as u64)
                .clamp(MIN_START_DELAY, MAX_START_DELAY);
            let since = last.time_since_last_sync_done(now);
            delay = pause
                .saturating_sub(since)
                .max(Duration::from_millis(1));
            info!(
                last_folder = %last.alias(),
                ?pause,
                ?since,
                "Sync pause after last sync"
            );
        }
        debug!(?delay, "Starting the next scheduled sync");
        self.start_timer.start(now, delay);
    }

    fn start_scheduled_folder_sync(&mut self, now: Instant) {
        if self.is_any_sync_running() {
            return;
        }
        if !self.sync_enabled {
            debug!("Sync is disabled, not starting");
            return;
        }

        let mut dequeued = false;
        while let Some(alias) = self.queue.pop_front() {
            dequeued = true;
            let can_sync = self.folders.get(&alias).is_some_and(|f| f.can_sync());
            if !can_sync {
                debug!(alias = %alias, "Dropping folder that cannot sync from the queue");
                continue;
            }

            self.current_sync = Some(alias.clone());
            let started = self.with_folder(&alias, now, |f| f.start_sync(now));
            match started {
                Some(Ok(())) => break,
                Some(Err(e)) => {
                    warn!(alias = %alias, error = %e, "Could not start sync");
                    self.current_sync = None;
                }
                None => self.current_sync = None,
            }
        }
        if dequeued {
            self.emit_queue_changed();
        }
    }

    fn on_folder_finalized(&mut self, alias: &str, outcome: FinalizeOutcome, now: Instant) {
        if self.current_sync.as_deref() == Some(alias) {
            self.current_sync = None;
        }
        self.last_sync_folder = Some(alias.to_string());

        if outcome.run_etag_check {
            self.run_etag_job(alias);
        }
        if outcome.reschedule {
            self.schedule_folder(alias, now);
        }
        self.start_scheduled_sync_soon(now);
    }

    // ------------------------------------------------------------------
    // User actions
    // ------------------------------------------------------------------

    pub fn set_sync_paused(&mut self, alias: &str, paused: bool, now: Instant) -> Result<bool> {
        let changed = self
            .with_folder(alias, now, |f| f.set_sync_paused(paused))
            .ok_or_else(|| SyncError::FolderNotFound(alias.to_string()))?;
        if changed {
            if paused {
                let before = self.queue.len();
                self.queue.retain(|a| a != alias);
                if before != self.queue.len() {
                    self.emit_queue_changed();
                }
            } else {
                self.schedule_folder(alias, now);
            }
        }
        Ok(changed)
    }

    pub fn terminate_sync(&mut self, alias: &str, now: Instant) -> Result<()> {
        self.with_folder(alias, now, |f| f.terminate())
            .ok_or_else(|| SyncError::FolderNotFound(alias.to_string()))
    }

    /// Syncs a folder as soon as possible, interrupting whatever runs.
    pub fn force_sync_now(&mut self, alias: &str, now: Instant) -> Result<()> {
        if !self.folders.contains_key(alias) {
            return Err(SyncError::FolderNotFound(alias.to_string()));
        }

        let others: Vec<String> = self
            .folders
            .values()
            .filter(|f| f.alias() != alias && f.is_sync_running())
            .map(|f| f.alias().to_string())
            .collect();
        for other in others {
            self.with_folder(&other, now, |f| f.terminate());
            self.schedule_folder(&other, now);
        }

        self.with_folder(alias, now, |f| {
            f.wipe_error_blacklist_category(ErrorCategory::Normal);
            f.wipe_error_blacklist_category(ErrorCategory::LocalSoftError);
            f.set_sync_paused(false);
            f.force_next_full_local_discovery();
        });
        self.schedule_folder_next(alias, now);
        Ok(())
    }

    pub fn respond_remove_all(&mut self, alias: &str, keep_files: bool, now: Instant) -> Result<()> {
        self.with_folder(alias, now, |f| f.respond_remove_all(keep_files))
            .ok_or_else(|| SyncError::FolderNotFound(alias.to_string()))
    }

    pub fn set_virtual_files_enabled(&mut self, alias: &str, enabled: bool, now: Instant) -> Result<()> {
        let backend = self.backend.clone();
        self.with_folder(alias, now, |f| f.set_virtual_files_enabled(enabled, backend.as_ref()))
            .ok_or_else(|| SyncError::FolderNotFound(alias.to_string()))?
    }

    pub fn set_root_pin_state(&mut self, alias: &str, state: PinState, now: Instant) -> Result<()> {
        self.with_folder(alias, now, |f| f.set_root_pin_state(state))
            .ok_or_else(|| SyncError::FolderNotFound(alias.to_string()))?
    }

    /// Aborts every run, e.g. before shutting down.
    pub fn terminate_all(&mut self, now: Instant) {
        let aliases: Vec<String> = self.folders.keys().cloned().collect();
        for alias in aliases {
            self.with_folder(&alias, now, |f| f.terminate());
        }
        if !self.queue.is_empty() {
            self.queue.clear();
            self.emit_queue_changed();
        }
        self.start_timer.stop();
    }

    // ------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------

    pub fn on_engine_event(&mut self, alias: &str, event: EngineEvent, now: Instant) {
        if let EngineEvent::SeenLockedFile { path } = &event {
            self.lock_watcher.add_file(now, path.clone());
        }
        let root_etag = match &event {
            EngineEvent::RootEtag { etag, .. } => Some(etag.clone()),
            _ => None,
        };
        if self.with_folder(alias, now, |f| f.on_engine_event(event, now)).is_none() {
            debug!(alias, "Engine event for unknown folder");
            return;
        }
        if let Some(etag) = root_etag {
            self.tag_successful_etag(alias, etag);
        }
    }

    pub fn on_vfs_event(&mut self, alias: &str, event: VfsEvent, now: Instant) {
        if self.with_folder(alias, now, |f| f.on_vfs_event(event, now)).is_none() {
            debug!(alias, "Vfs event for unknown folder");
        }
    }

    /// Routes a watcher notification to the folder containing `path`.
    pub fn on_watched_path_changed(&mut self, path: &Path, now: Instant) -> Option<PathChangeOutcome> {
        let alias = self.folder_for_path(path)?.0.alias().to_string();
        self.with_folder(&alias, now, |f| f.on_path_changed(path, ChangeReason::Other, now))
    }

    pub fn on_watcher_unreliable(&mut self, alias: &str, message: &str, now: Instant) {
        self.with_folder(alias, now, |f| f.on_watcher_unreliable(message));
    }

    // ------------------------------------------------------------------
    // Etag checks
    // ------------------------------------------------------------------

    /// Queues a remote etag check for a folder.
    pub fn run_etag_job(&mut self, alias: &str) {
        let Some(folder) = self.folders.get_mut(alias) else {
            return;
        };
        if folder.etag_job_pending() {
            info!(alias, "Etag job already queued");
            return;
        }
        if !folder.can_sync() {
            info!(alias, "Folder cannot sync, no etag check");
            return;
        }
        folder.mark_etag_job_queued();
        if self.etag_queue.enqueue(alias) {
            self.events.push(CoreEvent::Scheduler(SchedulerEvent::EtagCheckQueued {
                alias: alias.to_string(),
            }));
        }
    }

    /// Next etag request to run, if the slot is free.
    pub fn take_etag_request(&mut self) -> Option<EtagRequest> {
        while let Some(alias) = self.etag_queue.take_next() {
            let request = self.folders.get(&alias).and_then(|folder| {
                let account = self.accounts.get(folder.account_id())?;
                Some(EtagRequest {
                    alias: alias.clone(),
                    account_id: account.id.clone(),
                    dav_url: account.dav_url.clone(),
                    remote_path: folder.remote_path().to_string(),
                })
            });
            match request {
                Some(request) => return Some(request),
                None => {
                    self.etag_queue.complete(&alias);
                }
            }
        }
        None
    }

    pub fn on_etag_result(
        &mut self,
        alias: &str,
        result: std::result::Result<EtagResponse, BridgeError>,
        now: Instant,
    ) {
        if !self.etag_queue.complete(alias) {
            debug!(alias, "Etag result nobody waits for");
        }
        if self.with_folder(alias, now, |f| f.on_etag_job_finished(now)).is_none() {
            return;
        }

        match result {
            Ok(response) => {
                // A successful request means the network is back
                self.set_sync_enabled(true, now);
                let changed = self
                    .with_folder(alias, now, |f| f.on_etag_retrieved(&response.etag))
                    .unwrap_or(false);
                self.tag_successful_etag(alias, response.etag.clone());
                if changed {
                    self.events
                        .push(CoreEvent::Scheduler(SchedulerEvent::RemoteChangeDetected {
                            alias: alias.to_string(),
                            etag: response.etag,
                        }));
                    self.schedule_folder(alias, now);
                }
            }
            Err(e) => {
                warn!(alias, error = %e, "Etag check failed");
            }
        }
    }

    fn tag_successful_etag(&mut self, alias: &str, etag: String) {
        let Some(account_id) = self.folders.get(alias).map(|f| f.account_id().to_string()) else {
            return;
        };
        if let Some(account) = self.accounts.get_mut(&account_id) {
            account.last_successful_etag = Some(etag);
        }
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    pub fn next_deadline(&self) -> Option<Instant> {
        let folder_deadlines = self.folders.values().map(|f| f.next_deadline());
        earliest(
            [
                self.start_timer.deadline(),
                Some(self.etag_poll.deadline()),
                Some(self.time_scheduler.deadline()),
                self.lock_watcher.next_deadline(),
            ]
            .into_iter()
            .chain(folder_deadlines),
        )
    }

    /// Fires every deadline that has passed.
    pub fn on_timer(&mut self, now: Instant) {
        let aliases: Vec<String> = self.folders.keys().cloned().collect();
        for alias in &aliases {
            if let Some(Some(outcome)) = self.with_folder(alias, now, |f| f.fire_finalize_timer(now)) {
                self.on_folder_finalized(alias, outcome, now);
            }
        }
        for alias in &aliases {
            if self.with_folder(alias, now, |f| f.fire_schedule_timer(now)) == Some(true) {
                self.schedule_folder(alias, now);
            }
        }

        if self.start_timer.fire(now) {
            self.start_scheduled_folder_sync(now);
        }
        if self.etag_poll.fire(now) {
            self.on_etag_poll_tick(now);
        }
        if self.time_scheduler.fire(now) {
            self.schedule_folders_by_time(now);
        }

        let unlocked = self.lock_watcher.check(now, self.fs.as_ref());
        for path in unlocked {
            self.on_file_unlocked(&path, now);
        }
    }

    fn on_etag_poll_tick(&mut self, now: Instant) {
        let due: Vec<String> = self
            .folders
            .values()
            .filter(|f| f.due_to_sync(now) && !self.etag_queue.is_queued(f.alias()))
            .map(|f| f.alias().to_string())
            .collect();
        for alias in due {
            self.run_etag_job(&alias);
        }
    }

    fn schedule_folders_by_time(&mut self, now: Instant) {
        let mut to_schedule = Vec::new();
        for folder in self.folders.values() {
            if folder.is_sync_running() || !folder.can_sync() {
                continue;
            }
            let since = folder.time_since_last_sync_done(now);
            if since >= self.config.force_sync_interval {
                info!(alias = %folder.alias(), ?since, "Scheduling folder because its last sync is too old");
                to_schedule.push(folder.alias().to_string());
                continue;
            }

            let failures = folder.consecutive_failing_syncs();
            let delayed = folder.last_another_sync_needed() == AnotherSyncNeeded::DelayedFollowUp;
            if (1..=2).contains(&failures) || delayed {
                let delay = if failures > 1 {
                    self.config.retry_delay
                } else {
                    self.config.first_retry_delay
                };
                if since > delay {
                    info!(alias = %folder.alias(), failures, delayed, "Retrying folder");
                    to_schedule.push(folder.alias().to_string());
                }
            }
        }
        for alias in to_schedule {
            self.schedule_folder(&alias, now);
        }
    }

    fn on_file_unlocked(&mut self, path: &PathBuf, now: Instant) {
        let Some(alias) = self.folder_for_path(path).map(|(f, _)| f.alias().to_string()) else {
            return;
        };
        self.with_folder(&alias, now, |f| f.on_path_changed(path, ChangeReason::UnLock, now));
        self.schedule_folder_next(&alias, now);
    }

    pub fn take_events(&mut self) -> Vec<CoreEvent> {
        std::mem::take(&mut self.events)
    }

    /// Aggregated status of all folders, as shown in a tray icon.
    pub fn overall_status(&self) -> SyncStatus {
        let mut statuses = self.folders.values().map(|f| f.status()).peekable();
        if statuses.peek().is_none() {
            return SyncStatus::Undefined;
        }
        let all: Vec<SyncStatus> = statuses.collect();
        if all.iter().any(|s| s.is_active()) {
            SyncStatus::SyncRunning
        } else if all.iter().any(|s| matches!(s, SyncStatus::Error | SyncStatus::SetupError)) {
            SyncStatus::Error
        } else if all.iter().any(|s| *s == SyncStatus::Problem) {
            SyncStatus::Problem
        } else if all.iter().all(|s| *s == SyncStatus::Paused) {
            SyncStatus::Paused
        } else if all.iter().all(|s| matches!(s, SyncStatus::Success | SyncStatus::Paused)) {
            SyncStatus::Success
        } else {
            SyncStatus::NotYetStarted
        }
    }
}

impl std::fmt::Debug for FolderMan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FolderMan")
            .field("folders", &self.folders.keys().collect::<Vec<_>>())
            .field("queue", &self.queue)
            .field("current_sync", &self.current_sync)
            .field("sync_enabled", &self.sync_enabled)
            .finish_non_exhaustive()
    }
}
