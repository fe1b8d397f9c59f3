//! In-memory collaborators for driving `FolderMan` without a real engine.

#![allow(dead_code)]

use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    AvailabilityError, BridgeError, DownloadInfo, EngineSetup, ErrorBlacklistRecord, ErrorCategory,
    FileRecord, FileStat, ItemType, JournalDb, LocalFileSystem, PinState, RemotePermissions,
    SelectiveSyncListType, SyncBackend, SyncEngine, SyncFileStatus, SyncFileStatusTag, SyncRequest,
    Vfs, VfsItemAvailability, VfsMode, VfsSetupParams,
};
use core_runtime::{ClientConfig, FolderDefinition};
use core_sync::{AccountState, FolderMan};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Engine
// ============================================================================

#[derive(Default)]
pub struct FakeEngine {
    pub requests: Mutex<Vec<SyncRequest>>,
    pub aborts: Mutex<u32>,
    pub touched: Mutex<BTreeSet<String>>,
    pub remove_all_answers: Mutex<Vec<bool>>,
}

impl FakeEngine {
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<SyncRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn abort_count(&self) -> u32 {
        *self.aborts.lock().unwrap()
    }
}

impl SyncEngine for FakeEngine {
    fn start_sync(&self, request: SyncRequest) -> BridgeResult<()> {
        self.requests.lock().unwrap().push(request);
        Ok(())
    }

    fn abort(&self) {
        *self.aborts.lock().unwrap() += 1;
    }

    fn was_file_touched(&self, relative_path: &str) -> bool {
        self.touched.lock().unwrap().contains(relative_path)
    }

    fn file_status(&self, _relative_path: &str) -> SyncFileStatus {
        SyncFileStatus::new(SyncFileStatusTag::UpToDate)
    }

    fn respond_remove_all(&self, keep_files: bool) {
        self.remove_all_answers.lock().unwrap().push(keep_files);
    }
}

// ============================================================================
// Journal
// ============================================================================

#[derive(Default)]
pub struct JournalState {
    pub records: HashMap<String, FileRecord>,
    pub lists: HashMap<SelectiveSyncListType, Vec<String>>,
    pub blacklist: HashMap<String, ErrorBlacklistRecord>,
    pub wiped_categories: Vec<ErrorCategory>,
    pub wiped_entries: Vec<(String, ErrorCategory)>,
    pub downloads: Vec<DownloadInfo>,
    pub closed: bool,
}

pub struct FakeJournal {
    path: PathBuf,
    state: Arc<Mutex<JournalState>>,
}

impl JournalDb for FakeJournal {
    fn database_path(&self) -> PathBuf {
        self.path.clone()
    }

    fn file_record(&self, relative_path: &str) -> BridgeResult<Option<FileRecord>> {
        Ok(self.state.lock().unwrap().records.get(relative_path).cloned())
    }

    fn selective_sync_list(&self, list: SelectiveSyncListType) -> BridgeResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .lists
            .get(&list)
            .cloned()
            .unwrap_or_default())
    }

    fn set_selective_sync_list(
        &mut self,
        list: SelectiveSyncListType,
        entries: Vec<String>,
    ) -> BridgeResult<()> {
        self.state.lock().unwrap().lists.insert(list, entries);
        Ok(())
    }

    fn error_blacklist_entry(&self, relative_path: &str) -> BridgeResult<Option<ErrorBlacklistRecord>> {
        Ok(self.state.lock().unwrap().blacklist.get(relative_path).cloned())
    }

    fn wipe_error_blacklist_entry(
        &mut self,
        relative_path: &str,
        category: ErrorCategory,
    ) -> BridgeResult<()> {
        let mut state = self.state.lock().unwrap();
        state.wiped_entries.push((relative_path.to_string(), category));
        if state
            .blacklist
            .get(relative_path)
            .is_some_and(|entry| entry.category == category)
        {
            state.blacklist.remove(relative_path);
        }
        Ok(())
    }

    fn wipe_error_blacklist_category(&mut self, category: ErrorCategory) -> BridgeResult<()> {
        let mut state = self.state.lock().unwrap();
        state.blacklist.retain(|_, entry| entry.category != category);
        state.wiped_categories.push(category);
        Ok(())
    }

    fn take_download_infos(&mut self) -> BridgeResult<Vec<DownloadInfo>> {
        Ok(std::mem::take(&mut self.state.lock().unwrap().downloads))
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closed = true;
    }
}

// ============================================================================
// Virtual files
// ============================================================================

/// State shared by every placeholder backend the fake creates.
#[derive(Default)]
pub struct VfsState {
    pub hydrating: bool,
    pub pins: HashMap<String, PinState>,
    /// "start suffix", "wipe suffix", "stop suffix", ...
    pub calls: Vec<String>,
}

pub struct FakeVfs {
    mode: VfsMode,
    state: Arc<Mutex<VfsState>>,
}

impl FakeVfs {
    fn record(&self, call: &str) {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(format!("{call} {}", self.mode));
    }
}

impl Vfs for FakeVfs {
    fn mode(&self) -> VfsMode {
        self.mode
    }

    fn start(&mut self, _params: &VfsSetupParams) -> BridgeResult<()> {
        self.record("start");
        Ok(())
    }

    fn stop(&mut self) {
        self.record("stop");
    }

    fn wipe_artifacts(&mut self) -> BridgeResult<()> {
        self.record("wipe");
        Ok(())
    }

    fn set_pin_state(&mut self, relative_path: &str, state: PinState) -> BridgeResult<()> {
        self.state
            .lock()
            .unwrap()
            .pins
            .insert(relative_path.to_string(), state);
        Ok(())
    }

    fn pin_state(&self, relative_path: &str) -> Option<PinState> {
        let state = self.state.lock().unwrap();
        Some(
            state
                .pins
                .get(relative_path)
                .copied()
                .unwrap_or(PinState::Unspecified),
        )
    }

    fn availability(
        &self,
        _relative_path: &str,
    ) -> std::result::Result<VfsItemAvailability, AvailabilityError> {
        Ok(VfsItemAvailability::AllHydrated)
    }

    fn file_status_changed(&mut self, _system_path: &Path, _status: SyncFileStatus) {}

    fn is_hydrating(&self) -> bool {
        self.state.lock().unwrap().hydrating
    }

    fn pin_actions_shown(&self) -> bool {
        true
    }
}

// ============================================================================
// File system
// ============================================================================

#[derive(Default)]
pub struct FakeFs {
    entries: Mutex<HashMap<PathBuf, FileStat>>,
    locked: Mutex<BTreeSet<PathBuf>>,
    pub removed: Mutex<Vec<PathBuf>>,
}

impl FakeFs {
    pub fn add_dir(&self, path: impl Into<PathBuf>) {
        self.entries.lock().unwrap().insert(
            path.into(),
            FileStat {
                size: 0,
                modtime: 0,
                is_dir: true,
            },
        );
    }

    pub fn add_file(&self, path: impl Into<PathBuf>, size: u64, modtime: i64) {
        self.entries.lock().unwrap().insert(
            path.into(),
            FileStat {
                size,
                modtime,
                is_dir: false,
            },
        );
    }

    pub fn set_locked(&self, path: impl Into<PathBuf>, locked: bool) {
        let path = path.into();
        let mut set = self.locked.lock().unwrap();
        if locked {
            set.insert(path);
        } else {
            set.remove(&path);
        }
    }

    fn key(path: &Path) -> PathBuf {
        let s = path.to_string_lossy();
        match s.strip_suffix('/') {
            Some(trimmed) if !trimmed.is_empty() => PathBuf::from(trimmed),
            _ => path.to_path_buf(),
        }
    }
}

impl LocalFileSystem for FakeFs {
    fn stat(&self, path: &Path) -> Option<FileStat> {
        self.entries.lock().unwrap().get(&Self::key(path)).copied()
    }

    fn is_readable(&self, path: &Path) -> bool {
        self.exists(path)
    }

    fn is_writable(&self, path: &Path) -> bool {
        self.exists(path)
    }

    fn remove_file(&self, path: &Path) -> BridgeResult<()> {
        self.entries.lock().unwrap().remove(&Self::key(path));
        self.removed.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    fn is_file_locked(&self, path: &Path) -> bool {
        self.locked.lock().unwrap().contains(&Self::key(path))
    }
}

// ============================================================================
// Backend
// ============================================================================

#[derive(Default)]
pub struct FakeBackend {
    pub engines: Mutex<HashMap<String, Arc<FakeEngine>>>,
    pub journals: Mutex<HashMap<PathBuf, Arc<Mutex<JournalState>>>>,
    pub fail_journal: Mutex<bool>,
    pub vfs_modes: Vec<VfsMode>,
    pub vfs: Arc<Mutex<VfsState>>,
}

impl FakeBackend {
    /// A backend offering the given placeholder variants.
    pub fn with_vfs(modes: &[VfsMode]) -> Self {
        Self {
            vfs_modes: modes.to_vec(),
            ..Self::default()
        }
    }

    pub fn vfs_calls(&self) -> Vec<String> {
        self.vfs.lock().unwrap().calls.clone()
    }

    pub fn set_hydrating(&self, hydrating: bool) {
        self.vfs.lock().unwrap().hydrating = hydrating;
    }

    pub fn engine(&self, alias: &str) -> Arc<FakeEngine> {
        self.engines
            .lock()
            .unwrap()
            .get(alias)
            .cloned()
            .expect("engine created for folder")
    }

    /// Journal state of the folder rooted at `local_path`.
    pub fn journal(&self, local_path: &str) -> Arc<Mutex<JournalState>> {
        self.journals
            .lock()
            .unwrap()
            .get(&PathBuf::from(local_path))
            .cloned()
            .expect("journal opened for folder")
    }
}

impl SyncBackend for FakeBackend {
    fn open_journal(&self, local_path: &Path, journal_file: &str) -> BridgeResult<Box<dyn JournalDb>> {
        if *self.fail_journal.lock().unwrap() {
            return Err(BridgeError::DatabaseError("locked".into()));
        }
        let state = self
            .journals
            .lock()
            .unwrap()
            .entry(local_path.to_path_buf())
            .or_default()
            .clone();
        Ok(Box::new(FakeJournal {
            path: local_path.join(journal_file),
            state,
        }))
    }

    fn create_engine(&self, setup: &EngineSetup) -> BridgeResult<Arc<dyn SyncEngine>> {
        let engine = Arc::new(FakeEngine::default());
        self.engines
            .lock()
            .unwrap()
            .insert(setup.alias.clone(), engine.clone());
        Ok(engine)
    }

    fn create_vfs(&self, mode: VfsMode) -> BridgeResult<Box<dyn Vfs>> {
        if !self.is_vfs_available(mode) {
            return Err(BridgeError::NotAvailable(format!("vfs {mode}")));
        }
        Ok(Box::new(FakeVfs {
            mode,
            state: self.vfs.clone(),
        }))
    }

    fn is_vfs_available(&self, mode: VfsMode) -> bool {
        self.vfs_modes.contains(&mode)
    }
}

// ============================================================================
// Harness
// ============================================================================

pub const ACCOUNT: &str = "0";

pub struct Harness {
    pub man: FolderMan,
    pub backend: Arc<FakeBackend>,
    pub fs: Arc<FakeFs>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self::with_backend(config, FakeBackend::default())
    }

    pub fn with_backend(config: ClientConfig, backend: FakeBackend) -> Self {
        let backend = Arc::new(backend);
        let fs = Arc::new(FakeFs::default());
        let now = Instant::now();
        let mut man = FolderMan::new(backend.clone(), fs.clone(), Arc::new(config), None, now);
        man.upsert_account(
            AccountState::new(ACCOUNT, "alice@cloud", "https://cloud.example/remote.php/dav", "alice")
                .with_connected(true),
            now,
        );
        Self { man, backend, fs }
    }

    /// Creates the local directory and registers a folder for it.
    pub fn add_folder(&mut self, alias: &str, local_path: &str) {
        self.fs.add_dir(local_path.trim_end_matches('/'));
        let definition = FolderDefinition::new(alias, ACCOUNT, local_path, &format!("/{alias}"));
        self.man
            .add_folder(definition, Instant::now())
            .expect("folder added");
    }

    /// Like [`Self::add_folder`] with a placeholder variant.
    pub fn add_vfs_folder(&mut self, alias: &str, local_path: &str, mode: VfsMode) {
        self.fs.add_dir(local_path.trim_end_matches('/'));
        let mut definition = FolderDefinition::new(alias, ACCOUNT, local_path, &format!("/{alias}"));
        definition.virtual_files_mode = mode;
        self.man
            .add_folder(definition, Instant::now())
            .expect("folder added");
    }

    /// Advances the paused clock by `duration`, firing every deadline on the
    /// way in order.
    pub async fn run_for(&mut self, duration: Duration) {
        let end = Instant::now() + duration;
        loop {
            match self.man.next_deadline() {
                Some(deadline) if deadline <= end => {
                    let now = Instant::now();
                    if deadline > now {
                        tokio::time::advance(deadline - now).await;
                    }
                    self.man.on_timer(Instant::now());
                }
                _ => {
                    let now = Instant::now();
                    if end > now {
                        tokio::time::advance(end - now).await;
                    }
                    return;
                }
            }
        }
    }

    /// Reports the end of the running sync of `alias`.
    pub fn finish(&mut self, alias: &str, success: bool, another: bridge_traits::AnotherSyncNeeded) {
        self.man.on_engine_event(
            alias,
            bridge_traits::EngineEvent::Finished {
                success,
                another_sync_needed: another,
            },
            Instant::now(),
        );
    }

    /// Runs until the first sync of `alias` started and completes it.
    pub async fn complete_first_sync(&mut self, alias: &str) {
        self.run_for(Duration::from_millis(200)).await;
        assert!(self.man.folder(alias).unwrap().is_sync_running());
        self.finish(alias, true, bridge_traits::AnotherSyncNeeded::NoFollowUpSync);
        self.run_for(Duration::from_secs(1)).await;
        assert!(!self.man.is_any_sync_running());
    }
}

pub fn file_record(path: &str, size: u64, modtime: i64) -> FileRecord {
    FileRecord {
        path: path.to_string(),
        item_type: ItemType::File,
        size,
        modtime,
        etag: "etag".into(),
        file_id: "id".into(),
        remote_perm: RemotePermissions::from_bits(RemotePermissions::CAN_WRITE),
    }
}
