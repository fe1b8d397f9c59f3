//! A `FolderMan` with in-memory collaborators and a fake shell client.

#![allow(dead_code)]

use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    AvailabilityError, BridgeError, DownloadInfo, EngineSetup, ErrorBlacklistRecord,
    ErrorCategory, FileRecord, FileStat, ItemType, JournalDb, LocalFileSystem, PinState,
    RemotePermissions, SelectiveSyncListType, SyncBackend, SyncEngine, SyncFileStatus,
    SyncFileStatusTag, SyncRequest, Vfs, VfsItemAvailability, VfsMode, VfsSetupParams,
};
use core_runtime::{ClientConfig, FolderDefinition};
use core_socket::{OutboundFrame, SocketApi};
use core_sync::{AccountState, FolderMan};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Instant;

pub const ACCOUNT: &str = "0";

#[derive(Default)]
pub struct Shared {
    pub statuses: Mutex<HashMap<String, SyncFileStatus>>,
    pub records: Mutex<HashMap<String, FileRecord>>,
    pub availability: Mutex<HashMap<String, VfsItemAvailability>>,
    pub pins: Mutex<Vec<(String, PinState)>>,
    pub sync_requests: Mutex<Vec<SyncRequest>>,
}

struct FakeEngine(Arc<Shared>);

impl SyncEngine for FakeEngine {
    fn start_sync(&self, request: SyncRequest) -> BridgeResult<()> {
        self.0.sync_requests.lock().unwrap().push(request);
        Ok(())
    }

    fn abort(&self) {}

    fn was_file_touched(&self, _relative_path: &str) -> bool {
        false
    }

    fn file_status(&self, relative_path: &str) -> SyncFileStatus {
        self.0
            .statuses
            .lock()
            .unwrap()
            .get(relative_path)
            .copied()
            .unwrap_or(SyncFileStatus::new(SyncFileStatusTag::UpToDate))
    }

    fn respond_remove_all(&self, _keep_files: bool) {}
}

struct FakeJournal(Arc<Shared>);

impl JournalDb for FakeJournal {
    fn database_path(&self) -> PathBuf {
        PathBuf::from("/nowhere/.sync.db")
    }

    fn file_record(&self, relative_path: &str) -> BridgeResult<Option<FileRecord>> {
        Ok(self.0.records.lock().unwrap().get(relative_path).cloned())
    }

    fn selective_sync_list(&self, _list: SelectiveSyncListType) -> BridgeResult<Vec<String>> {
        Ok(Vec::new())
    }

    fn set_selective_sync_list(
        &mut self,
        _list: SelectiveSyncListType,
        _entries: Vec<String>,
    ) -> BridgeResult<()> {
        Ok(())
    }

    fn error_blacklist_entry(&self, _relative_path: &str) -> BridgeResult<Option<ErrorBlacklistRecord>> {
        Ok(None)
    }

    fn wipe_error_blacklist_entry(&mut self, _: &str, _: ErrorCategory) -> BridgeResult<()> {
        Ok(())
    }

    fn wipe_error_blacklist_category(&mut self, _category: ErrorCategory) -> BridgeResult<()> {
        Ok(())
    }

    fn take_download_infos(&mut self) -> BridgeResult<Vec<DownloadInfo>> {
        Ok(Vec::new())
    }

    fn close(&mut self) {}
}

struct SuffixVfs(Arc<Shared>);

impl Vfs for SuffixVfs {
    fn mode(&self) -> VfsMode {
        VfsMode::WithSuffix
    }

    fn start(&mut self, _params: &VfsSetupParams) -> BridgeResult<()> {
        Ok(())
    }

    fn stop(&mut self) {}

    fn wipe_artifacts(&mut self) -> BridgeResult<()> {
        Ok(())
    }

    fn set_pin_state(&mut self, relative_path: &str, state: PinState) -> BridgeResult<()> {
        self.0
            .pins
            .lock()
            .unwrap()
            .push((relative_path.to_string(), state));
        Ok(())
    }

    fn pin_state(&self, _relative_path: &str) -> Option<PinState> {
        Some(PinState::Unspecified)
    }

    fn availability(&self, relative_path: &str) -> Result<VfsItemAvailability, AvailabilityError> {
        self.0
            .availability
            .lock()
            .unwrap()
            .get(relative_path)
            .copied()
            .ok_or(AvailabilityError::NoSuchItem)
    }

    fn file_status_changed(&mut self, _system_path: &Path, _status: SyncFileStatus) {}

    fn is_hydrating(&self) -> bool {
        false
    }

    fn underlying_file_name(&self, name: &str) -> String {
        name.strip_suffix(".owncloud").unwrap_or(name).to_string()
    }

    fn pin_actions_shown(&self) -> bool {
        true
    }
}

struct FakeBackend(Arc<Shared>);

impl SyncBackend for FakeBackend {
    fn open_journal(&self, _local_path: &Path, _journal_file: &str) -> BridgeResult<Box<dyn JournalDb>> {
        Ok(Box::new(FakeJournal(self.0.clone())))
    }

    fn create_engine(&self, _setup: &EngineSetup) -> BridgeResult<Arc<dyn SyncEngine>> {
        Ok(Arc::new(FakeEngine(self.0.clone())))
    }

    fn create_vfs(&self, mode: VfsMode) -> BridgeResult<Box<dyn Vfs>> {
        match mode {
            VfsMode::WithSuffix => Ok(Box::new(SuffixVfs(self.0.clone()))),
            other => Err(BridgeError::NotAvailable(format!("vfs {other}"))),
        }
    }

    fn is_vfs_available(&self, mode: VfsMode) -> bool {
        mode == VfsMode::WithSuffix
    }
}

#[derive(Default)]
pub struct FakeFs {
    entries: Mutex<HashMap<PathBuf, FileStat>>,
}

impl FakeFs {
    pub fn add(&self, path: &str, is_dir: bool) {
        self.entries.lock().unwrap().insert(
            PathBuf::from(path.trim_end_matches('/')),
            FileStat {
                size: 1,
                modtime: 1,
                is_dir,
            },
        );
    }
}

impl LocalFileSystem for FakeFs {
    fn stat(&self, path: &Path) -> Option<FileStat> {
        let key = path.to_string_lossy();
        let key = key.trim_end_matches('/');
        self.entries.lock().unwrap().get(Path::new(key)).copied()
    }

    fn is_readable(&self, path: &Path) -> bool {
        self.exists(path)
    }

    fn is_writable(&self, path: &Path) -> bool {
        self.exists(path)
    }

    fn remove_file(&self, _path: &Path) -> BridgeResult<()> {
        Ok(())
    }

    fn is_file_locked(&self, _path: &Path) -> bool {
        false
    }
}

/// Scheduler, protocol handler and one connected client.
pub struct Shell {
    pub man: FolderMan,
    pub api: SocketApi,
    pub shared: Arc<Shared>,
    pub fs: Arc<FakeFs>,
    next_listener: u64,
}

impl Shell {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default().with_client_version("5.3.0"))
    }

    pub fn with_config(config: ClientConfig) -> Self {
        let shared = Arc::new(Shared::default());
        let fs = Arc::new(FakeFs::default());
        let config = Arc::new(config);
        let now = Instant::now();
        let mut man = FolderMan::new(
            Arc::new(FakeBackend(shared.clone())),
            fs.clone(),
            config.clone(),
            None,
            now,
        );
        man.upsert_account(
            AccountState::new(ACCOUNT, "alice@cloud", "https://cloud.example/remote.php/dav", "alice")
                .with_connected(true),
            now,
        );
        Self {
            man,
            api: SocketApi::new(config),
            shared,
            fs,
            next_listener: 0,
        }
    }

    pub fn add_folder(&mut self, alias: &str, local_path: &str, vfs: VfsMode) {
        self.fs.add(local_path, true);
        let mut definition = FolderDefinition::new(alias, ACCOUNT, local_path, &format!("/{alias}"));
        definition.virtual_files_mode = vfs;
        self.man
            .add_folder(definition, Instant::now())
            .expect("folder added");
    }

    pub fn connect(&mut self) -> Client {
        self.next_listener += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.api.on_new_connection(self.next_listener, tx, &self.man);
        Client {
            id: self.next_listener,
            rx,
        }
    }

    pub fn send(&mut self, client: &Client, line: &str) {
        self.api
            .handle_line(client.id, line, &mut self.man, Instant::now());
    }

    pub fn set_record(&self, relative: &str, item_type: ItemType, perm: RemotePermissions) {
        self.shared.records.lock().unwrap().insert(
            relative.to_string(),
            FileRecord {
                path: relative.to_string(),
                item_type,
                size: 1,
                modtime: 1,
                etag: "e".into(),
                file_id: "00000042oc".into(),
                remote_perm: perm,
            },
        );
    }
}

pub struct Client {
    pub id: u64,
    rx: mpsc::UnboundedReceiver<OutboundFrame>,
}

impl Client {
    /// Every line sent so far, without terminators.
    pub fn drain(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            assert!(frame.line.ends_with('\n'));
            lines.push(frame.line.trim_end_matches('\n').to_string());
        }
        lines
    }

    pub async fn next_line(&mut self) -> String {
        let frame = self.rx.recv().await.expect("listener open");
        frame.line.trim_end_matches('\n').to_string()
    }
}
