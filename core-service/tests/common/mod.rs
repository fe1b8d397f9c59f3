//! A `SyncClient` running on in-memory collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    AnotherSyncNeeded, BridgeError, DownloadInfo, EngineEvent, EngineEventSender, EngineMessage,
    EngineSetup, ErrorBlacklistRecord, ErrorCategory, EtagRequest, EtagResponse, FileRecord,
    FileStat, FileWatcher, JournalDb, LocalFileSystem, RemoteEtagFetcher, SelectiveSyncListType,
    SyncBackend, SyncEngine, SyncFileStatus, SyncFileStatusTag, SyncRequest, Vfs, VfsMode,
    WatcherEvent, WatcherEventSender,
};
use core_runtime::events::{CoreEvent, EventStream};
use core_runtime::settings::MemorySettingsStore;
use core_runtime::{ClientConfig, FolderDefinition};
use core_service::{ClientHandle, CoreDependencies, SyncClient};
use core_socket::{FrameReceiver, SocketEvent, SocketEventSender};
use core_sync::AccountState;
use mockall::mock;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// ============================================================================
// Engine, journal and backend
// ============================================================================

#[derive(Default)]
pub struct FakeEngine {
    pub requests: Mutex<Vec<SyncRequest>>,
    pub aborts: Mutex<u32>,
}

impl FakeEngine {
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<SyncRequest> {
        self.requests.lock().unwrap().last().cloned()
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

    fn was_file_touched(&self, _relative_path: &str) -> bool {
        false
    }

    fn file_status(&self, _relative_path: &str) -> SyncFileStatus {
        SyncFileStatus::new(SyncFileStatusTag::UpToDate)
    }

    fn respond_remove_all(&self, _keep_files: bool) {}
}

pub struct FakeJournal {
    path: PathBuf,
    lists: HashMap<SelectiveSyncListType, Vec<String>>,
}

impl JournalDb for FakeJournal {
    fn database_path(&self) -> PathBuf {
        self.path.clone()
    }

    fn file_record(&self, _relative_path: &str) -> BridgeResult<Option<FileRecord>> {
        Ok(None)
    }

    fn selective_sync_list(&self, list: SelectiveSyncListType) -> BridgeResult<Vec<String>> {
        Ok(self.lists.get(&list).cloned().unwrap_or_default())
    }

    fn set_selective_sync_list(
        &mut self,
        list: SelectiveSyncListType,
        entries: Vec<String>,
    ) -> BridgeResult<()> {
        self.lists.insert(list, entries);
        Ok(())
    }

    fn error_blacklist_entry(&self, _relative_path: &str) -> BridgeResult<Option<ErrorBlacklistRecord>> {
        Ok(None)
    }

    fn wipe_error_blacklist_entry(
        &mut self,
        _relative_path: &str,
        _category: ErrorCategory,
    ) -> BridgeResult<()> {
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

#[derive(Default)]
pub struct FakeBackend {
    engines: Mutex<HashMap<String, Arc<FakeEngine>>>,
}

impl FakeBackend {
    pub fn engine(&self, alias: &str) -> Arc<FakeEngine> {
        self.engines
            .lock()
            .unwrap()
            .get(alias)
            .cloned()
            .expect("engine created for folder")
    }
}

impl SyncBackend for FakeBackend {
    fn open_journal(&self, local_path: &Path, journal_file: &str) -> BridgeResult<Box<dyn JournalDb>> {
        Ok(Box::new(FakeJournal {
            path: local_path.join(journal_file),
            lists: HashMap::new(),
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
        Err(BridgeError::NotAvailable(format!("vfs {mode}")))
    }

    fn is_vfs_available(&self, _mode: VfsMode) -> bool {
        false
    }
}

// ============================================================================
// File system
// ============================================================================

#[derive(Default)]
pub struct FakeFs {
    entries: Mutex<HashMap<PathBuf, FileStat>>,
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
        Ok(())
    }

    fn is_file_locked(&self, _path: &Path) -> bool {
        false
    }
}

// ============================================================================
// Watcher and etag fetcher
// ============================================================================

#[derive(Debug, Default)]
pub struct WatchLog {
    pub watched: BTreeSet<String>,
    pub unwatched: Vec<String>,
    /// Alias whose `watch` call fails
    pub fail_for: Option<String>,
}

pub struct FakeWatcher {
    log: Arc<Mutex<WatchLog>>,
}

impl FileWatcher for FakeWatcher {
    fn watch(&mut self, alias: &str, _root: &Path) -> BridgeResult<()> {
        let mut log = self.log.lock().unwrap();
        if log.fail_for.as_deref() == Some(alias) {
            return Err(BridgeError::OperationFailed("inotify limit reached".into()));
        }
        log.watched.insert(alias.to_string());
        Ok(())
    }

    fn unwatch(&mut self, alias: &str) {
        let mut log = self.log.lock().unwrap();
        log.watched.remove(alias);
        log.unwatched.push(alias.to_string());
    }

    fn is_watching(&self, alias: &str) -> bool {
        self.log.lock().unwrap().watched.contains(alias)
    }
}

mock! {
    pub Fetcher {}

    #[async_trait]
    impl RemoteEtagFetcher for Fetcher {
        async fn fetch_etag(&self, request: &EtagRequest) -> BridgeResult<EtagResponse>;
    }
}

/// A fetcher for tests that never reach the etag poll.
pub fn offline_fetcher() -> MockFetcher {
    let mut fetcher = MockFetcher::new();
    fetcher
        .expect_fetch_etag()
        .returning(|_| Err(BridgeError::Network("offline".into())));
    fetcher
}

// ============================================================================
// Harness
// ============================================================================

pub const ACCOUNT: &str = "0";
pub const DAV_URL: &str = "https://cloud.example/remote.php/dav";

pub fn account() -> AccountState {
    AccountState::new(ACCOUNT, "alice@cloud", DAV_URL, "alice").with_connected(true)
}

pub fn definition(alias: &str, local_path: &str) -> FolderDefinition {
    FolderDefinition::new(alias, ACCOUNT, local_path, &format!("/{alias}"))
}

pub struct Harness {
    pub handle: ClientHandle,
    pub backend: Arc<FakeBackend>,
    pub fs: Arc<FakeFs>,
    pub settings: MemorySettingsStore,
    pub watch_log: Arc<Mutex<WatchLog>>,
    pub watcher: WatcherEventSender,
    pub socket: SocketEventSender,
    pub engine: EngineEventSender,
    pub task: JoinHandle<()>,
    next_listener: u64,
}

pub struct HarnessBuilder {
    settings: MemorySettingsStore,
    fetcher: MockFetcher,
    watch_log: WatchLog,
    config: ClientConfig,
}

impl HarnessBuilder {
    pub fn settings(mut self, settings: MemorySettingsStore) -> Self {
        self.settings = settings;
        self
    }

    pub fn fetcher(mut self, fetcher: MockFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn failing_watch(mut self, alias: &str) -> Self {
        self.watch_log.fail_for = Some(alias.to_string());
        self
    }

    pub fn start(self) -> Harness {
        let backend = Arc::new(FakeBackend::default());
        let fs = Arc::new(FakeFs::default());
        let (engine, engine_events) = mpsc::unbounded_channel();
        let deps = CoreDependencies::new(
            backend.clone(),
            fs.clone(),
            Arc::new(self.settings.clone()),
            Arc::new(self.fetcher),
            engine_events,
        );

        let (client, handle) = SyncClient::new(self.config, deps).expect("valid config");
        let watch_log = Arc::new(Mutex::new(self.watch_log));
        let mut watcher = None;
        let client = client.with_watcher(|events| {
            watcher = Some(events);
            Box::new(FakeWatcher {
                log: watch_log.clone(),
            }) as Box<dyn FileWatcher>
        });
        let socket = client.socket_events();
        let task = tokio::spawn(client.run());

        Harness {
            handle,
            backend,
            fs,
            settings: self.settings,
            watch_log,
            watcher: watcher.expect("watcher installed"),
            socket,
            engine,
            task,
            next_listener: 1,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            settings: MemorySettingsStore::new(),
            fetcher: offline_fetcher(),
            watch_log: WatchLog::default(),
            config: ClientConfig::default(),
        }
    }

    pub fn start() -> Self {
        Self::builder().start()
    }

    /// Registers the test account and a folder rooted at an existing
    /// directory.
    pub async fn with_folder(alias: &str, local_path: &str) -> Self {
        let h = Self::start();
        h.handle.add_account(account()).await.unwrap();
        h.add_folder(alias, local_path).await;
        h
    }

    pub async fn add_folder(&self, alias: &str, local_path: &str) {
        self.fs.add_dir(local_path.trim_end_matches('/'));
        self.handle
            .add_folder(definition(alias, local_path))
            .await
            .expect("folder added");
    }

    /// Opens a shell connection and returns the frames sent to it.
    pub fn connect(&mut self) -> ShellClient {
        let id = self.next_listener;
        self.next_listener += 1;
        let (sender, rx) = mpsc::unbounded_channel();
        self.socket
            .send(SocketEvent::Connected { id, sender })
            .unwrap();
        ShellClient { id, rx }
    }

    pub fn send_line(&self, client: &ShellClient, line: &str) {
        self.socket
            .send(SocketEvent::Line {
                id: client.id,
                line: line.to_string(),
            })
            .unwrap();
    }

    pub fn path_changed(&self, path: &str) {
        self.watcher
            .send(WatcherEvent::PathChanged(PathBuf::from(path)))
            .unwrap();
    }

    pub fn finish_sync(&self, alias: &str) {
        self.engine
            .send(EngineMessage {
                alias: alias.to_string(),
                event: EngineEvent::Finished {
                    success: true,
                    another_sync_needed: AnotherSyncNeeded::NoFollowUpSync,
                },
            })
            .unwrap();
    }

    /// Lets the client run until the paused clock moved by `duration`.
    pub async fn run_for(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    pub async fn stored(&self, key: &str) -> Option<String> {
        use bridge_traits::SettingsStore;
        self.settings.get_string(key).await.unwrap()
    }
}

pub struct ShellClient {
    pub id: u64,
    rx: FrameReceiver,
}

impl ShellClient {
    /// Lines received so far, without their terminators.
    pub fn drain(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            lines.push(frame.line.trim_end_matches('\n').to_string());
        }
        lines
    }
}

/// Waits for the first event matching `predicate`.
pub async fn wait_for_event(
    events: &mut EventStream,
    predicate: impl Fn(&CoreEvent) -> bool,
) -> CoreEvent {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event stream failed: {e}"),
            }
        }
    })
    .await
    .expect("event arrives")
}
