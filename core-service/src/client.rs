//! # Sync Client
//!
//! The single task owning the folder scheduler and the shell protocol.
//!
//! ## Overview
//!
//! [`SyncClient::run`] is one `tokio::select!` loop over:
//! - commands from [`ClientHandle`]s
//! - engine and VFS events for the folders
//! - shell socket connections and request lines
//! - file watcher notifications
//! - completed remote etag checks
//! - the scheduler's nearest deadline
//! - cancellation
//!
//! After every wake-up the events the scheduler and the socket layer queued
//! are drained: overlay statuses go out to shell clients, changed folder
//! definitions are persisted, watchers follow folders, and everything is
//! republished on the [`EventBus`].
//!
//! Nothing else touches `FolderMan`, so no locks are involved.

use crate::error::{Result, ServiceError};
use crate::handle::{ClientHandle, Command};
use crate::CoreDependencies;
use bridge_traits::{
    BridgeError, EngineEventReceiver, EtagResponse, FileWatcher, RemoteEtagFetcher,
    VfsEventReceiver, WatcherEvent, WatcherEventReceiver, WatcherEventSender,
};
use core_runtime::events::{CoreEvent, EventBus, FolderEvent};
use core_runtime::{ClientConfig, FolderDefinition, SettingsAdapter, TooNewPolicy};
use core_socket::{SocketApi, SocketEvent, SocketEventReceiver, SocketEventSender};
use core_sync::{AccountState, FolderMan, SyncError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pending commands before `ClientHandle` calls start to wait.
const COMMAND_BUFFER: usize = 64;

type EtagResult = (String, std::result::Result<EtagResponse, BridgeError>);

pub struct SyncClient {
    config: Arc<ClientConfig>,
    man: FolderMan,
    api: SocketApi,
    settings: SettingsAdapter,
    too_new_policy: TooNewPolicy,
    etag_fetcher: Arc<dyn RemoteEtagFetcher>,
    watcher: Option<Box<dyn FileWatcher>>,
    bus: EventBus,
    cancel: CancellationToken,

    commands: mpsc::Receiver<Command>,
    engine_events: EngineEventReceiver,
    vfs_events: VfsEventReceiver,
    socket_tx: SocketEventSender,
    socket_events: SocketEventReceiver,
    watcher_tx: WatcherEventSender,
    watcher_events: WatcherEventReceiver,
    etag_tx: mpsc::UnboundedSender<EtagResult>,
    etag_results: mpsc::UnboundedReceiver<EtagResult>,
}

impl SyncClient {
    pub fn new(config: ClientConfig, deps: CoreDependencies) -> Result<(Self, ClientHandle)> {
        config.validate()?;
        let config = Arc::new(config);

        let (vfs_tx, vfs_events) = mpsc::unbounded_channel();
        let man = FolderMan::new(
            deps.backend,
            deps.filesystem,
            config.clone(),
            Some(vfs_tx),
            Instant::now(),
        );
        let (command_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (socket_tx, socket_events) = mpsc::unbounded_channel();
        let (watcher_tx, watcher_events) = mpsc::unbounded_channel();
        let (etag_tx, etag_results) = mpsc::unbounded_channel();
        let bus = EventBus::default();

        let client = Self {
            api: SocketApi::new(config.clone()),
            settings: SettingsAdapter::new(deps.settings_store),
            too_new_policy: TooNewPolicy::default(),
            etag_fetcher: deps.etag_fetcher,
            watcher: None,
            bus: bus.clone(),
            cancel: CancellationToken::new(),
            config,
            man,
            commands,
            engine_events: deps.engine_events,
            vfs_events,
            socket_tx,
            socket_events,
            watcher_tx,
            watcher_events,
            etag_tx,
            etag_results,
        };
        Ok((client, ClientHandle::new(command_tx, bus)))
    }

    /// Installs a file watcher built around the client's notification channel.
    pub fn with_watcher(
        mut self,
        build: impl FnOnce(WatcherEventSender) -> Box<dyn FileWatcher>,
    ) -> Self {
        self.watcher = Some(build(self.watcher_tx.clone()));
        self
    }

    pub fn with_too_new_policy(mut self, policy: TooNewPolicy) -> Self {
        self.too_new_policy = policy;
        self
    }

    pub fn with_client_icon(mut self, png: Vec<u8>) -> Self {
        self.api = self.api.with_client_icon(png);
        self
    }

    /// Access to the shell protocol, e.g. to register `ASYNC_`/`V2/` handlers.
    pub fn socket_api_mut(&mut self) -> &mut SocketApi {
        &mut self.api
    }

    /// Where shell transports deliver their connections and lines.
    pub fn socket_events(&self) -> SocketEventSender {
        self.socket_tx.clone()
    }

    /// Fires to stop the loop and every transport started with [`Self::listen`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Binds the shell socket and serves it until the client stops.
    #[cfg(unix)]
    pub async fn listen(
        &self,
        path: impl Into<std::path::PathBuf>,
    ) -> Result<tokio::task::JoinHandle<()>> {
        let server = core_socket::SocketServer::bind(path).await?;
        let events = self.socket_tx.clone();
        let cancel = self.cancel.child_token();
        Ok(tokio::spawn(async move {
            if let Err(e) = server.run(events, cancel).await {
                error!(error = %e, "Shell socket stopped");
            }
        }))
    }

    pub async fn run(mut self) {
        info!("Sync client started");
        loop {
            let deadline = self.man.next_deadline();
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(message) = self.engine_events.recv() => {
                    self.man.on_engine_event(&message.alias, message.event, Instant::now());
                }
                Some(message) = self.vfs_events.recv() => {
                    self.man.on_vfs_event(&message.alias, message.event, Instant::now());
                }
                Some(event) = self.socket_events.recv() => self.on_socket_event(event),
                Some(event) = self.watcher_events.recv() => self.on_watcher_event(event),
                Some((alias, result)) = self.etag_results.recv() => {
                    self.man.on_etag_result(&alias, result, Instant::now());
                }
                _ = sleep_until(deadline) => self.man.on_timer(Instant::now()),
            }
            self.process_events().await;
            self.start_etag_checks();
        }

        self.man.terminate_all(Instant::now());
        self.process_events().await;
        self.cancel.cancel();
        info!("Sync client stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::AddAccount { account, reply } => {
                reply.send(self.add_account(account).await).ok();
            }
            Command::SetAccountConnected {
                account_id,
                connected,
                reply,
            } => {
                let result = self.man.set_account_connected(&account_id, connected, now);
                reply.send(result.map_err(ServiceError::from)).ok();
            }
            Command::RemoveAccount { account_id, reply } => {
                reply.send(self.remove_account(&account_id).await).ok();
            }
            Command::AddFolder { definition, reply } => {
                reply.send(self.add_folder(definition).await).ok();
            }
            Command::RemoveFolder { alias, reply } => {
                reply.send(self.remove_folder(&alias).await).ok();
            }
            Command::SetSyncPaused {
                alias,
                paused,
                reply,
            } => {
                let result = self.man.set_sync_paused(&alias, paused, now);
                reply.send(result.map_err(ServiceError::from)).ok();
            }
            Command::ForceSyncNow { alias, reply } => {
                reply
                    .send(self.man.force_sync_now(&alias, now).map_err(ServiceError::from))
                    .ok();
            }
            Command::TerminateSync { alias, reply } => {
                reply
                    .send(self.man.terminate_sync(&alias, now).map_err(ServiceError::from))
                    .ok();
            }
            Command::ScheduleFolder { alias } => self.man.schedule_folder(&alias, now),
            Command::ScheduleAllFolders => self.man.schedule_all_folders(now),
            Command::SetSyncEnabled { enabled } => self.man.set_sync_enabled(enabled, now),
            Command::RespondRemoveAll {
                alias,
                keep_files,
                reply,
            } => {
                let result = self.man.respond_remove_all(&alias, keep_files, now);
                reply.send(result.map_err(ServiceError::from)).ok();
            }
            Command::SetVirtualFilesEnabled {
                alias,
                enabled,
                reply,
            } => {
                let result = self.man.set_virtual_files_enabled(&alias, enabled, now);
                reply.send(result.map_err(ServiceError::from)).ok();
            }
            Command::SetRootPinState {
                alias,
                state,
                reply,
            } => {
                let result = self.man.set_root_pin_state(&alias, state, now);
                reply.send(result.map_err(ServiceError::from)).ok();
            }
            Command::FolderStatus { alias, reply } => {
                reply.send(self.man.folder(&alias).map(|f| f.status())).ok();
            }
            Command::OverallStatus { reply } => {
                reply.send(self.man.overall_status()).ok();
            }
            Command::Queue { reply } => {
                reply.send(self.man.queue()).ok();
            }
            // Handled by the loop
            Command::Shutdown => {}
        }
    }

    /// Checks the settings versions, registers the account and sets up its
    /// persisted folders. Folders that fail to set up are skipped.
    async fn add_account(&mut self, account: AccountState) -> Result<Vec<String>> {
        let account_id = account.id.clone();
        self.settings
            .prepare_account(&account_id, self.too_new_policy)
            .await?;
        self.man.upsert_account(account, Instant::now());

        let definitions = self
            .settings
            .load_folders(&account_id, self.too_new_policy)
            .await?;
        let mut loaded = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let alias = definition.alias.clone();
            match self.man.add_folder(definition, Instant::now()) {
                Ok(_) => loaded.push(alias),
                Err(e) => warn!(account = %account_id, alias = %alias, error = %e, "Skipping folder"),
            }
        }
        info!(account = %account_id, folders = loaded.len(), "Account set up");
        Ok(loaded)
    }

    async fn remove_account(&mut self, account_id: &str) -> Result<()> {
        if self.man.account(account_id).is_none() {
            return Err(SyncError::AccountNotFound(account_id.to_string()).into());
        }
        let aliases: Vec<String> = self
            .man
            .folders()
            .filter(|f| f.account_id() == account_id)
            .map(|f| f.alias().to_string())
            .collect();
        for alias in aliases {
            self.remove_folder(&alias).await?;
        }
        self.man.remove_account(account_id, Instant::now())?;
        Ok(())
    }

    async fn add_folder(&mut self, definition: FolderDefinition) -> Result<()> {
        let stored = self
            .man
            .add_folder(definition, Instant::now())?
            .definition()
            .clone();
        self.settings.save_folder(&stored).await?;
        Ok(())
    }

    /// Shell clients are told to forget the folder before the scheduler
    /// closes its journal.
    async fn remove_folder(&mut self, alias: &str) -> Result<()> {
        let Some(folder) = self.man.folder(alias) else {
            return Err(SyncError::FolderNotFound(alias.to_string()).into());
        };
        let account_id = folder.account_id().to_string();
        let pending = self.api.unregister_path(folder);
        if !pending.is_empty() {
            debug!(alias, listeners = pending.len(), "Waiting for shell clients to unregister");
        }
        pending.wait(self.config.unregister_flush_timeout).await;

        if let Some(watcher) = self.watcher.as_mut() {
            watcher.unwatch(alias);
        }
        self.man.remove_folder(alias, Instant::now())?;
        self.settings.remove_folder(&account_id, alias).await?;
        Ok(())
    }

    fn on_socket_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Connected { id, sender } => {
                self.api.on_new_connection(id, sender, &self.man);
            }
            SocketEvent::Line { id, line } => {
                self.api.handle_line(id, &line, &mut self.man, Instant::now());
            }
            SocketEvent::Disconnected { id } => self.api.on_lost_connection(id),
        }
    }

    fn on_watcher_event(&mut self, event: WatcherEvent) {
        let now = Instant::now();
        match event {
            WatcherEvent::PathChanged(path) => {
                self.man.on_watched_path_changed(&path, now);
            }
            WatcherEvent::Unreliable { alias, message } => {
                self.man.on_watcher_unreliable(&alias, &message, now);
            }
        }
    }

    /// Starts the next queued etag check; the scheduler hands out one at a time.
    fn start_etag_checks(&mut self) {
        while let Some(request) = self.man.take_etag_request() {
            let fetcher = self.etag_fetcher.clone();
            let results = self.etag_tx.clone();
            tokio::spawn(async move {
                let result = fetcher.fetch_etag(&request).await;
                results.send((request.alias, result)).ok();
            });
        }
    }

    async fn process_events(&mut self) {
        loop {
            let events = self.man.take_events();
            if events.is_empty() {
                break;
            }
            for event in events {
                self.react(&event).await;
                self.bus.emit(event).ok();
            }
        }
        for event in self.api.take_events() {
            self.bus.emit(event).ok();
        }
    }

    async fn react(&mut self, event: &CoreEvent) {
        let CoreEvent::Folder(event) = event else {
            return;
        };
        match event {
            FolderEvent::FileStatusChanged { path, status, .. } => {
                self.api
                    .broadcast_status_push(&path.to_string_lossy(), *status);
            }
            FolderEvent::SyncStateChanged { alias, .. } => {
                if let Some(folder) = self.man.folder(alias) {
                    self.api.update_folder_view(folder);
                }
            }
            FolderEvent::SyncPausedChanged { alias, paused } => {
                let Some(folder) = self.man.folder(alias) else {
                    return;
                };
                if *paused {
                    // Nobody waits for a paused folder's journal
                    drop(self.api.unregister_path(folder));
                } else if folder.can_sync() {
                    self.api.register_path(folder);
                }
            }
            FolderEvent::Added { alias } => self.on_folder_added(alias),
            FolderEvent::DefinitionChanged { alias } => {
                let Some(definition) = self.man.folder(alias).map(|f| f.definition().clone()) else {
                    return;
                };
                if let Err(e) = self.settings.save_folder(&definition).await {
                    error!(alias = %alias, error = %e, "Could not save folder definition");
                }
            }
            FolderEvent::Removed { alias } => {
                if let Some(watcher) = self.watcher.as_mut() {
                    watcher.unwatch(alias);
                }
            }
            _ => {}
        }
    }

    fn on_folder_added(&mut self, alias: &str) {
        let Some(folder) = self.man.folder(alias) else {
            return;
        };
        if folder.can_sync() {
            self.api.register_path(folder);
        }
        if folder.has_setup_error() {
            return;
        }
        let root = folder.path().to_path_buf();
        let Some(watcher) = self.watcher.as_mut() else {
            return;
        };
        if let Err(e) = watcher.watch(alias, &root) {
            warn!(alias, error = %e, "Could not watch folder");
            self.man
                .on_watcher_unreliable(alias, &e.to_string(), Instant::now());
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
