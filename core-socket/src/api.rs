//! Request dispatch and status broadcasting for shell integrations.
//!
//! [`SocketApi`] lives on the service loop next to the [`FolderMan`]: the
//! server tasks only move lines in and out, every request is answered here
//! against the current folder state. Synchronous commands therefore reply in
//! the order they were received; `ASYNC_*` and registered `V2/*` handlers run
//! as separate tasks and answer whenever they are done.

use crate::error::ProtocolError;
use crate::file_data::FileData;
use crate::jobs::{SocketApiJob, SocketApiJobV2};
use crate::listener::{FrameSender, ListenerId, SocketListener};
use crate::menu;
use crate::message::{
    build_message, normalize_line, parent_directory_hash, parse_request, split_files, Request,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bridge_traits::{PinState, SyncFileStatus, SyncFileStatusTag};
use core_runtime::events::{CoreEvent, ShellEvent};
use core_runtime::config::SOCKET_PROTOCOL_VERSION;
use core_runtime::ClientConfig;
use core_sync::{Folder, FolderMan};
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

pub type AsyncHandler = Arc<dyn Fn(SocketApiJob) -> BoxFuture<'static, ()> + Send + Sync>;
pub type V2Handler = Arc<dyn Fn(SocketApiJobV2) -> BoxFuture<'static, ()> + Send + Sync>;

/// Which tab the share dialog opens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareStartPage {
    UsersAndGroups,
    PublicLinks,
}

impl ShareStartPage {
    fn as_str(&self) -> &'static str {
        match self {
            ShareStartPage::UsersAndGroups => "people",
            ShareStartPage::PublicLinks => "links",
        }
    }
}

/// Flush confirmations of a broadcast; see [`SocketApi::unregister_path`].
#[derive(Debug, Default)]
pub struct PendingFlush {
    receivers: Vec<oneshot::Receiver<()>>,
}

impl PendingFlush {
    /// Waits until every listener wrote the message, at most `timeout`.
    pub async fn wait(self, timeout: Duration) {
        let all = futures::future::join_all(self.receivers);
        if tokio::time::timeout(timeout, all).await.is_err() {
            debug!("Listener flush timed out");
        }
    }

    pub fn len(&self) -> usize {
        self.receivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
    }
}

pub struct SocketApi {
    config: Arc<ClientConfig>,
    listeners: BTreeMap<ListenerId, SocketListener>,
    registered_aliases: BTreeSet<String>,
    async_handlers: HashMap<String, AsyncHandler>,
    v2_handlers: HashMap<String, V2Handler>,
    client_icon: Option<Vec<u8>>,
    events: Vec<CoreEvent>,
}

impl SocketApi {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            config,
            listeners: BTreeMap::new(),
            registered_aliases: BTreeSet::new(),
            async_handlers: HashMap::new(),
            v2_handlers: HashMap::new(),
            client_icon: None,
            events: Vec::new(),
        }
    }

    /// PNG served by `V2/GET_CLIENT_ICON`.
    pub fn with_client_icon(mut self, png: Vec<u8>) -> Self {
        self.client_icon = Some(png);
        self
    }

    /// Handles `ASYNC_<NAME>` requests; `command` is the full uppercase name.
    pub fn register_async_handler(&mut self, command: impl Into<String>, handler: AsyncHandler) {
        self.async_handlers.insert(command.into().to_uppercase(), handler);
    }

    /// Handles `V2/<NAME>` requests in place of any built-in command.
    pub fn register_v2_handler(&mut self, command: impl Into<String>, handler: V2Handler) {
        self.v2_handlers.insert(command.into().to_uppercase(), handler);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn listener(&self, id: ListenerId) -> Option<&SocketListener> {
        self.listeners.get(&id)
    }

    pub fn registered_aliases(&self) -> impl Iterator<Item = &str> {
        self.registered_aliases.iter().map(String::as_str)
    }

    /// Drains the shell requests queued for the embedding application.
    pub fn take_events(&mut self) -> Vec<CoreEvent> {
        std::mem::take(&mut self.events)
    }

    fn emit(&mut self, event: ShellEvent) {
        self.events.push(CoreEvent::Shell(event));
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// A client connected; it learns every folder that can sync.
    pub fn on_new_connection(&mut self, id: ListenerId, sender: FrameSender, folders: &FolderMan) {
        let listener = SocketListener::new(id, sender);
        for folder in folders.folders().filter(|f| f.can_sync()) {
            listener.send_message(&register_path_message(folder));
        }
        info!(listener = id, "New shell connection");
        self.listeners.insert(id, listener);
        self.emit(ShellEvent::ListenerConnected { listener_id: id });
    }

    pub fn on_lost_connection(&mut self, id: ListenerId) {
        if self.listeners.remove(&id).is_some() {
            info!(listener = id, "Lost shell connection");
            self.emit(ShellEvent::ListenerDisconnected { listener_id: id });
        }
    }

    // ------------------------------------------------------------------
    // Broadcasts
    // ------------------------------------------------------------------

    pub fn broadcast_message(&self, message: &str) {
        for listener in self.listeners.values() {
            listener.send_message(message);
        }
    }

    /// Announces a folder root once; repeated calls are no-ops.
    pub fn register_path(&mut self, folder: &Folder) {
        if !self.registered_aliases.insert(folder.alias().to_string()) {
            return;
        }
        debug!(alias = %folder.alias(), "Registering path with shell clients");
        self.broadcast_message(&register_path_message(folder));
    }

    /// Withdraws a folder root; the result completes once clients got it.
    pub fn unregister_path(&mut self, folder: &Folder) -> PendingFlush {
        if !self.registered_aliases.remove(folder.alias()) {
            return PendingFlush::default();
        }
        debug!(alias = %folder.alias(), "Unregistering path with shell clients");
        let message = build_message("UNREGISTER_PATH", &folder.clean_path(), "");
        let receivers = self
            .listeners
            .values()
            .filter_map(|listener| listener.send_message_and_wait(&message))
            .collect();
        PendingFlush { receivers }
    }

    /// Refreshes the file manager view of a folder after a state change.
    pub fn update_folder_view(&self, folder: &Folder) {
        if !folder.status().refreshes_folder_view() {
            return;
        }
        let root = folder.clean_path();
        self.broadcast_status_push(&root, folder.file_status(""));
        self.broadcast_message(&build_message("UPDATE_VIEW", &root, ""));
    }

    /// Pushes a status to the clients that looked at the path's directory.
    pub fn broadcast_status_push(&self, system_path: &str, status: SyncFileStatus) {
        let message = build_message("STATUS", system_path, &status.to_socket_api_string());
        let directory_hash = parent_directory_hash(system_path);
        for listener in self.listeners.values() {
            listener.send_message_if_directory_monitored(&message, directory_hash);
        }
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    /// Answers one raw line received from `id`.
    #[instrument(skip_all, fields(listener = id))]
    pub fn handle_line(&mut self, id: ListenerId, raw: &str, folders: &mut FolderMan, now: Instant) {
        if !self.listeners.contains_key(&id) {
            debug!("Line from unknown listener dropped");
            return;
        }
        let line = normalize_line(raw);
        debug!(%line, "Received shell request");

        match parse_request(&line) {
            Ok(Request::Sync { command, argument }) => {
                self.dispatch_sync(id, &command, &argument, folders, now)
            }
            Ok(Request::Async {
                command,
                job_id,
                arguments,
            }) => self.dispatch_async(id, &command, job_id, arguments),
            Ok(Request::V2 {
                command,
                id: job_id,
                arguments,
            }) => self.dispatch_v2(id, command, job_id, arguments, folders),
            Err(e) => {
                warn!(error = %e, "Invalid shell request");
                self.send_error(id, &e);
            }
        }
    }

    fn send(&self, id: ListenerId, message: &str) {
        if let Some(listener) = self.listeners.get(&id) {
            listener.send_message(message);
        }
    }

    fn send_error(&self, id: ListenerId, error: &ProtocolError) {
        if let Some(listener) = self.listeners.get(&id) {
            listener.send_error(&error.to_string());
        }
    }

    fn dispatch_async(
        &mut self,
        id: ListenerId,
        command: &str,
        job_id: String,
        arguments: Map<String, Value>,
    ) {
        let Some(listener) = self.listeners.get(&id) else {
            return;
        };
        let job = SocketApiJob::new(job_id, listener.handle(), arguments);
        match self.async_handlers.get(command) {
            Some(handler) => {
                tokio::spawn(handler(job));
            }
            None => {
                warn!(%command, "Unknown async command");
                job.reject("command not found");
            }
        }
    }

    fn dispatch_v2(
        &mut self,
        id: ListenerId,
        command: String,
        job_id: String,
        arguments: Map<String, Value>,
        folders: &FolderMan,
    ) {
        let Some(listener) = self.listeners.get(&id) else {
            return;
        };
        let job = SocketApiJobV2::new(listener.handle(), command.clone(), job_id, arguments);
        if let Some(handler) = self.v2_handlers.get(&command) {
            tokio::spawn(handler(job));
            return;
        }
        match command.as_str() {
            "V2/LIST_ACCOUNTS" => list_accounts(job, folders),
            "V2/GET_CLIENT_ICON" => self.get_client_icon(job),
            _ => {
                warn!(%command, "Unknown V2 command");
                job.failure("command not found");
            }
        }
    }

    fn dispatch_sync(
        &mut self,
        id: ListenerId,
        command: &str,
        argument: &str,
        folders: &mut FolderMan,
        now: Instant,
    ) {
        match command {
            "VERSION" => self.send(
                id,
                &format!(
                    "VERSION:{}:{}",
                    self.config.client_version, SOCKET_PROTOCOL_VERSION
                ),
            ),
            "RETRIEVE_FILE_STATUS" | "RETRIEVE_FOLDER_STATUS" => {
                self.retrieve_status(id, argument, folders)
            }
            "SHARE" => self.process_share_request(id, argument, folders, ShareStartPage::UsersAndGroups),
            "MANAGE_PUBLIC_LINKS" => {
                self.process_share_request(id, argument, folders, ShareStartPage::PublicLinks)
            }
            "SHARE_MENU_TITLE" => self.send(
                id,
                &format!("SHARE_MENU_TITLE:Share with {}", self.config.application_name),
            ),
            "COPY_PUBLIC_LINK" => self.copy_public_link(argument, folders),
            "COPY_PRIVATE_LINK" => self.private_link(argument, folders, "copy"),
            "EMAIL_PRIVATE_LINK" => self.private_link(argument, folders, "email"),
            "OPEN_PRIVATE_LINK" => self.private_link(argument, folders, "open"),
            "OPEN_PRIVATE_LINK_VERSIONS" => self.private_link(argument, folders, "versions"),
            "MAKE_AVAILABLE_LOCALLY" => set_pin_states(argument, folders, PinState::AlwaysLocal, now),
            "MAKE_ONLINE_ONLY" => set_pin_states(argument, folders, PinState::OnlineOnly, now),
            "DELETE_ITEM" => {
                let local_path = FileData::get(folders, argument).local_path;
                self.emit(ShellEvent::DeleteItemRequested {
                    local_path: PathBuf::from(local_path),
                });
            }
            "MOVE_ITEM" => {
                let data = FileData::get(folders, argument);
                if data.folder.is_some() {
                    let local_path = PathBuf::from(data.local_path);
                    self.emit(ShellEvent::MoveItemRequested { local_path });
                }
            }
            "GET_STRINGS" => {
                for line in menu::strings_reply(argument, &self.config) {
                    self.send(id, &line);
                }
            }
            "GET_MENU_ITEMS" => {
                for line in menu::menu_items_reply(folders, argument) {
                    self.send(id, &line);
                }
            }
            other => {
                warn!(command = %other, "Unknown shell command");
                self.send_error(id, &ProtocolError::UnknownCommand(other.to_string()));
            }
        }
    }

    fn retrieve_status(&mut self, id: ListenerId, argument: &str, folders: &FolderMan) {
        let data = FileData::get(folders, argument);
        let status = match data.folder {
            None => SyncFileStatus::new(SyncFileStatusTag::None),
            Some(folder) => {
                // The client shows this directory; push updates for its entries
                let directory_hash = parent_directory_hash(&data.local_path);
                if let Some(listener) = self.listeners.get_mut(&id) {
                    listener.register_monitored_directory(directory_hash);
                }
                folder.file_status(&data.folder_relative_path)
            }
        };
        let message = build_message("STATUS", &data.local_path, &status.to_socket_api_string());
        self.send(id, &message);
    }

    fn process_share_request(
        &mut self,
        id: ListenerId,
        argument: &str,
        folders: &FolderMan,
        start_page: ShareStartPage,
    ) {
        let data = FileData::get(folders, argument);
        let reply = |code: &str| build_message("SHARE", argument, code);

        let Some(folder) = data.folder else {
            return self.send(id, &reply("NOP"));
        };
        let connected = folders
            .account(folder.account_id())
            .is_some_and(|account| account.connected);
        if !connected {
            return self.send(id, &reply("NOTCONNECTED"));
        }
        if !self.config.link_sharing && !self.config.user_group_sharing {
            return self.send(id, &reply("NOP"));
        }
        if data.journal_record().is_none() {
            return self.send(id, &reply("NOTSYNCED"));
        }
        if data.server_relative_path == "/" {
            return self.send(id, &reply("CANNOTSHAREROOT"));
        }

        self.send(id, &reply("OK"));
        let event = ShellEvent::ShareRequested {
            alias: folder.alias().to_string(),
            local_path: PathBuf::from(&data.local_path),
            remote_path: data.server_relative_path.clone(),
            start_page: start_page.as_str().to_string(),
        };
        self.emit(event);
    }

    fn copy_public_link(&mut self, argument: &str, folders: &FolderMan) {
        let data = FileData::get(folders, argument);
        let Some(alias) = data.alias() else {
            return;
        };
        let event = ShellEvent::PublicLinkRequested {
            alias: alias.to_string(),
            remote_path: data.server_relative_path.clone(),
        };
        self.emit(event);
    }

    fn private_link(&mut self, argument: &str, folders: &FolderMan, action: &str) {
        let data = FileData::get(folders, argument);
        let Some(alias) = data.alias() else {
            warn!(path = %data.local_path, "Unknown path");
            return;
        };
        if data.journal_record().is_none() {
            return;
        }
        let event = ShellEvent::PrivateLinkRequested {
            alias: alias.to_string(),
            remote_path: data.server_relative_path.clone(),
            action: action.to_string(),
        };
        self.emit(event);
    }

    fn get_client_icon(&self, job: SocketApiJobV2) {
        let has_size = job.arguments().contains_key("size");
        match &self.client_icon {
            Some(png) if has_size => {
                let mut response = Map::new();
                response.insert("png".into(), Value::from(BASE64.encode(png)));
                job.success(response);
            }
            _ => job.failure("cannot get client icon"),
        }
    }
}

impl std::fmt::Debug for SocketApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketApi")
            .field("listeners", &self.listeners.len())
            .field("registered_aliases", &self.registered_aliases)
            .finish()
    }
}

fn register_path_message(folder: &Folder) -> String {
    build_message("REGISTER_PATH", &folder.clean_path(), "")
}

fn list_accounts(job: SocketApiJobV2, folders: &FolderMan) {
    let accounts: Vec<Value> = folders
        .accounts()
        .map(|account| {
            json!({
                "name": account.display_name,
                "id": account.id,
                "uuid": account.uuid.to_string(),
            })
        })
        .collect();
    let mut response = Map::new();
    response.insert("accounts".into(), Value::Array(accounts));
    job.success(response);
}

/// Pins every listed file and asks its folder to pick up the change.
fn set_pin_states(argument: &str, folders: &mut FolderMan, state: PinState, now: Instant) {
    for file in split_files(argument) {
        let data = FileData::get(folders, file);
        let Some(alias) = data.alias().map(str::to_string) else {
            continue;
        };
        let relative = data.folder_relative_path.clone();
        folders.with_folder(&alias, now, |folder| {
            if !folder.is_ready() {
                return;
            }
            if let Err(e) = folder.set_pin_state(&relative, state) {
                warn!(%alias, path = %relative, error = %e, "Could not set pin state");
            }
            folder.schedule_path_for_local_discovery(&relative);
            folder.schedule_this_folder_soon(now);
        });
    }
}
