//! Cloneable handle talking to a running [`SyncClient`](crate::SyncClient).

use crate::error::{Result, ServiceError};
use bridge_traits::PinState;
use core_runtime::events::{EventBus, EventStream};
use core_runtime::FolderDefinition;
use core_sync::{AccountState, SyncStatus};
use tokio::sync::{mpsc, oneshot};

/// Commands understood by the client loop.
#[derive(Debug)]
pub(crate) enum Command {
    AddAccount {
        account: AccountState,
        reply: oneshot::Sender<Result<Vec<String>>>,
    },
    SetAccountConnected {
        account_id: String,
        connected: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    RemoveAccount {
        account_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    AddFolder {
        definition: FolderDefinition,
        reply: oneshot::Sender<Result<()>>,
    },
    RemoveFolder {
        alias: String,
        reply: oneshot::Sender<Result<()>>,
    },
    SetSyncPaused {
        alias: String,
        paused: bool,
        reply: oneshot::Sender<Result<bool>>,
    },
    ForceSyncNow {
        alias: String,
        reply: oneshot::Sender<Result<()>>,
    },
    TerminateSync {
        alias: String,
        reply: oneshot::Sender<Result<()>>,
    },
    ScheduleFolder {
        alias: String,
    },
    ScheduleAllFolders,
    SetSyncEnabled {
        enabled: bool,
    },
    RespondRemoveAll {
        alias: String,
        keep_files: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    SetVirtualFilesEnabled {
        alias: String,
        enabled: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    SetRootPinState {
        alias: String,
        state: PinState,
        reply: oneshot::Sender<Result<()>>,
    },
    FolderStatus {
        alias: String,
        reply: oneshot::Sender<Option<SyncStatus>>,
    },
    OverallStatus {
        reply: oneshot::Sender<SyncStatus>,
    },
    Queue {
        reply: oneshot::Sender<Vec<String>>,
    },
    Shutdown,
}

/// Front door for GUIs and host applications.
///
/// Every call goes through the client's command channel and is handled in
/// order on the scheduling task.
#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::Sender<Command>,
    bus: EventBus,
}

impl ClientHandle {
    pub(crate) fn new(commands: mpsc::Sender<Command>, bus: EventBus) -> Self {
        Self { commands, bus }
    }

    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.bus.subscribe())
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ServiceError::ChannelClosed)
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        rx.await.map_err(|_| ServiceError::ChannelClosed)
    }

    /// Registers an account and sets up the folders persisted for it.
    /// Returns the aliases that were loaded.
    pub async fn add_account(&self, account: AccountState) -> Result<Vec<String>> {
        self.request(|reply| Command::AddAccount { account, reply })
            .await?
    }

    pub async fn set_account_connected(&self, account_id: &str, connected: bool) -> Result<()> {
        let account_id = account_id.to_string();
        self.request(|reply| Command::SetAccountConnected {
            account_id,
            connected,
            reply,
        })
        .await?
    }

    /// Removes an account with all its folders and their settings.
    pub async fn remove_account(&self, account_id: &str) -> Result<()> {
        let account_id = account_id.to_string();
        self.request(|reply| Command::RemoveAccount { account_id, reply })
            .await?
    }

    pub async fn add_folder(&self, definition: FolderDefinition) -> Result<()> {
        self.request(|reply| Command::AddFolder { definition, reply })
            .await?
    }

    pub async fn remove_folder(&self, alias: &str) -> Result<()> {
        let alias = alias.to_string();
        self.request(|reply| Command::RemoveFolder { alias, reply })
            .await?
    }

    /// Returns whether the pause flag actually changed.
    pub async fn set_sync_paused(&self, alias: &str, paused: bool) -> Result<bool> {
        let alias = alias.to_string();
        self.request(|reply| Command::SetSyncPaused {
            alias,
            paused,
            reply,
        })
        .await?
    }

    pub async fn force_sync_now(&self, alias: &str) -> Result<()> {
        let alias = alias.to_string();
        self.request(|reply| Command::ForceSyncNow { alias, reply })
            .await?
    }

    pub async fn terminate_sync(&self, alias: &str) -> Result<()> {
        let alias = alias.to_string();
        self.request(|reply| Command::TerminateSync { alias, reply })
            .await?
    }

    pub async fn schedule_folder(&self, alias: &str) -> Result<()> {
        self.send(Command::ScheduleFolder {
            alias: alias.to_string(),
        })
        .await
    }

    pub async fn schedule_all_folders(&self) -> Result<()> {
        self.send(Command::ScheduleAllFolders).await
    }

    pub async fn set_sync_enabled(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetSyncEnabled { enabled }).await
    }

    /// Answers a pending "about to remove all files" question.
    pub async fn respond_remove_all(&self, alias: &str, keep_files: bool) -> Result<()> {
        let alias = alias.to_string();
        self.request(|reply| Command::RespondRemoveAll {
            alias,
            keep_files,
            reply,
        })
        .await?
    }

    pub async fn set_virtual_files_enabled(&self, alias: &str, enabled: bool) -> Result<()> {
        let alias = alias.to_string();
        self.request(|reply| Command::SetVirtualFilesEnabled {
            alias,
            enabled,
            reply,
        })
        .await?
    }

    pub async fn set_root_pin_state(&self, alias: &str, state: PinState) -> Result<()> {
        let alias = alias.to_string();
        self.request(|reply| Command::SetRootPinState { alias, state, reply })
            .await?
    }

    pub async fn folder_status(&self, alias: &str) -> Result<Option<SyncStatus>> {
        let alias = alias.to_string();
        self.request(|reply| Command::FolderStatus { alias, reply })
            .await
    }

    pub async fn overall_status(&self) -> Result<SyncStatus> {
        self.request(|reply| Command::OverallStatus { reply }).await
    }

    /// Aliases waiting to sync, front first.
    pub async fn queue(&self) -> Result<Vec<String>> {
        self.request(|reply| Command::Queue { reply }).await
    }

    /// Stops the client loop after terminating running syncs.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }
}
