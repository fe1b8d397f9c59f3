use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Folder {alias} cannot sync: {message}")]
    SetupFailed { alias: String, message: String },

    #[error("Invalid folder state: {0}")]
    InvalidState(String),

    #[error("Folder {0} not found")]
    FolderNotFound(String),

    #[error("Alias {0} is already in use")]
    AliasInUse(String),

    #[error("Local path already used by another folder: {0}")]
    PathInUse(String),

    #[error("Account {0} not found")]
    AccountNotFound(String),

    #[error("Journal error: {0}")]
    Journal(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Runtime(#[from] core_runtime::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
