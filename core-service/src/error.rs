use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Socket error: {0}")]
    Protocol(#[from] core_socket::ProtocolError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),

    #[error("Sync client is not running")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, ServiceError>;
