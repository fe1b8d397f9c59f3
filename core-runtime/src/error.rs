use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settings error: {0}")]
    Settings(#[from] bridge_traits::BridgeError),

    #[error("Incompatible settings version {found} for {key} (supported up to {supported})")]
    IncompatibleVersion {
        key: String,
        found: i64,
        supported: i64,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
