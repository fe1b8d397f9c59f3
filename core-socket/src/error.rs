use thiserror::Error;

/// Errors raised while reading or answering a shell request.
///
/// They never close the connection: each one is turned into an `ERROR:`,
/// `REJECT` or failure reply for the listener that sent the line.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed line: {0}")]
    MalformedLine(String),

    #[error("argument count is wrong")]
    ArgumentCount,

    #[error("{0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Function command_{0} not found")]
    UnknownCommand(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
