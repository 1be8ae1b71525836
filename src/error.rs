use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("server has stopped accepting jobs")]
    ServerStopped,

    #[error("connection closed before a complete frame was received")]
    ConnectionClosed,

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("oversized message frame: {0} bytes")]
    OversizedFrame(u32),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
