use thiserror::Error;

/// Main error type for MPI stack operations
#[derive(Error, Debug)]
pub enum MpiError {
    #[error("Channel error: {0}")]
    Channel(#[from] std::io::Error),

    #[error("Timeout")]
    Timeout,

    #[error("Frame invalid: {0}")]
    FrameInvalid(String),

    #[error("Link handshake rejected with code [0x{code:02X}]")]
    LinkRejected { code: u8 },

    #[error("Exceeded max retry times when connecting")]
    RetriesExceeded,

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Adapter rejected connection: E={code} ({description})")]
    AdapterRejected {
        code: String,
        description: &'static str,
    },

    #[error("Not connected")]
    NotConnected,

    #[error("Connection closed")]
    Closed,
}

/// Result type alias for MPI stack operations
pub type MpiResult<T> = Result<T, MpiError>;
