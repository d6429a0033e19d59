use thiserror::Error;

/// Errors produced by the shellmux session layer.
#[derive(Debug, Error)]
pub enum ShellError {
    /// No auth token was available at connect time.
    #[error("authentication required")]
    CredentialMissing,

    /// The socket never reached the open state.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The socket failed after it was open.
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer closed the socket with a non-normal close code.
    #[error("connection closed (code {code}): {reason}")]
    AbnormalClose { code: u16, reason: String },

    #[error("malformed frame: {0}")]
    FrameParse(String),

    #[error("config error: {0}")]
    Config(String),

    /// The requested transition is not valid from the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ShellError {
    fn from(e: serde_json::Error) -> Self {
        ShellError::FrameParse(e.to_string())
    }
}

pub type ShellResult<T> = Result<T, ShellError>;
