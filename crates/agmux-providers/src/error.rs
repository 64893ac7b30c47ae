use std::fmt;

/// Result type for agmux-providers operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the providers layer.
#[derive(Debug)]
pub enum Error {
    /// IO operation failed (spawn, pipe read/write).
    Io(std::io::Error),
    /// JSON encode/decode failed.
    Json(serde_json::Error),
    /// Subprocess exited, or its event stream closed before the turn completed.
    Transport(String),
    /// The operation was cancelled.
    Cancelled,
    /// Caller passed an invalid work directory / config.
    InvalidConfig(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::Transport(msg) => write!(f, "transport error: {}", msg),
            Error::Cancelled => write!(f, "operation cancelled"),
            Error::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Transport(_) | Error::Cancelled | Error::InvalidConfig(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<Error> for agmux_types::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => agmux_types::Error::Io(e),
            Error::Json(e) => agmux_types::Error::Transport(e.to_string()),
            Error::Transport(msg) => agmux_types::Error::Transport(msg),
            Error::Cancelled => agmux_types::Error::Cancelled,
            Error::InvalidConfig(msg) => agmux_types::Error::Config(msg),
        }
    }
}
