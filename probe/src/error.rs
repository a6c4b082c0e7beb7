use std::fmt;

/// Framework-level error kinds. Protocol failures are handled inside the
/// `tlsprobe` crate and only cross this boundary once a worker decides how
/// to classify them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid option values, rejected at startup.
    Config(String),
    /// Catastrophic socket or file errors.
    Io(String),
    /// A worker-level failure; annotates the profile and the scan continues.
    Scan(String),
    /// Divergence between a replayed run and its recording. Always fatal.
    Replay(String),
    /// The per-wait timeout expired without any data.
    Timeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::Io(msg) => write!(f, "io error: {}", msg),
            Error::Scan(msg) => write!(f, "scan error: {}", msg),
            Error::Replay(msg) => write!(f, "replay mismatch: {}", msg),
            Error::Timeout => write!(f, "timeout: no data received"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
