use std::fmt;

use probe::error::Error;

use crate::codec::DecodeError;
use crate::msgs::enums::{AlertDescription, AlertLevel};

/// Connection-scoped failures. Everything that must abort the handshake is
/// a `Fatal` carrying the alert description the connection emits on its way
/// out; peer alerts, timeouts and closed sockets are observations the
/// workers classify themselves.
#[derive(Debug, Clone, PartialEq)]
pub enum TlsError {
    /// Local protocol failure; a FATAL alert with this description is sent
    /// before the connection is torn down.
    Fatal {
        description: AlertDescription,
        message: String,
    },
    /// The peer sent an alert.
    PeerAlert {
        level: AlertLevel,
        description: AlertDescription,
    },
    /// The per-wait timeout expired without data.
    Timeout,
    /// The peer closed the TCP connection.
    Closed,
    /// Framework failure (socket errors, replay mismatches). Replay
    /// mismatches must propagate out of the scan untouched.
    Framework(Error),
}

impl TlsError {
    pub fn fatal(description: AlertDescription, message: impl Into<String>) -> Self {
        TlsError::Fatal {
            description,
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        TlsError::fatal(AlertDescription::DecodeError, message)
    }
}

impl fmt::Display for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsError::Fatal {
                description,
                message,
            } => write!(f, "fatal ({:?}): {}", description, message),
            TlsError::PeerAlert { level, description } => {
                write!(f, "peer alert {:?}: {:?}", level, description)
            }
            TlsError::Timeout => write!(f, "no data received within the timeout"),
            TlsError::Closed => write!(f, "connection closed by peer"),
            TlsError::Framework(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for TlsError {}

impl From<DecodeError> for TlsError {
    fn from(err: DecodeError) -> Self {
        TlsError::fatal(AlertDescription::DecodeError, err.0)
    }
}

impl From<Error> for TlsError {
    fn from(err: Error) -> Self {
        match err {
            Error::Timeout => TlsError::Timeout,
            other => TlsError::Framework(other),
        }
    }
}

/// Worker-side classification: protocol-level outcomes become `None`
/// (an observation), framework failures keep propagating.
pub fn observation<T>(result: Result<T, TlsError>) -> Result<Option<T>, Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(TlsError::Framework(err)) => Err(err),
        Err(err) => {
            log::debug!("observation: {}", err);
            Ok(None)
        }
    }
}
