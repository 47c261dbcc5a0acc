use std::fmt;
use std::io;

/// Errors returned by the tcp-client core.
#[derive(Debug)]
pub enum Error {
    /// Socket or poll operation failed.
    Io(io::Error),
    /// Wakeup signal (eventfd) setup or drain failed.
    Wakeup(io::Error),
    /// Readiness registration or rearm failed.
    Registration(io::Error),
    /// Address or URL string could not be parsed.
    InvalidAddress(String),
    /// Operation not legal in the current connection state.
    InvalidState(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Wakeup(e) => write!(f, "wakeup signal: {e}"),
            Error::Registration(e) => write!(f, "readiness registration: {e}"),
            Error::InvalidAddress(s) => write!(f, "invalid address: {s}"),
            Error::InvalidState(op) => write!(f, "{op} not allowed in current state"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) | Error::Wakeup(e) | Error::Registration(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
