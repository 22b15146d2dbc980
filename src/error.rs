use core::fmt;
use std::{
    error::Error,
    fmt::{Debug, Display, Formatter},
};

use crate::config::ConfigError;

pub struct CleanError(pub Box<dyn Error>);

impl Debug for CleanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "\r\x1b[K{}", self)
    }
}

impl Display for CleanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\x1b[31mERROR\x1b[0m: {}", self.0)
    }
}

impl Error for CleanError {}

#[derive(Debug)]
struct StringError(String);

impl Display for StringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for StringError {}

impl From<ConfigError> for CleanError {
    fn from(e: ConfigError) -> Self {
        CleanError(Box::new(StringError(e.to_string())))
    }
}

impl From<std::io::Error> for CleanError {
    fn from(e: std::io::Error) -> Self {
        CleanError(Box::new(e))
    }
}

impl From<std::net::AddrParseError> for CleanError {
    fn from(e: std::net::AddrParseError) -> Self {
        CleanError(Box::new(e))
    }
}

impl From<String> for CleanError {
    fn from(s: String) -> Self {
        CleanError(Box::new(StringError(s)))
    }
}

impl From<&str> for CleanError {
    fn from(s: &str) -> Self {
        CleanError(Box::new(StringError(s.to_string())))
    }
}

impl From<ServerError> for CleanError {
    fn from(e: ServerError) -> Self {
        CleanError(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, CleanError>;

/// Error kinds for the core reactor/state-machine/concurrency fabric. Distinct from
/// [`CleanError`], which is the ambient top-level wrapper used for startup wiring failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Malformed request line, header, or body framing.
    ParseError,
    /// Transient; caller should rearm and retry.
    IoWouldBlock,
    /// Peer reset or unexpected close; caller should remove the timer and close.
    IoFatal,
    /// Queue full, FD cap reached, or a non-blocking pool acquire found nothing free.
    ResourceExhausted,
    NotFound,
    Forbidden,
    InternalError,
    /// Construction-time failure of a synchronization primitive or pool; fatal, aborts startup.
    ResourceInitFailed(String),
}

impl Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::ParseError => write!(f, "malformed request"),
            ServerError::IoWouldBlock => write!(f, "would block"),
            ServerError::IoFatal => write!(f, "fatal I/O error"),
            ServerError::ResourceExhausted => write!(f, "resource exhausted"),
            ServerError::NotFound => write!(f, "not found"),
            ServerError::Forbidden => write!(f, "forbidden"),
            ServerError::InternalError => write!(f, "internal error"),
            ServerError::ResourceInitFailed(msg) => {
                write!(f, "resource initialization failed: {}", msg)
            }
        }
    }
}

impl Error for ServerError {}
