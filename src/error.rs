//! Error types for the relay.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while handling a connection.
#[derive(Error, Debug)]
pub enum Error {
    /// An operation did not complete within its deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Network I/O error
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// What a caught transport error means for the owning connection.
///
/// This classification is part of the contract: a small set of OS error
/// codes is known to be noise on already-dead transports, one is known to
/// require an immediate abort, and everything else is logged and aborts
/// the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Not worth logging above trace level
    Ignore,
    /// Hard-close all transports immediately
    ForceAbort,
    /// Log and abort the connection
    Abort,
}

/// Operation on a non-socket fd and expired semaphore timeout (both
/// Windows); seen only on transports that are already gone.
const IGNORE_OS_ERRORS: [i32; 2] = [10038, 121];

/// EHOSTUNREACH
const FORCE_ABORT_OS_ERRORS: [i32; 1] = [113];

impl Error {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Classify this error for per-connection handling.
    pub fn disposition(&self) -> ErrorDisposition {
        if let Error::Network(io) = self {
            if let Some(code) = io.raw_os_error() {
                if IGNORE_OS_ERRORS.contains(&code) {
                    return ErrorDisposition::Ignore;
                }
                if FORCE_ABORT_OS_ERRORS.contains(&code) {
                    return ErrorDisposition::ForceAbort;
                }
            }
        }
        ErrorDisposition::Abort
    }
}
