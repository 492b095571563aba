use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by sinks and the logger lifecycle.
///
/// Misuse of the allocator (stale ids, cross-bucket frees, leaked messages at
/// release) is not represented here: those are bugs and panic.
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("failed to open log file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to roll log file {}: {source}", path.display())]
    Roll {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("logger is already running")]
    AlreadyStarted,

    #[error("logger has been shut down")]
    ShutDown,
}

pub type Result<T, E = LoggerError> = std::result::Result<T, E>;
