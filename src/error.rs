//! Error types shared across the server.

use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single model evaluation.
///
/// Every variant is recoverable at the connection level and is reported to
/// the peer as `CALC_ERR`; the detail only ever reaches the server log.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot read model file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{}' is not a regular file", .0.display())]
    NotAFile(PathBuf),

    #[error("failed to spawn inference tool '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("inference tool exited with {status}: {stderr}")]
    ToolFailed { status: String, stderr: String },

    #[error("cannot find partition function value in tool output")]
    NoValue,

    #[error("invalid partition function value '{0}'")]
    BadValue(String),
}

/// Errors that stop the server itself.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
