//! Per-component error taxonomy.
//!
//! Errors are grouped by how the caller must react rather than by where the
//! underlying I/O failed: protocol errors abort a connection, store/watcher
//! errors abort a single open request, bind/config errors abort the process.

use std::io;
use std::path::PathBuf;

/// Errors that terminate the process before a listener is bound.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `RMATE_EDITOR` was not set.
    #[error("RMATE_EDITOR is not set; the launcher has no editor to invoke")]
    MissingEditor,

    /// `HOME` was not set and is needed to compute a default path.
    #[error("HOME is not set and no explicit {0} was provided")]
    MissingHome(&'static str),
}

/// Errors establishing the listening socket.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    /// Failed to create the base directory.
    #[error("failed to create base directory {path}: {source}")]
    BaseDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Failed to remove a stale Unix socket file.
    #[error("failed to remove stale socket {path}: {source}")]
    StaleSocket {
        /// Socket path that could not be removed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Failed to bind the listening socket.
    #[error("failed to bind listener: {0}")]
    Listen(#[source] io::Error),
}

/// Errors surfaced while parsing the wire protocol.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The stream ended in the middle of a command.
    #[error("stream ended mid-command")]
    TruncatedStream,

    /// A required key (`display-name`, `real-path`, `token`) was missing.
    #[error("malformed `open` command: {0}")]
    MalformedCommand(&'static str),

    /// The `data: <N>` value failed to parse as an unsigned decimal.
    #[error("malformed data length: {0:?}")]
    MalformedNumber(String),

    /// Fewer than `N` payload bytes were available before EOF.
    #[error("short payload: expected {expected} bytes, stream ended early")]
    ShortPayload {
        /// Declared payload length.
        expected: u64,
    },

    /// Underlying I/O error while reading the stream.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Errors from the temp-file store (C2).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `write_exclusive` lost the race: the mirror file already exists.
    #[error("mirror file already exists: {0}")]
    AlreadyExists(PathBuf),

    /// A path escaped `base_dir` lexically and was refused.
    #[error("path {0} is not lexically under the base directory")]
    UnsafePath(PathBuf),

    /// Any other I/O failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path involved in the failed operation.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Errors starting a file watcher (C3).
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    /// Registering the watch with the OS failed.
    #[error("failed to register watch on {path}: {source}")]
    Register {
        /// Path the watch was for.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}
