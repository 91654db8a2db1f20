//! Error taxonomy for the memory subsystem.
//!
//! Read paths never surface these to the agent loop; the [`MemoryManager`]
//! swallows write failures and logs them. Only construction (an unreadable
//! store) and [`ActionHistory`] undo operations hand errors back to the caller.
//!
//! [`MemoryManager`]: crate::memory::manager::MemoryManager
//! [`ActionHistory`]: crate::memory::history::ActionHistory

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    /// The backing file could not be read or written at the OS level.
    #[error("memory store unavailable at {path}: {source}")]
    StoreUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persisted document exists but cannot be parsed. Recovered by
    /// resetting to an empty store.
    #[error("memory store at {path} is corrupt: {reason}")]
    StoreCorrupt { path: PathBuf, reason: String },

    /// Undo requested with no pending snapshot.
    #[error("nothing to undo")]
    NothingToUndo,

    /// A record_* write failed for a reason other than the store itself.
    #[error("failed to record {0}")]
    RecordingFailure(String),

    /// The pre-action state of a file could not be captured.
    #[error("cannot snapshot {path} before destructive action: {source}")]
    SnapshotFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Undo could not put the target file back in its prior state.
    #[error("cannot restore {path}: {source}")]
    RestoreFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A free-form payload failed shape validation.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// A string did not name a known enum variant.
    #[error("unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}

pub type Result<T, E = MemoryError> = std::result::Result<T, E>;
