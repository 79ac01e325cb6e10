//! Capability errors.
//!
//! Bounded and stable: these represent domain refusal states, not library
//! implementation details.

use std::path::PathBuf;

use thiserror::Error;

/// Identifier-space violations: names that do not decode, locations that do
/// not fit their collection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SpaceError {
    #[error("name `{raw}` is not a valid identifier: {reason}")]
    InvalidName { raw: String, reason: String },

    #[error("name `{raw}` decodes to {got} bytes, expected {expected}")]
    InvalidLength {
        raw: String,
        got: usize,
        expected: usize,
    },

    #[error("location `{location}` does not fit in collection name `{collection}`")]
    LocationOverflow {
        location: String,
        collection: String,
    },
}

/// A remote peer could not serve a request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PeerError {
    #[error("peer unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("peer rejected request: {reason}")]
    Rejected { reason: String },

    #[error(transparent)]
    Space(#[from] SpaceError),
}

/// Backup store failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("storage io at {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot is corrupted: {reason}")]
    Corrupted { reason: String },
}

impl From<std::io::Error> for StorageError {
    fn from(source: std::io::Error) -> Self {
        StorageError::Io { path: None, source }
    }
}
