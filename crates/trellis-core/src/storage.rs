//! The backup store contract: an append-only log plus an atomic snapshot.

use crossbeam::channel::Receiver;

use crate::error::StorageError;

pub trait Storage: Send + Sync {
    /// Whether a snapshot is present to restore from.
    fn exist(&self) -> bool;

    /// Delete the snapshot and the log.
    fn reset(&self) -> Result<(), StorageError>;

    /// Atomically replace the snapshot with `commands`.
    fn save(&self, commands: Vec<String>) -> Result<(), StorageError>;

    /// Read the snapshot back.
    fn load(&self) -> Result<Vec<String>, StorageError>;

    /// Enqueue a log line; durability is eventual.
    fn append(&self, line: String);

    /// Replay log lines starting at index `start`.
    fn stream(&self, start: usize) -> Receiver<String>;
}
