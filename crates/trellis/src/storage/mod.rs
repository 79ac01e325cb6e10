//! File-backed backup store: an append-only line log plus a JSON snapshot
//! replaced atomically via a temp-file rename.
//!
//! Appends go through a dedicated writer thread so no caller ever blocks on
//! disk latency beyond the channel's backpressure.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::Mutex;

use trellis_core::{Storage, StorageError};

pub struct FileStorage {
    snapshot_path: PathBuf,
    logs_path: PathBuf,
    appender: Option<Sender<String>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl FileStorage {
    /// Open a store rooted at `path`; the snapshot lands at
    /// `<path>.snapshot` and the log at `<path>.logs`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base = path.as_ref();
        if let Some(dir) = base.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).map_err(|source| StorageError::Io {
                    path: Some(dir.to_path_buf()),
                    source,
                })?;
            }
        }
        let logs_path = with_suffix(base, "logs");
        let (appender, lines) = bounded(128);
        let writer = {
            let logs_path = logs_path.clone();
            std::thread::spawn(move || append_loop(&logs_path, lines))
        };
        Ok(FileStorage {
            snapshot_path: with_suffix(base, "snapshot"),
            logs_path,
            appender: Some(appender),
            writer: Mutex::new(Some(writer)),
        })
    }
}

impl Storage for FileStorage {
    fn exist(&self) -> bool {
        self.snapshot_path.exists()
    }

    fn reset(&self) -> Result<(), StorageError> {
        for path in [&self.logs_path, &self.snapshot_path] {
            if let Err(source) = fs::remove_file(path) {
                if source.kind() != std::io::ErrorKind::NotFound {
                    return Err(StorageError::Io {
                        path: Some(path.clone()),
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    fn save(&self, commands: Vec<String>) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(&commands).map_err(|err| StorageError::Corrupted {
            reason: err.to_string(),
        })?;
        let staging = with_suffix(&self.snapshot_path, "tmp");
        fs::write(&staging, bytes).map_err(|source| StorageError::Io {
            path: Some(staging.clone()),
            source,
        })?;
        fs::rename(&staging, &self.snapshot_path).map_err(|source| StorageError::Io {
            path: Some(self.snapshot_path.clone()),
            source,
        })
    }

    fn load(&self) -> Result<Vec<String>, StorageError> {
        let bytes = fs::read(&self.snapshot_path).map_err(|source| StorageError::Io {
            path: Some(self.snapshot_path.clone()),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|err| StorageError::Corrupted {
            reason: err.to_string(),
        })
    }

    fn append(&self, line: String) {
        if let Some(appender) = &self.appender {
            if appender.send(line).is_err() {
                tracing::error!("log writer is gone, dropping line");
            }
        }
    }

    fn stream(&self, start: usize) -> Receiver<String> {
        let (tx, rx) = unbounded();
        let path = self.logs_path.clone();
        std::thread::spawn(move || {
            let file = match File::open(&path) {
                Ok(file) => file,
                // No log yet: an empty replay.
                Err(_) => return,
            };
            for line in BufReader::new(file).lines().skip(start) {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        tracing::error!(path = %path.display(), error = %err, "log stream aborted");
                        return;
                    }
                }
            }
        });
        rx
    }
}

impl Drop for FileStorage {
    fn drop(&mut self) {
        // Disconnect the writer, then wait for its final flush.
        self.appender.take();
        if let Some(writer) = self.writer.lock().take() {
            let _ = writer.join();
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn append_loop(path: &Path, lines: Receiver<String>) {
    let file = match OpenOptions::new().append(true).create(true).open(path) {
        Ok(file) => file,
        Err(err) => {
            tracing::error!(path = %path.display(), error = %err, "cannot open log for append");
            return;
        }
    };
    let mut writer = BufWriter::new(file);
    for line in lines {
        let written = writeln!(writer, "{line}").and_then(|_| writer.flush());
        if let Err(err) = written {
            tracing::error!(path = %path.display(), error = %err, "log append failed");
            return;
        }
    }
    let _ = writer.flush();
}
