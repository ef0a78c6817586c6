//! Append-only review log (`store/log.jsonl`)
//!
//! One JSON object per line. A line is committed once its trailing newline is
//! on disk and fsynced; a final line without a newline is an interrupted write
//! and is discarded on open.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

use super::RecordOrigin;
use crate::error::StoreError;
use crate::review::ReviewRecord;

/// A single committed log line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "lowercase")]
pub enum LogEntry {
    /// First sighting of a record
    Record {
        record: ReviewRecord,
        origin: RecordOrigin,
    },
    /// An already-stored record was seen from another origin
    Origin { id: String, origin: RecordOrigin },
}

/// Exclusive appender for the log file
///
/// Tracks the length of the committed prefix. Anything past it is a failed
/// append and is cut off before the next write. If cutting it off fails the
/// writer is poisoned until the store is reopened.
pub struct LogWriter {
    path: PathBuf,
    file: tokio::fs::File,
    committed_len: u64,
    poisoned: bool,
}

impl LogWriter {
    /// Open the log for appending, creating it if needed
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(io_err)?;
        let committed_len = file.metadata().await.map_err(io_err)?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            committed_len,
            poisoned: false,
        })
    }

    /// Append one entry and fsync before returning
    ///
    /// On failure the log is truncated back to its last committed line.
    pub async fn append(&mut self, entry: &LogEntry) -> Result<(), StoreError> {
        if self.poisoned {
            return Err(StoreError::Poisoned {
                path: self.path.clone(),
            });
        }

        let mut line =
            serde_json::to_vec(entry).map_err(|source| StoreError::Encode { source })?;
        line.push(b'\n');

        self.discard_uncommitted().await?;
        match self.write_line(&line).await {
            Ok(()) => {
                self.committed_len += line.len() as u64;
                Ok(())
            }
            Err(source) => {
                warn!(
                    "Append to {} failed, rolling back: {}",
                    self.path.display(),
                    source
                );
                self.rollback().await;
                Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }

    async fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.file.write_all(line).await?;
        self.file.flush().await?;
        self.file.sync_data().await
    }

    /// Cut off bytes left behind by an earlier failed append
    async fn discard_uncommitted(&mut self) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let len = self.file.metadata().await.map_err(io_err)?.len();
        if len > self.committed_len {
            warn!(
                "Discarding {} bytes of failed append in {}",
                len - self.committed_len,
                self.path.display()
            );
            self.file.set_len(self.committed_len).await.map_err(io_err)?;
            self.file.sync_data().await.map_err(io_err)?;
        }
        Ok(())
    }

    async fn rollback(&mut self) {
        let truncated = async {
            self.file.set_len(self.committed_len).await?;
            self.file.sync_data().await
        }
        .await;
        if let Err(e) = truncated {
            error!(
                "Failed to roll back {}, refusing further writes: {}",
                self.path.display(),
                e
            );
            self.poisoned = true;
        }
    }
}

/// Read every committed entry with its line number, truncating an interrupted tail
pub fn replay(path: &Path) -> Result<Vec<(usize, LogEntry)>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let bytes = std::fs::read(path).map_err(io_err)?;

    let committed_len = match bytes.iter().rposition(|b| *b == b'\n') {
        Some(pos) => pos + 1,
        None => 0,
    };
    if committed_len < bytes.len() {
        warn!(
            "Discarding {} bytes of interrupted write at end of {}",
            bytes.len() - committed_len,
            path.display()
        );
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(io_err)?;
        file.set_len(committed_len as u64).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }

    let mut entries = Vec::new();
    for (index, line) in bytes[..committed_len].split(|b| *b == b'\n').enumerate() {
        if line.is_empty() {
            continue;
        }
        let entry: LogEntry =
            serde_json::from_slice(line).map_err(|e| StoreError::Corrupt {
                path: path.to_path_buf(),
                line: index + 1,
                reason: e.to_string(),
            })?;
        entries.push((index + 1, entry));
    }

    debug!("Replayed {} log entries from {}", entries.len(), path.display());
    Ok(entries)
}
