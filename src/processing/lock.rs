//! Per-partition mutual exclusion for ingestion.
//!
//! Two layers guard a partition:
//!
//! - an in-process async mutex keyed by partition name, so concurrent requests in one server
//!   queue up without touching the filesystem;
//! - an exclusive advisory lock on `<root>/<partition>.lock`, so separate processes sharing the
//!   same index directory serialise as well.
//!
//! Both are bounded by one deadline. The lock file itself persists; the advisory lock is released
//! when the guard drops, and the kernel releases it if the holding process dies.

use std::collections::HashMap;
use std::fs::{File, TryLockError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::{Instant, sleep, timeout_at};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);
const LOCK_FILE_EXTENSION: &str = "lock";

/// Errors raised while acquiring a partition lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock was held elsewhere for longer than the configured timeout.
    #[error("timed out after {waited:?} waiting for partition '{partition}'")]
    Timeout {
        /// Partition that could not be locked.
        partition: String,
        /// Time spent waiting.
        waited: Duration,
    },
    /// The lock file could not be opened or locked.
    #[error("failed to lock {path}: {source}")]
    Io {
        /// Lock file path.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: std::io::Error,
    },
}

/// Registry of partition locks rooted at an index directory.
#[derive(Debug)]
pub struct PartitionLocks {
    root: PathBuf,
    timeout: Duration,
    table: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl PartitionLocks {
    /// Create a registry writing lock files under `root`.
    pub fn new(root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            root: root.into(),
            timeout,
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Maximum time [`acquire`](Self::acquire) waits.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Path of the lock file guarding `partition`.
    pub fn lock_path(&self, partition: &str) -> PathBuf {
        self.root.join(format!("{partition}.{LOCK_FILE_EXTENSION}"))
    }

    /// Wait for exclusive access to `partition`.
    pub async fn acquire(&self, partition: &str) -> Result<PartitionGuard, LockError> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let timed_out = || LockError::Timeout {
            partition: partition.to_string(),
            waited: started.elapsed(),
        };

        let local = timeout_at(deadline, self.entry(partition).lock_owned())
            .await
            .map_err(|_| timed_out())?;

        let path = self.lock_path(partition);
        let io_error = |source| LockError::Io {
            path: path.clone(),
            source,
        };
        tokio::fs::create_dir_all(&self.root).await.map_err(io_error)?;
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(io_error)?
            .into_std()
            .await;

        loop {
            match file.try_lock() {
                Ok(()) => break,
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        tracing::warn!(
                            partition,
                            path = %path.display(),
                            "Partition lock still held by another process"
                        );
                        return Err(timed_out());
                    }
                    sleep(LOCK_POLL_INTERVAL).await;
                }
                Err(TryLockError::Error(error)) => return Err(io_error(error)),
            }
        }

        let mut file = tokio::fs::File::from_std(file);
        record_holder(&mut file, &path).await;
        tracing::debug!(
            partition,
            waited_ms = started.elapsed().as_millis() as u64,
            "Partition lock acquired"
        );
        Ok(PartitionGuard {
            path,
            _file: file.into_std().await,
            _local: local,
        })
    }

    fn entry(&self, partition: &str) -> Arc<AsyncMutex<()>> {
        let mut table = self
            .table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        table
            .entry(partition.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

/// Stamp the lock file with our pid for operators; the advisory lock is what excludes.
async fn record_holder(file: &mut tokio::fs::File, path: &Path) {
    let stamp = async {
        file.set_len(0).await?;
        file.write_all(format!("{}\n", std::process::id()).as_bytes()).await?;
        file.flush().await?;
        Ok::<_, std::io::Error>(())
    };
    if let Err(error) = stamp.await {
        tracing::debug!(path = %path.display(), error = %error, "Failed to record lock owner");
    }
}

/// Exclusive hold on a partition; released on drop.
///
/// Dropping closes the lock file handle, which releases the advisory lock without further I/O.
#[derive(Debug)]
pub struct PartitionGuard {
    path: PathBuf,
    _file: File,
    _local: OwnedMutexGuard<()>,
}

impl PartitionGuard {
    /// Lock file backing this guard.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
