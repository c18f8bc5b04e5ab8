//! File-based advisory locking.
//!
//! One lock file per named critical section, under `<base_dir>/locks/`.
//! Acquisition is a non-blocking `flock` attempt polled on a timer rather
//! than a blocking syscall, so it never stalls the executor.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fs2::FileExt;

use crate::domain::locks::{AdvisoryLock, LockError, LockGuard, POLL_INTERVAL};

pub struct FileAdvisoryLock {
    lock_dir: PathBuf,
}

impl FileAdvisoryLock {
    pub fn new(lock_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let lock_dir = lock_dir.into();
        std::fs::create_dir_all(&lock_dir)?;
        Ok(Self { lock_dir })
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.lock_dir.join(format!("{name}.lock"))
    }
}

#[async_trait]
impl AdvisoryLock for FileAdvisoryLock {
    async fn acquire(&self, name: &str, timeout: Duration) -> Result<Box<dyn LockGuard>, LockError> {
        let path = self.lock_path(name);
        let file = open_lock_file(&path, name)?;

        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(_) => {
                    let waited = start.elapsed();
                    if waited >= timeout {
                        return Err(LockError::TimedOut {
                            name: name.to_string(),
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }

        write_pid(&file, name)?;
        tracing::debug!(lock = name, "acquired advisory lock");

        Ok(Box::new(FileLockGuard {
            name: name.to_string(),
            file: Some(file),
            path,
        }))
    }
}

fn open_lock_file(path: &Path, name: &str) -> Result<File, LockError> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|source| LockError::Io {
            name: name.to_string(),
            source,
        })
}

fn write_pid(file: &File, name: &str) -> Result<(), LockError> {
    let pid = std::process::id();
    (&*file)
        .write_all(pid.to_string().as_bytes())
        .map_err(|source| LockError::Io {
            name: name.to_string(),
            source,
        })
}

struct FileLockGuard {
    name: String,
    file: Option<File>,
    path: PathBuf,
}

impl LockGuard for FileLockGuard {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = file.unlock() {
                tracing::warn!(lock = %self.name, error = %e, "failed to release advisory lock");
            }
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(lock = %self.name, error = %e, "failed to remove lock file");
            }
        }
        tracing::debug!(lock = %self.name, "released advisory lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquires_and_releases_a_lock() {
        let dir = tempdir();
        let lock = FileAdvisoryLock::new(&dir).unwrap();
        let guard = lock.acquire("test_lock", Duration::from_secs(1)).await.unwrap();
        assert_eq!(guard.name(), "test_lock");
        drop(guard);
        let guard2 = lock.acquire("test_lock", Duration::from_secs(1)).await.unwrap();
        assert_eq!(guard2.name(), "test_lock");
    }

    #[tokio::test]
    async fn second_acquire_times_out_while_first_is_held() {
        let dir = tempdir();
        let lock = FileAdvisoryLock::new(&dir).unwrap();
        let _guard = lock.acquire("busy", Duration::from_secs(5)).await.unwrap();

        let result = lock.acquire("busy", Duration::from_millis(200)).await;
        assert!(matches!(result, Err(LockError::TimedOut { .. })));
    }

    fn tempdir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("sentinel-agent-lock-test-{}", uuid::Uuid::new_v4()));
        dir
    }
}
