//! Backup archive creation and retention pruning (C12).
//!
//! Archives the data directory's durable files into a timestamped
//! `tar.gz`, matching the original system's archive format. Retention
//! pruning keeps the `backup_retention_count` newest archives and deletes
//! the rest.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Uploads a completed local archive to off-site storage (the `backup:r2`
/// task's network target). Out of the core's testable surface per §1; the
/// default implementation is a no-op so the task's scheduling slot and
/// local-archive-then-upload ordering still exist and can be exercised in
/// tests without network access.
#[async_trait]
pub trait BackupUploader: Send + Sync {
    async fn upload(&self, archive_path: &Path) -> Result<()>;
}

pub struct NoopBackupUploader;

#[async_trait]
impl BackupUploader for NoopBackupUploader {
    async fn upload(&self, _archive_path: &Path) -> Result<()> {
        Ok(())
    }
}

pub struct BackupArchiver {
    backups_dir: PathBuf,
}

impl BackupArchiver {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            backups_dir: data_dir.as_ref().join("backups"),
        }
    }

    /// Archive every file directly under `source_dir` into a single
    /// timestamped `tar.gz` under `backups/`. Returns the archive path and
    /// its size in bytes.
    pub fn create_backup(&self, source_dir: &Path, timestamp: &str) -> Result<(PathBuf, u64)> {
        std::fs::create_dir_all(&self.backups_dir)
            .with_context(|| format!("creating backups dir {}", self.backups_dir.display()))?;

        let archive_path = self.backups_dir.join(format!("backup-{timestamp}.tar.gz"));
        let file = std::fs::File::create(&archive_path)
            .with_context(|| format!("creating archive {}", archive_path.display()))?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut tar = tar::Builder::new(encoder);

        if source_dir.exists() {
            tar.append_dir_all(".", source_dir)
                .with_context(|| format!("archiving {}", source_dir.display()))?;
        }
        tar.into_inner()
            .context("finishing tar stream")?
            .finish()
            .context("finishing gzip stream")?;

        let size = std::fs::metadata(&archive_path)?.len();
        Ok((archive_path, size))
    }

    /// Delete all but the `keep_count` most-recently-created archives.
    pub fn prune_old_backups(&self, keep_count: usize) -> Result<u64> {
        if !self.backups_dir.exists() {
            return Ok(0);
        }
        let mut entries: Vec<(std::time::SystemTime, PathBuf)> = std::fs::read_dir(&self.backups_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".tar.gz")
            })
            .filter_map(|entry| {
                entry
                    .metadata()
                    .ok()
                    .and_then(|meta| meta.created().ok())
                    .map(|created| (created, entry.path()))
            })
            .collect();

        entries.sort_by(|a, b| b.0.cmp(&a.0));

        let mut removed = 0u64;
        for (_, path) in entries.into_iter().skip(keep_count) {
            if std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tempdir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("sentinel-agent-backup-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn create_backup_archives_source_directory() {
        let root = tempdir();
        let source = root.join("source");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("a.txt"), b"hello").unwrap();

        let archiver = BackupArchiver::new(&root);
        let (path, size) = archiver.create_backup(&source, "20260729T000000").unwrap();
        assert!(path.exists());
        assert!(size > 0);
    }

    #[test]
    fn prune_keeps_only_newest_n() {
        let root = tempdir();
        let source = root.join("source");
        std::fs::create_dir_all(&source).unwrap();
        let archiver = BackupArchiver::new(&root);
        for i in 0..5 {
            archiver.create_backup(&source, &format!("ts{i}")).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let removed = archiver.prune_old_backups(2).unwrap();
        assert_eq!(removed, 3);
        let remaining = std::fs::read_dir(root.join("backups")).unwrap().count();
        assert_eq!(remaining, 2);
    }
}
