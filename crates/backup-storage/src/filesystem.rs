//! Filesystem storage adapter.
//!
//! Stores artifacts under a host-mounted directory. Writes go to a
//! `.partial` sibling first and are renamed into place once complete, so a
//! crashed run never leaves a truncated artifact under its final name.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use backup_types::DATE_FORMAT;
use chrono::NaiveDate;
use fs4::FileExt;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::error::StorageError;
use crate::port::{validate_relative_path, DatedGroup, RunLock, StoragePort, WrittenDescriptor};

const COPY_BUF_SIZE: usize = 64 * 1024;
const LOCK_FILE_NAME: &str = ".run.lock";

/// Storage adapter rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FilesystemStorage {
    base_path: PathBuf,
}

impl FilesystemStorage {
    /// Open (and create if needed) the storage root.
    pub fn open(base_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn job_dir(&self, job: &str) -> Result<PathBuf, StorageError> {
        validate_relative_path(job)?;
        if job.contains(['/', '\\']) {
            return Err(StorageError::InvalidPath(job.to_string()));
        }
        Ok(self.base_path.join(job))
    }

    /// Absolute path of a job's dated directory.
    pub fn group_dir(&self, job: &str, date: NaiveDate) -> Result<PathBuf, StorageError> {
        Ok(self.job_dir(job)?.join(date.format(DATE_FORMAT).to_string()))
    }
}

#[async_trait]
impl StoragePort for FilesystemStorage {
    fn kind(&self) -> &str {
        "filesystem"
    }

    async fn write(
        &self,
        job: &str,
        date: NaiveDate,
        relative_path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<WrittenDescriptor, StorageError> {
        validate_relative_path(relative_path)?;
        let target = self.group_dir(job, date)?.join(relative_path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut partial_name = target.as_os_str().to_owned();
        partial_name.push(".partial");
        let partial = PathBuf::from(partial_name);

        let mut file = tokio::fs::File::create(&partial).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut bytes: u64 = 0;

        let copied: Result<(), std::io::Error> = async {
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                file.write_all(&buf[..n]).await?;
                bytes += n as u64;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        drop(file);
        if let Err(e) = copied {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }

        tokio::fs::rename(&partial, &target).await?;
        let checksum = format!("sha256:{}", hex::encode(hasher.finalize()));
        debug!(job, path = relative_path, bytes, "Artifact written");

        Ok(WrittenDescriptor {
            path: relative_path.to_string(),
            bytes,
            checksum,
        })
    }

    async fn list(&self, job: &str) -> Result<Vec<DatedGroup>, StorageError> {
        let job_dir = self.job_dir(job)?;
        let mut entries = match tokio::fs::read_dir(&job_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut groups = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            groups.push(DatedGroup::from_name(name));
        }
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(groups)
    }

    async fn delete(&self, job: &str, date: NaiveDate) -> Result<(), StorageError> {
        let dir = self.group_dir(job, date)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(job, path = %dir.display(), "Removed expired backup");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn acquire_lock(&self, job: &str) -> Result<RunLock, StorageError> {
        let job_dir = self.job_dir(job)?;
        tokio::fs::create_dir_all(&job_dir).await?;
        let lock_path = job_dir.join(LOCK_FILE_NAME);

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;
        file.try_lock_exclusive()
            .map_err(|_| StorageError::Locked(job.to_string()))?;

        debug!(job, path = %lock_path.display(), "Acquired run lock");
        Ok(RunLock::new(file))
    }
}
