//! Local filesystem storage adapter.
//!
//! Implements [`IStorageClient`] for `Local` locations on top of `tokio::fs`.
//! Files have no native ETag, so one is derived from the length and
//! modification time; any rewrite of the file changes it.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use datamove_core::domain::{AccessCondition, Attributes, ETag, LocationKind, TransferLocation};
use datamove_core::ports::{IStorageClient, ListEntry, StorageError};
use sha2::{Digest, Sha256};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::trace;

/// Storage client over the local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalStorageClient;

impl LocalStorageClient {
    pub fn new() -> Self {
        Self
    }

    fn path(location: &TransferLocation) -> Result<&Path, StorageError> {
        match location.kind() {
            LocationKind::Local { path } => Ok(path),
            _ => Err(StorageError::Unsupported(format!(
                "{} is not a local path",
                location.endpoint_kind()
            ))),
        }
    }

    async fn current_etag(path: &Path) -> Result<Option<ETag>, StorageError> {
        match fs::metadata(path).await {
            Ok(meta) => Ok(Some(etag_for(&meta)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(e, path)),
        }
    }

    /// Fail with `PreconditionFailed` unless `condition` holds right now
    async fn check_condition(path: &Path, condition: Option<&AccessCondition>) -> Result<(), StorageError> {
        let Some(condition) = condition else {
            return Ok(());
        };
        let current = Self::current_etag(path).await?;
        let holds = match (condition, &current) {
            (AccessCondition::IfMatch(expected), Some(actual)) => expected == actual,
            (AccessCondition::IfMatch(_), None) => {
                return Err(StorageError::NotFound(path.display().to_string()));
            }
            (AccessCondition::IfNoneMatch(unwanted), Some(actual)) => unwanted != actual,
            (AccessCondition::IfNoneMatch(_), None) => true,
            (AccessCondition::IfNotExists, current) => current.is_none(),
        };
        if holds {
            Ok(())
        } else {
            Err(StorageError::PreconditionFailed(format!(
                "{} does not satisfy {condition:?}",
                path.display()
            )))
        }
    }
}

fn etag_for(meta: &std::fs::Metadata) -> Result<ETag, StorageError> {
    let nanos = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_nanos());
    let mut hasher = Sha256::new();
    hasher.update(meta.len().to_le_bytes());
    hasher.update(nanos.to_le_bytes());
    let digest = format!("{:x}", hasher.finalize());
    ETag::new(&digest[..32]).map_err(|e| StorageError::Other(e.into()))
}

fn io_error(e: std::io::Error, path: &Path) -> StorageError {
    if e.kind() == ErrorKind::NotFound {
        StorageError::NotFound(path.display().to_string())
    } else {
        StorageError::Other(anyhow::Error::new(e).context(format!("I/O on {}", path.display())))
    }
}

#[async_trait]
impl IStorageClient for LocalStorageClient {
    async fn fetch_attributes(
        &self,
        location: &TransferLocation,
        condition: Option<&AccessCondition>,
    ) -> Result<Attributes, StorageError> {
        let path = Self::path(location)?;
        let meta = fs::metadata(path).await.map_err(|e| io_error(e, path))?;
        if !meta.is_file() {
            return Err(StorageError::NotFound(format!("{} is not a file", path.display())));
        }
        Self::check_condition(path, condition).await?;

        Ok(Attributes {
            length: meta.len(),
            etag: Some(etag_for(&meta)?),
            last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
            ..Attributes::default()
        })
    }

    async fn read_range(
        &self,
        location: &TransferLocation,
        offset: u64,
        buf: &mut [u8],
        condition: Option<&AccessCondition>,
    ) -> Result<usize, StorageError> {
        let path = Self::path(location)?;
        Self::check_condition(path, condition).await?;

        let mut file = fs::File::open(path).await.map_err(|e| io_error(e, path))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| io_error(e, path))?;
        let n = file.read(buf).await.map_err(|e| io_error(e, path))?;
        trace!(path = %path.display(), offset, bytes = n, "Local read");
        Ok(n)
    }

    async fn write_range(
        &self,
        location: &TransferLocation,
        offset: u64,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let path = Self::path(location)?;
        let mut file = OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .map_err(|e| io_error(e, path))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| io_error(e, path))?;
        file.write_all(data).await.map_err(|e| io_error(e, path))?;
        file.flush().await.map_err(|e| io_error(e, path))?;
        Ok(())
    }

    async fn create_destination(
        &self,
        location: &TransferLocation,
        length: u64,
        condition: Option<&AccessCondition>,
    ) -> Result<(), StorageError> {
        let path = Self::path(location)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(e, parent))?;
        }

        let mut options = OpenOptions::new();
        options.write(true);
        match condition {
            Some(AccessCondition::IfNotExists) => {
                options.create_new(true);
            }
            other => {
                Self::check_condition(path, other).await?;
                options.create(true).truncate(true);
            }
        }

        let file = options.open(path).await.map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                StorageError::AlreadyExists(path.display().to_string())
            } else {
                io_error(e, path)
            }
        })?;
        file.set_len(length).await.map_err(|e| io_error(e, path))?;
        trace!(path = %path.display(), length, "Local destination created");
        Ok(())
    }

    async fn set_metadata(
        &self,
        location: &TransferLocation,
        _attributes: &Attributes,
    ) -> Result<(), StorageError> {
        // Plain files carry no settable properties
        Self::path(location).map(|_| ())
    }

    async fn finalize(&self, location: &TransferLocation, length: u64) -> Result<(), StorageError> {
        let path = Self::path(location)?;
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .map_err(|e| io_error(e, path))?;
        file.set_len(length).await.map_err(|e| io_error(e, path))?;
        file.sync_all().await.map_err(|e| io_error(e, path))
    }

    async fn list_entries(&self, location: &TransferLocation) -> Result<Vec<ListEntry>, StorageError> {
        let root = Self::path(location)?;
        let mut entries = Vec::new();
        let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut reader = fs::read_dir(&dir).await.map_err(|e| io_error(e, &dir))?;
            while let Some(entry) = reader.next_entry().await.map_err(|e| io_error(e, &dir))? {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(|e| io_error(e, &path))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    let length = entry.metadata().await.map_err(|e| io_error(e, &path))?.len();
                    let relative = path
                        .strip_prefix(root)
                        .map_err(|e| StorageError::Other(e.into()))?
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    entries.push(ListEntry {
                        relative_name: relative,
                        length,
                    });
                }
            }
        }

        entries.sort_by(|a, b| a.relative_name.cmp(&b.relative_name));
        Ok(entries)
    }
}
