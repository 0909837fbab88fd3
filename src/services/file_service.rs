//! src/services/file_service.rs
//!
//! FileService: ingestion and deletion of content-addressed images.
//!
//! Ingestion runs one upload through size policy, MIME sniffing, the
//! fingerprinting writer and the placement engine, then builds the public
//! result. Deletion maps public URLs back to files and removes them,
//! stopping at the first failure.

use crate::{
    config::StorageConfig,
    models::upload::{DeleteItem, FullResult, LOCAL_STORAGE},
    services::{
        placement::{PlacementEngine, PlacementOutcome},
        sniff,
        url_mapper::UrlMapper,
    },
};
use axum::http::StatusCode;
use chrono::{DateTime, Local, Utc};
use std::{
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
};
use thiserror::Error;
use tokio::{fs, io::AsyncRead};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("file size exceeds maximum allowed size of {max} bytes")]
    SizeExceeded { max: u64 },
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("failed to read upload: {0}")]
    IoRead(#[source] io::Error),
    #[error("failed to write file: {0}")]
    IoWrite(#[source] io::Error),
    #[error("Failed to access file: {0}")]
    IoStat(#[source] io::Error),
    #[error("Failed to delete file: {0}")]
    IoRemove(#[source] io::Error),
    #[error("failed to move file into place: {0}")]
    IoRename(#[source] io::Error),
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Target is a directory: {0}")]
    NotAFile(String),
    #[error("Invalid file path: {0}")]
    OutsideRoot(String),
    #[error("Unsupported file type for deletion: {kind} - {url}")]
    UnsupportedDeleteType { kind: String, url: String },
}

impl FileError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::SizeExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedType(_)
            | Self::NotAFile(_)
            | Self::OutsideRoot(_)
            | Self::UnsupportedDeleteType { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::IoRead(_)
            | Self::IoWrite(_)
            | Self::IoStat(_)
            | Self::IoRemove(_)
            | Self::IoRename(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type FileResult<T> = Result<T, FileError>;

/// Deletion error tagged with the position of the failing item.
#[derive(Debug, Error)]
#[error("item {index}: {error}")]
pub struct DeleteFailure {
    pub index: usize,
    #[source]
    pub error: FileError,
}

/// One incoming file, readable exactly once.
pub struct UploadDescriptor<R> {
    /// Client supplied name; only its extension is used.
    pub filename: String,
    /// Size declared by the transport, if it declared one.
    pub size: Option<u64>,
    pub reader: R,
}

/// FileService owns the URL mapping and placement for one upload root.
#[derive(Clone, Debug)]
pub struct FileService {
    mapper: UrlMapper,
    placement: PlacementEngine,
    max_file_size: u64,
}

impl FileService {
    pub fn new(storage: &StorageConfig) -> Self {
        Self {
            mapper: UrlMapper::new(&storage.upload_dir, &storage.base_url),
            placement: PlacementEngine::new(&storage.upload_dir),
            max_file_size: storage.max_file_size,
        }
    }

    pub fn upload_dir(&self) -> &Path {
        self.mapper.upload_dir()
    }

    /// Round-trip a temp file through the placement engine.
    pub async fn check_storage(&self) -> FileResult<()> {
        self.placement.check_writable().await
    }

    /// Store one upload, dated by the local clock.
    pub async fn ingest<R>(&self, upload: UploadDescriptor<R>) -> FileResult<FullResult>
    where
        R: AsyncRead + Unpin,
    {
        self.ingest_at(upload, Local::now()).await
    }

    /// Store one upload as if received at `now`.
    ///
    /// A declared size over the limit is rejected before the stream is
    /// touched. Without a declared size the copy itself is capped.
    pub async fn ingest_at<R>(
        &self,
        upload: UploadDescriptor<R>,
        now: DateTime<Local>,
    ) -> FileResult<FullResult>
    where
        R: AsyncRead + Unpin,
    {
        let UploadDescriptor {
            filename,
            size,
            mut reader,
        } = upload;

        let limit = match size {
            Some(size) if size > self.max_file_size => {
                warn!(
                    "rejected {}: declared {} bytes, limit {}",
                    filename, size, self.max_file_size
                );
                return Err(FileError::SizeExceeded {
                    max: self.max_file_size,
                });
            }
            Some(_) => None,
            None => Some(self.max_file_size),
        };

        let header = sniff::read_header(&mut reader)
            .await
            .map_err(FileError::IoRead)?;
        let content_type = sniff::sniff_content_type(&header);
        if !sniff::is_image(content_type) {
            warn!("rejected {}: sniffed as {}", filename, content_type);
            return Err(FileError::UnsupportedType(content_type.to_string()));
        }

        let extension = sniff::choose_extension(&filename, content_type);
        let date_path = now.format("%Y/%m").to_string();

        let placement = self
            .placement
            .place(&date_path, &extension, &header, &mut reader, limit)
            .await?;

        let created_at = match placement.outcome {
            PlacementOutcome::Stored => {
                info!(
                    "stored {} as {} ({} bytes)",
                    filename,
                    placement.path.display(),
                    placement.fingerprint.bytes_written
                );
                now.timestamp()
            }
            PlacementOutcome::Deduplicated { modified } => {
                info!(
                    "{} matches existing {} (md5 {})",
                    filename,
                    placement.path.display(),
                    placement.fingerprint.digest
                );
                DateTime::<Utc>::from(modified).timestamp()
            }
        };

        Ok(FullResult {
            img_url: self.mapper.to_url(&date_path, &placement.filename),
            file_name: placement.filename,
            extname: extension,
            kind: LOCAL_STORAGE.to_string(),
            id: Uuid::new_v4(),
            created_at,
            updated_at: now.timestamp(),
        })
    }

    /// Delete every item in order, stopping at the first failure.
    ///
    /// Items removed before a failure stay removed. Returns the count
    /// deleted.
    pub async fn delete_batch(&self, items: &[DeleteItem]) -> Result<usize, DeleteFailure> {
        for (index, item) in items.iter().enumerate() {
            let path = self
                .delete_one(item)
                .await
                .map_err(|error| DeleteFailure { index, error })?;
            info!("deleted {}", path.display());
        }
        Ok(items.len())
    }

    async fn delete_one(&self, item: &DeleteItem) -> FileResult<PathBuf> {
        if item.kind != LOCAL_STORAGE {
            return Err(FileError::UnsupportedDeleteType {
                kind: item.kind.clone(),
                url: item.img_url.clone(),
            });
        }

        let path = self.mapper.to_path(&item.img_url);
        if !self.is_lexically_contained(&path) {
            return Err(FileError::OutsideRoot(item.img_url.clone()));
        }

        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(FileError::NotFound(item.img_url.clone()));
            }
            Err(err) => return Err(FileError::IoStat(err)),
        };
        if meta.is_dir() {
            return Err(FileError::NotAFile(item.img_url.clone()));
        }

        // Symlinks may still point out of the root.
        let root = fs::canonicalize(self.upload_dir())
            .await
            .map_err(FileError::IoStat)?;
        let resolved = fs::canonicalize(&path).await.map_err(FileError::IoStat)?;
        if !resolved.starts_with(&root) {
            return Err(FileError::OutsideRoot(item.img_url.clone()));
        }

        fs::remove_file(&path).await.map_err(FileError::IoRemove)?;
        Ok(path)
    }

    fn is_lexically_contained(&self, path: &Path) -> bool {
        path.starts_with(self.upload_dir())
            && path != self.upload_dir()
            && !path
                .components()
                .any(|c| matches!(c, Component::ParentDir))
    }
}
