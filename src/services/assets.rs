use crate::models::{Asset, AssetLocator};
use crate::services::staging::{StagePurpose, StagedFile, StagingArea, StagingError};
use crate::services::storage::{ObjectStream, StorageService, StoreError, content_type_for_name};
use crate::utils::validation::{ValidationError, sanitize_filename};
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("{0}")]
    InvalidName(#[from] ValidationError),

    #[error("File exceeds the {limit} byte limit")]
    TooLarge { limit: usize },

    #[error("Failed to receive upload: {0}")]
    Receive(#[source] std::io::Error),

    #[error("Local file error at {}: {source}", .path.display())]
    LocalIo {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A downloaded object served from its staged local copy. The copy is
/// removed when the stream is dropped, i.e. once the response body is done.
pub struct StagedDownload {
    pub file_name: String,
    pub content_type: String,
    pub content_length: u64,
    pub body: StagedBody,
}

impl std::fmt::Debug for StagedDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedDownload")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

pub struct StagedBody {
    inner: ReaderStream<tokio::fs::File>,
    _staged: StagedFile,
}

impl Stream for StagedBody {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Upload, list, read, download and delete flows over the uploads namespace.
pub struct AssetService {
    storage: Arc<dyn StorageService>,
    staging: Arc<StagingArea>,
    uploads_prefix: String,
    max_file_size: usize,
}

impl AssetService {
    pub fn new(
        storage: Arc<dyn StorageService>,
        staging: Arc<StagingArea>,
        uploads_prefix: impl Into<String>,
        max_file_size: usize,
    ) -> Self {
        Self {
            storage,
            staging,
            uploads_prefix: uploads_prefix.into(),
            max_file_size,
        }
    }

    pub fn locator(&self) -> &AssetLocator {
        self.storage.locator()
    }

    fn key_for(&self, name: &str) -> Result<String, AssetError> {
        let name = sanitize_filename(name)?;
        Ok(AssetLocator::remote_key(&self.uploads_prefix, &name))
    }

    /// Key for a read. A name that could never have been stored is reported
    /// as missing rather than malformed.
    fn existing_key_for(&self, name: &str) -> Result<(String, String), AssetError> {
        let file_name = sanitize_filename(name).map_err(|_| {
            StoreError::not_found(&AssetLocator::remote_key(&self.uploads_prefix, name))
        })?;
        let key = AssetLocator::remote_key(&self.uploads_prefix, &file_name);
        Ok((file_name, key))
    }

    /// Buffers an upload into staging, then puts it under the uploads
    /// namespace. The staged copy is gone when this returns, on every path.
    pub async fn upload<R>(&self, original_name: &str, mut reader: R) -> Result<Asset, AssetError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let name = sanitize_filename(original_name)?;
        let owner = format!("upload-{}", Uuid::new_v4());
        let staged = self
            .staging
            .stage(StagePurpose::IncomingUpload, &owner, &name)
            .await?;

        let result = self.receive_and_put(&staged, &name, &mut reader).await;
        staged.release().await;

        if let Ok(asset) = &result {
            tracing::info!("📤 Uploaded {} -> {}", original_name, asset.remote_key);
        }
        result
    }

    async fn receive_and_put<R>(
        &self,
        staged: &StagedFile,
        name: &str,
        reader: &mut R,
    ) -> Result<Asset, AssetError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let path = staged.local_path();
        let write_err = |source| AssetError::LocalIo {
            path: path.to_path_buf(),
            source,
        };

        let mut file = tokio::fs::File::create(path).await.map_err(write_err)?;
        let mut buffer = [0u8; 8192];
        let mut total = 0usize;
        loop {
            let n = reader.read(&mut buffer).await.map_err(AssetError::Receive)?;
            if n == 0 {
                break;
            }
            total += n;
            if total > self.max_file_size {
                return Err(AssetError::TooLarge {
                    limit: self.max_file_size,
                });
            }
            file.write_all(&buffer[..n]).await.map_err(write_err)?;
        }
        file.flush().await.map_err(write_err)?;
        drop(file);

        let key = AssetLocator::remote_key(&self.uploads_prefix, name);
        Ok(self.storage.put(path, &key).await?)
    }

    pub async fn list(&self) -> Result<Vec<Asset>, AssetError> {
        Ok(self.storage.list(&self.uploads_prefix).await?)
    }

    pub async fn open(&self, name: &str) -> Result<ObjectStream, AssetError> {
        let (_, key) = self.existing_key_for(name)?;
        Ok(self.storage.open_read_stream(&key).await?)
    }

    /// Materializes the object in staging and returns a body streaming it.
    pub async fn download(&self, name: &str) -> Result<StagedDownload, AssetError> {
        let (file_name, key) = self.existing_key_for(name)?;
        let owner = format!("download-{}", Uuid::new_v4());
        let staged = self
            .staging
            .stage(StagePurpose::OutgoingDownload, &owner, &file_name)
            .await?;

        // On error the staged copy is dropped, which removes it
        self.storage.download_to(&key, staged.local_path()).await?;

        let file = tokio::fs::File::open(staged.local_path())
            .await
            .map_err(|source| AssetError::LocalIo {
                path: staged.local_path().to_path_buf(),
                source,
            })?;
        let content_length = file.metadata().await.map(|m| m.len()).unwrap_or(0);

        tracing::info!("📥 Serving {} ({} bytes) from staging", key, content_length);
        Ok(StagedDownload {
            content_type: content_type_for_name(&file_name),
            file_name,
            content_length,
            body: StagedBody {
                inner: ReaderStream::new(file),
                _staged: staged,
            },
        })
    }

    pub async fn delete(&self, name: &str) -> Result<(), AssetError> {
        let key = self.key_for(name)?;
        self.storage.delete(&key).await?;
        tracing::info!("🗑️  Deleted {}", key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::MemoryStorageService;
    use futures::StreamExt;

    fn service(limit: usize) -> (tempfile::TempDir, Arc<MemoryStorageService>, Arc<StagingArea>, AssetService) {
        let root = tempfile::tempdir().unwrap();
        let staging = Arc::new(StagingArea::new(root.path()).unwrap());
        let store = Arc::new(MemoryStorageService::new(AssetLocator::new(
            "cg-project-bucket",
            "https://storage.googleapis.com",
        )));
        let assets = AssetService::new(store.clone(), staging.clone(), "uploads/", limit);
        (root, store, staging, assets)
    }

    #[tokio::test]
    async fn test_upload_stores_and_cleans_staging() {
        let (_root, store, staging, assets) = service(1024);
        let asset = assets.upload("left.jpg", &b"left-bytes"[..]).await.unwrap();

        assert_eq!(asset.remote_key, "uploads/left.jpg");
        assert_eq!(
            asset.public_url,
            "https://storage.googleapis.com/cg-project-bucket/uploads/left.jpg"
        );
        assert_eq!(store.object_bytes("uploads/left.jpg").unwrap(), "left-bytes");
        assert_eq!(staging.live_entries().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upload_over_limit_stores_nothing() {
        let (_root, store, staging, assets) = service(4);
        let err = assets.upload("big.jpg", &b"too many bytes"[..]).await.unwrap_err();
        assert!(matches!(err, AssetError::TooLarge { limit: 4 }));
        assert!(store.keys().is_empty());
        assert_eq!(staging.live_entries().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upload_rejects_hidden_name() {
        let (_root, store, _staging, assets) = service(1024);
        let err = assets.upload(".htaccess", &b"x"[..]).await.unwrap_err();
        assert!(matches!(err, AssetError::InvalidName(_)));
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_download_removes_copy_after_body_dropped() {
        let (_root, _store, staging, assets) = service(1024);
        assets.upload("right.jpg", &b"right-bytes"[..]).await.unwrap();

        let download = assets.download("right.jpg").await.unwrap();
        assert_eq!(download.content_length, 11);
        assert_eq!(download.content_type, "image/jpeg");
        assert_eq!(staging.live_entries().unwrap(), 1);

        let chunks: Vec<_> = download.body.collect().await;
        let bytes: Vec<u8> = chunks
            .into_iter()
            .flat_map(|c| c.unwrap().to_vec())
            .collect();
        assert_eq!(bytes, b"right-bytes");
        assert_eq!(staging.live_entries().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_download_missing_leaves_no_staging() {
        let (_root, _store, staging, assets) = service(1024);
        let err = assets.download("ghost.jpg").await.unwrap_err();
        assert!(matches!(err, AssetError::Store(StoreError::NotFound { .. })));
        assert_eq!(staging.live_entries().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reads_of_unstorable_names_are_not_found() {
        let (_root, _store, staging, assets) = service(1024);
        let err = assets.open(".foo").await.unwrap_err();
        assert!(matches!(err, AssetError::Store(StoreError::NotFound { .. })));
        let err = assets.download(".foo").await.unwrap_err();
        assert!(matches!(err, AssetError::Store(StoreError::NotFound { .. })));
        assert_eq!(staging.live_entries().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let (_root, _store, _staging, assets) = service(1024);
        let err = assets.delete("ghost.jpg").await.unwrap_err();
        assert!(matches!(err, AssetError::Store(StoreError::NotFound { .. })));
    }
}
