use crate::models::{Asset, AssetLocator};
use async_trait::async_trait;
use std::path::Path;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

pub mod memory;
pub mod s3;

pub use memory::MemoryStorageService;
pub use s3::S3StorageService;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("Local I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object store error: {0}")]
    Upstream(String),
}

impl StoreError {
    pub fn not_found(key: &str) -> Self {
        Self::NotFound {
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Streaming view of a stored object.
pub struct ObjectStream {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
}

impl std::fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStream")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Client for the blob store holding every asset.
///
/// Implementations are reentrant and shared behind an `Arc`; they never own
/// local files, only read from or write to paths handed to them.
#[async_trait]
pub trait StorageService: Send + Sync {
    fn locator(&self) -> &AssetLocator;

    /// Uploads a local file, overwriting any object already at `remote_key`.
    async fn put(&self, local_path: &Path, remote_key: &str) -> Result<Asset, StoreError>;

    /// Lists every object under `prefix`, following pagination to the end.
    async fn list(&self, prefix: &str) -> Result<Vec<Asset>, StoreError>;

    async fn open_read_stream(&self, remote_key: &str) -> Result<ObjectStream, StoreError>;

    /// Materializes an object as a local file. Fails with `NotFound` before
    /// touching `local_path` when the object is absent.
    async fn download_to(&self, remote_key: &str, local_path: &Path) -> Result<(), StoreError>;

    /// Deletes an object. A missing key is reported as `NotFound`.
    async fn delete(&self, remote_key: &str) -> Result<(), StoreError>;

    async fn exists(&self, remote_key: &str) -> Result<bool, StoreError>;
}

/// Picks a content type from the leading bytes of a file, falling back to its extension.
pub async fn sniff_content_type(path: &Path) -> Result<String, std::io::Error> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut header = [0u8; 8192];
    let mut n = 0;
    while n < header.len() {
        let read = file.read(&mut header[n..]).await?;
        if read == 0 {
            break;
        }
        n += read;
    }

    if let Some(kind) = infer::get(&header[..n]) {
        return Ok(kind.mime_type().to_string());
    }

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    Ok(content_type_for_name(name))
}

pub fn content_type_for_name(filename: &str) -> String {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => mime::IMAGE_JPEG.to_string(),
        "png" => mime::IMAGE_PNG.to_string(),
        "gif" => mime::IMAGE_GIF.to_string(),
        "webp" => "image/webp".to_string(),
        "bmp" => mime::IMAGE_BMP.to_string(),
        "tif" | "tiff" => "image/tiff".to_string(),
        "svg" => mime::IMAGE_SVG.to_string(),
        _ => mime::APPLICATION_OCTET_STREAM.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for_name() {
        assert_eq!(content_type_for_name("left.JPG"), "image/jpeg");
        assert_eq!(content_type_for_name("pano.png"), "image/png");
        assert_eq!(content_type_for_name("notes"), "application/octet-stream");
        assert_eq!(content_type_for_name("archive.tar.gz"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_sniff_prefers_magic_bytes() {
        let dir = tempfile::tempdir().unwrap();
        // PNG signature behind a misleading extension
        let path = dir.path().join("image.jpg");
        tokio::fs::write(&path, b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR")
            .await
            .unwrap();
        assert_eq!(sniff_content_type(&path).await.unwrap(), "image/png");

        let text = dir.path().join("photo.jpeg");
        tokio::fs::write(&text, b"not really a jpeg").await.unwrap();
        assert_eq!(sniff_content_type(&text).await.unwrap(), "image/jpeg");
    }
}
