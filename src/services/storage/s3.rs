use super::{ObjectStream, StorageService, StoreError, sniff_content_type};
use crate::models::{Asset, AssetLocator};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use std::path::Path;
use tokio::io::AsyncWriteExt;

fn upstream<E: std::error::Error>(e: E) -> StoreError {
    StoreError::Upstream(DisplayErrorContext(e).to_string())
}

pub struct S3StorageService {
    client: Client,
    locator: AssetLocator,
}

impl S3StorageService {
    pub fn new(client: Client, locator: AssetLocator) -> Self {
        Self { client, locator }
    }

    fn bucket(&self) -> &str {
        self.locator.bucket()
    }
}

#[async_trait]
impl StorageService for S3StorageService {
    fn locator(&self) -> &AssetLocator {
        &self.locator
    }

    async fn put(&self, local_path: &Path, remote_key: &str) -> Result<Asset, StoreError> {
        let content_type = sniff_content_type(local_path).await?;
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?;

        let res = self
            .client
            .put_object()
            .bucket(self.bucket())
            .key(remote_key)
            .content_type(&content_type)
            .body(body)
            .send()
            .await;

        if let Err(e) = res {
            tracing::error!(
                "S3 put_object failed: bucket={}, key={}, error={}",
                self.bucket(),
                remote_key,
                DisplayErrorContext(&e)
            );
            return Err(upstream(e));
        }

        Ok(self.locator.asset(remote_key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Asset>, StoreError> {
        let mut assets = Vec::new();
        let mut continuation_token = None;

        loop {
            let res = self
                .client
                .list_objects_v2()
                .bucket(self.bucket())
                .prefix(prefix)
                .set_continuation_token(continuation_token)
                .send()
                .await
                .map_err(upstream)?;

            if let Some(contents) = res.contents {
                for object in contents {
                    match object.key {
                        // Folder placeholder objects are not assets
                        Some(key) if !key.ends_with('/') => assets.push(self.locator.asset(&key)),
                        _ => {}
                    }
                }
            }

            if res.is_truncated.unwrap_or(false) {
                continuation_token = res.next_continuation_token;
            } else {
                break;
            }
        }

        Ok(assets)
    }

    async fn open_read_stream(&self, remote_key: &str) -> Result<ObjectStream, StoreError> {
        let res = self
            .client
            .get_object()
            .bucket(self.bucket())
            .key(remote_key)
            .send()
            .await;

        match res {
            Ok(output) => Ok(ObjectStream {
                content_type: output.content_type.clone(),
                content_length: output
                    .content_length
                    .and_then(|len| u64::try_from(len).ok()),
                reader: Box::pin(output.body.into_async_read()),
            }),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    Err(StoreError::not_found(remote_key))
                } else {
                    Err(upstream(service_error))
                }
            }
        }
    }

    async fn download_to(&self, remote_key: &str, local_path: &Path) -> Result<(), StoreError> {
        // A partially written file must never be mistaken for a download, so
        // absence is decided before anything is created locally.
        if !self.exists(remote_key).await? {
            return Err(StoreError::not_found(remote_key));
        }

        let mut object = self.open_read_stream(remote_key).await?;
        let mut file = tokio::fs::File::create(local_path).await?;
        let written = tokio::io::copy(&mut object.reader, &mut file).await?;
        file.flush().await?;

        tracing::debug!(
            "Downloaded s3://{}/{} to {} ({} bytes)",
            self.bucket(),
            remote_key,
            local_path.display(),
            written
        );
        Ok(())
    }

    async fn delete(&self, remote_key: &str) -> Result<(), StoreError> {
        // DeleteObject succeeds for missing keys, so check first to report NotFound.
        if !self.exists(remote_key).await? {
            return Err(StoreError::not_found(remote_key));
        }

        self.client
            .delete_object()
            .bucket(self.bucket())
            .key(remote_key)
            .send()
            .await
            .map_err(upstream)?;
        Ok(())
    }

    async fn exists(&self, remote_key: &str) -> Result<bool, StoreError> {
        let res = self
            .client
            .head_object()
            .bucket(self.bucket())
            .key(remote_key)
            .send()
            .await;

        match res {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(false)
                } else {
                    Err(upstream(service_error))
                }
            }
        }
    }
}
