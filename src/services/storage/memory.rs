use super::{ObjectStream, StorageService, StoreError, sniff_content_type};
use crate::models::{Asset, AssetLocator};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
}

/// Object store held in process memory.
///
/// Used when `STORAGE_BACKEND=memory` and throughout the test suite. Objects
/// live until the process exits.
pub struct MemoryStorageService {
    locator: AssetLocator,
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryStorageService {
    pub fn new(locator: AssetLocator) -> Self {
        Self {
            locator,
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Raw bytes of an object, if present.
    pub fn object_bytes(&self, key: &str) -> Option<Bytes> {
        self.read_object(key).map(|o| o.data)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .read()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn read_object(&self, key: &str) -> Option<StoredObject> {
        self.objects
            .read()
            .ok()
            .and_then(|objects| objects.get(key).cloned())
    }

    fn poisoned() -> StoreError {
        StoreError::Upstream("memory store lock poisoned".to_string())
    }
}

#[async_trait]
impl StorageService for MemoryStorageService {
    fn locator(&self) -> &AssetLocator {
        &self.locator
    }

    async fn put(&self, local_path: &Path, remote_key: &str) -> Result<Asset, StoreError> {
        let data = tokio::fs::read(local_path).await?;
        let content_type = sniff_content_type(local_path).await?;

        self.objects.write().map_err(|_| Self::poisoned())?.insert(
            remote_key.to_string(),
            StoredObject {
                data: Bytes::from(data),
                content_type,
            },
        );
        Ok(self.locator.asset(remote_key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Asset>, StoreError> {
        let objects = self.objects.read().map_err(|_| Self::poisoned())?;
        Ok(objects
            .keys()
            .filter(|key| key.starts_with(prefix) && !key.ends_with('/'))
            .map(|key| self.locator.asset(key))
            .collect())
    }

    async fn open_read_stream(&self, remote_key: &str) -> Result<ObjectStream, StoreError> {
        let object = self
            .read_object(remote_key)
            .ok_or_else(|| StoreError::not_found(remote_key))?;

        Ok(ObjectStream {
            content_type: Some(object.content_type),
            content_length: Some(object.data.len() as u64),
            reader: Box::pin(std::io::Cursor::new(object.data)),
        })
    }

    async fn download_to(&self, remote_key: &str, local_path: &Path) -> Result<(), StoreError> {
        let object = self
            .read_object(remote_key)
            .ok_or_else(|| StoreError::not_found(remote_key))?;
        tokio::fs::write(local_path, &object.data).await?;
        Ok(())
    }

    async fn delete(&self, remote_key: &str) -> Result<(), StoreError> {
        self.objects
            .write()
            .map_err(|_| Self::poisoned())?
            .remove(remote_key)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(remote_key))
    }

    async fn exists(&self, remote_key: &str) -> Result<bool, StoreError> {
        Ok(self
            .objects
            .read()
            .map_err(|_| Self::poisoned())?
            .contains_key(remote_key))
    }
}
