use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Characters escaped inside a single URL path segment
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// One object in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Asset {
    /// Logical file name, unique within its namespace
    pub name: String,
    pub remote_key: String,
    pub public_url: String,
}

/// Derives remote keys and public URLs from store configuration.
#[derive(Debug, Clone)]
pub struct AssetLocator {
    bucket: String,
    public_base_url: String,
}

impl AssetLocator {
    pub fn new(bucket: impl Into<String>, public_base_url: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn remote_key(prefix: &str, name: &str) -> String {
        format!("{}{}", prefix, name)
    }

    pub fn public_url(&self, remote_key: &str) -> String {
        let encoded = remote_key
            .split('/')
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}/{}", self.public_base_url, self.bucket, encoded)
    }

    /// Builds the asset for an existing key; the name is its last path segment.
    pub fn asset(&self, remote_key: &str) -> Asset {
        let name = remote_key
            .rsplit('/')
            .next()
            .unwrap_or(remote_key)
            .to_string();
        Asset {
            name,
            remote_key: remote_key.to_string(),
            public_url: self.public_url(remote_key),
        }
    }
}
