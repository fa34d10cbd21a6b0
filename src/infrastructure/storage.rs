use crate::config::{GatewayConfig, StorageBackend};
use crate::models::AssetLocator;
use crate::services::storage::{MemoryStorageService, S3StorageService, StorageService};
use anyhow::Context;
use aws_sdk_s3::config::Region;
use std::env;
use std::sync::Arc;
use tracing::info;

pub async fn setup_storage(config: &GatewayConfig) -> anyhow::Result<Arc<dyn StorageService>> {
    let locator = AssetLocator::new(&config.bucket, &config.public_base_url);

    match config.storage_backend {
        StorageBackend::Memory => {
            info!("🧪 In-memory storage (Bucket: {})", config.bucket);
            Ok(Arc::new(MemoryStorageService::new(locator)))
        }
        StorageBackend::S3 => {
            let endpoint_url = env::var("MINIO_ENDPOINT").context("MINIO_ENDPOINT must be set")?;
            let access_key =
                env::var("MINIO_ACCESS_KEY").context("MINIO_ACCESS_KEY must be set")?;
            let secret_key =
                env::var("MINIO_SECRET_KEY").context("MINIO_SECRET_KEY must be set")?;
            let region = env::var("MINIO_REGION").unwrap_or_else(|_| "us-east-1".to_string());

            info!("☁️  S3 Storage: {} (Bucket: {})", endpoint_url, config.bucket);

            let aws_config = aws_config::from_env()
                .endpoint_url(&endpoint_url)
                .region(Region::new(region))
                .credentials_provider(aws_sdk_s3::config::Credentials::new(
                    access_key, secret_key, None, None, "static",
                ))
                .load()
                .await;

            let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(true)
                .build();

            let s3_client = aws_sdk_s3::Client::from_conf(s3_config);

            // The bucket is provisioned out of band; only check it is reachable.
            s3_client
                .head_bucket()
                .bucket(&config.bucket)
                .send()
                .await
                .with_context(|| format!("bucket '{}' is not reachable", config.bucket))?;

            Ok(Arc::new(S3StorageService::new(s3_client, locator)))
        }
    }
}
