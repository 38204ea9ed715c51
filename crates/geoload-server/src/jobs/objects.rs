//! Upload inspection in object storage

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::Client;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::config::StorageConfig;

#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("Object storage request failed: {0}")]
    Request(String),
}

/// Looks up uploaded objects before they are loaded
#[async_trait]
pub trait ObjectInspector: Send + Sync {
    /// Size in bytes, or `None` when the object does not exist.
    async fn head(&self, bucket: &str, key: &str) -> Result<Option<u64>, ObjectError>;
}

#[derive(Clone)]
pub struct S3ObjectInspector {
    client: Client,
}

impl S3ObjectInspector {
    /// Static credentials when configured, the default AWS provider chain
    /// otherwise.
    pub async fn new(config: &StorageConfig) -> Self {
        let region = Region::new(config.region.clone());

        let client = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials =
                    Credentials::new(access_key, secret_key, None, None, "geoload-storage");

                let mut builder = aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
                    .region(region)
                    .force_path_style(config.path_style);
                if let Some(endpoint) = &config.endpoint {
                    builder = builder.endpoint_url(endpoint);
                }
                Client::from_conf(builder.build())
            }
            _ => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(region)
                    .load()
                    .await;
                let mut builder =
                    aws_sdk_s3::config::Builder::from(&shared).force_path_style(config.path_style);
                if let Some(endpoint) = &config.endpoint {
                    builder = builder.endpoint_url(endpoint);
                }
                Client::from_conf(builder.build())
            }
        };

        info!(region = %config.region, endpoint = ?config.endpoint, "Object inspector initialized");

        Self { client }
    }
}

#[async_trait]
impl ObjectInspector for S3ObjectInspector {
    #[instrument(skip(self))]
    async fn head(&self, bucket: &str, key: &str) -> Result<Option<u64>, ObjectError> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(response) => {
                let size = response.content_length().unwrap_or(0).max(0) as u64;
                debug!(size, "Upload found");
                Ok(Some(size))
            }
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .map(|service| service.is_not_found())
                    .unwrap_or(false);
                if missing {
                    debug!("Upload not found");
                    Ok(None)
                } else {
                    Err(ObjectError::Request(e.to_string()))
                }
            }
        }
    }
}
