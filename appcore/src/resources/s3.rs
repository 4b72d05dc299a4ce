use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::Client as S3Client;

use crate::config::StorageConfig;
use crate::error::{CloseError, ConfigError, ConstructionError, ProbeError};
use crate::resources::{Close, Probe};

/// S3-compatible object store (minio or AWS).
#[derive(Clone, Debug)]
pub struct S3Resource {
    client: S3Client,
}

impl S3Resource {
    /// Builds a client against `config.endpoint`. Nothing is sent over the
    /// wire here; the SDK connects on first use.
    pub fn connect(endpoint: &str, config: &StorageConfig) -> Result<Self, ConstructionError> {
        let access_key = config
            .access_key
            .as_deref()
            .ok_or(ConfigError::MissingStorageCredential("STORAGE_ACCESS_KEY"))?;
        let secret_key = config
            .secret_key
            .as_deref()
            .ok_or(ConfigError::MissingStorageCredential("STORAGE_SECRET_KEY"))?;

        let credentials = Credentials::new(access_key, secret_key, None, None, "appcore-static");
        let sdk_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(endpoint)
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: S3Client::from_conf(sdk_config),
        })
    }

    pub fn client(&self) -> &S3Client {
        &self.client
    }
}

#[async_trait]
impl Probe for S3Resource {
    async fn probe(&self) -> Result<(), ProbeError> {
        self.client
            .list_buckets()
            .send()
            .await
            .map(|_| ())
            .map_err(|e| ProbeError::Unreachable(aws_sdk_s3::Error::from(e).to_string()))
    }
}

#[async_trait]
impl Close for S3Resource {
    async fn close(&self) -> Result<(), CloseError> {
        Ok(())
    }
}
