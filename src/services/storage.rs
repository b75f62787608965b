use async_trait::async_trait;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Object store holding source uploads and processed outputs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object, replacing any existing one under the same key.
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError>;

    /// Read an object. `Ok(None)` means the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    async fn health_check(&self) -> Result<(), StorageError>;
}

/// S3-compatible client (MinIO, R2, AWS). Every call is deadline-bounded.
pub struct S3Store {
    bucket: Box<Bucket>,
    request_timeout: Duration,
}

impl S3Store {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        request_timeout: Duration,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self {
            bucket,
            request_timeout,
        })
    }

    async fn bounded<T, F>(&self, key: &str, call: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, S3Error>>,
    {
        match timeout(self.request_timeout, call).await {
            Ok(result) => result.map_err(StorageError::S3),
            Err(_) => Err(StorageError::Timeout {
                key: key.to_string(),
                timeout_ms: self.request_timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        let response = self
            .bounded(
                key,
                self.bucket.put_object_with_content_type(key, data, content_type),
            )
            .await?;
        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(StorageError::Status {
                key: key.to_string(),
                status,
            });
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let response = match self.bounded(key, self.bucket.get_object(key)).await {
            Ok(response) => response,
            Err(StorageError::S3(S3Error::HttpFailWithBody(404, _))) => return Ok(None),
            Err(e) => return Err(e),
        };
        match response.status_code() {
            200..=299 => Ok(Some(response.bytes().to_vec())),
            404 => Ok(None),
            status => Err(StorageError::Status {
                key: key.to_string(),
                status,
            }),
        }
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        let exists = self.bounded("", self.bucket.exists()).await?;
        if !exists {
            return Err(StorageError::Config(format!(
                "bucket {} does not exist",
                self.bucket.name()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] S3Error),

    #[error("Object store returned HTTP {status} for {key}")]
    Status { key: String, status: u16 },

    #[error("Object store call for {key} timed out after {timeout_ms}ms")]
    Timeout { key: String, timeout_ms: u64 },

    #[error("Storage configuration error: {0}")]
    Config(String),
}
