//! Source acquisition: fetch raw bytes from a URL or an object-store key and
//! decode them into a raster.
//!
//! Every failure here is job-fatal. A job whose source cannot be fetched or
//! decoded never reaches the transform stage.

use image::{DynamicImage, ImageReader};
use reqwest::{Client, StatusCode};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use crate::services::storage::{ObjectStore, StorageError};

/// Where a source reference points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Http,
    ObjectKey,
}

impl SourceKind {
    /// References with an `http://` or `https://` scheme are fetched over the
    /// network; everything else is an object-store key.
    pub fn of(reference: &str) -> Self {
        let lower = reference.trim_start().to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            SourceKind::Http
        } else {
            SourceKind::ObjectKey
        }
    }
}

/// A decoded source image.
pub struct SourceImage {
    pub raster: DynamicImage,
    pub format: image::ImageFormat,
    pub byte_size: u64,
}

pub struct SourceAcquirer {
    http: Client,
    objects: Arc<dyn ObjectStore>,
    max_bytes: u64,
}

impl SourceAcquirer {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        fetch_timeout: Duration,
        max_bytes: u64,
    ) -> Result<Self, SourceError> {
        let http = Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| SourceError::NotReachable(format!("HTTP client setup failed: {e}")))?;
        Ok(Self {
            http,
            objects,
            max_bytes,
        })
    }

    /// Fetch and decode the image a job points at.
    pub async fn acquire(&self, reference: &str) -> Result<SourceImage, SourceError> {
        let bytes = match SourceKind::of(reference) {
            SourceKind::Http => self.fetch_http(reference.trim()).await?,
            SourceKind::ObjectKey => self.fetch_object(reference).await?,
        };
        tracing::debug!(
            source = %reference,
            bytes = bytes.len(),
            "Source fetched, decoding"
        );
        decode(bytes).await
    }

    async fn fetch_http(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::NotReachable(format!("{url}: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(SourceError::NotReachable(format!("{url}: HTTP {status}")));
        }
        if let Some(length) = response.content_length() {
            self.check_size(length)?;
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SourceError::NotReachable(format!("{url}: {e}")))?;
        self.check_size(bytes.len() as u64)?;
        Ok(bytes.to_vec())
    }

    async fn fetch_object(&self, key: &str) -> Result<Vec<u8>, SourceError> {
        let bytes = self
            .objects
            .get(key)
            .await
            .map_err(SourceError::Storage)?
            .ok_or_else(|| SourceError::NotFound(key.to_string()))?;
        self.check_size(bytes.len() as u64)?;
        Ok(bytes)
    }

    fn check_size(&self, size: u64) -> Result<(), SourceError> {
        if size > self.max_bytes {
            return Err(SourceError::TooLarge {
                size,
                max: self.max_bytes,
            });
        }
        Ok(())
    }
}

/// Decode on the blocking pool; format is sniffed from the bytes.
pub async fn decode(bytes: Vec<u8>) -> Result<SourceImage, SourceError> {
    tokio::task::spawn_blocking(move || decode_sync(bytes))
        .await
        .map_err(|e| SourceError::Decode(format!("decode task failed: {e}")))?
}

fn decode_sync(bytes: Vec<u8>) -> Result<SourceImage, SourceError> {
    let byte_size = bytes.len() as u64;
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| SourceError::Decode(format!("cannot detect image format: {e}")))?;
    let format = reader.format().ok_or(SourceError::UnsupportedFormat)?;
    let raster = reader
        .decode()
        .map_err(|e| SourceError::Decode(e.to_string()))?;
    Ok(SourceImage {
        raster,
        format,
        byte_size,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Source not reachable: {0}")]
    NotReachable(String),

    #[error("Source not found: {0}")]
    NotFound(String),

    #[error("Unsupported or unrecognized image format")]
    UnsupportedFormat,

    #[error("Failed to decode source image: {0}")]
    Decode(String),

    #[error("Source is {size} bytes, limit is {max}")]
    TooLarge { size: u64, max: u64 },

    #[error("Object store read failed: {0}")]
    Storage(#[from] StorageError),
}
