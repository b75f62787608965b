use std::sync::Arc;

use crate::services::storage::{ObjectStore, StorageError};

/// Writes encoded outputs to the object store.
pub struct ResultSink {
    objects: Arc<dyn ObjectStore>,
    public_base_url: Option<String>,
}

impl ResultSink {
    pub fn new(objects: Arc<dyn ObjectStore>, public_base_url: Option<String>) -> Self {
        let public_base_url = public_base_url
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());
        Self {
            objects,
            public_base_url,
        }
    }

    /// Upload `data` under `key` and return where readers can find it.
    pub async fn store(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError> {
        self.objects.put(key, data, content_type).await?;
        tracing::debug!(key = %key, bytes = data.len(), content_type, "Output uploaded");
        Ok(self.location_for(key))
    }

    /// The bare key, or `<public_base_url>/<key>` when a base URL is set.
    pub fn location_for(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{}", base, key.trim_start_matches('/')),
            None => key.to_string(),
        }
    }
}
