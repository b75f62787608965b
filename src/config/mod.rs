use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// API bind address (e.g., "0.0.0.0:8000"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string for the job queue and status store
    pub redis_url: String,

    /// Bucket holding source uploads and processed outputs
    #[serde(default = "default_bucket")]
    pub s3_bucket: String,

    /// S3-compatible endpoint URL (MinIO, R2, AWS)
    pub s3_endpoint: String,

    #[serde(default = "default_region")]
    pub s3_region: String,

    pub s3_access_key: String,

    pub s3_secret_key: String,

    /// Prefix joined with output keys to form externally resolvable URLs.
    /// When absent, results carry the bare object key.
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Expiry applied to every status-store write
    #[serde(default = "default_status_ttl_secs")]
    pub status_ttl_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub source_fetch_timeout_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub storage_timeout_secs: u64,

    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: u64,

    #[serde(default = "default_max_output_dimension")]
    pub max_output_dimension: u32,

    /// Whole-job deadline. Unset means a job may run as long as its
    /// individually bounded calls allow.
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,

    #[serde(default = "default_bootstrap_max_attempts")]
    pub bootstrap_max_attempts: u32,

    #[serde(default = "default_bootstrap_retry_delay_ms")]
    pub bootstrap_retry_delay_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Names this worker's in-flight list in Redis. Must be unique per
    /// replica and stable across its restarts.
    #[serde(default)]
    pub worker_id: Option<String>,

    /// Prometheus scrape listener for the worker process
    #[serde(default)]
    pub worker_metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_bucket() -> String {
    "images".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_status_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_source_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_max_output_dimension() -> u32 {
    10_000
}

fn default_bootstrap_max_attempts() -> u32 {
    30
}

fn default_bootstrap_retry_delay_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn from_iter<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter(vars)
    }

    pub fn status_ttl(&self) -> Duration {
        Duration::from_secs(self.status_ttl_secs)
    }

    pub fn source_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.source_fetch_timeout_secs)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_secs)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn bootstrap_retry_delay(&self) -> Duration {
        Duration::from_millis(self.bootstrap_retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The worker's queue identity.
    ///
    /// With `WORKER_ID` set, a restarted worker reclaims its own in-flight
    /// list. Without it every process gets a fresh id, and in-flight recovery
    /// is disabled since no later process will ever own that list.
    pub fn worker_identity(&self) -> WorkerIdentity {
        match self.worker_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => WorkerIdentity {
                id: id.to_string(),
                recover_in_flight: true,
            },
            _ => WorkerIdentity {
                id: format!(
                    "worker-{}-{}",
                    std::process::id(),
                    &Uuid::new_v4().simple().to_string()[..8]
                ),
                recover_in_flight: false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub id: String,
    pub recover_in_flight: bool,
}
