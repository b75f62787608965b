use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Fixed-delay readiness polling for startup dependencies.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            delay: Duration::from_secs(1),
        }
    }
}

/// Poll `probe` until it succeeds or the attempts run out.
pub async fn connect_with_retry<T, E, F, Fut>(
    service: &str,
    policy: RetryPolicy,
    mut probe: F,
) -> Result<T, BootstrapError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match probe().await {
            Ok(value) => {
                tracing::info!(service, attempt, "Connected");
                return Ok(value);
            }
            Err(e) => {
                last_error = e.to_string();
                tracing::warn!(
                    service,
                    attempt,
                    max_attempts,
                    error = %last_error,
                    "Waiting for service"
                );
            }
        }
        if attempt < max_attempts {
            sleep(policy.delay).await;
        }
    }

    Err(BootstrapError::Exhausted {
        service: service.to_string(),
        attempts: max_attempts,
        last_error,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("{service} not ready after {attempts} attempts: {last_error}")]
    Exhausted {
        service: String,
        attempts: u32,
        last_error: String,
    },
}
