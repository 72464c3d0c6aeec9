use crate::config::TransportConfig;
use crate::dicomweb::TransportError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Fixed attempt count with a short, linearly growing backoff.
/// Only errors for which [`TransportError::is_retryable`] holds are retried.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
	attempts: u32,
	backoff: Duration,
}

impl RetryPolicy {
	pub fn new(attempts: u32, backoff: Duration) -> Self {
		Self {
			attempts: attempts.max(1),
			backoff,
		}
	}

	pub fn from_config(config: &TransportConfig) -> Self {
		Self::new(
			config.retry_attempts,
			Duration::from_millis(config.retry_backoff),
		)
	}

	/// Runs `operation` until it succeeds, fails permanently or the attempts are exhausted.
	pub async fn run<T, F, Fut>(&self, what: &str, mut operation: F) -> Result<T, TransportError>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, TransportError>>,
	{
		let mut attempt = 1;
		loop {
			match operation().await {
				Ok(value) => return Ok(value),
				Err(err) if err.is_retryable() && attempt < self.attempts => {
					warn!(attempt, max_attempts = self.attempts, "Retrying {what}: {err}");
					tokio::time::sleep(self.backoff * attempt).await;
					attempt += 1;
				}
				Err(err) => return Err(err),
			}
		}
	}
}
