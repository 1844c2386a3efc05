//! Retry with exponential backoff, and polling for provisioning to finish.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Provider, ProviderError, ProvisioningState};
use crate::resource::ResourceKind;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
  /// Attempts per provider call, including the first.
  pub max_attempts: u32,
  pub base_delay_ms: u64,
  pub max_delay_ms: u64,
  pub backoff_factor: f64,
  /// Interval between provisioning state polls.
  pub poll_interval_ms: u64,
  /// How long a resource may stay `Provisioning`.
  pub operation_timeout_secs: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      base_delay_ms: 500,
      max_delay_ms: 30_000,
      backoff_factor: 2.0,
      poll_interval_ms: 1_000,
      operation_timeout_secs: 30 * 60,
    }
  }
}

impl RetryConfig {
  /// Calculate the delay before retrying after `attempt` failures (0-indexed).
  pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
    let delay = self.base_delay_ms as f64 * self.backoff_factor.powi(attempt as i32);
    let capped = delay.min(self.max_delay_ms as f64).max(0.0);
    Duration::from_millis(capped as u64)
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms)
  }

  pub fn operation_timeout(&self) -> Duration {
    Duration::from_secs(self.operation_timeout_secs)
  }

  /// A config that never retries or waits, for tests.
  pub fn immediate() -> Self {
    Self {
      max_attempts: 1,
      base_delay_ms: 0,
      max_delay_ms: 0,
      backoff_factor: 1.0,
      poll_interval_ms: 0,
      operation_timeout_secs: 5,
    }
  }
}

/// Run `call`, retrying transient failures with exponential backoff.
///
/// Non-transient errors are returned as-is. Once `max_attempts` is reached
/// the last transient error escalates to [`ProviderError::RetriesExhausted`].
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: &str, mut call: F) -> Result<T, ProviderError>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, ProviderError>>,
{
  let max_attempts = config.max_attempts.max(1);
  let mut attempt = 0;

  loop {
    match call().await {
      Ok(value) => return Ok(value),
      Err(e) if !e.is_transient() => return Err(e),
      Err(e) => {
        attempt += 1;
        if attempt >= max_attempts {
          return Err(ProviderError::RetriesExhausted {
            operation: operation.to_string(),
            attempts: attempt,
            last: e.to_string(),
          });
        }

        let delay = config.delay_for_attempt(attempt - 1);
        warn!(
          operation,
          attempt,
          max_attempts,
          delay_ms = delay.as_millis() as u64,
          error = %e,
          "transient provider failure, retrying"
        );
        tokio::time::sleep(delay).await;
      }
    }
  }
}

/// Poll `status` until a resource last reported as `state` reaches a
/// terminal state.
///
/// A resource still provisioning after [`RetryConfig::operation_timeout`]
/// fails with [`ProviderError::Timeout`].
pub async fn wait_until_ready(
  provider: &dyn Provider,
  kind: ResourceKind,
  remote_id: &str,
  mut state: ProvisioningState,
  config: &RetryConfig,
) -> Result<(), ProviderError> {
  let started = Instant::now();
  let operation = format!("status of {kind} {remote_id}");

  while !state.is_terminal() {
    if started.elapsed() >= config.operation_timeout() {
      return Err(ProviderError::Timeout(format!("{kind} {remote_id}")));
    }
    debug!(%kind, remote_id, "still provisioning");
    tokio::time::sleep(config.poll_interval()).await;
    state = with_retry(config, &operation, || provider.status(kind, remote_id)).await?;
  }

  match state {
    ProvisioningState::Failed => Err(ProviderError::ProvisioningFailed(format!("{kind} {remote_id}"))),
    _ => Ok(()),
  }
}
