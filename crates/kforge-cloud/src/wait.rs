//! Polling of long-running cloud operations

use crate::error::{CloudError, Result};
use kforge_config::PollPolicy;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
        }
    }
}

impl From<&PollPolicy> for PollConfig {
    fn from(policy: &PollPolicy) -> Self {
        Self {
            interval: policy.interval(),
            timeout: policy.timeout(),
        }
    }
}

/// Calls `probe` until it yields a value, the timeout elapses, or `cancel`
/// fires. Errors from `probe` end the wait.
pub async fn poll_until<F, Fut, T>(
    what: &str,
    config: PollConfig,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let started = tokio::time::Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if let Some(value) = probe().await? {
            return Ok(value);
        }

        if started.elapsed() >= config.timeout {
            return Err(CloudError::Timeout(what.to_string()));
        }

        debug!(what = %what, attempt = attempt, "Not ready yet, polling again");

        tokio::select! {
            _ = cancel.cancelled() => return Err(CloudError::Cancelled),
            _ = tokio::time::sleep(config.interval) => {}
        }
    }
}
