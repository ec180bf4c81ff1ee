//! Bounded exponential backoff for transient cloud errors

use crate::adapter::{CloudResource, ListFilter, ResourceApi, Scope, Tags};
use crate::error::{CloudError, Result};
use async_trait::async_trait;
use kforge_config::RetryPolicy;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Retry configuration for adapter operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first call included
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No delay between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }
}

impl From<&RetryPolicy> for RetryConfig {
    fn from(policy: &RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts.max(1),
            initial_delay: policy.initial_delay(),
            max_delay: policy.max_delay(),
            backoff_multiplier: policy.backoff_multiplier,
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-transient error, or
/// runs out of attempts. Exhaustion turns the last transient error into
/// `OperationFailed`.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                if attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(CloudError::OperationFailed {
                        operation: operation_name.to_string(),
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );

                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

/// Wraps any [`ResourceApi`] with [`retry_with_backoff`]
pub struct RetryingApi<R: CloudResource> {
    inner: Arc<dyn ResourceApi<R>>,
    config: RetryConfig,
}

impl<R: CloudResource> RetryingApi<R> {
    pub fn new(inner: Arc<dyn ResourceApi<R>>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn wrap(inner: Arc<dyn ResourceApi<R>>, config: RetryConfig) -> Arc<dyn ResourceApi<R>> {
        Arc::new(Self::new(inner, config))
    }

    fn operation(op: &str) -> String {
        format!("{}.{}", R::KIND, op)
    }
}

#[async_trait]
impl<R: CloudResource> ResourceApi<R> for RetryingApi<R> {
    async fn list(&self, scope: &Scope, filter: &ListFilter) -> Result<Vec<R>> {
        retry_with_backoff(&self.config, &Self::operation("list"), move || {
            self.inner.list(scope, filter)
        })
        .await
    }

    async fn create_or_update(&self, scope: &Scope, desired: R) -> Result<R> {
        let operation = format!("{} {}", Self::operation("create_or_update"), desired.name());
        retry_with_backoff(&self.config, &operation, move || {
            self.inner.create_or_update(scope, desired.clone())
        })
        .await
    }

    async fn delete(&self, scope: &Scope, id: &str) -> Result<()> {
        let operation = format!("{} {}", Self::operation("delete"), id);
        retry_with_backoff(&self.config, &operation, move || self.inner.delete(scope, id)).await
    }

    fn supports_tags(&self) -> bool {
        self.inner.supports_tags()
    }

    async fn get_tags(&self, scope: &Scope, id: &str) -> Result<Tags> {
        retry_with_backoff(&self.config, &Self::operation("get_tags"), move || {
            self.inner.get_tags(scope, id)
        })
        .await
    }

    async fn add_tags(&self, scope: &Scope, id: &str, tags: &Tags) -> Result<()> {
        retry_with_backoff(&self.config, &Self::operation("add_tags"), move || {
            self.inner.add_tags(scope, id, tags)
        })
        .await
    }

    async fn remove_tags(&self, scope: &Scope, id: &str, keys: &[String]) -> Result<()> {
        retry_with_backoff(&self.config, &Self::operation("remove_tags"), move || {
            self.inner.remove_tags(scope, id, keys)
        })
        .await
    }
}
