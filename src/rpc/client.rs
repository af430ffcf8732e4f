use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use governor::clock::{QuantaClock, QuantaInstant};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Jitter, Quota, RateLimiter};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::error::RpcError;
use super::retry::{jitter_sample, RetryPolicy};
use super::transport::{JsonRpcRequest, JsonRpcResponse, RawResponse, Transport};
use crate::types::config::rpc::DEFAULT_THROTTLE_MS;

pub type StandardRateLimiter =
    RateLimiter<NotKeyed, InMemoryState, QuantaClock, NoOpMiddleware<QuantaInstant>>;

const MAX_ERROR_BODY: usize = 256;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_second: NonZeroU32,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
}

impl RateLimitConfig {
    pub fn new(requests_per_second: NonZeroU32) -> Self {
        Self {
            requests_per_second,
            jitter_min_ms: 5,
            jitter_max_ms: 50,
        }
    }
}

/// JSON-RPC client that throttles, rate limits and retries every request.
pub struct RetryingRpcClient {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    throttle: Duration,
    rate_limiter: Option<(Arc<StandardRateLimiter>, Jitter)>,
    next_id: AtomicU64,
    label: String,
}

impl RetryingRpcClient {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            throttle: Duration::from_millis(DEFAULT_THROTTLE_MS),
            rate_limiter: None,
            next_id: AtomicU64::new(1),
            label: "rpc".to_string(),
        }
    }

    /// Fixed pause before every attempt.
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_rate_limit(mut self, config: RateLimitConfig) -> Self {
        let limiter = RateLimiter::direct(Quota::per_second(config.requests_per_second));
        let jitter = Jitter::new(
            Duration::from_millis(config.jitter_min_ms),
            Duration::from_millis(config.jitter_max_ms),
        );
        self.rate_limiter = Some((Arc::new(limiter), jitter));
        self
    }

    /// Name used in log lines, usually the chain.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> Result<T, RpcError> {
        let value = self.execute(method, params, cancel).await?;
        serde_json::from_value(value).map_err(|e| RpcError::InvalidResponse {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }

    /// Run one JSON-RPC call to completion under the retry policy.
    pub async fn execute(
        &self,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, RpcError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            self.pause(self.throttle, cancel).await?;
            self.wait_for_rate_limit(cancel).await?;

            let error = match self.attempt(method, &params, cancel).await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(
                            "[{}] RPC '{}' succeeded after {} retries",
                            self.label,
                            method,
                            attempt
                        );
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                return Err(error);
            }

            attempt += 1;
            if attempt >= max_attempts {
                tracing::error!(
                    "[{}] RPC '{}' failed after {} attempts: {}",
                    self.label,
                    method,
                    attempt,
                    error
                );
                return Err(RpcError::Exhausted {
                    operation: method.to_string(),
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay =
                self.policy
                    .delay_for_attempt(attempt - 1, error.is_rate_limit(), jitter_sample());
            tracing::warn!(
                "[{}] RPC retry {}/{} for '{}' in {:?}: {}",
                self.label,
                attempt,
                max_attempts - 1,
                method,
                delay,
                error
            );
            self.pause(delay, cancel).await?;
        }
    }

    async fn attempt(
        &self,
        method: &str,
        params: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params.clone());
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(RpcError::Cancelled),
            response = self.transport.send(&request) => response,
        };
        let response = response.map_err(|e| RpcError::Transport(e.0))?;
        classify_response(method, response)
    }

    async fn pause(&self, delay: Duration, cancel: &CancellationToken) -> Result<(), RpcError> {
        if cancel.is_cancelled() {
            return Err(RpcError::Cancelled);
        }
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(RpcError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    async fn wait_for_rate_limit(&self, cancel: &CancellationToken) -> Result<(), RpcError> {
        if let Some((limiter, jitter)) = &self.rate_limiter {
            tokio::select! {
                _ = cancel.cancelled() => return Err(RpcError::Cancelled),
                _ = limiter.until_ready_with_jitter(*jitter) => {}
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for RetryingRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingRpcClient")
            .field("label", &self.label)
            .field("policy", &self.policy)
            .field("throttle", &self.throttle)
            .field("has_rate_limiter", &self.rate_limiter.is_some())
            .finish()
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY).collect()
}

/// Map an HTTP exchange onto a result value or a classified error.
fn classify_response(method: &str, response: RawResponse) -> Result<Value, RpcError> {
    match response.status {
        200..=299 => {}
        429 => {
            return Err(RpcError::RateLimited(format!(
                "HTTP 429: {}",
                truncate(&response.body)
            )))
        }
        status => {
            return Err(RpcError::Http {
                status,
                body: truncate(&response.body),
            })
        }
    }

    let parsed: JsonRpcResponse =
        serde_json::from_str(&response.body).map_err(|e| RpcError::InvalidResponse {
            method: method.to_string(),
            reason: e.to_string(),
        })?;

    if let Some(error) = parsed.error {
        if error.code == 429 || RpcError::is_rate_limit_message(&error.message) {
            return Err(RpcError::RateLimited(error.message));
        }
        return Err(RpcError::Application {
            code: error.code,
            message: error.message,
        });
    }

    Ok(parsed.result.unwrap_or(Value::Null))
}
