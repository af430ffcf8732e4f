use std::num::NonZeroU32;
use std::time::Duration;

use serde::Deserialize;

use crate::rpc::RetryPolicy;

pub const DEFAULT_THROTTLE_MS: u64 = 200;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Retry settings as written in `config.json`; unset fields inherit.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetryPolicyConfig {
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub jitter_fraction: Option<f64>,
}

impl RetryPolicyConfig {
    pub fn apply(&self, base: &RetryPolicy) -> RetryPolicy {
        let mut policy = base.clone();
        if let Some(ms) = self.base_delay_ms {
            policy = policy.with_base_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = self.max_delay_ms {
            policy = policy.with_max_delay(Duration::from_millis(ms));
        }
        if let Some(attempts) = self.max_attempts {
            policy = policy.with_max_attempts(attempts);
        }
        if let Some(fraction) = self.jitter_fraction {
            policy = policy.with_jitter_fraction(fraction);
        }
        policy
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcConfig {
    #[serde(flatten)]
    pub retry: RetryPolicyConfig,
    pub throttle_ms: Option<u64>,
    /// Per-request HTTP timeout.
    pub timeout_ms: Option<u64>,
    pub requests_per_second: Option<NonZeroU32>,
}

impl RpcConfig {
    pub fn default_policy(&self) -> RetryPolicy {
        self.retry.apply(&RetryPolicy::default())
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms.unwrap_or(DEFAULT_THROTTLE_MS))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_chain_override_inherits_unset_fields() {
        let rpc: RpcConfig =
            serde_json::from_str(r#"{"base_delay_ms": 500, "max_attempts": 3}"#).unwrap();
        let default = rpc.default_policy();
        assert_eq!(default.base_delay, Duration::from_millis(500));
        assert_eq!(default.max_attempts, 3);
        assert_eq!(default.max_delay, Duration::from_secs(32));

        let chain: RetryPolicyConfig = serde_json::from_str(r#"{"max_attempts": 8}"#).unwrap();
        let policy = chain.apply(&default);
        assert_eq!(policy.max_attempts, 8);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(rpc.throttle(), Duration::from_millis(DEFAULT_THROTTLE_MS));
        assert_eq!(rpc.timeout(), Duration::from_secs(30));
    }
}
