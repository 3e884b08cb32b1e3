//! Configuration types for adflow.
//!
//! `EngineConfig` mirrors `config.toml` in the data directory. Every section
//! and field is optional; missing values fall back to the defaults below.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub engine: ExecutionConfig,
    pub platform: PlatformConfig,
}

/// Sliding-window ceiling on outbound platform calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_calls: usize,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: 200,
            window_secs: 3600,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Backoff and per-class retry budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_secs: u64,
    /// Hard ceiling on attempts for any error class.
    pub max_attempts: u32,
    /// Retries granted to transient failures.
    pub transient_retries: u32,
    /// Retries granted to auth failures (each after a credential refresh).
    pub auth_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_secs: 30,
            max_attempts: 5,
            transient_retries: 3,
            auth_retries: 1,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

/// Worker pool, timeouts and retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_concurrency: usize,
    pub task_timeout_secs: u64,
    pub workflow_timeout_secs: u64,
    /// How long finished checkpoints are kept.
    pub retention_hours: u64,
    pub idempotency_ttl_hours: u64,
    pub asset_cache_ttl_hours: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            task_timeout_secs: 300,
            workflow_timeout_secs: 1800,
            retention_hours: 24,
            idempotency_ttl_hours: 24,
            asset_cache_ttl_hours: 24,
        }
    }
}

/// Ad platform endpoint settings. The access token is never read from the
/// config file; it comes from the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub base_url: String,
    pub api_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ad_account_id: Option<String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: "https://graph.facebook.com/v21.0".to_string(),
            api_timeout_secs: 30,
            ad_account_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.rate_limit.max_calls, 200);
        assert_eq!(config.rate_limit.window(), Duration::from_secs(3600));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.transient_retries, 3);
        assert_eq!(config.retry.max_delay(), Duration::from_secs(30));
        assert_eq!(config.engine.max_concurrency, 4);
        assert_eq!(config.engine.task_timeout_secs, 300);
        assert_eq!(config.platform.api_timeout_secs, 30);
    }

    #[test]
    fn test_engine_config_empty_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_engine_config_partial_section() {
        let toml_str = r#"
[rate_limit]
max_calls = 50

[engine]
max_concurrency = 8
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.rate_limit.max_calls, 50);
        assert_eq!(config.rate_limit.window_secs, 3600);
        assert_eq!(config.engine.max_concurrency, 8);
        assert_eq!(config.engine.retention_hours, 24);
        assert_eq!(config.retry, RetryConfig::default());
    }
}
