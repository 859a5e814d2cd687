//! 调度器配置：显式枚举所有可识别选项及其默认值，构造时一次性校验。
//!
//! Dispatcher configuration.
//!
//! Every recognized option is a typed field with a default. Configuration is
//! validated once when a [`Dispatcher`](crate::Dispatcher) or
//! [`CacheEngine`](crate::cache::CacheEngine) is constructed; out-of-range
//! values fail fast with [`Error::Configuration`].
//!
//! Serde field names follow the option table (`baseURL`, `timeoutMs`,
//! `rateLimit.windowMs`, `cache.maxSizeBytes`, ...), so the same file can be
//! shared with other tooling:
//!
//! ```yaml
//! baseURL: https://api.example.com
//! apiKey: sk-test
//! timeoutMs: 30000
//! maxRetries: 3
//! rateLimit:
//!   requests: 100
//!   windowMs: 60000
//! cache:
//!   maxSizeBytes: 104857600
//!   persistent: true
//!   directory: .voicegate-cache
//! ```

use crate::cache::CacheConfig;
use crate::resilience::rate_limiter::RateLimitConfig;
use crate::resilience::retry::RetryConfig;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub(crate) const MAX_TIMEOUT_MS: u64 = 600_000;

/// Complete configuration for a [`Dispatcher`](crate::Dispatcher).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DispatcherConfig {
    /// Target service root, e.g. `https://api.example.com`.
    #[serde(rename = "baseURL", alias = "baseUrl")]
    pub base_url: String,
    /// Static credential attached to every request.
    pub api_key: Option<String>,
    /// Header carrying `api_key`.
    pub api_key_header: String,
    /// Per-attempt network timeout.
    pub timeout_ms: u64,
    #[serde(flatten)]
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
    /// Connection pool size (bound on concurrent in-flight attempts).
    pub max_concurrent: usize,
    pub cache: CacheConfig,
    pub user_agent: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            api_key_header: "xi-api-key".to_string(),
            timeout_ms: 30_000,
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            max_concurrent: 5,
            cache: CacheConfig::default(),
            user_agent: concat!("voicegate/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl DispatcherConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_api_key_header(mut self, header: impl Into<String>) -> Self {
        self.api_key_header = header.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load configuration from a YAML (`.yaml`/`.yml`) or JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("Failed to read config file: {}", e),
                ErrorContext::new()
                    .with_details(path.display().to_string())
                    .with_source("config_loader"),
            )
        })?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let parsed = if is_yaml {
            serde_yaml::from_str(&raw).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(&raw).map_err(|e| e.to_string())
        };
        parsed.map_err(|e| {
            Error::configuration_with_context(
                format!("Failed to parse config file: {}", e),
                ErrorContext::new()
                    .with_details(path.display().to_string())
                    .with_source("config_loader"),
            )
        })
    }

    /// Overlay `VOICEGATE_*` environment variables. Unparseable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
        }

        if let Ok(url) = std::env::var("VOICEGATE_BASE_URL") {
            self.base_url = url;
        }
        if let Ok(key) = std::env::var("VOICEGATE_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(ms) = env_parse::<u64>("VOICEGATE_TIMEOUT_MS") {
            self.timeout_ms = ms;
        }
        if let Some(n) = env_parse::<u32>("VOICEGATE_MAX_RETRIES") {
            self.retry.max_retries = n;
        }
        if let Some(n) = env_parse::<usize>("VOICEGATE_MAX_CONCURRENT") {
            self.max_concurrent = n;
        }
        if let Ok(dir) = std::env::var("VOICEGATE_CACHE_DIR") {
            self.cache.directory = dir.into();
        }
        self
    }

    /// Reject out-of-range values with a [`Error::Configuration`] naming the field.
    pub fn validate(&self) -> Result<()> {
        let base = self.base_url.trim();
        if base.is_empty() {
            return Err(invalid("baseURL", "base URL must be set"));
        }
        let parsed = url::Url::parse(base)
            .map_err(|e| invalid("baseURL", format!("invalid base URL: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid("baseURL", "base URL must use http or https"));
        }
        if self.api_key_header.trim().is_empty() {
            return Err(invalid("apiKeyHeader", "credential header name must not be empty"));
        }
        if self.timeout_ms == 0 || self.timeout_ms > MAX_TIMEOUT_MS {
            return Err(invalid(
                "timeoutMs",
                format!("timeout must be within 1..={}ms", MAX_TIMEOUT_MS),
            ));
        }
        if self.max_concurrent == 0 {
            return Err(invalid("maxConcurrent", "pool size must be at least 1"));
        }
        self.retry.validate()?;
        self.rate_limit.validate()?;
        self.cache.validate()?;
        Ok(())
    }
}

pub(crate) fn invalid(field: &str, msg: impl Into<String>) -> Error {
    Error::configuration_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("config_validator"),
    )
}
