//! Configuration for the promptly invocation core.
//!
//! Maps directly to `promptly.toml`. Every field has a default, so an empty
//! file (or no file at all) yields a working configuration. Numeric retry and
//! cache settings can be overridden through `PROMPTLY_*` environment
//! variables; the merged result is checked once with [`PromptlyConfig::validate`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PromptlyError, Result};
use crate::types::Provider;

/// Environment variable names recognised by [`PromptlyConfig::apply_env_overrides`].
pub mod env {
    /// Overrides `retry.max_retries`.
    pub const MAX_RETRIES: &str = "PROMPTLY_MAX_RETRIES";
    /// Overrides `retry.base_delay_ms`.
    pub const BASE_DELAY_MS: &str = "PROMPTLY_BASE_DELAY_MS";
    /// Overrides `retry.max_delay_ms`.
    pub const MAX_DELAY_MS: &str = "PROMPTLY_MAX_DELAY_MS";
    /// Overrides `retry.total_timeout_ms`.
    pub const TOTAL_TIMEOUT_MS: &str = "PROMPTLY_TOTAL_TIMEOUT_MS";
    /// Overrides `cache.capacity`.
    pub const CACHE_CAPACITY: &str = "PROMPTLY_CACHE_CAPACITY";
    /// Overrides `cache.ttl_secs`.
    pub const CACHE_TTL_SECS: &str = "PROMPTLY_CACHE_TTL_SECS";
}

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptlyConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Retry engine defaults.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Result cache sizing.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Backend selection and per-call limits.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Telemetry & observability.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl PromptlyConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `PromptlyError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| PromptlyError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load from an optional file, apply process environment overrides and
    /// validate. This is the startup path.
    ///
    /// # Errors
    /// Returns an error if the file is unreadable, an override does not
    /// parse, or the merged settings are inconsistent.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        tracing::info!(
            max_retries = config.retry.max_retries,
            total_timeout_ms = config.retry.total_timeout_ms,
            cache_capacity = config.cache.capacity,
            provider = %config.llm.provider,
            "promptly configuration loaded"
        );
        Ok(config)
    }

    /// Apply `PROMPTLY_*` overrides read through `lookup`.
    ///
    /// # Errors
    /// Returns `PromptlyError::Config` if a present variable is not a
    /// non-negative integer.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_env(&lookup, env::MAX_RETRIES)? {
            self.retry.max_retries = u32::try_from(v)
                .map_err(|_| PromptlyError::Config(format!("{} out of range", env::MAX_RETRIES)))?;
        }
        if let Some(v) = parse_env(&lookup, env::BASE_DELAY_MS)? {
            self.retry.base_delay_ms = v;
        }
        if let Some(v) = parse_env(&lookup, env::MAX_DELAY_MS)? {
            self.retry.max_delay_ms = v;
        }
        if let Some(v) = parse_env(&lookup, env::TOTAL_TIMEOUT_MS)? {
            self.retry.total_timeout_ms = v;
        }
        if let Some(v) = parse_env(&lookup, env::CACHE_CAPACITY)? {
            self.cache.capacity = usize::try_from(v)
                .map_err(|_| PromptlyError::Config(format!("{} out of range", env::CACHE_CAPACITY)))?;
        }
        if let Some(v) = parse_env(&lookup, env::CACHE_TTL_SECS)? {
            self.cache.ttl_secs = v;
        }
        Ok(())
    }

    /// Check cross-field invariants.
    ///
    /// # Errors
    /// Returns `PromptlyError::Config` naming the first violated rule.
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        self.cache.validate()?;
        self.llm.validate()
    }
}

fn parse_env<F>(lookup: &F, key: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| PromptlyError::Config(format!("{key}={raw:?}: {e}"))),
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines instead of human-readable text.
    #[serde(default)]
    pub log_json: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Retry engine settings.
///
/// Invariant: `base_delay_ms <= max_delay_ms <= total_timeout_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Retries after the first attempt (total attempts = `max_retries + 1`).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff for the first retry, doubled on each subsequent one.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on a single backoff sleep.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Wall-clock budget across all attempts of one request.
    #[serde(default = "default_total_timeout_ms")]
    pub total_timeout_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            total_timeout_ms: default_total_timeout_ms(),
        }
    }
}

impl RetrySettings {
    /// Build settings and check the ordering invariant.
    ///
    /// # Errors
    /// Returns `PromptlyError::Config` if the delay bounds are not monotonic.
    pub fn new(
        max_retries: u32,
        base_delay_ms: u64,
        max_delay_ms: u64,
        total_timeout_ms: u64,
    ) -> Result<Self> {
        let settings = Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            total_timeout_ms,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check `base_delay_ms <= max_delay_ms <= total_timeout_ms`.
    ///
    /// # Errors
    /// Returns `PromptlyError::Config` describing the violated bound.
    pub fn validate(&self) -> Result<()> {
        if self.base_delay_ms > self.max_delay_ms {
            return Err(PromptlyError::Config(format!(
                "retry.base_delay_ms ({}) must not exceed retry.max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if self.max_delay_ms > self.total_timeout_ms {
            return Err(PromptlyError::Config(format!(
                "retry.max_delay_ms ({}) must not exceed retry.total_timeout_ms ({})",
                self.max_delay_ms, self.total_timeout_ms
            )));
        }
        Ok(())
    }

    /// Total budget as a [`Duration`].
    #[must_use]
    pub fn total_timeout(&self) -> Duration {
        Duration::from_millis(self.total_timeout_ms)
    }

    /// Maximum number of attempts, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Result cache configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached refinements.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    /// Entry lifetime in seconds, regardless of access.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl CacheConfig {
    /// Entry lifetime as a [`Duration`].
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(PromptlyError::Config("cache.capacity must be at least 1".into()));
        }
        if self.ttl_secs == 0 {
            return Err(PromptlyError::Config("cache.ttl_secs must be at least 1".into()));
        }
        Ok(())
    }
}

/// Backend selection and per-call limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider: "openai", "anthropic", "google".
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model name passed to the provider.
    #[serde(default = "default_model")]
    pub model: String,
    /// Override for the provider's API base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Per-call timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Maximum tokens the model may generate.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Issue one strict-JSON re-prompt when structured output fails to parse.
    #[serde(default = "default_true")]
    pub retry_on_parse_failure: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            request_timeout_ms: default_request_timeout_ms(),
            max_output_tokens: default_max_output_tokens(),
            retry_on_parse_failure: true,
        }
    }
}

impl LlmConfig {
    /// Parsed provider.
    ///
    /// # Errors
    /// Returns `PromptlyError::Config` for an unknown provider name.
    pub fn provider(&self) -> Result<Provider> {
        self.provider.parse()
    }

    /// Per-call timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        self.provider()?;
        if self.request_timeout_ms == 0 {
            return Err(PromptlyError::Config("llm.request_timeout_ms must be positive".into()));
        }
        if self.max_output_tokens == 0 {
            return Err(PromptlyError::Config("llm.max_output_tokens must be positive".into()));
        }
        Ok(())
    }
}

/// Telemetry and observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Attach the built-in invocation counters to the telemetry bus.
    #[serde(default = "default_true")]
    pub counters: bool,
    /// Log every telemetry event at debug level.
    #[serde(default)]
    pub log_events: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            counters: true,
            log_events: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_provider() -> String { "openai".to_string() }
fn default_model() -> String { "gpt-4o-mini".to_string() }
fn default_max_retries() -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 500 }
fn default_max_delay_ms() -> u64 { 8_000 }
fn default_total_timeout_ms() -> u64 { 120_000 }
fn default_cache_capacity() -> usize { 256 }
fn default_cache_ttl_secs() -> u64 { 15 * 60 }
fn default_request_timeout_ms() -> u64 { 60_000 }
fn default_max_output_tokens() -> u32 { 2048 }

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = PromptlyConfig::from_toml("").expect("empty config parses");
        assert_eq!(config.retry, RetrySettings::default());
        assert_eq!(config.cache.ttl_secs, 900);
        assert!(config.llm.retry_on_parse_failure);
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = PromptlyConfig::from_toml(
            r#"
            [retry]
            max_retries = 5

            [llm]
            provider = "anthropic"
            model = "claude-3-5-haiku-latest"
            "#,
        )
        .expect("parses");
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.llm.provider().ok(), Some(Provider::Anthropic));
    }

    #[test]
    fn non_monotonic_delays_rejected() {
        assert!(RetrySettings::new(2, 5_000, 1_000, 10_000).is_err());
        assert!(RetrySettings::new(2, 100, 20_000, 10_000).is_err());
        assert!(RetrySettings::new(0, 0, 0, 0).is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            (env::MAX_RETRIES, "7"),
            (env::TOTAL_TIMEOUT_MS, "30000"),
            (env::CACHE_CAPACITY, "16"),
        ]
        .into_iter()
        .collect();
        let mut config = PromptlyConfig::default();
        config
            .apply_env_overrides(|k| vars.get(k).map(|v| (*v).to_string()))
            .expect("overrides parse");
        assert_eq!(config.retry.max_retries, 7);
        assert_eq!(config.retry.total_timeout_ms, 30_000);
        assert_eq!(config.cache.capacity, 16);
        assert_eq!(config.retry.base_delay_ms, 500);
    }

    #[test]
    fn malformed_env_override_is_config_error() {
        let mut config = PromptlyConfig::default();
        let err = config
            .apply_env_overrides(|k| (k == env::BASE_DELAY_MS).then(|| "-3".to_string()))
            .expect_err("negative rejected");
        assert!(matches!(err, PromptlyError::Config(_)));
    }

    #[test]
    fn zero_capacity_rejected() {
        let mut config = PromptlyConfig::default();
        config.cache.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_provider_rejected() {
        let mut config = PromptlyConfig::default();
        config.llm.provider = "cohere".into();
        assert!(config.validate().is_err());
    }
}
