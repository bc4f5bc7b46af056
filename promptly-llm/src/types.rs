//! Core types for LLM requests and responses.

use std::time::Duration;

use promptly_core::config::LlmConfig;
use promptly_core::{PromptlyError, Provider};
use tokio_util::sync::CancellationToken;

/// A single resilient completion request. Built per tool call and never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    /// Which backend to use.
    pub provider: Provider,
    /// Model name passed to the backend.
    pub model: String,
    /// Full prompt text.
    pub prompt: String,
    /// Maximum tokens to generate.
    pub max_output_tokens: u32,
    /// Timeout for the whole request (all attempts).
    pub timeout: Duration,
    /// Caller-side cancellation.
    pub cancel: Option<CancellationToken>,
}

impl InvocationRequest {
    /// Create a request with the default limits of [`LlmConfig`].
    #[must_use]
    pub fn new(provider: Provider, model: impl Into<String>, prompt: impl Into<String>) -> Self {
        let defaults = LlmConfig::default();
        Self {
            provider,
            model: model.into(),
            prompt: prompt.into(),
            max_output_tokens: defaults.max_output_tokens,
            timeout: defaults.request_timeout(),
            cancel: None,
        }
    }

    /// Create a request using the configured provider, model and limits.
    ///
    /// # Errors
    /// Returns `PromptlyError::Config` for an unknown provider name.
    pub fn from_config(config: &LlmConfig, prompt: impl Into<String>) -> Result<Self, PromptlyError> {
        Ok(Self {
            provider: config.provider()?,
            model: config.model.clone(),
            prompt: prompt.into(),
            max_output_tokens: config.max_output_tokens,
            timeout: config.request_timeout(),
            cancel: None,
        })
    }

    /// Set the token limit.
    #[must_use]
    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attach a caller cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Reject requests that could never succeed. Runs before any backend call.
    ///
    /// # Errors
    /// Returns `PromptlyError::InvalidInput` naming the offending field.
    pub fn validate(&self) -> Result<(), PromptlyError> {
        if self.prompt.trim().is_empty() {
            return Err(PromptlyError::invalid("prompt", "must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(PromptlyError::invalid("model", "must not be empty"));
        }
        if self.max_output_tokens == 0 {
            return Err(PromptlyError::invalid("max_output_tokens", "must be positive"));
        }
        if self.timeout.is_zero() {
            return Err(PromptlyError::invalid("timeout", "must be positive"));
        }
        Ok(())
    }
}

/// Successful resilient completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// The generated text (never blank).
    pub content: String,
    /// Attempts consumed, 1-based.
    pub attempts: u32,
}

/// Validated structured result.
#[derive(Debug, Clone, PartialEq)]
pub struct Structured<T> {
    /// The parsed, validated value.
    pub value: T,
    /// Whether the strict-JSON retry was needed to get it.
    pub used_fallback: bool,
}

/// Options for a structured-output request.
#[derive(Debug, Clone)]
pub struct StructuredOptions {
    /// Backend to use; `None` means the invoker's default provider.
    pub provider: Option<Provider>,
    /// Model name passed to the backend.
    pub model: String,
    /// Maximum tokens to generate.
    pub max_output_tokens: u32,
    /// Timeout composed into the effective token; covers both attempts.
    pub timeout: Duration,
    /// Issue one strict-JSON re-prompt on parse failure.
    pub retry_on_parse_failure: bool,
    /// Caller-side cancellation.
    pub cancel: Option<CancellationToken>,
}

impl StructuredOptions {
    /// Options taken from configuration.
    #[must_use]
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            provider: config.provider().ok(),
            model: config.model.clone(),
            max_output_tokens: config.max_output_tokens,
            timeout: config.request_timeout(),
            retry_on_parse_failure: config.retry_on_parse_failure,
            cancel: None,
        }
    }

    /// Route to a specific provider.
    #[must_use]
    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable the strict-JSON retry.
    #[must_use]
    pub fn with_parse_retry(mut self, enabled: bool) -> Self {
        self.retry_on_parse_failure = enabled;
        self
    }

    /// Attach a caller cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

impl Default for StructuredOptions {
    fn default() -> Self {
        Self::from_config(&LlmConfig::default())
    }
}
