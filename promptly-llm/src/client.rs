//! Provider adapters: one [`TextBackend`] capability, three wire shapes.
//!
//! Each adapter turns `(prompt, max_tokens)` into a provider request and the
//! response back into plain text. Failures are reported as [`BackendError`]
//! with the HTTP status and the provider's own error code pulled from the
//! JSON error body; classification happens later, in the retry engine.
//! Retrying is never done here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use promptly_core::config::LlmConfig;
use promptly_core::{ErrorCode, Provider};
use reqwest::{Client, RequestBuilder};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::cancel::EffectiveToken;
use crate::error::{BackendError, ClassifiedError, LlmError};

/// Version header required by the Anthropic messages API.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Per-call options handed to a backend.
#[derive(Debug, Clone, Copy)]
pub struct CallOptions<'a> {
    /// Model name.
    pub model: &'a str,
    /// HTTP timeout for this single call.
    pub timeout: Duration,
    /// Effective cancellation for the whole request.
    pub signal: &'a EffectiveToken,
}

/// A provider that turns a prompt into text.
#[async_trait]
pub trait TextBackend: Send + Sync {
    /// Which provider this adapter talks to.
    fn provider(&self) -> Provider;

    /// Generate a completion for `prompt`.
    async fn generate_text(
        &self,
        prompt: &str,
        max_tokens: u32,
        options: &CallOptions<'_>,
    ) -> Result<String, BackendError>;
}

/// Send a JSON request, honouring the timeout and the cancellation signal,
/// and return the decoded success body.
async fn send_json(request: RequestBuilder, options: &CallOptions<'_>) -> Result<Value, BackendError> {
    let timeout = options.timeout.min(options.signal.remaining());
    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);

    let response = tokio::select! {
        biased;
        _ = options.signal.cancelled() => return Err(BackendError::Cancelled),
        result = request.timeout(timeout).send() => result,
    };
    let response = response.map_err(|e| {
        if e.is_timeout() {
            BackendError::Timeout(timeout_ms)
        } else {
            BackendError::from(e)
        }
    })?;

    let status = response.status();
    let body = response.text().await.map_err(BackendError::from)?;
    let json: Option<Value> = serde_json::from_str(&body).ok();

    if !status.is_success() {
        let (provider_code, message) = json
            .as_ref()
            .map(error_fields)
            .unwrap_or((None, String::new()));
        warn!(status = status.as_u16(), provider_code = ?provider_code, "provider returned error status");
        return Err(BackendError::Http {
            status: status.as_u16(),
            provider_code,
            message,
        });
    }

    let json = json.ok_or_else(|| BackendError::Other("response body is not JSON".into()))?;
    if json.get("error").is_some_and(Value::is_object) {
        let (code, message) = error_fields(&json);
        return Err(BackendError::Api {
            provider_code: code.unwrap_or_else(|| "unknown".into()),
            message,
        });
    }
    Ok(json)
}

/// Pull `(provider_code, message)` from a provider error body.
///
/// OpenAI: `error.code` (falling back to `error.type`); Anthropic:
/// `error.type`; Google: `error.status` (its `error.code` is numeric).
pub fn error_fields(body: &Value) -> (Option<String>, String) {
    let err = &body["error"];
    let code = err["code"]
        .as_str()
        .or_else(|| err["status"].as_str())
        .or_else(|| err["type"].as_str())
        .map(str::to_string);
    let message = err["message"].as_str().unwrap_or_default().to_string();
    (code, message)
}

fn join_base(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

/// OpenAI chat completions adapter.
pub struct OpenAiBackend {
    http: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiBackend {
    /// Create an adapter for `base_url` (e.g. `https://api.openai.com`).
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl TextBackend for OpenAiBackend {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    async fn generate_text(
        &self,
        prompt: &str,
        max_tokens: u32,
        options: &CallOptions<'_>,
    ) -> Result<String, BackendError> {
        let url = join_base(&self.base_url, "/v1/chat/completions");
        let body = json!({
            "model": options.model,
            "messages": [
                { "role": "user", "content": prompt },
            ],
            "max_tokens": max_tokens,
        });
        debug!(model = options.model, "calling OpenAI");

        let request = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body);
        let json = send_json(request, options).await?;

        Ok(json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string())
    }
}

// ---------------------------------------------------------------------------
// Anthropic
// ---------------------------------------------------------------------------

/// Anthropic messages adapter.
pub struct AnthropicBackend {
    http: Client,
    base_url: String,
    api_key: String,
}

impl AnthropicBackend {
    /// Create an adapter for `base_url` (e.g. `https://api.anthropic.com`).
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl TextBackend for AnthropicBackend {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn generate_text(
        &self,
        prompt: &str,
        max_tokens: u32,
        options: &CallOptions<'_>,
    ) -> Result<String, BackendError> {
        let url = join_base(&self.base_url, "/v1/messages");
        let body = json!({
            "model": options.model,
            "max_tokens": max_tokens,
            "messages": [
                { "role": "user", "content": prompt },
            ],
        });
        debug!(model = options.model, "calling Anthropic");

        let request = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        let json = send_json(request, options).await?;

        let text = json["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"] == "text")
                    .filter_map(|b| b["text"].as_str())
                    .collect::<String>()
            })
            .unwrap_or_default();
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Google
// ---------------------------------------------------------------------------

/// Google Gemini `generateContent` adapter.
pub struct GoogleBackend {
    http: Client,
    base_url: String,
    api_key: String,
}

impl GoogleBackend {
    /// Create an adapter for `base_url`
    /// (e.g. `https://generativelanguage.googleapis.com`).
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl TextBackend for GoogleBackend {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    async fn generate_text(
        &self,
        prompt: &str,
        max_tokens: u32,
        options: &CallOptions<'_>,
    ) -> Result<String, BackendError> {
        let url = join_base(
            &self.base_url,
            &format!("/v1beta/models/{}:generateContent", options.model),
        );
        let body = json!({
            "contents": [
                { "role": "user", "parts": [{ "text": prompt }] },
            ],
            "generationConfig": { "maxOutputTokens": max_tokens },
        });
        debug!(model = options.model, "calling Google");

        let request = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body);
        let json = send_json(request, options).await?;

        if let Some(reason) = json["promptFeedback"]["blockReason"].as_str() {
            debug!(reason, "Google blocked the prompt");
            return Err(BackendError::EmptyResponse);
        }

        let text = json["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<String>()
            })
            .unwrap_or_default();
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Construction from configuration
// ---------------------------------------------------------------------------

/// Build the configured backend, reading the API key from the provider's
/// credential environment variable.
///
/// # Errors
/// `LlmError::Config` for an unknown provider; `AuthFailed` if the
/// credential variable is unset or empty.
pub fn build_backend(config: &LlmConfig) -> Result<Arc<dyn TextBackend>, LlmError> {
    let provider = config.provider()?;
    build_backend_with(provider, config.base_url.as_deref(), |key| std::env::var(key).ok())
}

/// Like [`build_backend`] with an injectable environment lookup.
///
/// # Errors
/// `AuthFailed` if the credential is unset or empty.
pub fn build_backend_with<F>(
    provider: Provider,
    base_url: Option<&str>,
    lookup: F,
) -> Result<Arc<dyn TextBackend>, LlmError>
where
    F: Fn(&str) -> Option<String>,
{
    let env_key = provider.credential_env();
    let api_key = lookup(env_key)
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| {
            LlmError::Classified(
                ClassifiedError::new(ErrorCode::AuthFailed, format!("{env_key} is not set"))
                    .with_hint(format!("Check the {env_key} credential")),
            )
        })?;
    let base_url = base_url.unwrap_or_else(|| provider.default_base_url()).to_string();

    let backend: Arc<dyn TextBackend> = match provider {
        Provider::OpenAi => Arc::new(OpenAiBackend::new(base_url, api_key)),
        Provider::Anthropic => Arc::new(AnthropicBackend::new(base_url, api_key)),
        Provider::Google => Arc::new(GoogleBackend::new(base_url, api_key)),
    };
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_fields_per_provider_shape() {
        let openai = json!({"error": {"message": "quota", "type": "insufficient_quota", "code": "insufficient_quota"}});
        assert_eq!(error_fields(&openai).0.as_deref(), Some("insufficient_quota"));

        let openai_null_code = json!({"error": {"message": "x", "type": "invalid_request_error", "code": null}});
        assert_eq!(error_fields(&openai_null_code).0.as_deref(), Some("invalid_request_error"));

        let anthropic = json!({"type": "error", "error": {"type": "rate_limit_error", "message": "slow"}});
        assert_eq!(error_fields(&anthropic).0.as_deref(), Some("rate_limit_error"));

        let google = json!({"error": {"code": 401, "message": "bad", "status": "UNAUTHENTICATED"}});
        let (code, message) = error_fields(&google);
        assert_eq!(code.as_deref(), Some("UNAUTHENTICATED"));
        assert_eq!(message, "bad");
    }

    #[test]
    fn missing_credential_is_auth_failure() {
        let err = build_backend_with(Provider::Anthropic, None, |_| None)
            .err()
            .expect("missing key rejected");
        assert_eq!(err.code(), ErrorCode::AuthFailed);
        assert!(err.hint().unwrap_or_default().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn builds_requested_provider() {
        let backend = build_backend_with(Provider::Google, Some("http://localhost:1"), |_| {
            Some("k".to_string())
        })
        .expect("builds");
        assert_eq!(backend.provider(), Provider::Google);
    }

    #[test]
    fn base_url_join_tolerates_trailing_slash() {
        assert_eq!(join_base("http://h/", "/v1/x"), "http://h/v1/x");
        assert_eq!(join_base("http://h", "/v1/x"), "http://h/v1/x");
    }
}
