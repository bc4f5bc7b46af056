//! Structured output: call the model, recover JSON, validate it, and
//! re-prompt once in strict-JSON mode if that fails.
//!
//! Both attempts run under one effective token, so the caller's timeout
//! covers the whole exchange. Backend failures are not parse failures and
//! are returned as-is without the strict re-prompt.

use promptly_core::config::RetrySettings;
use promptly_core::telemetry::{EventKind, TelemetryEvent};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cancel::{EffectiveToken, compose};
use crate::client::{CallOptions, TextBackend};
use crate::error::LlmError;
use crate::extract::parse_json;
use crate::retry::RetryEngine;
use crate::types::{Structured, StructuredOptions};

/// Appended to the prompt for the strict-JSON re-prompt.
pub const STRICT_JSON_INSTRUCTION: &str = "\n\nIMPORTANT: Respond with a single valid JSON value and nothing else. \
Do not wrap it in markdown code fences, do not add a label, and do not explain it.";

/// Validator that deserializes straight into `T`.
///
/// # Errors
/// The serde error message when `value` does not fit `T`.
pub fn deserialize_into<T: DeserializeOwned>(value: Value) -> Result<T, String> {
    serde_json::from_value(value).map_err(|e| e.to_string())
}

/// The prompt used for the strict-JSON re-prompt.
#[must_use]
pub fn strict_prompt(prompt: &str) -> String {
    format!("{prompt}{STRICT_JSON_INSTRUCTION}")
}

enum AttemptError {
    Call(LlmError),
    Parse(String),
}

/// Request a JSON value from `backend` and validate it.
///
/// # Errors
/// - [`LlmError::InvalidInput`] for a blank prompt or model, or a zero
///   token limit or timeout,
/// - any retry-engine error from either call,
/// - [`LlmError::Parse`] with `parse_failed` set when no attempt produced a
///   valid value.
pub async fn request_structured<T, V>(
    engine: &RetryEngine,
    backend: &dyn TextBackend,
    settings: &RetrySettings,
    prompt: &str,
    validate: V,
    options: &StructuredOptions,
) -> Result<Structured<T>, LlmError>
where
    V: Fn(Value) -> Result<T, String>,
{
    if prompt.trim().is_empty() {
        return Err(LlmError::InvalidInput("prompt: must not be empty".into()));
    }
    if options.model.trim().is_empty() {
        return Err(LlmError::InvalidInput("model: must not be empty".into()));
    }
    if options.max_output_tokens == 0 {
        return Err(LlmError::InvalidInput("max_output_tokens: must be positive".into()));
    }
    if options.timeout.is_zero() {
        return Err(LlmError::InvalidInput("timeout: must be positive".into()));
    }

    let invocation_id = Uuid::new_v4();
    let start = Instant::now();
    let token = compose(options.timeout, options.cancel.as_ref());
    let call = StructuredCall {
        engine,
        backend,
        settings,
        options,
        token: &token,
        validate: &validate,
    };

    let (result, attempts) = match call.attempt(prompt).await {
        Ok(value) => (Ok(Structured { value, used_fallback: false }), 1),
        Err(AttemptError::Call(err)) => (Err(err), 1),
        Err(AttemptError::Parse(message)) if !options.retry_on_parse_failure => (
            Err(LlmError::Parse {
                message,
                parse_failed: true,
                attempts: 1,
            }),
            1,
        ),
        Err(AttemptError::Parse(message)) => {
            warn!(%invocation_id, "structured output unusable, re-prompting for strict JSON: {}", message);
            match call.attempt(&strict_prompt(prompt)).await {
                Ok(value) => (Ok(Structured { value, used_fallback: true }), 2),
                Err(AttemptError::Call(err)) => (Err(err), 2),
                Err(AttemptError::Parse(message)) => (
                    Err(LlmError::Parse {
                        message,
                        parse_failed: true,
                        attempts: 2,
                    }),
                    2,
                ),
            }
        }
    };

    let provider = backend.provider();
    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    match &result {
        Ok(structured) => {
            debug!(%invocation_id, attempts, used_fallback = structured.used_fallback, "structured output recovered");
            engine.bus().publish_with(|| {
                TelemetryEvent::success(
                    invocation_id,
                    EventKind::Structured,
                    provider,
                    options.model.as_str(),
                    attempts,
                    duration_ms,
                )
                .with_fallback(structured.used_fallback)
            });
        }
        Err(err) => {
            warn!(%invocation_id, attempts, code = %err.code(), "structured request failed: {}", err);
            engine.bus().publish_with(|| {
                TelemetryEvent::failure(
                    invocation_id,
                    EventKind::Structured,
                    provider,
                    options.model.as_str(),
                    attempts,
                    duration_ms,
                    err.code(),
                    err.status(),
                )
                .with_fallback(attempts > 1)
            });
        }
    }

    result
}

struct StructuredCall<'a, V> {
    engine: &'a RetryEngine,
    backend: &'a dyn TextBackend,
    settings: &'a RetrySettings,
    options: &'a StructuredOptions,
    token: &'a EffectiveToken,
    validate: &'a V,
}

impl<V> StructuredCall<'_, V> {
    async fn attempt<T>(&self, prompt: &str) -> Result<T, AttemptError>
    where
        V: Fn(Value) -> Result<T, String>,
    {
        let backend = self.backend;
        let max_tokens = self.options.max_output_tokens;
        let call_options = CallOptions {
            model: &self.options.model,
            timeout: self.token.timeout(),
            signal: self.token,
        };
        let call_options = &call_options;

        let completion = self
            .engine
            .execute(
                move || backend.generate_text(prompt, max_tokens, call_options),
                backend.provider(),
                &self.options.model,
                self.token,
                self.settings,
            )
            .await
            .map_err(AttemptError::Call)?;

        let value = parse_json(&completion.content)
            .map_err(|e| AttemptError::Parse(format!("invalid JSON: {e}")))?;
        (self.validate)(value).map_err(|e| AttemptError::Parse(format!("validation failed: {e}")))
    }
}
