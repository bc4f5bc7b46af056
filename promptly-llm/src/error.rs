//! LLM error types.
//!
//! Three layers:
//! - [`BackendError`]: what a provider adapter returns, provider-shaped.
//! - [`ClassifiedError`]: a raw failure normalised into the taxonomy by
//!   [`crate::classify::classify`]. Produced once, never re-classified.
//! - [`LlmError`]: the terminal error surfaced to callers.

use std::fmt;

use promptly_core::{ErrorCode, PromptlyError, Provider};
use serde::Serialize;
use thiserror::Error;

use crate::cancel::CancelReason;

/// A raw failure normalised into the error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{message}")]
pub struct ClassifiedError {
    /// Taxonomy code.
    pub code: ErrorCode,
    /// Whether the retry engine may try again.
    pub retryable: bool,
    /// HTTP-like status, when the failure carried one.
    pub status: Option<u16>,
    /// Provider-specific error code (e.g. `insufficient_quota`).
    pub provider_code: Option<String>,
    /// What the caller can do about it.
    pub hint: Option<String>,
    /// Human-readable summary. Never contains the raw provider body.
    pub message: String,
}

impl ClassifiedError {
    /// A non-retryable error with no status or hint.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            retryable: false,
            status: None,
            provider_code: None,
            hint: None,
            message: message.into(),
        }
    }

    /// Set retryability.
    #[must_use]
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Attach an HTTP-like status.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach the provider's own error code.
    #[must_use]
    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    /// Attach a recovery hint.
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Failure returned by a provider adapter, before classification.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Non-success HTTP status. `message` is the provider's text and is only
    /// ever logged, never surfaced.
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        provider_code: Option<String>,
        message: String,
    },

    /// Error reported inside a success body.
    #[error("provider error {provider_code}: {message}")]
    Api {
        provider_code: String,
        message: String,
    },

    /// Connection, TLS or protocol failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The per-call timeout elapsed.
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// The call observed the cancellation signal.
    #[error("request cancelled")]
    Cancelled,

    /// Success status but no usable text.
    #[error("empty response (possibly blocked or filtered)")]
    EmptyResponse,

    /// Already classified upstream; passes through the classifier unchanged.
    #[error(transparent)]
    Classified(ClassifiedError),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout(0)
        } else if let Some(status) = err.status() {
            BackendError::Http {
                status: status.as_u16(),
                provider_code: None,
                message: err.to_string(),
            }
        } else if err.is_decode() {
            BackendError::Other(format!("undecodable response body: {err}"))
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

impl From<ClassifiedError> for BackendError {
    fn from(err: ClassifiedError) -> Self {
        BackendError::Classified(err)
    }
}

/// Terminal error surfaced to callers of the invocation core.
#[derive(Debug, Error)]
pub enum LlmError {
    /// A single attempt failed with a non-retryable error.
    #[error("{0}")]
    Classified(ClassifiedError),

    /// Every permitted attempt failed with a retryable error.
    #[error("All {attempts} LLM attempts exhausted; last error: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: ClassifiedError,
    },

    /// The effective token fired (caller cancellation or per-call timeout).
    #[error("LLM request {reason} after {attempts} attempt(s)")]
    Cancelled {
        reason: CancelReason,
        attempts: u32,
        last: Option<ClassifiedError>,
    },

    /// The total-time budget would be exceeded by another attempt or sleep.
    #[error("LLM retry budget of {budget_ms}ms exhausted after {attempts} attempt(s) ({elapsed_ms}ms elapsed)")]
    BudgetExceeded {
        budget_ms: u64,
        elapsed_ms: u64,
        attempts: u32,
        last: Option<ClassifiedError>,
    },

    /// Structured output could not be parsed or validated.
    #[error("Failed to parse structured LLM output after {attempts} attempt(s): {message}")]
    Parse {
        message: String,
        parse_failed: bool,
        attempts: u32,
    },

    /// Caller-supplied data was rejected before any backend call.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error.
    #[error("LLM configuration error: {0}")]
    Config(String),
}

impl LlmError {
    /// Stable taxonomy code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Classified(e) => e.code,
            Self::RetriesExhausted { .. } => ErrorCode::RetriesExhausted,
            Self::Cancelled { .. } | Self::BudgetExceeded { .. } => ErrorCode::Timeout,
            Self::Parse { .. } => ErrorCode::ParseFailed,
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::Config(_) => ErrorCode::Failed,
        }
    }

    /// The last classified attempt error, if one exists.
    #[must_use]
    pub fn last_cause(&self) -> Option<&ClassifiedError> {
        match self {
            Self::Classified(e) | Self::RetriesExhausted { last: e, .. } => Some(e),
            Self::Cancelled { last, .. } | Self::BudgetExceeded { last, .. } => last.as_ref(),
            _ => None,
        }
    }

    /// HTTP-like status captured at classification time.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.last_cause().and_then(|e| e.status)
    }

    /// Recovery hint for the caller.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::Classified(e) => e.hint.clone(),
            Self::RetriesExhausted { last, .. } => Some(match &last.hint {
                Some(h) => format!("Gave up after repeated failures. {h}"),
                None => "Gave up after repeated failures; try again later".to_string(),
            }),
            Self::Cancelled { reason: CancelReason::TimedOut, .. } => {
                Some("Increase the request timeout or shorten the prompt".into())
            }
            Self::Cancelled { reason: CancelReason::Cancelled, .. } => None,
            Self::BudgetExceeded { .. } => {
                Some("Raise retry.total_timeout_ms or reduce retry.max_retries".into())
            }
            Self::Parse { .. } => Some("The model did not return valid JSON; simplify the request".into()),
            Self::InvalidInput(_) => Some("Fix the request arguments and resend".into()),
            Self::Config(_) => None,
        }
    }

    /// Whether the attempts stopped because of time or cancellation.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.code() == ErrorCode::Timeout
    }

    /// User-visible summary: stable code, message, optional hint and status.
    #[must_use]
    pub fn report(&self) -> ErrorReport {
        let (attempts, parse_failed) = match self {
            Self::RetriesExhausted { attempts, .. }
            | Self::Cancelled { attempts, .. }
            | Self::BudgetExceeded { attempts, .. } => (Some(*attempts), false),
            Self::Parse {
                attempts,
                parse_failed,
                ..
            } => (Some(*attempts), *parse_failed),
            _ => (None, false),
        };
        ErrorReport {
            code: self.code(),
            message: self.to_string(),
            hint: self.hint(),
            status: self.status(),
            attempts,
            parse_failed,
        }
    }
}

impl From<ClassifiedError> for LlmError {
    fn from(err: ClassifiedError) -> Self {
        LlmError::Classified(err)
    }
}

impl From<PromptlyError> for LlmError {
    fn from(err: PromptlyError) -> Self {
        match err {
            PromptlyError::InvalidInput { field, reason } => {
                LlmError::InvalidInput(format!("{field}: {reason}"))
            }
            other => LlmError::Config(other.to_string()),
        }
    }
}

/// Serializable summary of a terminal failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub parse_failed: bool,
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, " (hint: {hint})")?;
        }
        Ok(())
    }
}

/// Name used for a provider inside messages.
pub(crate) fn provider_label(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAi => "OpenAI",
        Provider::Anthropic => "Anthropic",
        Provider::Google => "Google",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate_limited() -> ClassifiedError {
        ClassifiedError::new(ErrorCode::RateLimited, "throttled")
            .retryable(true)
            .with_status(429)
            .with_hint("Back off")
    }

    #[test]
    fn exhaustion_is_distinct_but_keeps_last_cause() {
        let err = LlmError::RetriesExhausted {
            attempts: 4,
            last: rate_limited(),
        };
        assert_eq!(err.code(), ErrorCode::RetriesExhausted);
        let last = err.last_cause().expect("last cause");
        assert_eq!(last.code, ErrorCode::RateLimited);
        assert_eq!(err.status(), Some(429));
        assert!(err.hint().expect("hint").contains("Back off"));
    }

    #[test]
    fn cancellation_and_budget_report_timeout_code() {
        let cancelled = LlmError::Cancelled {
            reason: CancelReason::Cancelled,
            attempts: 1,
            last: Some(rate_limited()),
        };
        let budget = LlmError::BudgetExceeded {
            budget_ms: 100,
            elapsed_ms: 90,
            attempts: 2,
            last: None,
        };
        assert!(cancelled.is_timeout());
        assert!(budget.is_timeout());
    }

    #[test]
    fn report_carries_parse_flag() {
        let err = LlmError::Parse {
            message: "expected value".into(),
            parse_failed: true,
            attempts: 2,
        };
        let report = err.report();
        assert_eq!(report.code, ErrorCode::ParseFailed);
        assert!(report.parse_failed);
        assert_eq!(report.attempts, Some(2));

        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["parse_failed"], true);
        assert_eq!(json["code"], "PARSE_FAILED");
    }

    #[test]
    fn invalid_input_maps_from_core_error() {
        let err: LlmError = PromptlyError::invalid("prompt", "must not be empty").into();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
        assert!(err.to_string().contains("prompt"));
    }
}
