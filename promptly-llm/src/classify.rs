//! Error classifier: maps provider-shaped failures onto the taxonomy.
//!
//! Pure and total: every [`BackendError`] yields a [`ClassifiedError`], and an
//! error that is already classified comes back unchanged.
//!
//! | input                                   | code          | retryable |
//! |-----------------------------------------|---------------|-----------|
//! | HTTP 429 / quota or rate-limit code     | `RateLimited` | yes       |
//! | HTTP 401, 403 / credential code         | `AuthFailed`  | no        |
//! | HTTP 500, 502, 503, 504                 | `Failed`      | yes       |
//! | per-call timeout, cancellation          | `Timeout`     | no        |
//! | empty body, anything else               | `Failed`      | no        |

use promptly_core::{ErrorCode, Provider};

use crate::error::{BackendError, ClassifiedError, provider_label};

/// Statuses worth another attempt.
pub const RETRYABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

/// Provider codes meaning "slow down" (compared case-insensitively).
const RATE_LIMIT_CODES: &[&str] = &[
    "rate_limit_exceeded",
    "rate_limit_error",
    "insufficient_quota",
    "resource_exhausted",
];

/// Provider codes meaning "your credential is wrong".
const AUTH_CODES: &[&str] = &[
    "invalid_api_key",
    "authentication_error",
    "permission_error",
    "unauthenticated",
    "permission_denied",
];

/// Normalise a raw backend failure.
#[must_use]
pub fn classify(raw: BackendError, provider: Provider) -> ClassifiedError {
    let label = provider_label(provider);
    match raw {
        BackendError::Classified(err) => err,
        BackendError::Http {
            status,
            provider_code,
            ..
        } => classify_status(status, provider_code, provider),
        BackendError::Api { provider_code, .. } => {
            match code_rule(&provider_code, provider) {
                Some(err) => err.with_provider_code(provider_code),
                None => ClassifiedError::new(
                    ErrorCode::Failed,
                    format!("{label} reported error {provider_code}"),
                )
                .with_provider_code(provider_code),
            }
        }
        BackendError::Timeout(ms) => {
            let message = if ms == 0 {
                format!("{label} request timed out")
            } else {
                format!("{label} request timed out after {ms}ms")
            };
            ClassifiedError::new(ErrorCode::Timeout, message)
                .with_hint("Increase the request timeout or shorten the prompt")
        }
        BackendError::Cancelled => {
            ClassifiedError::new(ErrorCode::Timeout, format!("{label} request cancelled"))
        }
        BackendError::EmptyResponse => ClassifiedError::new(
            ErrorCode::Failed,
            format!("{label} returned an empty response (possibly blocked or filtered)"),
        )
        .with_hint("The output may have been filtered; rephrase the prompt and try again"),
        BackendError::Transport(msg) => ClassifiedError::new(
            ErrorCode::Failed,
            format!("{label} request failed: {msg}"),
        ),
        BackendError::Other(msg) => {
            ClassifiedError::new(ErrorCode::Failed, format!("{label} call failed: {msg}"))
        }
    }
}

fn classify_status(status: u16, provider_code: Option<String>, provider: Provider) -> ClassifiedError {
    let label = provider_label(provider);
    let classified = status_rule(status, provider)
        .or_else(|| provider_code.as_deref().and_then(|c| code_rule(c, provider)))
        .unwrap_or_else(|| {
            ClassifiedError::new(
                ErrorCode::Failed,
                format!("{label} request failed with status {status}"),
            )
        })
        .with_status(status);

    match provider_code {
        Some(code) => classified.with_provider_code(code),
        None => classified,
    }
}

fn status_rule(status: u16, provider: Provider) -> Option<ClassifiedError> {
    let label = provider_label(provider);
    match status {
        429 => Some(rate_limited(provider)),
        401 | 403 => Some(auth_failed(provider)),
        500 | 502 | 503 | 504 => Some(
            ClassifiedError::new(
                ErrorCode::Failed,
                format!("{label} server error (status {status})"),
            )
            .retryable(true)
            .with_hint(format!("{label} is having trouble; retry later")),
        ),
        _ => None,
    }
}

fn code_rule(code: &str, provider: Provider) -> Option<ClassifiedError> {
    let code = code.to_ascii_lowercase();
    if RATE_LIMIT_CODES.contains(&code.as_str()) {
        Some(rate_limited(provider))
    } else if AUTH_CODES.contains(&code.as_str()) {
        Some(auth_failed(provider))
    } else {
        None
    }
}

fn rate_limited(provider: Provider) -> ClassifiedError {
    let label = provider_label(provider);
    ClassifiedError::new(ErrorCode::RateLimited, format!("{label} rate limit reached"))
        .retryable(true)
        .with_hint("Back off and retry, or reduce request frequency")
}

fn auth_failed(provider: Provider) -> ClassifiedError {
    let label = provider_label(provider);
    ClassifiedError::new(ErrorCode::AuthFailed, format!("{label} rejected the credential"))
        .with_hint(format!("Check the {} credential", provider.credential_env()))
}
