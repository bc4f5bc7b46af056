//! Core types shared by every promptly crate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PromptlyError;

/// LLM provider a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenAI chat completions API.
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
    /// Google Gemini `generateContent` API.
    Google,
}

impl Provider {
    /// All supported providers.
    pub const ALL: [Provider; 3] = [Provider::OpenAi, Provider::Anthropic, Provider::Google];

    /// Stable lowercase name, used in logs and telemetry.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
        }
    }

    /// Environment variable expected to hold this provider's API key.
    #[must_use]
    pub fn credential_env(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Google => "GOOGLE_API_KEY",
        }
    }

    /// Default public API base URL.
    #[must_use]
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Google => "https://generativelanguage.googleapis.com",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = PromptlyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "google" | "gemini" => Ok(Self::Google),
            other => Err(PromptlyError::Config(format!("unknown provider: {other}"))),
        }
    }
}

/// Stable taxonomy code attached to every terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Provider signalled throttling (HTTP 429 or a quota code).
    RateLimited,
    /// Invalid or missing credential.
    AuthFailed,
    /// Time budget exhausted or the request was cancelled.
    Timeout,
    /// Generic backend failure.
    Failed,
    /// Caller-supplied data failed validation before any backend call.
    InvalidInput,
    /// Model output could not be parsed or validated as structured JSON.
    ParseFailed,
    /// Every permitted attempt failed with a retryable error.
    RetriesExhausted,
}

impl ErrorCode {
    /// All taxonomy codes, in a stable order.
    pub const ALL: [ErrorCode; 7] = [
        ErrorCode::RateLimited,
        ErrorCode::AuthFailed,
        ErrorCode::Timeout,
        ErrorCode::Failed,
        ErrorCode::InvalidInput,
        ErrorCode::ParseFailed,
        ErrorCode::RetriesExhausted,
    ];

    /// Wire name of the code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "RATE_LIMITED",
            Self::AuthFailed => "AUTH_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Failed => "FAILED",
            Self::InvalidInput => "INVALID_INPUT",
            Self::ParseFailed => "PARSE_FAILED",
            Self::RetriesExhausted => "RETRIES_EXHAUSTED",
        }
    }

    /// Position of the code inside [`ErrorCode::ALL`].
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
