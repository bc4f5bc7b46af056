//! Shared fixtures: a backend that replays a script of results.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use promptly_core::config::RetrySettings;
use promptly_core::{Provider, ResultCache};
use promptly_llm::{BackendError, CallOptions, Invoker, RetryEngine, TextBackend};

/// Replays scripted results in order; once the script runs out it returns
/// `fallback` forever.
pub struct ScriptedBackend {
    provider: Provider,
    script: Mutex<VecDeque<Result<String, BackendError>>>,
    fallback: fn() -> Result<String, BackendError>,
    latency: Duration,
    calls: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Result<String, BackendError>>) -> Self {
        Self {
            provider: Provider::OpenAi,
            script: Mutex::new(script.into()),
            fallback: || Ok("fallback".to_string()),
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn always(fallback: fn() -> Result<String, BackendError>) -> Self {
        Self {
            fallback,
            ..Self::new(Vec::new())
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

#[async_trait]
impl TextBackend for ScriptedBackend {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn generate_text(
        &self,
        prompt: &str,
        _max_tokens: u32,
        _options: &CallOptions<'_>,
    ) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().expect("prompts lock").push(prompt.to_string());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let next = self.script.lock().expect("script lock").pop_front();
        next.unwrap_or_else(self.fallback)
    }
}

pub fn unavailable() -> Result<String, BackendError> {
    Err(BackendError::Http {
        status: 503,
        provider_code: None,
        message: "upstream overloaded".into(),
    })
}

pub fn throttled() -> Result<String, BackendError> {
    Err(BackendError::Http {
        status: 429,
        provider_code: Some("rate_limit_exceeded".into()),
        message: "slow down".into(),
    })
}

pub fn unauthorized() -> Result<String, BackendError> {
    Err(BackendError::Http {
        status: 401,
        provider_code: Some("invalid_api_key".into()),
        message: "bad key".into(),
    })
}

pub fn settings(max_retries: u32, base_ms: u64, max_ms: u64, total_ms: u64) -> RetrySettings {
    RetrySettings::new(max_retries, base_ms, max_ms, total_ms).expect("valid retry settings")
}

pub fn invoker(backend: Arc<ScriptedBackend>, settings: RetrySettings) -> Invoker {
    Invoker::new(RetryEngine::default(), Arc::new(ResultCache::default()), settings)
        .with_default_provider(Provider::OpenAi)
        .with_backend(backend)
}
